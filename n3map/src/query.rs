//! Building, sending and dissecting DNS queries.
//!
//! Queries go out over UDP with EDNS0 (DO bit, 4096 byte buffer) and no
//! recursion; a truncated reply is retried over TCP against the same server.

use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use byteorder::{NetworkEndian, WriteBytesExt};
use n3map_proto::error::ParseError;
use n3map_proto::{EdnsConfig, HeaderFlags, Message, Name, RCode, RecordType};

use crate::error::{Error, Result};
use crate::records::{Nsec3Record, NsecRecord};

pub const EDNS_BUFSIZE: u16 = 4096;

/// Sends one DNS query to one server and returns the parsed response.
///
/// Implementations classify failures as [`Error::Timeout`], [`Error::Query`]
/// or [`Error::UnexpectedResponseStatus`]; the query provider handles the
/// retry and accounting policy on top of this. The trait exists so the
/// providers and walkers can be driven by scripted responses in tests.
pub trait Transport: Send + Sync {
    fn query(
        &self,
        query_dn: &Name,
        rrtype: RecordType,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<QueryResponse>;
}

/// The real transport: UDP with TCP fallback on truncation.
pub struct UdpTransport;

impl Transport for UdpTransport {
    fn query(
        &self,
        query_dn: &Name,
        rrtype: RecordType,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<QueryResponse> {
        let data = prepare_query(query_dn, rrtype, false)?;
        let raw = send_query_udp(addr, &data, timeout)?;
        let msg = match Message::parse(&mut Cursor::new(&raw)) {
            Ok(msg) => msg,
            Err(ParseError::TruncatedMessage) => {
                let raw = send_query_tcp(addr, &data, timeout)?;
                Message::parse(&mut Cursor::new(&raw)).map_err(|_| Error::Query)?
            }
            Err(_) => return Err(Error::Query),
        };
        QueryResponse::from_message(msg)
    }
}

/// Encodes a query for `query_dn` with EDNS0, DO=1 and the given recursion
/// preference. Recursion is only requested when discovering the NS set
/// through the system's resolvers.
pub fn prepare_query(query_dn: &Name, rrtype: RecordType, rd: bool) -> Result<Vec<u8>> {
    let flags = HeaderFlags {
        aa: false,
        tc: false,
        rd,
        ra: false,
        ad: false,
        cd: false,
    };
    let msg = Message::new_query(
        query_dn.clone(),
        rrtype,
        flags,
        Some(EdnsConfig {
            do_flag: true,
            bufsize: EDNS_BUFSIZE,
        }),
    )
    .map_err(|e| Error::Other(format!("could not encode query: {}", e)))?;
    msg.encode()
        .map_err(|e| Error::Other(format!("could not encode query: {}", e)))
}

fn io_is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn send_query_udp(addr: SocketAddr, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    // match the bind address family to the server address
    let bind_addr: SocketAddr = if addr.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(addr).map_err(|_| Error::Query)?;
    socket
        .set_write_timeout(Some(Duration::from_secs(2)))
        .map_err(Error::Io)?;
    socket.send(data).map_err(|_| Error::Query)?;

    let msg_id = [data[0], data[1]];
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; EDNS_BUFSIZE as usize];
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(Error::Timeout)?;
        socket.set_read_timeout(Some(remaining)).map_err(Error::Io)?;
        match socket.recv(&mut buf) {
            // responses with a foreign message id are ignored, like any
            // other unexpected datagram
            Ok(n) if n >= 2 && buf[..2] == msg_id => return Ok(buf[..n].to_vec()),
            Ok(_) => continue,
            Err(e) if io_is_timeout(&e) => return Err(Error::Timeout),
            Err(_) => return Err(Error::Query),
        }
    }
}

fn send_query_tcp(addr: SocketAddr, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        if io_is_timeout(&e) {
            Error::Timeout
        } else {
            Error::Query
        }
    })?;
    stream.set_write_timeout(Some(timeout)).map_err(Error::Io)?;
    stream.set_read_timeout(Some(timeout)).map_err(Error::Io)?;

    // two-byte length framing, see RFC 1035, section 4.2.2
    let mut framed = Vec::with_capacity(data.len() + 2);
    framed.write_u16::<NetworkEndian>(data.len() as u16)?;
    framed.extend_from_slice(data);
    stream.write_all(&framed).map_err(|e| {
        if io_is_timeout(&e) {
            Error::Timeout
        } else {
            Error::Query
        }
    })?;

    let mut len = [0u8; 2];
    read_exact_classified(&mut stream, &mut len)?;
    let len = u16::from_be_bytes(len) as usize;
    let mut response = vec![0u8; len];
    read_exact_classified(&mut stream, &mut response)?;
    let _ = stream.shutdown(std::net::Shutdown::Both);
    Ok(response)
}

fn read_exact_classified(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).map_err(|e| {
        if io_is_timeout(&e) {
            Error::Timeout
        } else {
            Error::Query
        }
    })
}

/// A parsed DNS response with the accessors the walkers need.
#[derive(Clone, Debug)]
pub struct QueryResponse {
    msg: Message,
    status: RCode,
}

impl QueryResponse {
    /// Wraps a parsed message, rejecting responses whose status the walkers
    /// never want to see.
    pub fn from_message(msg: Message) -> Result<Self> {
        let status = msg.header.rcode.ok_or(Error::Query)?;
        if status != RCode::NOERROR && status != RCode::NXDOMAIN {
            return Err(Error::UnexpectedResponseStatus(status));
        }
        Ok(Self { msg, status })
    }

    pub fn status(&self) -> RCode {
        self.status
    }

    pub fn message(&self) -> &Message {
        &self.msg
    }

    pub fn answer_length(&self) -> usize {
        self.msg.answers.len()
    }

    fn section(&self, in_answer: bool) -> &[n3map_proto::Record] {
        if in_answer {
            &self.msg.answers
        } else {
            &self.msg.authoritative_answers
        }
    }

    /// The owner of the first SOA record in the answer or authority section.
    pub fn find_soa(&self, in_answer: bool) -> Option<Name> {
        self.section(in_answer)
            .iter()
            .filter_map(|r| r.as_nonopt())
            .find(|r| r.rtype == RecordType::SOA)
            .map(|r| r.owner.clone())
    }

    /// The owner of the first DNSKEY record in the answer section.
    pub fn find_dnskey(&self) -> Option<Name> {
        self.msg
            .answers
            .iter()
            .filter_map(|r| r.as_nonopt())
            .find(|r| r.rtype == RecordType::DNSKEY)
            .map(|r| r.owner.clone())
    }

    /// The owner of the first NS record in the answer or authority section.
    pub fn find_ns(&self, in_answer: bool) -> Option<Name> {
        self.section(in_answer)
            .iter()
            .filter_map(|r| r.as_nonopt())
            .find(|r| r.rtype == RecordType::NS)
            .map(|r| r.owner.clone())
    }

    /// The NS target names of the answer section (nameserver discovery).
    pub fn ns_names(&self) -> Vec<Name> {
        self.msg
            .answers
            .iter()
            .filter_map(|r| r.as_nonopt())
            .filter_map(|r| r.rdata().as_ns())
            .map(|ns| ns.name.clone())
            .collect()
    }

    /// All NSEC records of one section.
    pub fn find_nsec(&self, in_answer: bool) -> Result<Vec<NsecRecord>> {
        self.section(in_answer)
            .iter()
            .filter_map(|r| r.as_nonopt())
            .filter_map(|r| {
                r.rdata()
                    .as_nsec()
                    .map(|nsec| NsecRecord::from_wire(r.owner.clone(), r.ttl, nsec))
            })
            .collect()
    }

    /// All NSEC records of the answer and authority sections, in RR order.
    pub fn all_nsec_rrs(&self) -> Result<Vec<NsecRecord>> {
        let mut rrs = self.find_nsec(true)?;
        rrs.extend(self.find_nsec(false)?);
        Ok(rrs)
    }

    /// All NSEC3 records of the authority section.
    pub fn find_nsec3(&self) -> Result<Vec<Nsec3Record>> {
        self.msg
            .authoritative_answers
            .iter()
            .filter_map(|r| r.as_nonopt())
            .filter_map(|r| {
                r.rdata()
                    .as_nsec3()
                    .map(|nsec3| Nsec3Record::from_wire(r.owner.clone(), r.ttl, nsec3))
            })
            .collect()
    }

    /// The signer name of an RRSIG covering `(owner, type_covered)`,
    /// searching the answer section first and the authority section second.
    pub fn rrsig_signer(&self, owner: &Name, type_covered: RecordType) -> Option<Name> {
        for in_answer in [true, false] {
            let found = self
                .section(in_answer)
                .iter()
                .filter_map(|r| r.as_nonopt())
                .filter(|r| r.rtype == RecordType::RRSIG && r.owner == *owner)
                .filter_map(|r| r.rdata().as_rrsig())
                .find(|sig| sig.type_covered == type_covered)
                .map(|sig| sig.signer_name.clone());
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

/// Asks each of the given (recursive) resolvers for the NS set of `zone`
/// and returns the nameserver host names from the first useful answer.
pub fn query_ns_names(
    zone: &Name,
    resolvers: &[SocketAddr],
    timeout: Duration,
) -> Result<Vec<Name>> {
    let data = prepare_query(zone, RecordType::NS, true)?;
    for &resolver in resolvers {
        let raw = match send_query_udp(resolver, &data, timeout) {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let msg = match Message::parse(&mut Cursor::new(&raw)) {
            Ok(msg) => msg,
            Err(_) => continue,
        };
        match msg.header.rcode {
            Some(RCode::NOERROR) => (),
            Some(RCode::NXDOMAIN) => {
                return Err(Error::Other(
                    "failed to resolve nameservers for zone: NXDOMAIN".into(),
                ))
            }
            _ => continue,
        }
        let response = QueryResponse::from_message(msg)?;
        let names = response.ns_names();
        if !names.is_empty() {
            return Ok(names);
        }
    }
    Err(Error::Other("failed to resolve nameservers for zone".into()))
}
