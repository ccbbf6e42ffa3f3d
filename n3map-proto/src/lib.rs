//! `n3map-proto` provides the DNS data types the zone enumerator speaks, and
//! the means to de-/serialize them from/to the wire format: queries with
//! EDNS0/DO, responses, and the RDATA types relevant to walking DNSSEC
//! zones (SOA, DNSKEY, RRSIG, NSEC, NSEC3).
//!
//! # Basic usage example
//! ```rust
//! use n3map_proto::{EdnsConfig, HeaderFlags, Message, Name, RecordType};
//!
//! let flags = HeaderFlags { aa: false, tc: false, rd: false, ra: false, ad: false, cd: false };
//! let msg = Message::new_query(
//!     Name::from_ascii("example.com.").unwrap(),
//!     RecordType::A,
//!     flags,
//!     Some(EdnsConfig { do_flag: true, bufsize: 4096 }),
//! ).unwrap();
//! let _encoded = msg.encode().unwrap();
//! ```

use std::fmt::{self, Display};
use std::io::{Cursor, Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use repr_with_fallback::repr_with_fallback;
use strum_macros::EnumString;

pub mod error;
pub mod name;
pub mod rdata;
pub mod vis;

use error::{EncodeError, ParseError};
use rdata::RdataTrait;

pub use name::{Label, Name};
pub use rdata::Rdata;

/// Represents a DNS OpCode.
///
/// See
/// <https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5>
/// for further information.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Opcode {
    QUERY,
    IQUERY,
    STATUS,
    NOTIFY,
    UPDATE,
    DSO,
}

/// Represents a DNS RCODE, including those introduced by EDNS.
///
/// See
/// <https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6>
/// for further information.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum RCode {
    NOERROR,
    FORMERR,
    SERVFAIL,
    NXDOMAIN,
    NOTIMP,
    REFUSED,
    YXDOMAIN,
    YXRRSET,
    NXRRSET,
    NOTAUTH,
    NOTZONE,
    DSOTYPENI,
    BADVERSBADSIG,
    BADKEY,
    BADTIME,
    BADMODE,
    BADNAME,
    BADALG,
    BADTRUNC,
    BADCOOKIE,
}

repr_with_fallback! {
    /// Represents a DNS TYPE.
    ///
    /// Only the types the walker handles are named; everything else falls
    /// back to `Unknown`, which [`Display`]s as `TYPE<n>`.
    #[derive(PartialEq, Eq, Hash, Copy, Clone, EnumString, Debug)]
    #[non_exhaustive]
    pub enum RecordType {
        A = 1,
        NS = 2,
        CNAME = 5,
        SOA = 6,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        SRV = 33,
        OPT = 41,
        DS = 43,
        RRSIG = 46,
        NSEC = 47,
        DNSKEY = 48,
        NSEC3 = 50,
        NSEC3PARAM = 51,
        Unknown(u16),
    }
}

/// Represents a DNS CLASS.
///
/// See [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035) for further
/// information.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Class {
    IN,
    CH,
    HS,
    NONE,
    ANY,
}

/// Represents the flags of a [`Header`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct HeaderFlags {
    /// authoritative answer (valid in responses only)
    pub aa: bool,
    /// truncated
    pub tc: bool,
    /// recursion desired
    pub rd: bool,
    /// recursion available (valid in responses only)
    pub ra: bool,
    /// authenticated data
    pub ad: bool,
    /// checking disabled
    pub cd: bool,
}

/// Represents a DNS header.
/// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Header {
    /// Supplied by the questioner and reflected back unchanged.
    pub msg_id: u16,
    /// False for queries, true for responses.
    pub qr: bool,
    pub opcode: Opcode,
    pub flags: HeaderFlags,
    /// For queries: [`None`]. For responses: the status code of the server.
    pub rcode: Option<RCode>,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

/// An entry in the question section of a DNS message.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Question {
    pub qname: Name,
    pub qtype: RecordType,
    pub qclass: Class,
}

/// An entry in the answer, authority or additional section of a DNS message.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Record {
    OPT(OptRecord),
    NONOPT(NonOptRecord),
}

/// EDNS parameters for a query.
pub struct EdnsConfig {
    /// Sets the DO bit, asking the server for DNSSEC records.
    pub do_flag: bool,
    /// The payload size sent in the `OPT` record.
    pub bufsize: u16,
}

/// The `OPT` variant of [`Record`].
/// [\[RFC 6891\]](https://www.rfc-editor.org/rfc/rfc6891)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct OptRecord {
    /// The largest UDP payload the requestor can reassemble.
    pub payload_size: u16,
    /// `None` for queries. For responses this is the complete RCODE, i.e.
    /// including the upper bits carried in the OPT record.
    pub rcode: Option<RCode>,
    /// Almost always zero.
    pub edns_version: u8,
    /// The DO bit.
    pub dnssec_ok: bool,
    encoded_rdata: Vec<u8>,
    rdata: Rdata,
}

/// The `NONOPT` variant of [`Record`].
/// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NonOptRecord {
    /// The [`Name`] that this record is for.
    pub owner: Name,
    pub rtype: RecordType,
    pub class: Class,
    /// The number of seconds this record may be cached for.
    pub ttl: u32,
    encoded_rdata: Vec<u8>,
    rdata: Rdata,
}

/// Represents a DNS message.
/// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authoritative_answers: Vec<Record>,
    pub additional_answers: Vec<Record>,
}

impl Opcode {
    pub fn encode(&self) -> u8 {
        match self {
            Opcode::QUERY => 0,
            Opcode::IQUERY => 1,
            Opcode::STATUS => 2,
            Opcode::NOTIFY => 4,
            Opcode::UPDATE => 5,
            Opcode::DSO => 6,
        }
    }

    pub fn parse(val: u8) -> Result<Opcode, ParseError> {
        Ok(match val {
            0 => Opcode::QUERY,
            1 => Opcode::IQUERY,
            2 => Opcode::STATUS,
            4 => Opcode::NOTIFY,
            5 => Opcode::UPDATE,
            6 => Opcode::DSO,
            x => return Err(ParseError::InvalidOpcode(x)),
        })
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl RCode {
    /// Encodes an `RCode` as a byte; only the lower four bits are used, the
    /// upper eight bits of the extended RCODEs live in the OPT record.
    pub fn encode(&self) -> u8 {
        match self {
            RCode::NOERROR => 0,
            RCode::FORMERR => 1,
            RCode::SERVFAIL => 2,
            RCode::NXDOMAIN => 3,
            RCode::NOTIMP => 4,
            RCode::REFUSED => 5,
            RCode::YXDOMAIN => 6,
            RCode::YXRRSET => 7,
            RCode::NXRRSET => 8,
            RCode::NOTAUTH => 9,
            RCode::NOTZONE => 10,
            RCode::DSOTYPENI => 11,
            RCode::BADVERSBADSIG => 16 & 0b1111,
            RCode::BADKEY => 17 & 0b1111,
            RCode::BADTIME => 18 & 0b1111,
            RCode::BADMODE => 19 & 0b1111,
            RCode::BADNAME => 20 & 0b1111,
            RCode::BADALG => 21 & 0b1111,
            RCode::BADTRUNC => 22 & 0b1111,
            RCode::BADCOOKIE => 23 & 0b1111,
        }
    }

    /// Parses an encoded `RCode` from a twelve bit value.
    pub fn parse(val: u16) -> Result<RCode, ParseError> {
        Ok(match val {
            0 => RCode::NOERROR,
            1 => RCode::FORMERR,
            2 => RCode::SERVFAIL,
            3 => RCode::NXDOMAIN,
            4 => RCode::NOTIMP,
            5 => RCode::REFUSED,
            6 => RCode::YXDOMAIN,
            7 => RCode::YXRRSET,
            8 => RCode::NXRRSET,
            9 => RCode::NOTAUTH,
            10 => RCode::NOTZONE,
            11 => RCode::DSOTYPENI,
            16 => RCode::BADVERSBADSIG,
            17 => RCode::BADKEY,
            18 => RCode::BADTIME,
            19 => RCode::BADMODE,
            20 => RCode::BADNAME,
            21 => RCode::BADALG,
            22 => RCode::BADTRUNC,
            23 => RCode::BADCOOKIE,
            x => return Err(ParseError::InvalidRcode(x)),
        })
    }
}

impl Display for RCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl RecordType {
    /// Parses a record type mnemonic (`"NS"`, `"TYPE1234"`, ...), as found
    /// in type bitmaps of zone file records.
    pub fn from_mnemonic(s: &str) -> Option<RecordType> {
        use std::str::FromStr;
        if let Ok(rtype) = RecordType::from_str(s) {
            if !matches!(rtype, RecordType::Unknown(_)) {
                return Some(rtype);
            }
        }
        s.strip_prefix("TYPE")?
            .parse::<u16>()
            .ok()
            .map(RecordType::Unknown)
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Unknown(x) => write!(f, "TYPE{}", x),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl Class {
    pub fn encode(&self) -> u16 {
        match self {
            Class::IN => 1,
            Class::CH => 3,
            Class::HS => 4,
            Class::NONE => 254,
            Class::ANY => 255,
        }
    }

    pub fn parse(val: u16) -> Result<Class, ParseError> {
        Ok(match val {
            1 => Class::IN,
            3 => Class::CH,
            4 => Class::HS,
            254 => Class::NONE,
            255 => Class::ANY,
            x => return Err(ParseError::InvalidClass(x)),
        })
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl HeaderFlags {
    /// Creates a `HeaderFlags` struct from the flag bits of the second
    /// 16-bit word of a [`Header`].
    pub fn from_flags(flags: u16) -> Self {
        Self {
            aa: (flags & (1 << 10)) != 0,
            tc: (flags & (1 << 9)) != 0,
            rd: (flags & (1 << 8)) != 0,
            ra: (flags & (1 << 7)) != 0,
            ad: (flags & (1 << 5)) != 0,
            cd: (flags & (1 << 4)) != 0,
        }
    }

    /// Returns the flag bits as they appear in the second 16-bit word of a
    /// [`Header`].
    pub fn as_flags(&self) -> u16 {
        let aa = u16::from(self.aa);
        let tc = u16::from(self.tc);
        let rd = u16::from(self.rd);
        let ra = u16::from(self.ra);
        let ad = u16::from(self.ad);
        let cd = u16::from(self.cd);
        (aa << 10) + (tc << 9) + (rd << 8) + (ra << 7) + (ad << 5) + (cd << 4)
    }
}

impl Header {
    /// Creates a header for a DNS response message.
    ///
    /// `qdcount`, `ancount`, `nscount` and `arcount` are grouped in that
    /// order in the `counts` parameter.
    pub fn new_response_header(
        msg_id: u16,
        flags: HeaderFlags,
        rcode: RCode,
        counts: [u16; 4],
    ) -> Self {
        Header {
            msg_id,
            qr: true,
            opcode: Opcode::QUERY,
            flags,
            rcode: Some(rcode),
            qdcount: counts[0],
            ancount: counts[1],
            nscount: counts[2],
            arcount: counts[3],
        }
    }

    /// Creates a header for a DNS query message.
    ///
    /// If the query includes an OPT record, `edns` must be true.
    pub fn new_query_header(
        msg_id: u16,
        flags: HeaderFlags,
        edns: bool,
        qdcount: u16,
    ) -> Result<Self, EncodeError> {
        if flags.aa || flags.ra {
            Err(EncodeError::AaOrRaInQuery)
        } else {
            Ok(Header {
                msg_id,
                qr: false,
                opcode: Opcode::QUERY,
                flags,
                rcode: None,
                qdcount,
                ancount: 0,
                nscount: 0,
                arcount: u16::from(edns),
            })
        }
    }

    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        let qr = u16::from(self.qr);
        let opcode = self.opcode.encode() as u16;
        let rcode = match &self.rcode {
            Some(val) => val.encode() as u16,
            None => 0u16,
        };

        let line_two = (qr << 15) + (opcode << 11) + self.flags.as_flags() + rcode;
        buf.write_u16::<NetworkEndian>(self.msg_id)?;
        buf.write_u16::<NetworkEndian>(line_two)?;
        buf.write_u16::<NetworkEndian>(self.qdcount)?;
        buf.write_u16::<NetworkEndian>(self.ancount)?;
        buf.write_u16::<NetworkEndian>(self.nscount)?;
        buf.write_u16::<NetworkEndian>(self.arcount)?;

        Ok(())
    }

    pub fn parse(header: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let msg_id = header.read_u16::<NetworkEndian>()?;
        let line_two = header.read_u16::<NetworkEndian>()?;
        let qr = (line_two & (1 << 15)) != 0;
        let opcode = Opcode::parse(((line_two & (0b1111 << 11)) >> 11) as u8)?;
        let flags = HeaderFlags::from_flags(line_two);
        let rcode = RCode::parse(line_two & 0b1111)?;

        Ok(Header {
            msg_id,
            qr,
            opcode,
            flags,
            rcode: if qr { Some(rcode) } else { None },
            qdcount: header.read_u16::<NetworkEndian>()?,
            ancount: header.read_u16::<NetworkEndian>()?,
            nscount: header.read_u16::<NetworkEndian>()?,
            arcount: header.read_u16::<NetworkEndian>()?,
        })
    }
}

impl Question {
    pub fn new(qname: Name, qtype: RecordType, qclass: Class) -> Self {
        Question {
            qname,
            qtype,
            qclass,
        }
    }

    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.qname.encode_into(buf)?;
        buf.write_u16::<NetworkEndian>(self.qtype.into())?;
        buf.write_u16::<NetworkEndian>(self.qclass.encode())?;
        Ok(())
    }

    pub fn parse(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let qname = Name::parse(msg, name::Compression::Allowed)?;
        let qtype: RecordType = msg.read_u16::<NetworkEndian>()?.into();
        let qclass = Class::parse(msg.read_u16::<NetworkEndian>()?)?;

        Ok(Question {
            qname,
            qtype,
            qclass,
        })
    }
}

impl Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DNS Question for '{}' (type: {}, class: {})",
            self.qname, self.qtype, self.qclass
        )
    }
}

impl Record {
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        match self {
            Record::NONOPT(nonopt) => nonopt.encode_into(buf),
            Record::OPT(opt) => opt.encode_into(buf),
        }
    }

    pub fn parse(msg: &mut Cursor<&[u8]>, rcode: Option<RCode>) -> Result<Self, ParseError> {
        let owner = Name::parse(msg, name::Compression::Allowed)?;
        let rtype: RecordType = msg.read_u16::<NetworkEndian>()?.into();
        if rtype == RecordType::OPT {
            return OptRecord::parse(msg, owner, rcode);
        }
        let class = Class::parse(msg.read_u16::<NetworkEndian>()?)?;
        let ttl = msg.read_u32::<NetworkEndian>()?;
        let rdlength = msg.read_u16::<NetworkEndian>()?;

        let mut encoded_rdata = vec![0; rdlength as usize];
        let pos_rdata_start = msg.position();
        msg.read_exact(&mut encoded_rdata)?;
        // reset position to the start of rdata for parse_rdata()
        msg.set_position(pos_rdata_start);
        let rdata = Record::parse_rdata(&rtype, msg, rdlength)?;

        Ok(Record::NONOPT(NonOptRecord {
            owner,
            rtype,
            class,
            ttl,
            encoded_rdata,
            rdata,
        }))
    }

    /// Parses encoded RDATA of the given type.
    ///
    /// `msg` is the complete response message, which is needed for message
    /// compression. `rdlength` is the length of the RDATA in bytes.
    pub fn parse_rdata(
        rtype: &RecordType,
        msg: &mut Cursor<&[u8]>,
        rdlength: u16,
    ) -> Result<Rdata, ParseError> {
        match rtype {
            RecordType::A => rdata::A::parse_rdata(msg, rdlength),
            RecordType::NS => rdata::NS::parse_rdata(msg, rdlength),
            RecordType::SOA => rdata::SOA::parse_rdata(msg, rdlength),
            RecordType::AAAA => rdata::AAAA::parse_rdata(msg, rdlength),
            RecordType::OPT => rdata::OPT::parse_rdata(msg, rdlength),
            RecordType::RRSIG => rdata::RRSIG::parse_rdata(msg, rdlength),
            RecordType::NSEC => rdata::NSEC::parse_rdata(msg, rdlength),
            RecordType::DNSKEY => rdata::DNSKEY::parse_rdata(msg, rdlength),
            RecordType::NSEC3 => rdata::NSEC3::parse_rdata(msg, rdlength),
            RecordType::NSEC3PARAM => rdata::NSEC3PARAM::parse_rdata(msg, rdlength),
            _ => {
                let mut raw = vec![0; rdlength as usize];
                msg.read_exact(&mut raw)?;
                Ok(Rdata::Unknown(raw))
            }
        }
    }

    /// Returns a reference to the inner [`OptRecord`]. [`None`] for the
    /// `NONOPT` variant.
    pub fn as_opt(&self) -> Option<&OptRecord> {
        match self {
            Self::OPT(opt) => Some(opt),
            Self::NONOPT(_) => None,
        }
    }

    /// Returns a reference to the inner [`NonOptRecord`]. [`None`] for the
    /// `OPT` variant.
    pub fn as_nonopt(&self) -> Option<&NonOptRecord> {
        match self {
            Self::NONOPT(nonopt) => Some(nonopt),
            Self::OPT(_) => None,
        }
    }

    /// Returns a reference to the contained [`Rdata`].
    pub fn rdata(&self) -> &Rdata {
        match self {
            Self::OPT(opt) => &opt.rdata,
            Self::NONOPT(nonopt) => &nonopt.rdata,
        }
    }
}

impl NonOptRecord {
    /// Creates a new `NonOptRecord` from [`Rdata`].
    ///
    /// The RDATA must not be [`Rdata::OPT`]; use [`OptRecord::new`] for that.
    pub fn new(owner: Name, class: Class, ttl: u32, rdata: Rdata) -> Result<Self, EncodeError> {
        debug_assert!(rdata.as_opt().is_none());
        let rtype = rdata.rtype();
        let encoded_rdata = rdata.encode()?;

        Ok(Self {
            owner,
            rtype,
            class,
            ttl,
            rdata,
            encoded_rdata,
        })
    }

    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.owner.encode_into(buf)?;
        buf.write_u16::<NetworkEndian>(self.rtype.into())?;
        buf.write_u16::<NetworkEndian>(self.class.encode())?;
        buf.write_u32::<NetworkEndian>(self.ttl)?;
        buf.write_u16::<NetworkEndian>(self.encoded_rdata.len() as u16)?;
        buf.write_all(&self.encoded_rdata)?;
        Ok(())
    }

    /// Returns a reference to the contained [`Rdata`].
    pub fn rdata(&self) -> &Rdata {
        &self.rdata
    }
}

impl Display for NonOptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.owner, self.ttl, self.rtype, self.rdata
        )
    }
}

impl OptRecord {
    /// Creates a new `OPT` record for a query.
    pub fn new(edns_config: EdnsConfig) -> Result<Self, EncodeError> {
        let rdata = Rdata::OPT(rdata::OPT::default());
        Ok(Self {
            payload_size: edns_config.bufsize,
            rcode: None,
            edns_version: 0,
            dnssec_ok: edns_config.do_flag,
            encoded_rdata: rdata.encode()?,
            rdata,
        })
    }

    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        // the owner of an OPT record is always the root name
        buf.write_u8(0)?;
        buf.write_u16::<NetworkEndian>(RecordType::OPT.into())?;
        buf.write_u16::<NetworkEndian>(self.payload_size)?;
        let rcode = self.rcode.unwrap_or(RCode::NOERROR);
        let rcode = (((rcode.encode() as u16) & 0b1111_1111_0000) >> 4) as u8;
        buf.write_u8(rcode)?;
        buf.write_u8(self.edns_version)?;
        if self.dnssec_ok {
            buf.write_u16::<NetworkEndian>(1 << 15)?;
        } else {
            buf.write_u16::<NetworkEndian>(0)?;
        }
        buf.write_u16::<NetworkEndian>(self.encoded_rdata.len() as u16)?;
        buf.write_all(&self.encoded_rdata)?;
        Ok(())
    }

    /// Parses an encoded `OptRecord`; the owner name and TYPE field have
    /// already been consumed by [`Record::parse`].
    fn parse(
        msg: &mut Cursor<&[u8]>,
        owner: Name,
        rcode: Option<RCode>,
    ) -> Result<Record, ParseError> {
        if !owner.is_root() {
            return Err(ParseError::InvalidOptName);
        }

        let payload_size = msg.read_u16::<NetworkEndian>()?;
        let ext_rcode = msg.read_u8()?;
        let rcode = match (rcode, ext_rcode) {
            (Some(_), 0) | (None, _) => rcode,
            (Some(low), x) => Some(RCode::parse(
                ((x as u16) << 4) + (low.encode() as u16),
            )?),
        };
        let edns_version = msg.read_u8()?;
        let dnssec_ok = msg.read_u16::<NetworkEndian>()? & (1 << 15) != 0;

        let rdlength = msg.read_u16::<NetworkEndian>()?;
        let mut encoded_rdata = vec![0; rdlength as usize];
        let pos_rdata_start = msg.position();
        msg.read_exact(&mut encoded_rdata)?;
        msg.set_position(pos_rdata_start);
        let rdata = Record::parse_rdata(&RecordType::OPT, msg, rdlength)?;

        Ok(Record::OPT(OptRecord {
            payload_size,
            rcode,
            edns_version,
            dnssec_ok,
            encoded_rdata,
            rdata,
        }))
    }
}

impl Message {
    /// Creates a DNS query for the given name and type.
    ///
    /// If `edns` is [`Some`], the query will contain an `OPT` record.
    ///
    /// Returns an error if `aa` or `ra` are set in `flags`.
    pub fn new_query(
        domain: Name,
        qtype: RecordType,
        flags: HeaderFlags,
        edns: Option<EdnsConfig>,
    ) -> Result<Self, EncodeError> {
        if flags.aa || flags.ra {
            return Err(EncodeError::AaOrRaInQuery);
        }

        let msg_id = rand::thread_rng().gen_range(0..(1u32 << 16)) as u16;
        let header = Header::new_query_header(msg_id, flags, edns.is_some(), 1)?;

        let mut additional_answers = Vec::new();
        if let Some(edns_config) = edns {
            additional_answers.push(Record::OPT(OptRecord::new(edns_config)?));
        }

        Ok(Message {
            header,
            questions: vec![Question::new(domain, qtype, Class::IN)],
            answers: Vec::new(),
            authoritative_answers: Vec::new(),
            additional_answers,
        })
    }

    /// Creates a DNS response.
    ///
    /// `answers`, `authoritative_answers` and `additional_answers` are
    /// grouped in that order in the `records` parameter.
    pub fn new_response(
        msg_id: u16,
        flags: HeaderFlags,
        rcode: RCode,
        questions: Vec<Question>,
        records: [Vec<Record>; 3],
    ) -> Self {
        let [answers, authoritative_answers, additional_answers] = records;
        Message {
            header: Header::new_response_header(
                msg_id,
                flags,
                rcode,
                [
                    questions.len() as u16,
                    answers.len() as u16,
                    authoritative_answers.len() as u16,
                    additional_answers.len() as u16,
                ],
            ),
            questions,
            answers,
            authoritative_answers,
            additional_answers,
        }
    }

    /// Encodes a `Message` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.header.encode_into(buf)?;
        for question in &self.questions {
            question.encode_into(buf)?;
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authoritative_answers)
            .chain(&self.additional_answers)
        {
            record.encode_into(buf)?;
        }
        Ok(())
    }

    /// Parses an encoded `Message` from a series of bytes.
    ///
    /// Returns [`ParseError::TruncatedMessage`] if the TC flag is set; the
    /// caller is expected to retry the query over TCP.
    pub fn parse(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let mut header = Header::parse(msg)?;

        if header.flags.tc {
            return Err(ParseError::TruncatedMessage);
        }

        let questions = Message::parse_questions(msg, header.qdcount)?;
        let answers = Message::parse_records(msg, header.ancount, header.rcode)?;
        let authoritative_answers = Message::parse_records(msg, header.nscount, header.rcode)?;
        let additional_answers = Message::parse_records(msg, header.arcount, header.rcode)?;

        // an OPT record may carry the upper bits of an extended rcode
        for answer in &additional_answers {
            if let Record::OPT(OptRecord { rcode, .. }) = answer {
                header.rcode = *rcode;
            }
        }

        Ok(Message {
            header,
            questions,
            answers,
            authoritative_answers,
            additional_answers,
        })
    }

    fn parse_questions(msg: &mut Cursor<&[u8]>, qdcount: u16) -> Result<Vec<Question>, ParseError> {
        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            questions.push(Question::parse(msg)?);
        }
        Ok(questions)
    }

    fn parse_records(
        msg: &mut Cursor<&[u8]>,
        count: u16,
        rcode: Option<RCode>,
    ) -> Result<Vec<Record>, ParseError> {
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(Record::parse(msg, rcode)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::{NSEC, RRSIG, SOA};

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    const NOFLAGS: HeaderFlags = HeaderFlags {
        aa: false,
        tc: false,
        rd: false,
        ra: false,
        ad: false,
        cd: false,
    };

    #[test]
    fn query_roundtrip_keeps_edns() {
        let query = Message::new_query(
            name("example.com."),
            RecordType::NSEC,
            NOFLAGS,
            Some(EdnsConfig {
                do_flag: true,
                bufsize: 4096,
            }),
        )
        .unwrap();
        let encoded = query.encode().unwrap();

        let parsed = Message::parse(&mut Cursor::new(&encoded)).unwrap();
        assert_eq!(parsed.questions[0].qname, name("example.com."));
        assert_eq!(parsed.questions[0].qtype, RecordType::NSEC);
        assert!(!parsed.header.flags.rd);
        let opt = parsed.additional_answers[0].as_opt().unwrap();
        assert_eq!(opt.payload_size, 4096);
        assert!(opt.dnssec_ok);
    }

    #[test]
    fn response_roundtrip_with_nsec_and_rrsig() {
        let nsec = NonOptRecord::new(
            name("a.example.com."),
            Class::IN,
            3600,
            Rdata::NSEC(NSEC {
                next_domain_name: name("b.example.com."),
                types: vec![RecordType::A, RecordType::RRSIG, RecordType::NSEC],
            }),
        )
        .unwrap();
        let rrsig = NonOptRecord::new(
            name("a.example.com."),
            Class::IN,
            3600,
            Rdata::RRSIG(RRSIG {
                type_covered: RecordType::NSEC,
                algorithm: 13,
                labels: 3,
                original_ttl: 3600,
                signature_expiration: 4,
                signature_inception: 2,
                key_tag: 12345,
                signer_name: name("example.com."),
                signature: vec![0xab; 16],
            }),
        )
        .unwrap();
        let response = Message::new_response(
            77,
            NOFLAGS,
            RCode::NXDOMAIN,
            vec![Question::new(
                name("aa.example.com."),
                RecordType::A,
                Class::IN,
            )],
            [vec![], vec![Record::NONOPT(nsec), Record::NONOPT(rrsig)], vec![]],
        );
        let encoded = response.encode().unwrap();

        let parsed = Message::parse(&mut Cursor::new(&encoded)).unwrap();
        assert_eq!(parsed.header.rcode, Some(RCode::NXDOMAIN));
        let nsec = parsed.authoritative_answers[0].as_nonopt().unwrap();
        assert_eq!(
            nsec.rdata().as_nsec().unwrap().next_domain_name,
            name("b.example.com.")
        );
        let rrsig = parsed.authoritative_answers[1].as_nonopt().unwrap();
        assert_eq!(
            rrsig.rdata().as_rrsig().unwrap().signer_name,
            name("example.com.")
        );
    }

    #[test]
    fn truncated_response_is_rejected() {
        let soa = NonOptRecord::new(
            name("example.com."),
            Class::IN,
            3600,
            Rdata::SOA(SOA {
                mname: name("ns1.example.com."),
                rname: name("hostmaster.example.com."),
                serial: 1,
                refresh: 2,
                retry: 3,
                expire: 4,
                minimum: 5,
            }),
        )
        .unwrap();
        let response = Message::new_response(
            1,
            HeaderFlags { tc: true, ..NOFLAGS },
            RCode::NOERROR,
            vec![],
            [vec![Record::NONOPT(soa)], vec![], vec![]],
        );
        let encoded = response.encode().unwrap();
        assert!(matches!(
            Message::parse(&mut Cursor::new(&encoded)),
            Err(ParseError::TruncatedMessage)
        ));
    }

    #[test]
    fn record_type_mnemonics() {
        assert_eq!(RecordType::from_mnemonic("NSEC3"), Some(RecordType::NSEC3));
        assert_eq!(
            RecordType::from_mnemonic("TYPE65534"),
            Some(RecordType::Unknown(65534))
        );
        assert_eq!(RecordType::from_mnemonic("NOPE"), None);
    }
}
