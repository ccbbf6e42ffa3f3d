//! Integration tests driving the real UDP/TCP transport against stub
//! servers on the loopback interface.

use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::thread;
use std::time::Duration;

use n3map::query::{Transport, UdpTransport};
use n3map_proto::rdata::{self, Rdata};
use n3map_proto::{
    Class, HeaderFlags, Message, Name, NonOptRecord, Question, RCode, Record, RecordType,
};

fn name(s: &str) -> Name {
    Name::from_ascii(s).unwrap()
}

const FLAGS: HeaderFlags = HeaderFlags {
    aa: true,
    tc: false,
    rd: false,
    ra: false,
    ad: false,
    cd: false,
};

fn nsec_authority(owner: &str, next: &str) -> Vec<Record> {
    vec![Record::NONOPT(
        NonOptRecord::new(
            name(owner),
            Class::IN,
            3600,
            Rdata::NSEC(rdata::NSEC {
                next_domain_name: name(next),
                types: vec![RecordType::A, RecordType::NSEC],
            }),
        )
        .unwrap(),
    )]
}

/// Builds an NXDOMAIN response mirroring the query's message id and question.
fn nxdomain_response(query: &Message, authority: Vec<Record>) -> Vec<u8> {
    Message::new_response(
        query.header.msg_id,
        FLAGS,
        RCode::NXDOMAIN,
        query.questions.clone(),
        [vec![], authority, vec![]],
    )
    .encode()
    .unwrap()
}

#[test]
fn udp_query_roundtrip() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = server.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        let query = Message::parse(&mut Cursor::new(&buf[..n])).unwrap();
        assert_eq!(query.questions[0].qtype, RecordType::A);
        assert!(!query.header.flags.rd);
        let opt = query.additional_answers[0].as_opt().unwrap();
        assert!(opt.dnssec_ok);
        assert_eq!(opt.payload_size, 4096);
        let response = nxdomain_response(&query, nsec_authority("a.example.test.", "b.example.test."));
        server.send_to(&response, peer).unwrap();
    });

    let response = UdpTransport
        .query(
            &name("aa.example.test."),
            RecordType::A,
            addr,
            Duration::from_secs(5),
        )
        .unwrap();
    handle.join().unwrap();

    assert_eq!(response.status(), RCode::NXDOMAIN);
    let nsec = response.find_nsec(false).unwrap();
    assert_eq!(nsec.len(), 1);
    assert_eq!(nsec[0].owner, name("a.example.test."));
}

#[test]
fn udp_ignores_datagrams_with_foreign_id() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = server.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        let query = Message::parse(&mut Cursor::new(&buf[..n])).unwrap();

        // first a response with a mangled message id, then the real one
        let mut bogus = nxdomain_response(&query, vec![]);
        bogus[0] ^= 0xff;
        server.send_to(&bogus, peer).unwrap();
        let response = nxdomain_response(&query, nsec_authority("a.example.test.", "b.example.test."));
        server.send_to(&response, peer).unwrap();
    });

    let response = UdpTransport
        .query(
            &name("aa.example.test."),
            RecordType::A,
            addr,
            Duration::from_secs(5),
        )
        .unwrap();
    handle.join().unwrap();
    assert_eq!(response.find_nsec(false).unwrap().len(), 1);
}

#[test]
fn truncated_udp_response_is_retried_over_tcp() {
    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = udp.local_addr().unwrap();
    // same port, different protocol
    let tcp = TcpListener::bind(addr).unwrap();

    let udp_handle = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let (n, peer) = udp.recv_from(&mut buf).unwrap();
        let query = Message::parse(&mut Cursor::new(&buf[..n])).unwrap();
        // truncated response: header only, TC set
        let truncated = Message::new_response(
            query.header.msg_id,
            HeaderFlags { tc: true, ..FLAGS },
            RCode::NXDOMAIN,
            vec![],
            [vec![], vec![], vec![]],
        )
        .encode()
        .unwrap();
        udp.send_to(&truncated, peer).unwrap();
    });

    let tcp_handle = thread::spawn(move || {
        let (mut stream, _peer) = tcp.accept().unwrap();
        let mut len = [0u8; 2];
        stream.read_exact(&mut len).unwrap();
        let mut query = vec![0u8; u16::from_be_bytes(len) as usize];
        stream.read_exact(&mut query).unwrap();
        let query = Message::parse(&mut Cursor::new(query.as_slice())).unwrap();

        let response = nxdomain_response(&query, nsec_authority("a.example.test.", "b.example.test."));
        let mut framed = Vec::with_capacity(response.len() + 2);
        framed.extend_from_slice(&(response.len() as u16).to_be_bytes());
        framed.extend_from_slice(&response);
        stream.write_all(&framed).unwrap();
    });

    let response = UdpTransport
        .query(
            &name("aa.example.test."),
            RecordType::A,
            addr,
            Duration::from_secs(5),
        )
        .unwrap();
    udp_handle.join().unwrap();
    tcp_handle.join().unwrap();

    assert_eq!(response.status(), RCode::NXDOMAIN);
    assert_eq!(
        response.find_nsec(false).unwrap()[0].next_owner,
        name("b.example.test.")
    );

    // the question is preserved across the fallback
    assert_eq!(
        response.message().questions[0].qname,
        name("aa.example.test.")
    );
}

#[test]
fn unreachable_server_times_out() {
    // an unbound port on loopback: queries go nowhere
    let placeholder = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = placeholder.local_addr().unwrap();
    drop(placeholder);

    let result = UdpTransport.query(
        &name("a.example.test."),
        RecordType::A,
        addr,
        Duration::from_millis(200),
    );
    assert!(result.is_err());
}
