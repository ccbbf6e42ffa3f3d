//! The NSEC and NSEC3 records the walkers operate on, their invariants, and
//! their zone-file text format.
//!
//! These are deliberately separate from the wire-level RDATA types in
//! `n3map-proto`: an [`Nsec3Record`] carries the *decoded* hashed owner and
//! the zone it was split from, which is the shape the interval tree and the
//! record files want.

use std::fmt::{self, Display};

use data_encoding::{BASE32_DNSSEC, HEXLOWER};
use lazy_static::lazy_static;
use n3map_proto::name::{Label, Name};
use n3map_proto::{rdata, vis, RecordType};
use num_bigint::BigUint;
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

pub const SHA1_LENGTH: usize = 20;

/// A raw NSEC3 hash value (SHA-1 digest).
pub type Nsec3Digest = [u8; SHA1_LENGTH];

lazy_static! {
    /// The highest point of the hash circle, 2^160 - 1.
    pub static ref SHA1_MAX: BigUint = (BigUint::from(1u8) << 160u32) - 1u8;
}

/// Computes the NSEC3 hash of a wire-format owner name as defined in
/// [RFC 5155](https://www.rfc-editor.org/rfc/rfc5155#section-5):
/// `iterations + 1` rounds of `SHA1(x || salt)`.
pub fn compute_hash(wire_name: &[u8], salt: &[u8], iterations: u16) -> Nsec3Digest {
    let mut hasher = Sha1::new();
    hasher.update(wire_name);
    hasher.update(salt);
    let mut digest = hasher.finalize();
    for _ in 0..iterations {
        let mut hasher = Sha1::new();
        hasher.update(digest);
        hasher.update(salt);
        digest = hasher.finalize();
    }
    digest.into()
}

/// Returns true iff `hash` lies in the closed NSEC3 interval
/// `[hashed_owner, next_hashed_owner]`, with wrap-around when
/// `hashed_owner >= next_hashed_owner` (which also catches the empty-zone
/// case of a single record with equal endpoints).
pub fn covered_by_nsec3_interval(
    hash: &Nsec3Digest,
    hashed_owner: &Nsec3Digest,
    next_hashed_owner: &Nsec3Digest,
) -> bool {
    if hashed_owner >= next_hashed_owner {
        hash >= hashed_owner || hash <= next_hashed_owner
    } else {
        hash >= hashed_owner && hash <= next_hashed_owner
    }
}

/// The absolute distance between two points of the hash circle; the full
/// circle when they are equal (empty zone).
pub fn distance_covered(hashed_owner: &Nsec3Digest, next_hashed_owner: &Nsec3Digest) -> BigUint {
    if hashed_owner == next_hashed_owner {
        return SHA1_MAX.clone();
    }
    let a = BigUint::from_bytes_be(hashed_owner);
    let b = BigUint::from_bytes_be(next_hashed_owner);
    if b >= a {
        b - a
    } else {
        a - b
    }
}

/// Encodes a hash value as the base32hex label used for NSEC3 owner names.
pub fn hash_label(digest: &Nsec3Digest) -> Label {
    Label::new(BASE32_DNSSEC.encode(digest).into_bytes()).expect("32 chars fit in a label")
}

/// Decodes the base32hex hash label of an NSEC3 owner name.
pub fn decode_hash_label(label: &[u8]) -> Result<Nsec3Digest> {
    let lower = label.to_ascii_lowercase();
    let bytes = BASE32_DNSSEC
        .decode(&lower)
        .map_err(|_| Error::InvalidRecord("NSEC3 RR: could not decode hashed owner name".into()))?;
    Nsec3Digest::try_from(bytes.as_slice())
        .map_err(|_| Error::InvalidRecord("NSEC3 RR: invalid hashed_owner length".into()))
}

fn types_to_text(types: &[RecordType]) -> String {
    let types: Vec<_> = types.iter().map(ToString::to_string).collect();
    types.join(" ")
}

fn types_from_text(s: &str) -> Result<Vec<RecordType>> {
    s.split_whitespace()
        .map(|t| {
            RecordType::from_mnemonic(t)
                .ok_or_else(|| Error::InvalidRecord(format!("unknown record type '{}'", t)))
        })
        .collect()
}

fn unvis_name(s: &str) -> Result<Name> {
    if s == "." {
        return Ok(Name::root());
    }
    let mut labels = Vec::new();
    for part in s.split('.') {
        let bytes = vis::strunvis(part)
            .ok_or_else(|| Error::InvalidRecord(format!("invalid escaped label '{}'", part)))?;
        labels.push(Label::new(bytes)?);
    }
    Ok(Name::new(labels)?)
}

/// An NSEC record as used by the walker: owner, next owner and the type list.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NsecRecord {
    pub owner: Name,
    pub ttl: u32,
    pub next_owner: Name,
    pub types: Vec<RecordType>,
}

impl NsecRecord {
    pub fn new(owner: Name, ttl: u32, next_owner: Name, types: Vec<RecordType>) -> Result<Self> {
        if owner == next_owner {
            return Err(Error::InvalidRecord(
                "invalid NSEC record, owner == next_owner".into(),
            ));
        }
        Ok(Self {
            owner,
            ttl,
            next_owner,
            types,
        })
    }

    pub fn from_wire(owner: Name, ttl: u32, rdata: &rdata::NSEC) -> Result<Self> {
        Self::new(
            owner,
            ttl,
            rdata.next_domain_name.clone(),
            rdata.types.clone(),
        )
    }

    pub fn covers(&self, dname: &Name) -> bool {
        dname.covered_by(&self.owner, &self.next_owner)
    }

    pub fn covers_exclusive(&self, dname: &Name) -> bool {
        dname.covered_by_exclusive(&self.owner, &self.next_owner)
    }

    pub fn part_of_zone(&self, zone: &Name) -> bool {
        self.owner.part_of_zone(zone) && self.next_owner.part_of_zone(zone)
    }
}

impl Display for NsecRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\tIN\tNSEC {}\t{}",
            self.owner,
            self.ttl,
            self.next_owner,
            types_to_text(&self.types)
        )
    }
}

/// An NSEC3 record as used by the walker, with the hashed owner decoded and
/// the zone split off the owner name.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Nsec3Record {
    pub zone: Name,
    pub hashed_owner: Nsec3Digest,
    pub ttl: u32,
    pub algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed_owner: Nsec3Digest,
    pub types: Vec<RecordType>,
}

impl Nsec3Record {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: Name,
        ttl: u32,
        algorithm: u8,
        flags: u8,
        iterations: u16,
        salt: Vec<u8>,
        next_hashed_owner: Nsec3Digest,
        types: Vec<RecordType>,
    ) -> Result<Self> {
        // SHA-1 is the only defined NSEC3 hash function
        if algorithm & 1 == 0 {
            return Err(Error::InvalidRecord("NSEC3 RR: unknown hash function".into()));
        }
        if iterations > 2500 {
            return Err(Error::InvalidRecord(
                "NSEC3 RR: invalid number of iterations".into(),
            ));
        }
        let (hash_dn, zone) = owner
            .split(1)
            .map_err(|_| Error::InvalidRecord("NSEC3 RR: could not decode hashed owner name".into()))?;
        let hashed_owner = decode_hash_label(hash_dn.labels()[0].as_bytes())?;
        Ok(Self {
            zone,
            hashed_owner,
            ttl,
            algorithm,
            flags,
            iterations,
            salt,
            next_hashed_owner,
            types,
        })
    }

    pub fn from_wire(owner: Name, ttl: u32, rdata: &rdata::NSEC3) -> Result<Self> {
        let next_hashed_owner =
            Nsec3Digest::try_from(rdata.next_hashed_owner.as_slice()).map_err(|_| {
                Error::InvalidRecord("NSEC3 RR: invalid next_hashed_owner length".into())
            })?;
        Self::new(
            owner,
            ttl,
            rdata.hash_algorithm.into(),
            rdata.opt_out.into(),
            rdata.iterations,
            rdata.salt.clone().unwrap_or_default(),
            next_hashed_owner,
            rdata.types.clone(),
        )
    }

    pub fn part_of_zone(&self, zone: &Name) -> bool {
        self.zone == *zone
    }

    /// The owner name with the hash re-encoded as a base32hex label.
    pub fn owner_dn(&self) -> Name {
        self.zone
            .prepend(hash_label(&self.hashed_owner))
            .expect("hash label fits in a name")
    }

    pub fn covers_hash(&self, hash: &Nsec3Digest) -> bool {
        covered_by_nsec3_interval(hash, &self.hashed_owner, &self.next_hashed_owner)
    }

    /// The arc length of this record's interval. A value of 2 marks a
    /// minimally-covering record (RFC 7129 "white lies").
    pub fn distance_covered(&self) -> BigUint {
        distance_covered(&self.hashed_owner, &self.next_hashed_owner)
    }
}

impl Display for Nsec3Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let salt = if self.salt.is_empty() {
            "-".to_string()
        } else {
            HEXLOWER.encode(&self.salt)
        };
        write!(
            f,
            "{}\t{}\tIN\tNSEC3 {} {} {} {} {}\t{}",
            self.owner_dn(),
            self.ttl,
            self.algorithm,
            self.flags,
            self.iterations,
            salt,
            BASE32_DNSSEC.encode(&self.next_hashed_owner),
            types_to_text(&self.types)
        )
    }
}

lazy_static! {
    static ref RR_LINE: Regex =
        Regex::new(r"^(([a-zA-Z0-9\\_*-]+\.)+|\.)\s+(0|[1-9][0-9]*)\s+IN\s+(.*)$").unwrap();
    static ref NSEC_RDATA: Regex =
        Regex::new(r"^NSEC\s+(([a-zA-Z0-9\\_-]+\.|\.)+)((\s+[A-Z0-9]+)*)\s*$").unwrap();
    static ref NSEC3_RDATA: Regex = Regex::new(
        r"^NSEC3\s+(0|[1-9][0-9]*)\s+(0|[1-9][0-9]*)\s+(0|[1-9][0-9]*)\s+([a-fA-F0-9]+|-)\s+([a-vA-V0-9]+)((\s+[A-Z0-9]+)*)\s*$"
    )
    .unwrap();
}

fn rr_line_parts(line: &str) -> Result<(Name, u32, &str)> {
    let caps = RR_LINE
        .captures(line)
        .ok_or_else(|| Error::InvalidRecord("invalid file format".into()))?;
    let owner = unvis_name(caps.get(1).unwrap().as_str())?;
    let ttl = caps
        .get(3)
        .unwrap()
        .as_str()
        .parse::<u32>()
        .map_err(|_| Error::InvalidRecord("invalid TTL".into()))?;
    Ok((owner, ttl, caps.get(4).unwrap().as_str()))
}

/// Parses an NSEC record line of a record file.
pub fn nsec_from_text(line: &str) -> Result<NsecRecord> {
    let (owner, ttl, rest) = rr_line_parts(line)?;
    let caps = NSEC_RDATA
        .captures(rest)
        .ok_or_else(|| Error::InvalidRecord("could not parse NSEC record".into()))?;
    let next_owner = unvis_name(caps.get(1).unwrap().as_str())?;
    let types = types_from_text(caps.get(3).map(|m| m.as_str()).unwrap_or_default())?;
    NsecRecord::new(owner, ttl, next_owner, types)
}

/// Parses an NSEC3 record line of a record file.
pub fn nsec3_from_text(line: &str) -> Result<Nsec3Record> {
    let (owner, ttl, rest) = rr_line_parts(line)?;
    let caps = NSEC3_RDATA
        .captures(rest)
        .ok_or_else(|| Error::InvalidRecord("could not parse NSEC3 record".into()))?;
    let field = |i: usize| caps.get(i).unwrap().as_str();
    let algorithm = field(1)
        .parse::<u8>()
        .map_err(|_| Error::InvalidRecord("NSEC3 RR: invalid algorithm".into()))?;
    let flags = field(2)
        .parse::<u8>()
        .map_err(|_| Error::InvalidRecord("NSEC3 RR: invalid flags".into()))?;
    let iterations = field(3)
        .parse::<u16>()
        .map_err(|_| Error::InvalidRecord("NSEC3 RR: invalid number of iterations".into()))?;
    let salt = match field(4) {
        "-" => Vec::new(),
        hex => HEXLOWER
            .decode(hex.to_ascii_lowercase().as_bytes())
            .map_err(|_| Error::InvalidRecord("NSEC3 RR: invalid salt".into()))?,
    };
    let next_hashed_owner = decode_hash_label(field(5).as_bytes())?;
    let types = types_from_text(caps.get(6).map(|m| m.as_str()).unwrap_or_default())?;
    Nsec3Record::new(
        owner,
        ttl,
        algorithm,
        flags,
        iterations,
        salt,
        next_hashed_owner,
        types,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::ToPrimitive;

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    #[test]
    fn rfc5155_hash_vector() {
        // RFC 5155, Appendix A: H(example) with salt aabbccdd, 12 iterations
        let wire = name("example.").to_wire();
        let digest = compute_hash(&wire, &[0xaa, 0xbb, 0xcc, 0xdd], 12);
        assert_eq!(
            BASE32_DNSSEC.encode(&digest),
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom"
        );
    }

    #[test]
    fn nsec_owner_must_differ_from_next() {
        let owner = name("a.example.com.");
        assert!(NsecRecord::new(owner.clone(), 3600, owner, vec![]).is_err());
    }

    #[test]
    fn nsec_covers_with_wrap() {
        let rr = NsecRecord::new(
            name("y.example.com."),
            3600,
            name("example.com."),
            vec![RecordType::A],
        )
        .unwrap();
        assert!(rr.covers(&name("z.example.com.")));
        assert!(rr.covers(&name("example.com.")));
        assert!(!rr.covers_exclusive(&name("y.example.com.")));
    }

    #[test]
    fn nsec3_distance_and_white_lies() {
        let mut hashed = [0u8; SHA1_LENGTH];
        let mut next = [0u8; SHA1_LENGTH];
        next[SHA1_LENGTH - 1] = 2;
        assert_eq!(distance_covered(&hashed, &next).to_u64(), Some(2));
        // equal endpoints mean the record covers the whole circle
        next[SHA1_LENGTH - 1] = 0;
        assert_eq!(distance_covered(&hashed, &next), *SHA1_MAX);
        // wrap-around distance is the absolute difference
        hashed[0] = 0xff;
        assert!(distance_covered(&hashed, &next) > BigUint::from(0u8));
    }

    #[test]
    fn nsec3_rejects_bad_parameters() {
        let owner = name("0p9mhaveqvm6t7vbl5lop2u3t2rp3tom.example.");
        let digest = [7u8; SHA1_LENGTH];
        assert!(
            Nsec3Record::new(owner.clone(), 10, 2, 0, 1, vec![], digest, vec![]).is_err(),
            "algorithm without the SHA-1 bit"
        );
        assert!(
            Nsec3Record::new(owner, 10, 1, 0, 2501, vec![], digest, vec![]).is_err(),
            "iterations over 2500"
        );
    }

    #[test]
    fn nsec_text_roundtrip() {
        let rr = NsecRecord::new(
            name("a.example.com."),
            86400,
            name("b.example.com."),
            vec![RecordType::A, RecordType::RRSIG, RecordType::NSEC],
        )
        .unwrap();
        let line = rr.to_string();
        assert_eq!(nsec_from_text(&line).unwrap(), rr);
    }

    #[test]
    fn nsec_text_roundtrip_with_escapes() {
        let owner = Name::new(vec![
            Label::new(b"\x01\x02".to_vec()).unwrap(),
            Label::new(b"example".to_vec()).unwrap(),
            Label::root(),
        ])
        .unwrap();
        let rr = NsecRecord::new(owner, 60, name("example."), vec![RecordType::TXT]).unwrap();
        let line = rr.to_string();
        assert_eq!(nsec_from_text(&line).unwrap(), rr);
    }

    #[test]
    fn nsec3_text_roundtrip() {
        let wire = name("a.example.").to_wire();
        let hashed = compute_hash(&wire, b"\xab", 5);
        let next = compute_hash(&name("b.example.").to_wire(), b"\xab", 5);
        let owner = name("example.").prepend(hash_label(&hashed)).unwrap();
        let rr = Nsec3Record::new(
            owner,
            300,
            1,
            1,
            5,
            vec![0xab],
            next,
            vec![RecordType::A, RecordType::RRSIG],
        )
        .unwrap();
        let line = rr.to_string();
        assert_eq!(nsec3_from_text(&line).unwrap(), rr);
    }

    #[test]
    fn nsec3_text_roundtrip_empty_salt() {
        let digest = compute_hash(&name("x.example.").to_wire(), b"", 0);
        let owner = name("example.").prepend(hash_label(&digest)).unwrap();
        let rr = Nsec3Record::new(owner, 0, 1, 0, 0, vec![], digest, vec![]).unwrap();
        let line = rr.to_string();
        assert!(line.contains(" - "));
        assert_eq!(nsec3_from_text(&line).unwrap(), rr);
    }
}
