//! RDATA type definitions.
//!
//! Only the record types the zone walker actually consumes are modelled in
//! detail; everything else is carried as raw [`Rdata::Unknown`] bytes.

use std::fmt::Display;
use std::io::{Cursor, Write};

use data_encoding::HEXUPPER;

use crate::error::{EncodeError, ParseError};
use crate::RecordType;

pub mod a;
pub mod aaaa;
pub mod dnskey;
pub mod ns;
pub mod nsec;
pub mod nsec3;
pub mod opt;
pub mod rrsig;
pub mod soa;

pub use a::A;
pub use aaaa::AAAA;
pub use dnskey::DNSKEY;
pub use ns::NS;
pub use nsec::NSEC;
pub use nsec3::{NSEC3, NSEC3PARAM};
pub use opt::OPT;
pub use rrsig::RRSIG;
pub use soa::SOA;

/// The record data (RDATA) for a [`Record`][super::Record].
#[derive(PartialEq, Eq, Clone, Debug)]
#[non_exhaustive]
pub enum Rdata {
    A(A),
    NS(NS),
    SOA(SOA),
    AAAA(AAAA),
    OPT(OPT),
    RRSIG(RRSIG),
    NSEC(NSEC),
    DNSKEY(DNSKEY),
    NSEC3(NSEC3),
    NSEC3PARAM(NSEC3PARAM),

    /// Unknown RDATA, containing the raw RDATA bytes.
    Unknown(Vec<u8>),
}

/// A trait for working with the different RDATA variants.
pub trait RdataTrait: Sized + Display {
    /// Parses the RDATA from the encoded bytes, starting at `rdata`'s current
    /// position in the slice.
    ///
    /// `rdata` is a [`Cursor`] wrapping the complete DNS message containing
    /// the RDATA; the whole message is needed so that compression pointers
    /// inside the RDATA can be followed. `rdlength` is the byte count of the
    /// encoded RDATA.
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError>;

    /// Encodes the RDATA into the given `buf` and returns the number of
    /// written bytes on success.
    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError>;

    /// Encodes the RDATA and returns the encoded bytes.
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut rdata = Vec::new();
        self.encode_rdata_into(&mut rdata)?;
        Ok(rdata)
    }
}

#[doc(hidden)]
macro_rules! impl_from_rtype {
    ($variant:ident) => {
        impl From<$variant> for Rdata {
            fn from(rdata: $variant) -> Self {
                Self::$variant(rdata)
            }
        }
    };
}

#[doc(hidden)]
macro_rules! impl_as_rtype {
    ($method:ident, $variant:ident) => {
        /// Returns a reference to the inner RDATA when called on the matching
        /// variant, [`None`] otherwise.
        pub fn $method(&self) -> Option<&$variant> {
            if let Self::$variant(inner) = self {
                Some(inner)
            } else {
                None
            }
        }
    };
}

/// Match on every [`Rdata`] variant and execute a block for it.
#[macro_export]
macro_rules! match_rdata {
    ($self:ident, $inner:ident, $arm:block, $inner_unknown:ident, $unknown_arm:block) => {
        match $self {
            Rdata::A($inner) => $arm,
            Rdata::NS($inner) => $arm,
            Rdata::SOA($inner) => $arm,
            Rdata::AAAA($inner) => $arm,
            Rdata::OPT($inner) => $arm,
            Rdata::RRSIG($inner) => $arm,
            Rdata::NSEC($inner) => $arm,
            Rdata::DNSKEY($inner) => $arm,
            Rdata::NSEC3($inner) => $arm,
            Rdata::NSEC3PARAM($inner) => $arm,
            Rdata::Unknown($inner_unknown) => $unknown_arm,
        }
    };
}

impl Rdata {
    /// See [`RdataTrait::encode()`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match_rdata!(self, rdata, { rdata.encode() }, unknown_rdata, {
            Ok(unknown_rdata.clone())
        })
    }

    /// See [`RdataTrait::encode_rdata_into()`].
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        match_rdata!(
            self,
            rdata,
            { rdata.encode_rdata_into(buf) },
            unknown_rdata,
            {
                buf.write_all(unknown_rdata)?;
                Ok(unknown_rdata.len() as u16)
            }
        )
    }

    /// Returns the [`RecordType`] that matches this RDATA.
    ///
    /// [`Rdata::Unknown`] does not know its type and maps to
    /// [`RecordType::Unknown(0)`].
    pub fn rtype(&self) -> RecordType {
        match self {
            Rdata::A(_) => RecordType::A,
            Rdata::NS(_) => RecordType::NS,
            Rdata::SOA(_) => RecordType::SOA,
            Rdata::AAAA(_) => RecordType::AAAA,
            Rdata::OPT(_) => RecordType::OPT,
            Rdata::RRSIG(_) => RecordType::RRSIG,
            Rdata::NSEC(_) => RecordType::NSEC,
            Rdata::DNSKEY(_) => RecordType::DNSKEY,
            Rdata::NSEC3(_) => RecordType::NSEC3,
            Rdata::NSEC3PARAM(_) => RecordType::NSEC3PARAM,
            Rdata::Unknown(_) => RecordType::Unknown(0),
        }
    }

    impl_as_rtype!(as_a, A);
    impl_as_rtype!(as_ns, NS);
    impl_as_rtype!(as_soa, SOA);
    impl_as_rtype!(as_aaaa, AAAA);
    impl_as_rtype!(as_opt, OPT);
    impl_as_rtype!(as_rrsig, RRSIG);
    impl_as_rtype!(as_nsec, NSEC);
    impl_as_rtype!(as_dnskey, DNSKEY);
    impl_as_rtype!(as_nsec3, NSEC3);
    impl_as_rtype!(as_nsec3param, NSEC3PARAM);
}

impl_from_rtype!(A);
impl_from_rtype!(NS);
impl_from_rtype!(SOA);
impl_from_rtype!(AAAA);
impl_from_rtype!(OPT);
impl_from_rtype!(RRSIG);
impl_from_rtype!(NSEC);
impl_from_rtype!(DNSKEY);
impl_from_rtype!(NSEC3);
impl_from_rtype!(NSEC3PARAM);

impl Display for Rdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match_rdata!(self, rdata, { write!(f, "{}", rdata) }, data, {
            write!(f, "\\# {} {}", data.len(), HEXUPPER.encode(data))
        })
    }
}
