//! `NSEC3` and `NSEC3PARAM` RDATA definition.

use std::fmt::Display;
use std::io::{Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use data_encoding::{BASE32_DNSSEC, HEXUPPER};
use repr_with_fallback::repr_with_fallback;

use crate::error::{EncodeError, ParseError};
use crate::RecordType;

use super::nsec::NSEC;
use super::{Rdata, RdataTrait};

repr_with_fallback! {
    /// Hashing algorithms for use in [`NSEC3`] records.
    ///
    /// See <https://www.iana.org/assignments/dnssec-nsec3-parameters/dnssec-nsec3-parameters.xhtml>
    /// for the official list.
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    #[non_exhaustive]
    pub enum HashAlgorithm {
        SHA1 = 1,
        Unassigned(u8), // 0, 2-255 (technically, 0 is Reserved, but we treat it as Unassigned)
    }
}

/// A record providing authenticated denial of existence, like
/// [`NSEC`][super::nsec::NSEC], but naming only the *hash* of the next owner
/// to make zone enumeration harder.
/// [\[RFC 5155\]](https://www.rfc-editor.org/rfc/rfc5155)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NSEC3 {
    /// The hash algorithm used to construct the hash value.
    pub hash_algorithm: HashAlgorithm,
    /// Whether this record may cover unsigned delegations.
    pub opt_out: bool,
    /// The number of *additional* times the hash function is applied.
    pub iterations: u16,
    /// Appended to the owner name before hashing, if present.
    pub salt: Option<Vec<u8>>,
    /// The next hashed owner name in hash order: the unmodified binary hash
    /// value, not base32-encoded and without the zone name.
    pub next_hashed_owner: Vec<u8>,
    /// The record set types that exist at the original owner name.
    pub types: Vec<RecordType>,
}

/// A record publishing the [`NSEC3`] parameters of a zone at its apex.
/// [\[RFC 5155\]](https://www.rfc-editor.org/rfc/rfc5155)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NSEC3PARAM {
    /// See [`NSEC3::hash_algorithm`].
    pub hash_algorithm: HashAlgorithm,
    /// Must be 0; the record is not to be used otherwise.
    pub flags: u8,
    /// See [`NSEC3::iterations`].
    pub iterations: u16,
    /// See [`NSEC3::salt`].
    pub salt: Option<Vec<u8>>,
}

impl NSEC3 {
    pub fn encode_flags(&self) -> u8 {
        if self.opt_out {
            1
        } else {
            0
        }
    }
}

impl RdataTrait for NSEC3 {
    fn parse_rdata(rdata: &mut std::io::Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        let hash_algorithm: HashAlgorithm = rdata.read_u8()?.into();
        let flags = rdata.read_u8()?;
        let opt_out = (flags & 1) != 0;
        let iterations = rdata.read_u16::<NetworkEndian>()?;
        let salt_length = rdata.read_u8()?;
        let salt = if salt_length != 0 {
            let mut salt = vec![0; salt_length as usize];
            rdata.read_exact(&mut salt)?;
            Some(salt)
        } else {
            None
        };
        let hash_length = rdata.read_u8()?;
        let mut next_hashed_owner = vec![0; hash_length as usize];
        rdata.read_exact(&mut next_hashed_owner)?;
        // we already read: u8 (1) + u8 (1) + u16 (2) + u8 (1) + salt_length
        // + u8 (1) + hash_length bytes
        let bytes_read = 6 + salt_length as u16 + hash_length as u16;
        let types = NSEC::parse_type_bitmap(rdata, bytes_read, rdlength)?;

        Ok(Rdata::NSEC3(Self {
            hash_algorithm,
            opt_out,
            iterations,
            salt,
            next_hashed_owner,
            types,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_u8(self.hash_algorithm.into())?;
        buf.write_u8(self.encode_flags())?;
        buf.write_u16::<NetworkEndian>(self.iterations)?;

        if let Some(salt) = &self.salt {
            buf.write_u8(salt.len() as u8)?;
            buf.write_all(salt)?;
        } else {
            buf.write_u8(0)?;
        }

        buf.write_u8(self.next_hashed_owner.len() as u8)?;
        buf.write_all(&self.next_hashed_owner)?;

        let bytes_written = 1
            + 1
            + 2
            + 1
            + self.salt.as_ref().map(|s| s.len()).unwrap_or_default()
            + 1
            + self.next_hashed_owner.len();

        Ok(bytes_written as u16 + NSEC::encode_type_bitmap_into(&self.types, buf)?)
    }
}

impl Display for NSEC3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hash_algorithm: u8 = self.hash_algorithm.into();
        let salt = match &self.salt {
            None => "-".into(),
            Some(salt) => HEXUPPER.encode(salt),
        };
        let next_hashed_owner = BASE32_DNSSEC.encode(&self.next_hashed_owner);
        let types: Vec<_> = self.types.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} {} {} {} {} {}",
            hash_algorithm,
            self.encode_flags(),
            self.iterations,
            salt,
            next_hashed_owner,
            types.join(" "),
        )
    }
}

impl RdataTrait for NSEC3PARAM {
    fn parse_rdata(
        rdata: &mut std::io::Cursor<&[u8]>,
        _rdlength: u16,
    ) -> Result<Rdata, ParseError> {
        let hash_algorithm: HashAlgorithm = rdata.read_u8()?.into();
        let flags = rdata.read_u8()?;
        let iterations = rdata.read_u16::<NetworkEndian>()?;
        let salt_length = rdata.read_u8()?;
        let salt = if salt_length != 0 {
            let mut salt = vec![0; salt_length as usize];
            rdata.read_exact(&mut salt)?;
            Some(salt)
        } else {
            None
        };
        Ok(Rdata::NSEC3PARAM(Self {
            hash_algorithm,
            flags,
            iterations,
            salt,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_u8(self.hash_algorithm.into())?;
        buf.write_u8(self.flags)?;
        buf.write_u16::<NetworkEndian>(self.iterations)?;

        if let Some(salt) = &self.salt {
            buf.write_u8(salt.len() as u8)?;
            buf.write_all(salt)?;
        } else {
            buf.write_u8(0)?;
        }

        Ok(1 + 1 + 2 + 1 + self.salt.as_ref().map(|s| s.len()).unwrap_or_default() as u16)
    }
}

impl Display for NSEC3PARAM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hash_algorithm: u8 = self.hash_algorithm.into();
        let salt = match &self.salt {
            None => "-".into(),
            Some(salt) => HEXUPPER.encode(salt),
        };
        write!(f, "{} 0 {} {}", hash_algorithm, self.iterations, salt)
    }
}
