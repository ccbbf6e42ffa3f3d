//! `DNSKEY` RDATA definition.

use std::fmt::Display;
use std::io::{Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use data_encoding::BASE64;

use crate::error::{EncodeError, ParseError};

use super::{Rdata, RdataTrait};

/// A record containing a public key used to sign record sets of the zone.
/// [\[RFC 4034\]](https://www.rfc-editor.org/rfc/rfc4034)
///
/// The walker only checks for the *presence* of a DNSKEY at the zone apex;
/// signatures are never validated.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct DNSKEY {
    /// Indicates whether this key is used to sign record sets.
    pub zone: bool,
    /// Revocation flag. [\[RFC 5011\]](https://www.rfc-editor.org/rfc/rfc5011)
    pub revoked: bool,
    /// Indicates whether this key is a key signing key.
    pub secure_entry_point: bool,
    /// The public key's cryptographic algorithm number.
    pub algorithm: u8,
    pub key: Vec<u8>,
}

impl DNSKEY {
    fn encode_flags(&self) -> u16 {
        let zone = if self.zone { 1 << 8 } else { 0 };
        let revoked = if self.revoked { 1 << 7 } else { 0 };
        let secure_entry_point = if self.secure_entry_point { 1 } else { 0 };
        zone | revoked | secure_entry_point
    }
}

impl RdataTrait for DNSKEY {
    fn parse_rdata(rdata: &mut std::io::Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        let flags = rdata.read_u16::<NetworkEndian>()?;
        let zone = (flags & (1 << 8)) != 0;
        let revoked = (flags & (1 << 7)) != 0;
        let secure_entry_point = (flags & 1) != 0;

        let protocol = rdata.read_u8()?;
        if protocol != 3 {
            return Err(ParseError::InvalidDnskeyProtocol(protocol));
        }

        let algorithm = rdata.read_u8()?;

        // we already read: u16 (2) + u8 (1) + u8 (1) = 4 bytes
        let mut key = vec![0; (rdlength as usize).saturating_sub(4)];
        rdata.read_exact(&mut key)?;

        Ok(Rdata::DNSKEY(Self {
            zone,
            revoked,
            secure_entry_point,
            algorithm,
            key,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_u16::<NetworkEndian>(self.encode_flags())?;
        // protocol must always be 3
        buf.write_u8(3)?;
        buf.write_u8(self.algorithm)?;
        buf.write_all(&self.key)?;

        Ok(self.key.len() as u16 + 2 + 1 + 1)
    }
}

impl Display for DNSKEY {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = BASE64.encode(&self.key);
        write!(f, "{} 3 {} {}", self.encode_flags(), self.algorithm, key)
    }
}
