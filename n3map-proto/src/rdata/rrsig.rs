//! `RRSIG` RDATA definition.

use std::fmt::Display;
use std::io::{Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use data_encoding::BASE64;

use crate::error::{EncodeError, ParseError};
use crate::name::{Compression, Name};
use crate::RecordType;

use super::{Rdata, RdataTrait};

/// A record storing the digital signature for a resource record set.
/// [\[RFC 4034\]](https://www.rfc-editor.org/rfc/rfc4034)
///
/// The walker uses RRSIG records solely to compare the signer name against
/// the walked zone apex (sub-zone detection); the signature itself is never
/// verified.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct RRSIG {
    /// The type of the record set covered by this record.
    pub type_covered: RecordType,
    /// The cryptographic algorithm number used to create the signature.
    pub algorithm: u8,
    /// The number of labels in the original owner name.
    pub labels: u8,
    /// The TTL of the covered record set in the authoritative zone.
    pub original_ttl: u32,
    /// End of the validity period, seconds since the epoch.
    pub signature_expiration: u32,
    /// Start of the validity period, seconds since the epoch.
    pub signature_inception: u32,
    /// The key tag of the DNSKEY record that validates this signature.
    pub key_tag: u16,
    /// The owner name of the signing DNSKEY; this names the zone of the
    /// covered record set. Must not be compressed on the wire.
    pub signer_name: Name,
    /// The signature bytes; format depends on the algorithm.
    pub signature: Vec<u8>,
}

impl RdataTrait for RRSIG {
    fn parse_rdata(rdata: &mut std::io::Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        // used to calculate how many bytes were read later on
        let rdata_pos_before = rdata.position();

        let type_covered: RecordType = rdata.read_u16::<NetworkEndian>()?.into();
        let algorithm = rdata.read_u8()?;
        let labels = rdata.read_u8()?;
        let original_ttl = rdata.read_u32::<NetworkEndian>()?;
        let signature_expiration = rdata.read_u32::<NetworkEndian>()?;
        let signature_inception = rdata.read_u32::<NetworkEndian>()?;
        let key_tag = rdata.read_u16::<NetworkEndian>()?;
        let signer_name = Name::parse(rdata, Compression::Prohibited)?;

        let rdata_pos_after = rdata.position();
        let bytes_read = (rdata_pos_after - rdata_pos_before) as usize;
        let mut signature = vec![0; (rdlength as usize).saturating_sub(bytes_read)];
        rdata.read_exact(&mut signature)?;

        Ok(Rdata::RRSIG(Self {
            type_covered,
            algorithm,
            labels,
            original_ttl,
            signature_expiration,
            signature_inception,
            key_tag,
            signer_name,
            signature,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_u16::<NetworkEndian>(self.type_covered.into())?;
        buf.write_u8(self.algorithm)?;
        buf.write_u8(self.labels)?;
        buf.write_u32::<NetworkEndian>(self.original_ttl)?;
        buf.write_u32::<NetworkEndian>(self.signature_expiration)?;
        buf.write_u32::<NetworkEndian>(self.signature_inception)?;
        buf.write_u16::<NetworkEndian>(self.key_tag)?;
        let mut bytes_written = 2 + 1 + 1 + 4 + 4 + 4 + 2;
        bytes_written += self.signer_name.encode_into(buf)?;
        buf.write_all(&self.signature)?;

        Ok(bytes_written + self.signature.len() as u16)
    }
}

impl Display for RRSIG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signature = BASE64.encode(&self.signature);
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.type_covered,
            self.algorithm,
            self.labels,
            self.original_ttl,
            self.signature_expiration,
            self.signature_inception,
            self.key_tag,
            self.signer_name,
            signature
        )
    }
}
