//! `NSEC` RDATA definition.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::{Cursor, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::{EncodeError, ParseError};
use crate::name::{Compression, Name};
use crate::RecordType;

use super::{Rdata, RdataTrait};

/// A record naming the next owner name in the canonical ordering of the zone
/// together with the set of record types present at the record's owner name,
/// providing authenticated denial of existence.
/// [\[RFC 4034\]](https://www.rfc-editor.org/rfc/rfc4034)
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NSEC {
    /// The next owner name in the canonical ordering of the zone. The last
    /// NSEC record of a zone points back to the zone apex. Must not be
    /// compressed on the wire.
    pub next_domain_name: Name,
    /// The record set types that exist at the NSEC record's owner name.
    pub types: Vec<RecordType>,
}

impl NSEC {
    /// Parses the type bitmap in the RDATA section of an NSEC or NSEC3
    /// record.
    ///
    /// `bytes_read` is the count of bytes already read from the rdata;
    /// `rdlength` is the total rdata length.
    pub fn parse_type_bitmap(
        msg: &mut Cursor<&[u8]>,
        bytes_read: u16,
        rdlength: u16,
    ) -> Result<Vec<RecordType>, ParseError> {
        let mut len_read = bytes_read;
        let mut available_types = Vec::new();
        while len_read < rdlength {
            let window_number = msg.read_u8()?;
            let bitmap_len = msg.read_u8()?;
            for i in 0..bitmap_len {
                let byte = msg.read_u8()?;
                for j in 0..8 {
                    if (byte & (0b1000_0000 >> j)) != 0 {
                        let type_num = ((window_number as u16) << 8) + (i * 8 + j) as u16;
                        available_types.push(type_num.into());
                    }
                }
            }
            len_read += (2 + bitmap_len) as u16;
        }
        Ok(available_types)
    }

    /// Writes the type bitmap representing the members of `types` into the
    /// given `buf`. Returns the number of written bytes.
    pub fn encode_type_bitmap_into(
        types: &[RecordType],
        buf: &mut impl Write,
    ) -> Result<u16, EncodeError> {
        // window blocks must be emitted from lowest to highest block number
        let mut window_blocks: BTreeMap<u16, [u8; 32]> = BTreeMap::new();
        let mut bytes_written = 0;

        for rtype in types {
            let rtype: u16 = (*rtype).into();
            let block_idx = rtype / 256;
            let type_offset = rtype % 256;

            let block = window_blocks.entry(block_idx).or_default();
            let type_index = type_offset / 8;
            let type_shift = type_offset % 8;
            // the offset is counted from left to right
            block[type_index as usize] |= 0b1000_0000 >> type_shift;
        }

        for (block_number, block) in window_blocks {
            // at least one bit is set, so there is a non-zero octet
            let last_nonzero_idx = block
                .iter()
                .enumerate()
                .rfind(|(_, byte)| **byte != 0)
                .unwrap()
                .0;
            let block_length = last_nonzero_idx + 1;

            buf.write_u8(block_number as u8)?;
            buf.write_u8(block_length as u8)?;
            buf.write_all(&block[..=last_nonzero_idx])?;

            bytes_written += 1 + 1 + block_length as u16;
        }

        Ok(bytes_written)
    }
}

impl RdataTrait for NSEC {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        let rdata_pos_before = rdata.position();

        let next_domain_name = Name::parse(rdata, Compression::Prohibited)?;

        let rdata_pos_after = rdata.position();
        let bytes_read = (rdata_pos_after - rdata_pos_before) as u16;

        let types = NSEC::parse_type_bitmap(rdata, bytes_read, rdlength)?;

        Ok(Rdata::NSEC(Self {
            next_domain_name,
            types,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        Ok(self.next_domain_name.encode_into(buf)?
            + Self::encode_type_bitmap_into(&self.types, buf)?)
    }
}

impl Display for NSEC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<_> = self.types.iter().map(ToString::to_string).collect();
        write!(f, "{} {}", self.next_domain_name, types.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_bitmap_roundtrip() {
        let types = vec![
            RecordType::A,
            RecordType::NS,
            RecordType::SOA,
            RecordType::RRSIG,
            RecordType::NSEC,
            RecordType::Unknown(1234),
        ];
        let mut buf = Vec::new();
        let written = NSEC::encode_type_bitmap_into(&types, &mut buf).unwrap();
        assert_eq!(written as usize, buf.len());

        let mut cursor = Cursor::new(buf.as_slice());
        let parsed = NSEC::parse_type_bitmap(&mut cursor, 0, written).unwrap();
        assert_eq!(parsed, types);
    }
}
