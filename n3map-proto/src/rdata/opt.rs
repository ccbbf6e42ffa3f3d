//! `OPT` pseudo-RDATA definition.

use std::fmt::Display;
use std::io::{Read, Write};

use data_encoding::HEXUPPER;

use crate::error::{EncodeError, ParseError};

use super::{Rdata, RdataTrait};

/// The RDATA of an EDNS0 `OPT` pseudo-record.
/// [\[RFC 6891\]](https://www.rfc-editor.org/rfc/rfc6891)
///
/// The walker never sets EDNS options, so the option list is carried opaquely.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct OPT {
    /// Raw, unparsed EDNS options.
    pub options: Vec<u8>,
}

impl RdataTrait for OPT {
    fn parse_rdata(rdata: &mut std::io::Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        let mut options = vec![0; rdlength as usize];
        rdata.read_exact(&mut options)?;
        Ok(Rdata::OPT(Self { options }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_all(&self.options)?;
        Ok(self.options.len() as u16)
    }
}

impl Display for OPT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", HEXUPPER.encode(&self.options))
    }
}
