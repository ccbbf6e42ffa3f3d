//! Custom error type definitions.

use thiserror::Error;

/// Errors that may arise during parsing of wire-format messages.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid opcode: valid are 0 to 2 and 4 to 6, got {0}.")]
    InvalidOpcode(u8),

    #[error("Invalid rcode: valid are 0 to 11 and 16 to 23, got {0}.")]
    InvalidRcode(u16),

    #[error("Invalid class: valid are 1, 3, 4, 254 or 255, got {0}.")]
    InvalidClass(u16),

    #[error("Invalid name in OPT record: must be root.")]
    InvalidOptName,

    #[error("Invalid label type: must be 192 (i.e. compressed) or 0, is {0}.")]
    InvalidLabelType(u8),

    #[error("Received truncated message: if possible, resend query via TCP.")]
    TruncatedMessage,

    #[error("Encountered name compression where it is explicitly prohibited.")]
    CompressionProhibited,

    #[error("Invalid DNSKEY protocol field: must be 3, is {0}.")]
    InvalidDnskeyProtocol(u8),

    #[error("Invalid name in message.")]
    Name(#[from] NameError),

    #[error("IO error.")]
    IoError(#[from] std::io::Error),
}

/// Errors that may arise during encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("AA or RA flag set in a query.")]
    AaOrRaInQuery,

    #[error("IO error.")]
    IoError(#[from] std::io::Error),
}

/// Errors of the domain name model.
///
/// `MaxLabelValue` doubles as a control-flow signal when synthesizing query
/// names: it means "this label cannot be increased, move on to the next one".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("maximum domain name label length exceeded ({0} > 63)")]
    LabelTooLong(usize),

    #[error("maximum domain name length exceeded ({0} > 255)")]
    NameTooLong(usize),

    #[error("maximum domain name label value exceeded")]
    MaxLabelValue,

    #[error("invalid domain name: {0}")]
    InvalidName(String),

    #[error("invalid domain name: no label specified")]
    EmptyName,
}
