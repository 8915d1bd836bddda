mod header;
mod name;

pub use header::{forge_nxdomain, DnsHeader, ResponseCode, DNS_HEADER_SIZE};
pub use name::{decode_query_name, MAX_NAME_LENGTH};

use thiserror::Error;

/// Errors produced while reading or rewriting DNS wire data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message ends before the field being read")]
    UnexpectedEnd,
    #[error("decoded name does not fit the destination buffer")]
    Overflow,
    #[error("name label is not valid UTF-8")]
    InvalidLabel,
}
