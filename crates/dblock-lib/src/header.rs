use crate::DecodeError;

/// Fixed size of the DNS message header.
pub const DNS_HEADER_SIZE: usize = 12;

const RESPONSE_BIT: u16 = 0x8000;
const RESPONSE_CODE_MASK: u16 = 0x000F;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ResponseCode {
    #[default]
    Success,
    /// Server was unable to interpret the query
    FormatError,
    /// Server was unable to process the query due to an internal error
    ServerFailure,
    /// Domain name referenced in the query doesn't exist
    NameError,
    /// Requested type of query is not supported by the server
    NotImplemented,
    /// Server refuses to complete the specified operation
    Refused,
    // 6-15 codes
    Unknown,
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => ResponseCode::Success,
            1 => ResponseCode::FormatError,
            2 => ResponseCode::ServerFailure,
            3 => ResponseCode::NameError,
            4 => ResponseCode::NotImplemented,
            5 => ResponseCode::Refused,
            _ => ResponseCode::Unknown,
        }
    }
}

/// DNS message header.
///
/// Flags are kept as the raw wire word so that an in-place rewrite
/// preserves bits this crate does not model.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct DnsHeader {
    /// Unique ID of this request.
    /// A query and its response **must have the same ID**.
    pub id: u16,
    /// Raw flags word: QR bit, opcode, AA/TC/RD/RA, Z, RCODE
    pub flags: u16,
    /// Number of entries in the *Question* section
    pub question_count: u16,
    /// Number of entries in the *Answer* section
    pub answer_rr_count: u16,
    /// Number of entries in the *Authority* section
    pub authority_rr_count: u16,
    /// Number of entries in the *Additional* section
    pub additional_rr_count: u16,
}

impl DnsHeader {
    pub fn parse(src: &[u8]) -> Result<Self, DecodeError> {
        if src.len() < DNS_HEADER_SIZE {
            return Err(DecodeError::UnexpectedEnd);
        }
        let word = |idx: usize| u16::from_be_bytes([src[idx], src[idx + 1]]);

        Ok(DnsHeader {
            id: word(0),
            flags: word(2),
            question_count: word(4),
            answer_rr_count: word(6),
            authority_rr_count: word(8),
            additional_rr_count: word(10),
        })
    }

    pub fn write(&self, dst: &mut [u8]) -> Result<(), DecodeError> {
        if dst.len() < DNS_HEADER_SIZE {
            return Err(DecodeError::UnexpectedEnd);
        }
        let words = [
            self.id,
            self.flags,
            self.question_count,
            self.answer_rr_count,
            self.authority_rr_count,
            self.additional_rr_count,
        ];
        for (idx, word) in words.into_iter().enumerate() {
            dst[idx * 2..idx * 2 + 2].copy_from_slice(&word.to_be_bytes());
        }

        Ok(())
    }

    pub fn is_response(&self) -> bool {
        self.flags & RESPONSE_BIT != 0
    }

    pub fn response_code(&self) -> ResponseCode {
        ((self.flags & RESPONSE_CODE_MASK) as u8).into()
    }

    pub fn set_response(&mut self) {
        self.flags |= RESPONSE_BIT;
    }

    pub fn set_response_code(&mut self, code: ResponseCode) {
        self.flags = (self.flags & !RESPONSE_CODE_MASK) | code as u16;
    }
}

/// Rewrites a DNS query in place into a name-error response: the response
/// bit is set, RCODE becomes NameError, and the answer/authority/additional
/// counts are zeroed. The question count, the transaction ID and all other
/// flag bits are left untouched, as is everything past the header.
pub fn forge_nxdomain(msg: &mut [u8]) -> Result<(), DecodeError> {
    let mut header = DnsHeader::parse(msg)?;

    header.set_response();
    header.set_response_code(ResponseCode::NameError);
    header.answer_rr_count = 0;
    header.authority_rr_count = 0;
    header.additional_rr_count = 0;

    header.write(msg)
}
