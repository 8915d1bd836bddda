use thiserror::Error;

/// Longest key `get_field` will search for.
pub const MAX_KEY_LENGTH: usize = 124;

const MAX_OPERATION_DIGITS: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("field is not present")]
    NotFound,
    #[error("field value is malformed")]
    Malformed,
    #[error("key exceeds the supported length")]
    Overflow,
}

/// Locates the value of the first literal `"key"` occurrence in `buffer`.
///
/// The returned slice is the bare content for string values and includes
/// the brackets/braces for array and object values. This extractor trades
/// generality for simplicity: it is correct only for flat, non-repeating,
/// non-escaped message shapes, which is the contract the control protocol
/// upholds by construction. An escaped quote inside a string terminates it
/// early, and arrays/objects are not nesting-aware.
pub fn get_field<'a>(buffer: &'a str, key: &str) -> Result<&'a str, ExtractError> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(ExtractError::Overflow);
    }

    let pattern = format!("\"{}\"", key);
    let match_end = buffer.find(&pattern).ok_or(ExtractError::NotFound)? + pattern.len();

    let value = buffer[match_end..].trim_start();
    let value = value.strip_prefix(':').ok_or(ExtractError::Malformed)?.trim_start();

    match value.as_bytes().first() {
        Some(b'"') => {
            let content = &value[1..];
            let end = content.find('"').ok_or(ExtractError::Malformed)?;
            Ok(&content[..end])
        }
        Some(b'[') => {
            let end = value.find(']').ok_or(ExtractError::Malformed)?;
            Ok(&value[..=end])
        }
        Some(b'{') => {
            let end = value.find('}').ok_or(ExtractError::Malformed)?;
            Ok(&value[..=end])
        }
        _ => Err(ExtractError::Malformed),
    }
}

/// Extracts the `operation` field and parses it as a decimal integer of at
/// most seven digits.
pub fn get_operation_code(buffer: &str) -> Result<i32, ExtractError> {
    let value = get_field(buffer, "operation")?;
    if value.is_empty()
        || value.len() > MAX_OPERATION_DIGITS
        || !value.bytes().all(|byte| byte.is_ascii_digit())
    {
        return Err(ExtractError::Malformed);
    }
    value.parse().map_err(|_| ExtractError::Malformed)
}
