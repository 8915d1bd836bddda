use core::str;

use crate::DecodeError;

/// Longest assembled name the decoder will produce, separator dots included.
pub const MAX_NAME_LENGTH: usize = 255;

/// Decodes the first query name from `src` into `dst` without allocating.
///
/// Labels are read as length-prefixed records and joined with dots.
/// Decoding stops at the zero-length terminator or at a compression
/// reference; references are not followed, so a name that uses compression
/// before its terminator comes back truncated at that point. A trailing
/// `.Home` or `.local` suffix is stripped after assembly, as those only
/// mark local-network names.
pub fn decode_query_name<'a>(src: &[u8], dst: &'a mut [u8]) -> Result<&'a str, DecodeError> {
    let mut pos = 0;
    let mut len = 0;
    loop {
        let step = *src.get(pos).ok_or(DecodeError::UnexpectedEnd)? as usize;
        if step == 0 || step & 0xC0 == 0xC0 {
            break;
        }
        pos += 1;

        let label = src.get(pos..pos + step).ok_or(DecodeError::UnexpectedEnd)?;
        let separator = usize::from(len > 0);
        if len + separator + step > dst.len() {
            return Err(DecodeError::Overflow);
        }
        if separator == 1 {
            dst[len] = b'.';
            len += 1;
        }
        dst[len..len + step].copy_from_slice(label);
        len += step;
        pos += step;
    }

    let len = strip_local_suffix(&dst[..len]);
    str::from_utf8(&dst[..len]).map_err(|_| DecodeError::InvalidLabel)
}

fn strip_local_suffix(name: &[u8]) -> usize {
    for suffix in [&b".Home"[..], &b".local"[..]] {
        if name.ends_with(suffix) {
            return name.len() - suffix.len();
        }
    }
    name.len()
}
