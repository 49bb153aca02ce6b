//! UA built-in primitive encodings.
//!
//! The secure channel layer only needs two of the Part 6 built-ins: String
//! and ByteString. Both are encoded as an `Int32` little-endian length prefix
//! followed by the raw bytes; a length of -1 denotes a null value, which is
//! distinct from an empty one.

use bytes::{Buf, BufMut};

use crate::errors::{ProtocolError, Result};

/// Length prefix used for null strings and byte strings.
const NULL_LENGTH: i32 = -1;

/// Write a UA String.
pub fn write_string(dst: &mut impl BufMut, value: Option<&str>) {
    match value {
        None => dst.put_i32_le(NULL_LENGTH),
        Some(s) => {
            dst.put_i32_le(s.len() as i32);
            dst.put_slice(s.as_bytes());
        },
    }
}

/// Read a UA String.
///
/// # Errors
///
/// Returns an error if the buffer is exhausted, the length prefix is negative
/// but not -1, or the bytes are not valid UTF-8.
pub fn read_string(src: &mut impl Buf) -> Result<Option<String>> {
    let bytes = read_length_prefixed(src)?;
    match bytes {
        None => Ok(None),
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| ProtocolError::InvalidUtf8(e.to_string())),
    }
}

/// Write a UA ByteString.
pub fn write_byte_string(dst: &mut impl BufMut, value: Option<&[u8]>) {
    match value {
        None => dst.put_i32_le(NULL_LENGTH),
        Some(bytes) => {
            dst.put_i32_le(bytes.len() as i32);
            dst.put_slice(bytes);
        },
    }
}

/// Read a UA ByteString.
///
/// # Errors
///
/// Returns an error if the buffer is exhausted or the length prefix is
/// negative but not -1.
pub fn read_byte_string(src: &mut impl Buf) -> Result<Option<Vec<u8>>> {
    read_length_prefixed(src)
}

fn read_length_prefixed(src: &mut impl Buf) -> Result<Option<Vec<u8>>> {
    if src.remaining() < 4 {
        return Err(ProtocolError::DecodeOverrun { needed: 4, available: src.remaining() });
    }

    let length = src.get_i32_le();
    if length == NULL_LENGTH {
        return Ok(None);
    }
    if length < 0 {
        return Err(ProtocolError::InvalidLength(length));
    }

    let length = length as usize;
    if src.remaining() < length {
        return Err(ProtocolError::DecodeOverrun { needed: length, available: src.remaining() });
    }

    let mut bytes = vec![0u8; length];
    src.copy_to_slice(&mut bytes);
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut buf = Vec::new();
        write_string(&mut buf, Some("http://opcfoundation.org/UA/SecurityPolicy#None"));

        let mut src = buf.as_slice();
        let value = read_string(&mut src).unwrap();
        assert_eq!(value.as_deref(), Some("http://opcfoundation.org/UA/SecurityPolicy#None"));
        assert_eq!(src.remaining(), 0);
    }

    #[test]
    fn null_is_distinct_from_empty() {
        let mut null_buf = Vec::new();
        write_byte_string(&mut null_buf, None);
        assert_eq!(null_buf, (-1i32).to_le_bytes());

        let mut empty_buf = Vec::new();
        write_byte_string(&mut empty_buf, Some(&[]));
        assert_eq!(empty_buf, 0i32.to_le_bytes());

        assert_eq!(read_byte_string(&mut null_buf.as_slice()).unwrap(), None);
        assert_eq!(read_byte_string(&mut empty_buf.as_slice()).unwrap(), Some(vec![]));
    }

    #[test]
    fn byte_string_round_trip() {
        let mut buf = Vec::new();
        write_byte_string(&mut buf, Some(&[0xde, 0xad, 0xbe, 0xef]));

        let value = read_byte_string(&mut buf.as_slice()).unwrap();
        assert_eq!(value, Some(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn reject_negative_length() {
        let buf = (-2i32).to_le_bytes();
        let result = read_byte_string(&mut buf.as_slice());
        assert_eq!(result, Err(ProtocolError::InvalidLength(-2)));
    }

    #[test]
    fn reject_truncated_value() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10i32.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]);

        let result = read_byte_string(&mut buf.as_slice());
        assert_eq!(result, Err(ProtocolError::DecodeOverrun { needed: 10, available: 3 }));
    }

    #[test]
    fn reject_truncated_prefix() {
        let buf = [0x01, 0x02];
        let result = read_string(&mut buf.as_slice());
        assert_eq!(result, Err(ProtocolError::DecodeOverrun { needed: 4, available: 2 }));
    }

    #[test]
    fn reject_invalid_utf8() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(&[0xff, 0xfe]);

        let result = read_string(&mut buf.as_slice());
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8(_))));
    }
}
