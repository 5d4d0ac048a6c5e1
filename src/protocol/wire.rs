//! Wire primitives shared by the network protocol and the map file codec.
//!
//! Everything on the wire is little-endian, including multi-byte integers
//! inside compressed bodies. Variable-length strings and binary blobs are a
//! `u32` length prefix followed by the raw bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::common::error::{WireError, WireResult};

/// Maximum size of a compressed data block, in bytes.
///
/// Individual packets must never get anywhere near 64 KiB.
pub const MAX_COMPRESSED_SIZE: usize = 65536;

/// Hard ceiling for any length-prefixed field, compressed blocks included.
pub const MAX_FIELD_SIZE: usize = MAX_COMPRESSED_SIZE;

pub fn get_u8(buf: &mut impl Buf) -> WireResult<u8> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut impl Buf) -> WireResult<u16> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u16_le())
}

pub fn get_u32(buf: &mut impl Buf) -> WireResult<u32> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u32_le())
}

pub fn get_i32(buf: &mut impl Buf) -> WireResult<i32> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_i32_le())
}

/// Reads exactly `N` raw bytes (fixed-width field, no length prefix).
pub fn get_fixed<const N: usize>(buf: &mut impl Buf) -> WireResult<[u8; N]> {
    if buf.remaining() < N {
        return Err(WireError::Truncated);
    }
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a length-prefixed binary blob, capped at `max` bytes.
pub fn get_blob(buf: &mut impl Buf, max: usize) -> WireResult<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    if len > max {
        return Err(WireError::StringTooLong { max, got: len });
    }
    if buf.remaining() < len {
        return Err(WireError::Truncated);
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a length-prefixed UTF-8 string, capped at `max` bytes.
pub fn get_string(buf: &mut impl Buf, max: usize) -> WireResult<String> {
    let raw = get_blob(buf, max)?;
    String::from_utf8(raw).map_err(|_| WireError::corrupt("invalid UTF-8 in string field"))
}

pub fn put_u8(buf: &mut BytesMut, value: u8) {
    buf.put_u8(value);
}

pub fn put_u16(buf: &mut BytesMut, value: u16) {
    buf.put_u16_le(value);
}

pub fn put_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u32_le(value);
}

pub fn put_i32(buf: &mut BytesMut, value: i32) {
    buf.put_i32_le(value);
}

pub fn put_blob(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value);
}

pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_blob(buf, value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn integers_are_little_endian() {
        let mut buf = BytesMut::new();
        put_u16(&mut buf, 0x0102);
        put_u32(&mut buf, 0x03040506);
        assert_eq!(&buf[..], &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);

        let mut rd = Bytes::from(buf.to_vec());
        assert_eq!(get_u16(&mut rd).unwrap(), 0x0102);
        assert_eq!(get_u32(&mut rd).unwrap(), 0x03040506);
    }

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "Test Server");
        let mut rd = Bytes::from(buf.to_vec());
        assert_eq!(get_string(&mut rd, 64).unwrap(), "Test Server");
        assert_eq!(rd.remaining(), 0);
    }

    #[test]
    fn string_longer_than_declared_buffer_is_truncated() {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, 10);
        buf.put_slice(b"shrt");
        let mut rd = Bytes::from(buf.to_vec());
        assert!(matches!(get_string(&mut rd, 64), Err(WireError::Truncated)));
    }

    #[test]
    fn string_over_field_cap_is_rejected() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "this name is too long");
        let mut rd = Bytes::from(buf.to_vec());
        assert!(matches!(
            get_string(&mut rd, 8),
            Err(WireError::StringTooLong { max: 8, .. })
        ));
    }

    #[test]
    fn fixed_field_needs_exact_bytes() {
        let mut rd = Bytes::from_static(&[1, 2, 3]);
        assert!(matches!(
            get_fixed::<4>(&mut rd),
            Err(WireError::Truncated)
        ));
        let mut rd = Bytes::from_static(&[1, 2, 3, 4]);
        assert_eq!(get_fixed::<4>(&mut rd).unwrap(), [1, 2, 3, 4]);
    }
}
