//! HPACK integer representation, RFC 7541 §5.1.
//!
//! An integer fits in an N-bit prefix if `value < 2^N - 1`; otherwise the
//! prefix is filled with all ones and the remainder is encoded as a
//! variable-length sequence of base-128 digits, least significant group
//! first, with the continuation bit (MSB) set on every group but the last.

use bytes::{Buf, BufMut};

use super::HpackError;

/// Encodes `value` into the low `prefix_bits` bits of `buf`'s next byte,
/// ORing in `leading_bits` (the representation-form tag) for the bits above
/// the prefix. `buf` must already have had the non-prefix bits reserved by
/// the caller (i.e. this writes the first byte itself).
pub fn encode(value: usize, prefix_bits: u8, leading_bits: u8, buf: &mut impl BufMut) {
    debug_assert!((1..=8).contains(&prefix_bits));
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        buf.put_u8(leading_bits | value as u8);
        return;
    }
    buf.put_u8(leading_bits | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        buf.put_u8(0x80 | (remaining % 128) as u8);
        remaining /= 128;
    }
    buf.put_u8(remaining as u8);
}

/// Decodes an integer whose prefix occupies the low `prefix_bits` bits of the
/// next byte in `buf`. Returns the decoded value; `buf` is advanced past the
/// whole representation.
pub fn decode(prefix_bits: u8, buf: &mut impl Buf) -> Result<usize, HpackError> {
    debug_assert!((1..=8).contains(&prefix_bits));
    if !buf.has_remaining() {
        return Err(HpackError::TruncatedInteger);
    }
    let max_prefix = (1usize << prefix_bits) - 1;
    let first = buf.get_u8();
    let prefix_value = (first as usize) & max_prefix;
    if prefix_value < max_prefix {
        return Ok(prefix_value);
    }

    let mut value = max_prefix;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(HpackError::TruncatedInteger);
        }
        let byte = buf.get_u8();
        let continued = byte & 0x80 != 0;
        let digit = (byte & 0x7f) as usize;
        let added = digit
            .checked_shl(shift)
            .ok_or(HpackError::IntegerOverflow)?;
        value = value.checked_add(added).ok_or(HpackError::IntegerOverflow)?;
        if !continued {
            return Ok(value);
        }
        shift += 7;
        if shift > 32 {
            return Err(HpackError::IntegerOverflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn small_value_fits_in_prefix() {
        // https://httpwg.org/specs/rfc7541.html#integer.representation.example1
        let mut buf = BytesMut::new();
        encode(10, 5, 0, &mut buf);
        assert_eq!(&buf[..], &[0b0000_1010]);
        assert_eq!(decode(5, &mut &buf[..]).unwrap(), 10);
    }

    #[test]
    fn large_value_spills_into_continuation() {
        // https://httpwg.org/specs/rfc7541.html#integer.representation.example2
        let mut buf = BytesMut::new();
        encode(1337, 5, 0, &mut buf);
        assert_eq!(&buf[..], &[0b0001_1111, 0b1001_1010, 0b0000_1010]);
        assert_eq!(decode(5, &mut &buf[..]).unwrap(), 1337);
    }

    #[test]
    fn eight_bit_prefix() {
        // https://httpwg.org/specs/rfc7541.html#integer.representation.example3
        let mut buf = BytesMut::new();
        encode(42, 8, 0, &mut buf);
        assert_eq!(&buf[..], &[42]);
        assert_eq!(decode(8, &mut &buf[..]).unwrap(), 42);
    }

    #[test]
    fn leading_bits_are_preserved() {
        let mut buf = BytesMut::new();
        encode(5, 4, 0b0101_0000, &mut buf);
        assert_eq!(&buf[..], &[0b0101_0101]);
    }

    #[test]
    fn round_trip_many_values() {
        for v in [0usize, 1, 15, 16, 127, 128, 129, 16383, 16384, 100_000] {
            for prefix in [1u8, 4, 5, 7, 8] {
                let mut buf = BytesMut::new();
                encode(v, prefix, 0, &mut buf);
                let decoded = decode(prefix, &mut &buf[..]).unwrap();
                assert_eq!(decoded, v, "prefix={prefix} value={v}");
            }
        }
    }

    #[test]
    fn truncated_continuation_is_an_error() {
        let mut buf = BytesMut::new();
        encode(1337, 5, 0, &mut buf);
        buf.truncate(2);
        assert!(matches!(decode(5, &mut &buf[..]), Err(HpackError::TruncatedInteger)));
    }
}
