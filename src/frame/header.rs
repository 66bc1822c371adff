use crate::types::{FrameDecodeError, FrameType, U31_MAX};
use bytes::{Buf, BufMut};
use num_traits::FromPrimitive;

/// The 9-byte frame header shared by every HTTP/2 frame. `typ` is kept as the
/// raw wire byte rather than the typed [`FrameType`] enum so that a frame of
/// an unrecognized type still parses a valid header; RFC 9113 §4.1 requires
/// unknown frame types to be ignored, not rejected, and only the payload
/// parser (which already carries an `Unknown` variant) needs to tell the two
/// cases apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub typ: u8,
    pub flags: u8,
    pub stream_id: u32,
}

pub const HEADER_LEN: usize = 9;

impl FrameHeader {
    pub fn new(length: u32, typ: u8, flags: u8, stream_id: u32) -> Self {
        Self {
            length,
            typ,
            flags,
            stream_id,
        }
    }

    /// The known [`FrameType`] this header's wire byte names, if any.
    pub fn known_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.typ)
    }

    /// Parses the 9-byte header. Does not enforce MAX_FRAME_SIZE; the caller
    /// checks `length` against the locally-advertised bound before reading
    /// the payload, per spec 4.1. Never fails on an unrecognized type byte —
    /// only a short read is an error here.
    pub fn parse(buf: &mut impl Buf) -> Result<Self, FrameDecodeError> {
        debug_assert!(buf.remaining() >= HEADER_LEN);
        let length = ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | (buf.get_u8() as u32);
        let typ = buf.get_u8();
        let flags = buf.get_u8();
        let stream_id = buf.get_u32() & U31_MAX.get();
        Ok(Self {
            length,
            typ,
            flags,
            stream_id,
        })
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        let length = self.length.to_be_bytes();
        buf.put_slice(&length[1..]);
        buf.put_u8(self.typ);
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & U31_MAX.get());
    }
}
