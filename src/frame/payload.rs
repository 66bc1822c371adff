use crate::flags::{ContinuationFlags, DataFlags, HeadersFlags, PingFlags, PushPromiseFlags, SettingsFlags};
use crate::types::{ErrorType, FrameDecodeError, FrameType, StreamId, U31_MAX};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;
use std::num::NonZeroU32;

/// https://httpwg.org/specs/rfc7540.html#PRIORITY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityInfo {
    pub exclusive: bool,
    pub dependency: StreamId,
    /// Weight in [1, 256]; the wire byte is this value minus one.
    pub weight: u16,
}

impl PriorityInfo {
    const WIRE_LEN: usize = 5;

    fn parse(buf: &mut impl Buf) -> Self {
        let raw = buf.get_u32();
        let exclusive = raw & 0x8000_0000 != 0;
        let dependency = raw & U31_MAX.get();
        let weight = buf.get_u8() as u16 + 1;
        Self {
            exclusive,
            dependency,
            weight,
        }
    }

    fn write(&self, buf: &mut impl BufMut) {
        let mut raw = self.dependency & U31_MAX.get();
        if self.exclusive {
            raw |= 0x8000_0000;
        }
        buf.put_u32(raw);
        buf.put_u8((self.weight.clamp(1, 256) - 1) as u8);
    }
}

/// Typed frame payloads, one per RFC 9113 §6 frame type, plus `Unknown` for
/// any frame type this endpoint does not recognize (RFC 9113 §4.1: unknown
/// types MUST be ignored, but their declared length is always consumed).
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Data {
        end_stream: bool,
        /// Padding length as declared on the wire; `None` unless PADDED was set.
        pad_len: Option<u8>,
        data: Bytes,
    },
    Headers {
        end_stream: bool,
        end_headers: bool,
        pad_len: Option<u8>,
        priority: Option<PriorityInfo>,
        block_fragment: Bytes,
    },
    Priority(PriorityInfo),
    ResetStream {
        error_code: u32,
    },
    Settings {
        ack: bool,
        /// (identifier, value) pairs in wire order; unknown identifiers are
        /// kept here so the caller can silently ignore them per spec, rather
        /// than dropped during parsing.
        params: Vec<(u16, u32)>,
    },
    PushPromise {
        end_headers: bool,
        pad_len: Option<u8>,
        promised_stream_id: StreamId,
        block_fragment: Bytes,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        increment: NonZeroU32,
    },
    Continuation {
        end_headers: bool,
        block_fragment: Bytes,
    },
    Unknown {
        typ: u8,
        payload: Bytes,
    },
}

/// Splits a PADDED payload into `(pad_len, body)`, validating that the
/// declared padding fits, per §4.1: "Pad length >= remaining length => PROTOCOL_ERROR".
fn split_padded(mut payload: Bytes, frame: &'static str) -> Result<(Option<u8>, Bytes), FrameDecodeError> {
    if payload.is_empty() {
        return Err(FrameDecodeError::WrongFixedLength {
            frame,
            expected: 1,
            got: 0,
        });
    }
    let pad_len = payload.get_u8();
    if pad_len as usize >= payload.len() {
        return Err(FrameDecodeError::InvalidPadding {
            pad: pad_len as usize,
            remaining: payload.len(),
        });
    }
    let body = payload.split_to(payload.len() - pad_len as usize);
    Ok((Some(pad_len), body))
}

impl FramePayload {
    /// The raw wire type byte this payload serializes as.
    pub fn frame_type(&self) -> u8 {
        match self {
            FramePayload::Data { .. } => FrameType::Data as u8,
            FramePayload::Headers { .. } => FrameType::Headers as u8,
            FramePayload::Priority(_) => FrameType::Priority as u8,
            FramePayload::ResetStream { .. } => FrameType::ResetStream as u8,
            FramePayload::Settings { .. } => FrameType::Settings as u8,
            FramePayload::PushPromise { .. } => FrameType::PushPromise as u8,
            FramePayload::Ping { .. } => FrameType::Ping as u8,
            FramePayload::GoAway { .. } => FrameType::GoAway as u8,
            FramePayload::WindowUpdate { .. } => FrameType::WindowUpdate as u8,
            FramePayload::Continuation { .. } => FrameType::Continuation as u8,
            FramePayload::Unknown { typ, .. } => *typ,
        }
    }

    /// Parses a frame's payload given its already-validated header.
    /// `raw_type` is the wire type byte (kept distinct from `FrameType` so
    /// unknown types can still be represented).
    pub fn parse(
        raw_type: u8,
        flags: u8,
        stream_id: StreamId,
        mut payload: Bytes,
    ) -> Result<Self, FrameDecodeError> {
        let Some(typ) = FrameType::from_u8(raw_type) else {
            return Ok(FramePayload::Unknown { typ: raw_type, payload });
        };
        match typ {
            FrameType::Data => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                let padded = flags & DataFlags::PADDED.bits() != 0;
                let (pad_len, data) = if padded {
                    split_padded(payload, "DATA")?
                } else {
                    (None, payload)
                };
                Ok(FramePayload::Data {
                    end_stream: flags & DataFlags::END_STREAM.bits() != 0,
                    pad_len,
                    data,
                })
            }
            FrameType::Headers => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                let padded = flags & HeadersFlags::PADDED.bits() != 0;
                let (pad_len, mut body) = if padded {
                    split_padded(payload, "HEADERS")?
                } else {
                    (None, payload)
                };
                let priority = if flags & HeadersFlags::PRIORITY.bits() != 0 {
                    if body.len() < PriorityInfo::WIRE_LEN {
                        return Err(FrameDecodeError::WrongFixedLength {
                            frame: "HEADERS priority",
                            expected: PriorityInfo::WIRE_LEN,
                            got: body.len(),
                        });
                    }
                    Some(PriorityInfo::parse(&mut body))
                } else {
                    None
                };
                Ok(FramePayload::Headers {
                    end_stream: flags & HeadersFlags::END_STREAM.bits() != 0,
                    end_headers: flags & HeadersFlags::END_HEADERS.bits() != 0,
                    pad_len,
                    priority,
                    block_fragment: body,
                })
            }
            FrameType::Priority => {
                if payload.len() != PriorityInfo::WIRE_LEN {
                    return Err(FrameDecodeError::WrongFixedLength {
                        frame: "PRIORITY",
                        expected: PriorityInfo::WIRE_LEN,
                        got: payload.len(),
                    });
                }
                Ok(FramePayload::Priority(PriorityInfo::parse(&mut payload)))
            }
            FrameType::ResetStream => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                if payload.len() != 4 {
                    return Err(FrameDecodeError::WrongFixedLength {
                        frame: "RST_STREAM",
                        expected: 4,
                        got: payload.len(),
                    });
                }
                Ok(FramePayload::ResetStream {
                    error_code: payload.get_u32(),
                })
            }
            FrameType::Settings => {
                let ack = flags & SettingsFlags::ACK.bits() != 0;
                if ack {
                    if !payload.is_empty() {
                        return Err(FrameDecodeError::SettingsAckNotEmpty);
                    }
                    return Ok(FramePayload::Settings { ack, params: Vec::new() });
                }
                if payload.len() % 6 != 0 {
                    return Err(FrameDecodeError::SettingsNotAligned(payload.len()));
                }
                let mut params = Vec::with_capacity(payload.len() / 6);
                while payload.has_remaining() {
                    let id = payload.get_u16();
                    let value = payload.get_u32();
                    params.push((id, value));
                }
                Ok(FramePayload::Settings { ack, params })
            }
            FrameType::PushPromise => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                let padded = flags & PushPromiseFlags::PADDED.bits() != 0;
                let (pad_len, mut body) = if padded {
                    split_padded(payload, "PUSH_PROMISE")?
                } else {
                    (None, payload)
                };
                if body.len() < 4 {
                    return Err(FrameDecodeError::WrongFixedLength {
                        frame: "PUSH_PROMISE",
                        expected: 4,
                        got: body.len(),
                    });
                }
                let promised_stream_id = body.get_u32() & U31_MAX.get();
                Ok(FramePayload::PushPromise {
                    end_headers: flags & PushPromiseFlags::END_HEADERS.bits() != 0,
                    pad_len,
                    promised_stream_id,
                    block_fragment: body,
                })
            }
            FrameType::Ping => {
                if stream_id != 0 {
                    return Err(FrameDecodeError::WrongFixedLength {
                        frame: "PING stream id",
                        expected: 0,
                        got: stream_id as usize,
                    });
                }
                if payload.len() != 8 {
                    return Err(FrameDecodeError::WrongFixedLength {
                        frame: "PING",
                        expected: 8,
                        got: payload.len(),
                    });
                }
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Ok(FramePayload::Ping {
                    ack: flags & PingFlags::ACK.bits() != 0,
                    data,
                })
            }
            FrameType::GoAway => {
                if payload.len() < 8 {
                    return Err(FrameDecodeError::WrongFixedLength {
                        frame: "GOAWAY",
                        expected: 8,
                        got: payload.len(),
                    });
                }
                let last_stream_id = payload.get_u32() & U31_MAX.get();
                let error_code = payload.get_u32();
                Ok(FramePayload::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                })
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(FrameDecodeError::WrongFixedLength {
                        frame: "WINDOW_UPDATE",
                        expected: 4,
                        got: payload.len(),
                    });
                }
                let raw = payload.get_u32() & U31_MAX.get();
                let increment = NonZeroU32::new(raw).ok_or(FrameDecodeError::ZeroWindowIncrement)?;
                Ok(FramePayload::WindowUpdate { increment })
            }
            FrameType::Continuation => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                Ok(FramePayload::Continuation {
                    end_headers: flags & ContinuationFlags::END_HEADERS.bits() != 0,
                    block_fragment: payload,
                })
            }
        }
    }

    /// Serializes the payload body (not including the 9-byte frame header)
    /// and returns the flags byte that matches it.
    pub fn write(&self, buf: &mut BytesMut) -> u8 {
        match self {
            FramePayload::Data { end_stream, pad_len, data } => {
                let mut flags = 0u8;
                if *end_stream {
                    flags |= DataFlags::END_STREAM.bits();
                }
                if let Some(pad_len) = pad_len {
                    flags |= DataFlags::PADDED.bits();
                    buf.put_u8(*pad_len);
                    buf.put_slice(data);
                    buf.put_bytes(0, *pad_len as usize);
                } else {
                    buf.put_slice(data);
                }
                flags
            }
            FramePayload::Headers {
                end_stream,
                end_headers,
                pad_len,
                priority,
                block_fragment,
            } => {
                let mut flags = 0u8;
                if *end_stream {
                    flags |= HeadersFlags::END_STREAM.bits();
                }
                if *end_headers {
                    flags |= HeadersFlags::END_HEADERS.bits();
                }
                if let Some(pad_len) = pad_len {
                    flags |= HeadersFlags::PADDED.bits();
                    buf.put_u8(*pad_len);
                }
                if let Some(priority) = priority {
                    flags |= HeadersFlags::PRIORITY.bits();
                    priority.write(buf);
                }
                buf.put_slice(block_fragment);
                if let Some(pad_len) = pad_len {
                    buf.put_bytes(0, *pad_len as usize);
                }
                flags
            }
            FramePayload::Priority(info) => {
                info.write(buf);
                0
            }
            FramePayload::ResetStream { error_code } => {
                buf.put_u32(*error_code);
                0
            }
            FramePayload::Settings { ack, params } => {
                if *ack {
                    return SettingsFlags::ACK.bits();
                }
                for (id, value) in params {
                    buf.put_u16(*id);
                    buf.put_u32(*value);
                }
                0
            }
            FramePayload::PushPromise {
                end_headers,
                pad_len,
                promised_stream_id,
                block_fragment,
            } => {
                let mut flags = 0u8;
                if *end_headers {
                    flags |= PushPromiseFlags::END_HEADERS.bits();
                }
                if let Some(pad_len) = pad_len {
                    flags |= PushPromiseFlags::PADDED.bits();
                    buf.put_u8(*pad_len);
                }
                buf.put_u32(*promised_stream_id & U31_MAX.get());
                buf.put_slice(block_fragment);
                if let Some(pad_len) = pad_len {
                    buf.put_bytes(0, *pad_len as usize);
                }
                flags
            }
            FramePayload::Ping { ack, data } => {
                buf.put_slice(data);
                if *ack {
                    PingFlags::ACK.bits()
                } else {
                    0
                }
            }
            FramePayload::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                buf.put_u32(*last_stream_id & U31_MAX.get());
                buf.put_u32(*error_code);
                buf.put_slice(debug_data);
                0
            }
            FramePayload::WindowUpdate { increment } => {
                buf.put_u32(increment.get() & U31_MAX.get());
                0
            }
            FramePayload::Continuation { end_headers, block_fragment } => {
                buf.put_slice(block_fragment);
                if *end_headers {
                    ContinuationFlags::END_HEADERS.bits()
                } else {
                    0
                }
            }
            FramePayload::Unknown { payload, .. } => {
                buf.put_slice(payload);
                0
            }
        }
    }
}

/// Decodes a known `ErrorType`, defaulting unknown wire values to
/// `InternalError` for display purposes while keeping the raw code around
/// wherever the caller cares about exact wire fidelity.
pub fn error_type_or_unknown(code: u32) -> ErrorType {
    ErrorType::from_u32(code).unwrap_or(ErrorType::InternalError)
}
