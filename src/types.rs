use num_derive::{FromPrimitive, ToPrimitive};
use std::num::NonZeroU32;

// Safety: value is a const, that can't be zero
pub const U31_MAX: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(u32::MAX >> 1) };

pub type StreamId = u32;
pub type NonZeroStreamId = std::num::NonZeroU32;

/// An ordered list of (name, value) header pairs, in wire order. Pseudo-headers
/// (":method", ":path", ...) MUST precede regular headers, see
/// `crate::headers::validate_order`.
pub type Headers = Vec<(String, String)>;

#[derive(thiserror::Error, Debug)]
pub enum FrameDecodeError {
    #[error("Payload is shorter than expexted")]
    PayloadTooShort,
    #[error("Unexpected 0 stream ID")]
    ZeroStreamId,
    #[error("Unexpected 0 window increment")]
    ZeroWindowIncrement,
    #[error("Unknown error type: {0}")]
    UnknownErrorType(u32),
    #[error("frame length {length} exceeds MAX_FRAME_SIZE {max}")]
    FrameTooLarge { length: u32, max: u32 },
    #[error("SETTINGS payload length {0} is not a multiple of 6")]
    SettingsNotAligned(usize),
    #[error("SETTINGS ACK frame carried a non-empty payload")]
    SettingsAckNotEmpty,
    #[error("padding length {pad} leaves no room in a payload of {remaining} bytes")]
    InvalidPadding { pad: usize, remaining: usize },
    #[error("{frame} frame had wrong length: expected {expected}, got {got}")]
    WrongFixedLength {
        frame: &'static str,
        expected: usize,
        got: usize,
    },
}

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorType {
    /// The associated condition is not a result of an error. For example, a GOAWAY might include this code to indicate graceful shutdown of a connection.
    NoError = 0x0,
    /// The endpoint detected an unspecific protocol error. This error is for use when a more specific error code is not available.
    ProtocolError = 0x1,
    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x2,
    /// The endpoint detected that its peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// The endpoint sent a SETTINGS frame but did not receive a response in a timely manner. See Section 6.5.3 ("Settings Synchronization").
    SettingsTimeout = 0x4,
    /// The endpoint received a frame after a stream was half-closed.
    StreamClosed = 0x5,
    /// The endpoint received a frame with an invalid size.
    FrameSizeError = 0x6,
    /// The endpoint refused the stream prior to performing any application processing (see Section 8.1.4 for details).
    RefusedStream = 0x7,
    /// Used by the endpoint to indicate that the stream is no longer needed.
    Cancel = 0x8,
    /// The endpoint is unable to maintain the header compression context for the connection.
    CompressionError = 0x9,
    /// The connection established in response to a CONNECT request (Section 8.3) was reset or abnormally closed.
    ConnectError = 0xa,
    /// The endpoint detected that its peer is exhibiting a behavior that might be generating excessive load.
    EnhanceYourCalm = 0xb,
    /// The underlying transport has properties that do not meet minimum security requirements (see Section 9.2).
    InadequateSecurity = 0xc,
    /// The endpoint requires that HTTP/1.1 be used instead of HTTP/2.
    Http11Required = 0xd,
}

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    FromPrimitive,
    ToPrimitive,
    enum_map::Enum,
)]
#[repr(u16)]
pub enum SettingsParameter {
    /// Allows the sender to inform the remote endpoint of the maximum size of the header compression table used to decode header blocks, in octets. The initial value is 4,096 octets.
    HeaderTableSize = 0x1,
    /// This setting can be used to disable server push (Section 8.2). The initial value is 1.
    EnablePush = 0x2,
    /// Indicates the maximum number of concurrent streams that the sender will allow. Initially, there is no limit to this value.
    MaxConcurrentStreams = 0x3,
    /// Indicates the sender's initial window size (in octets) for stream-level flow control. The initial value is 2^16-1 (65,535) octets.
    InitialWindowSize = 0x4,
    /// Indicates the size of the largest frame payload that the sender is willing to receive, in octets. The initial value is 2^14 (16,384) octets.
    MaxFrameSize = 0x5,
    /// This advisory setting informs a peer of the maximum size of header list that the sender is prepared to accept, in octets. The initial value of this setting is unlimited.
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    pub const ALL: [SettingsParameter; 6] = [
        SettingsParameter::HeaderTableSize,
        SettingsParameter::EnablePush,
        SettingsParameter::MaxConcurrentStreams,
        SettingsParameter::InitialWindowSize,
        SettingsParameter::MaxFrameSize,
        SettingsParameter::MaxHeaderListSize,
    ];
}
