use crate::types::{ErrorType, FrameDecodeError, StreamId};

/// The two error severities from spec §7: a stream error only resets one
/// stream (RST_STREAM) and the connection continues; a connection error tears
/// down the whole connection (GOAWAY then transport close).
#[derive(thiserror::Error, Debug)]
pub enum H2Error {
    #[error("connection error {code:?}: {debug}")]
    Connection { code: ErrorType, debug: String },

    #[error("stream {stream_id} error {code:?}: {debug}")]
    Stream {
        stream_id: StreamId,
        code: ErrorType,
        debug: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl H2Error {
    pub fn connection(code: ErrorType, debug: impl Into<String>) -> Self {
        Self::Connection {
            code,
            debug: debug.into(),
        }
    }

    pub fn stream(stream_id: StreamId, code: ErrorType, debug: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            debug: debug.into(),
        }
    }

    pub fn code(&self) -> ErrorType {
        match self {
            H2Error::Connection { code, .. } | H2Error::Stream { code, .. } => *code,
            H2Error::Io(_) => ErrorType::InternalError,
        }
    }

    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, H2Error::Stream { .. })
    }
}

/// Classifies a frame-shape decoding failure into the stream- or
/// connection-level error the spec assigns it (§4.1, §7, and RFC 9113's
/// per-frame "MUST be treated as a connection/stream error" clauses).
pub fn classify_frame_decode_error(err: FrameDecodeError, stream_id: StreamId) -> H2Error {
    match &err {
        // RFC 9113 §6.3: a PRIORITY frame of any length other than 5 octets
        // is a *stream* error, not a connection error (spec scenario S4).
        FrameDecodeError::WrongFixedLength { frame: "PRIORITY", .. } => {
            H2Error::stream(stream_id, ErrorType::FrameSizeError, err.to_string())
        }
        FrameDecodeError::WrongFixedLength { .. }
        | FrameDecodeError::SettingsNotAligned(_)
        | FrameDecodeError::SettingsAckNotEmpty
        | FrameDecodeError::FrameTooLarge { .. } => {
            H2Error::connection(ErrorType::FrameSizeError, err.to_string())
        }
        FrameDecodeError::ZeroWindowIncrement => {
            let code = ErrorType::ProtocolError;
            if stream_id == 0 {
                H2Error::connection(code, err.to_string())
            } else {
                H2Error::stream(stream_id, code, err.to_string())
            }
        }
        FrameDecodeError::PayloadTooShort
        | FrameDecodeError::ZeroStreamId
        | FrameDecodeError::UnknownErrorType(_)
        | FrameDecodeError::InvalidPadding { .. } => {
            H2Error::connection(ErrorType::ProtocolError, err.to_string())
        }
    }
}
