//! Per-stream state and lifecycle, spec §3/§4.3. `Stream` lives in the
//! connection's shared `DashMap` (see `connection::Shared::streams`) so both
//! the reader task and the writer task can each record their half of the
//! state without either one blocking the other beyond a short-lived shard
//! lock. Grounded on the teacher's `stream.rs` `StreamState`/`transition_state`
//! (kept, generalized to return a tagged [`H2Error`] instead of
//! `anyhow::Error`, and decoupled from its oneshot-response-specific fields,
//! which now live in `connection::PendingStream`).

use crate::error::H2Error;
use crate::flow::{RecvWindow, Window};
use crate::frame::PriorityInfo;
use crate::types::{ErrorType, FrameType, Headers};
use bytes::BytesMut;
use derivative::Derivative;
use log::trace;
use tokio::sync::oneshot;

/// https://httpwg.org/specs/rfc7540.html#StreamStates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Which header block is still being assembled across CONTINUATION frames
/// (§4.1's CONTINUATION contiguity rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuing {
    Headers,
    PushPromise,
}

/// A single HTTP/2 stream's state, as tracked by this endpoint. Debug output
/// elides the buffered header/body bytes (teacher's `Derivative` skip-field
/// pattern in its own `stream.rs`), since they are rarely useful at a log
/// callsite and can be large.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Stream {
    pub state: StreamState,
    pub send_window: Window,
    pub recv_window: RecvWindow,
    pub continuing: Option<Continuing>,
    pub priority: Option<PriorityInfo>,
    #[derivative(Debug = "ignore")]
    pub header_block: BytesMut,
    pub request_headers: Headers,
    pub response_headers: Headers,
    #[derivative(Debug = "ignore")]
    pub body: BytesMut,
    /// Set for a client-initiated stream; fulfilled once the response is
    /// complete (END_STREAM received). Mirrors the teacher's
    /// `Stream.response_tx` field, generalized onto the async oneshot API.
    #[derivative(Debug = "ignore")]
    pub response_tx: Option<oneshot::Sender<crate::response::Response>>,
    /// `Closed` streams are kept around briefly so a trailing WINDOW_UPDATE
    /// or RST_STREAM (§3 "grace period") is tolerated rather than treated as
    /// a stream error; set when the stream enters `Closed`.
    pub closed_at: Option<std::time::Instant>,
}

impl Stream {
    pub fn new(initial_send_window: u32, initial_recv_window: u32) -> Self {
        Self {
            state: StreamState::Idle,
            send_window: Window::new(initial_send_window),
            recv_window: RecvWindow::new(initial_recv_window),
            continuing: None,
            priority: None,
            header_block: BytesMut::new(),
            request_headers: Headers::new(),
            response_headers: Headers::new(),
            body: BytesMut::new(),
            response_tx: None,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Applies one event (send or receive of a frame type, with its flags
    /// already decoded into `end_headers`/`end_stream`) to the combined
    /// stream state, per RFC 9113 §5.1. `recv = false` means *this* endpoint
    /// is sending the frame.
    pub fn transition(
        &mut self,
        stream_id: u32,
        recv: bool,
        ty: FrameType,
        end_headers: bool,
        end_stream: bool,
        is_push_promise: bool,
    ) -> Result<(), H2Error> {
        let send = !recv;
        let original = self.state;

        if ty == FrameType::ResetStream {
            if self.state == StreamState::Idle {
                return Err(H2Error::connection(ErrorType::ProtocolError, "RST_STREAM on an idle stream"));
            }
            self.state = StreamState::Closed;
            self.closed_at = Some(std::time::Instant::now());
        } else {
            let headers_like = matches!(ty, FrameType::Headers | FrameType::Continuation) && end_headers && !is_push_promise;
            let push_like = matches!(ty, FrameType::PushPromise | FrameType::Continuation) && end_headers && is_push_promise;

            if self.state == StreamState::Idle {
                // A PUSH_PROMISE reserves the stream the moment it arrives,
                // same as the `ty == FrameType::Headers` fallback below does
                // for a request. END_HEADERS only matters for when the header
                // block is complete, not for when the stream is created, so a
                // promise split across CONTINUATION frames still reserves on
                // its first frame.
                if send && (push_like || ty == FrameType::PushPromise) {
                    self.state = StreamState::ReservedLocal;
                } else if recv && (push_like || ty == FrameType::PushPromise) {
                    self.state = StreamState::ReservedRemote;
                } else if headers_like || ty == FrameType::Headers {
                    self.state = StreamState::Open;
                } else {
                    return Err(H2Error::stream(stream_id, ErrorType::ProtocolError, format!("{ty:?} on an idle stream")));
                }
            }

            if self.state == StreamState::ReservedLocal && send && ty == FrameType::Headers {
                self.state = StreamState::HalfClosedRemote;
            }
            if self.state == StreamState::ReservedRemote && recv && ty == FrameType::Headers {
                self.state = StreamState::HalfClosedLocal;
            }
            if self.state == StreamState::Open && send && end_stream {
                self.state = StreamState::HalfClosedLocal;
            }
            if self.state == StreamState::Open && recv && end_stream {
                self.state = StreamState::HalfClosedRemote;
            }
            if self.state == StreamState::HalfClosedRemote && send && end_stream {
                self.state = StreamState::Closed;
                self.closed_at = Some(std::time::Instant::now());
            }
            if self.state == StreamState::HalfClosedLocal && recv && end_stream {
                self.state = StreamState::Closed;
                self.closed_at = Some(std::time::Instant::now());
            }
        }

        if self.state != original {
            trace!("stream {stream_id} {original:?} -> {:?}", self.state);
        }
        Ok(())
    }

    /// Validates that a frame of `ty` may legally arrive while the stream is
    /// in its current state, independent of the transition it causes (the
    /// event table's "Illegal ⇒" column, §4.3). Idle streams may only be
    /// created by HEADERS/PUSH_PROMISE; anything else addressed to an
    /// unknown stream id is a connection error (the caller distinguishes
    /// "never existed" from "already closed").
    pub fn validate_recv(&self, stream_id: u32, ty: FrameType) -> Result<(), H2Error> {
        match (self.state, ty) {
            (StreamState::Closed, FrameType::WindowUpdate | FrameType::ResetStream) => Ok(()),
            (StreamState::Closed, _) => {
                if self.closed_at.map(|t| t.elapsed() < std::time::Duration::from_secs(2)).unwrap_or(false) {
                    Err(H2Error::stream(stream_id, ErrorType::StreamClosed, "frame received for a recently-closed stream"))
                } else {
                    Err(H2Error::connection(ErrorType::StreamClosed, "frame received for a closed stream"))
                }
            }
            (StreamState::HalfClosedRemote, FrameType::Data | FrameType::Headers | FrameType::Continuation) => {
                Err(H2Error::stream(stream_id, ErrorType::StreamClosed, "frame received after the remote half closed"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_request_response_lifecycle_closes_the_stream() {
        let mut stream = Stream::new(65_535, 65_535);
        // client sends HEADERS (no END_STREAM): Idle -> Open
        stream.transition(1, false, FrameType::Headers, true, false, false).unwrap();
        assert_eq!(stream.state, StreamState::Open);
        // client sends DATA with END_STREAM: Open -> HalfClosedLocal
        stream.transition(1, false, FrameType::Data, false, true, false).unwrap();
        assert_eq!(stream.state, StreamState::HalfClosedLocal);
        // server's response HEADERS+DATA end_stream: HalfClosedLocal -> Closed
        stream.transition(1, true, FrameType::Data, false, true, false).unwrap();
        assert_eq!(stream.state, StreamState::Closed);
    }

    #[test]
    fn reset_on_idle_stream_is_a_connection_error() {
        let mut stream = Stream::new(65_535, 65_535);
        let err = stream.transition(3, true, FrameType::ResetStream, false, false, false).unwrap_err();
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn push_promise_reserves_the_stream() {
        let mut stream = Stream::new(65_535, 65_535);
        stream.transition(2, true, FrameType::PushPromise, true, false, true).unwrap();
        assert_eq!(stream.state, StreamState::ReservedRemote);
    }

    #[test]
    fn push_promise_split_across_continuation_still_reserves_the_stream() {
        let mut stream = Stream::new(65_535, 65_535);
        // PUSH_PROMISE without END_HEADERS: the promise is still reserved
        // even though the header block isn't complete yet.
        stream.transition(2, true, FrameType::PushPromise, false, false, true).unwrap();
        assert_eq!(stream.state, StreamState::ReservedRemote);
        // Trailing CONTINUATION completes the block; state doesn't regress.
        stream.transition(2, true, FrameType::Continuation, true, false, true).unwrap();
        assert_eq!(stream.state, StreamState::ReservedRemote);
    }
}
