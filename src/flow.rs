//! Flow control windows, spec §4.4: two independent signed 32-bit credits per
//! direction (connection-level and per-stream), decremented by DATA payload
//! bytes and replenished by WINDOW_UPDATE. Kept as a small struct-with-methods
//! type in the teacher's `hpack.rs::Table` style rather than bare integers, so
//! the overflow/underflow checks live in one place instead of being repeated
//! at every call site.

use crate::error::H2Error;
use crate::types::ErrorType;

const MAX_WINDOW: i64 = i32::MAX as i64;
const MIN_WINDOW: i64 = i32::MIN as i64;

/// A single signed flow-control window. Tracked as `i64` internally so a
/// SETTINGS-driven shrink can legally carry the value below zero (RFC 9113
/// §6.9.2) without the arithmetic itself overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(i64);

impl Window {
    pub fn new(initial: u32) -> Self {
        Self(initial as i64)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// How many bytes may currently be sent against this window (0 if the
    /// window is at or below zero).
    pub fn available(self) -> u32 {
        self.0.max(0).min(u32::MAX as i64) as u32
    }

    /// Applies a WINDOW_UPDATE increment (§4.4 `update_window`). A zero
    /// increment and an overflow past 2^31-1 are both errors; the caller
    /// decides whether that is connection- or stream-scoped.
    pub fn apply_increment(&mut self, increment: u32) -> Result<(), H2Error> {
        if increment == 0 {
            return Err(H2Error::connection(ErrorType::ProtocolError, "WINDOW_UPDATE increment of 0"));
        }
        let new = self.0 + increment as i64;
        if new > MAX_WINDOW {
            return Err(H2Error::connection(ErrorType::FlowControlError, "flow-control window overflowed 2^31-1"));
        }
        self.0 = new;
        Ok(())
    }

    /// Consumes `n` bytes from a send-side window (DATA about to go out).
    pub fn consume(&mut self, n: u32) {
        self.0 -= n as i64;
    }

    /// Applies the delta from a SETTINGS_INITIAL_WINDOW_SIZE change
    /// (`new_value - old_value`) to an already-active stream's send window,
    /// per §4.4. Returns an error if the result would leave [-2^31, 2^31-1].
    pub fn apply_initial_window_delta(&mut self, delta: i64) -> Result<(), H2Error> {
        let new = self.0 + delta;
        if !(MIN_WINDOW..=MAX_WINDOW).contains(&new) {
            return Err(H2Error::connection(
                ErrorType::FlowControlError,
                "INITIAL_WINDOW_SIZE change overflowed an active stream's window",
            ));
        }
        self.0 = new;
        Ok(())
    }
}

/// The receive-side counterpart: tracks how much of the advertised window a
/// peer has consumed so the reader can decide when to top it back up.
/// Suggested policy (§4.4): emit WINDOW_UPDATE once at least half the
/// initial window has been consumed.
#[derive(Debug, Clone, Copy)]
pub struct RecvWindow {
    window: Window,
    initial: u32,
    consumed_since_update: u32,
}

impl RecvWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            window: Window::new(initial),
            initial,
            consumed_since_update: 0,
        }
    }

    pub fn window(self) -> Window {
        self.window
    }

    /// Accounts for `n` bytes of DATA payload just received. Returns the
    /// increment to send back via WINDOW_UPDATE, if the reader's
    /// half-the-window policy says it's time.
    pub fn on_data_received(&mut self, n: u32) -> Option<u32> {
        self.window.consume(n);
        self.consumed_since_update += n;
        if self.consumed_since_update as u64 >= (self.initial as u64 / 2).max(1) {
            let increment = self.consumed_since_update;
            self.consumed_since_update = 0;
            self.window.apply_increment(increment).ok();
            Some(increment)
        } else {
            None
        }
    }

    /// Re-bases the window for a new SETTINGS.INITIAL_WINDOW_SIZE value,
    /// used only at connection/stream construction time (active-stream
    /// adjustment goes through the send-side `Window::apply_initial_window_delta`
    /// instead, since the *receive* window size is this endpoint's own choice).
    pub fn set_initial(&mut self, initial: u32) {
        self.initial = initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_overflow_is_flow_control_error() {
        let mut window = Window::new(u32::MAX >> 1);
        let err = window.apply_increment(u32::MAX >> 1).unwrap_err();
        assert_eq!(err.code(), ErrorType::FlowControlError);
    }

    #[test]
    fn zero_increment_is_protocol_error() {
        let mut window = Window::new(100);
        let err = window.apply_increment(0).unwrap_err();
        assert_eq!(err.code(), ErrorType::ProtocolError);
    }

    #[test]
    fn initial_window_shrink_can_go_negative() {
        let mut window = Window::new(100);
        window.apply_initial_window_delta(-150).unwrap();
        assert_eq!(window.value(), -50);
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn recv_window_emits_update_at_half_consumed() {
        let mut recv = RecvWindow::new(100);
        assert_eq!(recv.on_data_received(40), None);
        assert_eq!(recv.on_data_received(20), Some(60));
    }
}
