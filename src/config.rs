//! Connection configuration: the local SETTINGS this endpoint advertises plus
//! the policy knobs the distilled spec leaves as implementation choices
//! (§4.2's MAX_HEADER_LIST_SIZE enforcement, §5's idle/PING timeouts, §9's
//! push-acceptance hook). Grounded in the teacher's scattered constants
//! (`65_535`, `16_384`, `4096` in `stream.rs`/`connection.rs`) and the
//! `SettingsParameter` defaults table (`settings.rs`), centralized into one
//! builder the way a production client/server normally exposes one.

use crate::types::Headers;
use std::sync::Arc;
use std::time::Duration;

/// What happens when a decoded header list exceeds MAX_HEADER_LIST_SIZE
/// (§4.2): conservative interop refuses just the stream, an attacker-minded
/// deployment may prefer to tear down the whole connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderListOverflowPolicy {
    RefusedStream,
    CompressionError,
}

/// Applications opt into accepting server push by implementing this; the
/// engine only decides whether to reserve or immediately cancel a promised
/// stream; scheduling which pushes to send is explicitly out of scope
/// (spec §1 Non-goals) and left to the server-side caller entirely.
pub trait PushPolicy: Send + Sync {
    fn accept(&self, promised_headers: &Headers) -> bool;
}

/// Default policy: decline every push. Matches the distilled spec's open
/// question: "push scheduling policy should be specified by the application
/// layer and left as a hook."
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllPushes;

impl PushPolicy for RejectAllPushes {
    fn accept(&self, _promised_headers: &Headers) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct Config {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    pub idle_timeout: Option<Duration>,
    pub ping_interval: Option<Duration>,
    pub ping_timeout: Duration,
    pub header_list_overflow_policy: HeaderListOverflowPolicy,
    pub push_policy: Arc<dyn PushPolicy>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn max_header_list_size_limit(&self) -> Option<usize> {
        if self.max_header_list_size == u32::MAX {
            None
        } else {
            Some(self.max_header_list_size as usize)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            header_table_size: crate::settings::DEFAULT_HEADER_TABLE_SIZE,
            enable_push: false,
            max_concurrent_streams: crate::settings::DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: crate::settings::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: crate::settings::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: crate::settings::DEFAULT_MAX_HEADER_LIST_SIZE,
            idle_timeout: None,
            ping_interval: Some(Duration::from_secs(30)),
            ping_timeout: Duration::from_secs(10),
            header_list_overflow_policy: HeaderListOverflowPolicy::RefusedStream,
            push_policy: Arc::new(RejectAllPushes),
        }
    }
}

#[derive(Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self { config: Config::default() }
    }
}

impl ConfigBuilder {
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.header_table_size = size;
        self
    }

    pub fn enable_push(mut self, enabled: bool) -> Self {
        self.config.enable_push = enabled;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = max;
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.config.max_header_list_size = size;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    pub fn header_list_overflow_policy(mut self, policy: HeaderListOverflowPolicy) -> Self {
        self.config.header_list_overflow_policy = policy;
        self
    }

    pub fn push_policy(mut self, policy: Arc<dyn PushPolicy>) -> Self {
        self.config.push_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
