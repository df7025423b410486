use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::BufferError;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

// --- HTTP ---

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for a single segment or manifest request
    pub request_timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    pub follow_redirects: bool,

    pub user_agent: String,

    /// Extra headers sent with every request
    pub headers: HeaderMap,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,

    pub pool_idle_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: FetcherConfig::default_headers(),
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl FetcherConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers
    }
}

/// Builds the shared HTTP client for manifest and segment requests.
pub fn create_client(config: &FetcherConfig) -> Result<Client, BufferError> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .connect_timeout(config.connect_timeout)
        .redirect(redirect)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .build()
        .map_err(|e| BufferError::Configuration {
            reason: format!("failed to build HTTP client: {e}"),
        })
}

// --- Buffer pump ---

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Interval between pump polls. Roughly one display refresh by default.
    pub tick_interval: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
        }
    }
}

// --- Prefetch ---

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// Fetch the next segment once the end of the buffered interval is
    /// closer than this to the playhead
    pub lookahead: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookahead: Duration::from_secs(4),
        }
    }
}

// --- Seek recovery ---

#[derive(Debug, Clone)]
pub struct SeekConfig {
    /// Segments to step back from the segment containing the seek target
    pub rewind_segments: u64,
    /// Segments fetched in one recovery burst
    pub burst: u64,
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            rewind_segments: 2,
            burst: 5,
        }
    }
}

// --- Representation switch ---

/// Where the segment cursor lands after a representation switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SwitchCursorPolicy {
    /// Start over from segment 1.
    #[default]
    Restart,
    /// Continue after the buffered data around the playhead, or recompute
    /// from the playhead like a seek when it is not buffered.
    FollowPlayhead,
}

#[derive(Debug, Clone, Default)]
pub struct SwitchConfig {
    pub cursor_policy: SwitchCursorPolicy,
}

// --- Top-Level Configuration ---

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub fetcher: FetcherConfig,
    pub retry: RetryPolicy,
    pub pump: PumpConfig,
    pub prefetch: PrefetchConfig,
    pub seek: SeekConfig,
    pub switch: SwitchConfig,

    /// Media segments requested right after the first initialization segment
    pub startup_burst: u64,

    /// Max fetches in flight; further requests wait in issue order
    pub max_concurrent_fetches: usize,

    /// Consecutive sink failures tolerated before the controller gives up
    pub max_sink_reinit: u32,

    /// Capacity of the playback, command and event channels
    pub channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            retry: RetryPolicy::default(),
            pump: PumpConfig::default(),
            prefetch: PrefetchConfig::default(),
            seek: SeekConfig::default(),
            switch: SwitchConfig::default(),
            startup_burst: 5,
            max_concurrent_fetches: 5,
            max_sink_reinit: 3,
            channel_capacity: 64,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), BufferError> {
        let invalid = |reason: &str| {
            Err(BufferError::Configuration {
                reason: reason.to_owned(),
            })
        };

        if self.pump.tick_interval.is_zero() {
            return invalid("pump tick interval must be non-zero");
        }
        if self.max_concurrent_fetches == 0 {
            return invalid("max_concurrent_fetches must be at least 1");
        }
        if self.channel_capacity == 0 {
            return invalid("channel_capacity must be at least 1");
        }
        if self.seek.burst == 0 {
            return invalid("seek burst must be at least 1");
        }
        Ok(())
    }
}
