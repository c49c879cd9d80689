// Upstream relay bridging: startup sync, subscription mirroring, outbound publish

mod bridge;
mod link;
mod session;

pub use bridge::UpstreamBridge;
pub use link::{LinkAction, LinkEvent, LinkState, RetryPolicy, UpstreamLink};
pub use session::UpstreamFrame;

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Upstream relay configuration
#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream relay URLs (`ws://` or `wss://`). Empty disables bridging.
    #[serde(default)]
    pub relays: Vec<String>,
    /// Delay before EOSE on a local REQ while upstream events arrive
    #[serde(default = "default_eose_grace_ms")]
    pub eose_grace_ms: u64,
    /// Bound on connect + WebSocket handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total connection attempts per link (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff unit: attempt n waits n × step before retrying
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Startup sync fetches events newer than now - window
    #[serde(default = "default_sync_window_secs")]
    pub sync_window_secs: i64,
    /// Startup sync result cap per relay
    #[serde(default = "default_sync_limit")]
    pub sync_limit: usize,
    /// Bound on waiting for EOSE during startup sync
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Bound on waiting for an upstream OK after publishing
    #[serde(default = "default_publish_ack_timeout_ms")]
    pub publish_ack_timeout_ms: u64,
}

fn default_eose_grace_ms() -> u64 {
    4000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_step_ms() -> u64 {
    1000
}

fn default_sync_window_secs() -> i64 {
    86_400 // 24h
}

fn default_sync_limit() -> usize {
    200
}

fn default_sync_timeout_ms() -> u64 {
    10_000
}

fn default_publish_ack_timeout_ms() -> u64 {
    3000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            eose_grace_ms: default_eose_grace_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
            sync_window_secs: default_sync_window_secs(),
            sync_limit: default_sync_limit(),
            sync_timeout_ms: default_sync_timeout_ms(),
            publish_ack_timeout_ms: default_publish_ack_timeout_ms(),
        }
    }
}

impl UpstreamConfig {
    pub fn is_enabled(&self) -> bool {
        !self.relays.is_empty()
    }

    pub fn eose_grace(&self) -> Duration {
        Duration::from_millis(self.eose_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn publish_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_ack_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            connect_timeout: self.connect_timeout(),
            max_attempts: self.max_attempts.max(1),
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }
}

/// Upstream failures. Logged only; never surfaced to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// Connect or handshake did not finish in time
    Timeout(Duration),
    /// Transport-level failure (DNS, TCP, TLS, WebSocket)
    Transport(String),
    /// Remote side closed before the exchange finished
    Closed,
    /// All connection attempts failed
    Exhausted { attempts: u32 },
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Timeout(after) => write!(f, "timed out after {:?}", after),
            UpstreamError::Transport(e) => write!(f, "transport error: {}", e),
            UpstreamError::Closed => write!(f, "connection closed by upstream"),
            UpstreamError::Exhausted { attempts } => {
                write!(f, "upstream unavailable after {} attempts", attempts)
            }
        }
    }
}

impl std::error::Error for UpstreamError {}
