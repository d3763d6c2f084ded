/*
[INPUT]:  Caller or file supplied stream settings
[OUTPUT]: Validated StreamConfig with defaults
[POS]:    Configuration layer - connection, reconnection and state limits
[UPDATE]: When adding new tunables
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::ws::Endpoint;

const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 5_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SNAPSHOT_REQUEST_TYPE: &str = "snapshot_request";

/// Capacity of each bounded list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListCaps {
    pub trades: usize,
    pub payments: usize,
    pub notifications: usize,
    pub system_alerts: usize,
}

impl Default for ListCaps {
    fn default() -> Self {
        Self {
            trades: 100,
            payments: 50,
            notifications: 20,
            system_alerts: 20,
        }
    }
}

/// Stream client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub endpoint: Endpoint,
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    /// Force a reconnect when no pong arrives this long after a ping
    pub pong_timeout_ms: Option<u64>,
    /// Drop price updates not newer than the stored entry
    pub reject_stale_prices: bool,
    /// Envelope type sent after every successful open; `None` disables it
    pub snapshot_request_type: Option<String>,
    pub caps: ListCaps,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            pong_timeout_ms: None,
            reject_stale_prices: true,
            snapshot_request_type: Some(DEFAULT_SNAPSHOT_REQUEST_TYPE.to_string()),
            caps: ListCaps::default(),
        }
    }
}

impl StreamConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(StreamError::Config("endpoint host must not be empty".to_string()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(StreamError::Config("heartbeat_interval_ms must be > 0".to_string()));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(StreamError::Config("reconnect_base_delay_ms must be > 0".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(StreamError::Config("connect_timeout_ms must be > 0".to_string()));
        }
        if self.pong_timeout_ms == Some(0) {
            return Err(StreamError::Config("pong_timeout_ms must be > 0 when set".to_string()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout_ms.map(Duration::from_millis)
    }

    /// Linear backoff: `base * attempt`
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}
