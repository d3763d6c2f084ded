/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed and validated watcher configuration
[POS]:    Configuration layer - stream setup
[UPDATE]: When adding new configuration options
*/

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tradestream_client::StreamConfig;

/// Top-level configuration for the stream watcher
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Streams to open, one connection each
    pub streams: Vec<WatchStreamConfig>,
    /// Seconds between state snapshot log lines
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

/// One stream to watch
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchStreamConfig {
    /// Stream identifier used in logs
    pub id: String,
    /// Bearer token passed as the `token` query parameter
    #[serde(default)]
    pub token: Option<String>,
    /// Channels subscribed after every successful open
    #[serde(default)]
    pub channels: Vec<String>,
    /// Endpoint plus any connection overrides (heartbeat, backoff, caps...)
    #[serde(flatten)]
    pub stream: StreamConfig,
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

impl WatchConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.streams.is_empty() {
            bail!("config must declare at least one stream");
        }
        if self.snapshot_interval_secs == 0 {
            bail!("snapshot_interval_secs must be > 0");
        }

        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.id.trim().is_empty() {
                bail!("stream id must not be empty");
            }
            if !seen.insert(stream.id.as_str()) {
                bail!("duplicate stream id: {}", stream.id);
            }
            stream
                .stream
                .validate()
                .with_context(|| format!("stream {}", stream.id))?;
        }
        Ok(())
    }
}
