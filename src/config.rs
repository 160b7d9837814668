use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::decode::FieldCaps;

/// Engine configuration, loadable from `EPG_`-prefixed environment variables
/// / .env, with defaults tuned for set-top boxes on slow networks.
#[derive(Debug, Clone, Deserialize)]
pub struct EpgConfig {
    /// Timeout for the `/health` probe. Short: the caller wants a quick
    /// reachable/unreachable answer.
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    /// Connect timeout for `/epg` fetches.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Overall timeout for `/epg` fetches. Long: multi-day guide payloads
    /// over STB networks can take minutes, and eventual completion beats
    /// fast failure here.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Channels per `/epg` request during a full guide prefetch.
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// Windowed-result cache entries (LRU).
    #[serde(default = "default_window_cache_capacity")]
    pub window_cache_capacity: usize,

    /// Channels kept in the merged per-channel history (LRU).
    #[serde(default = "default_channel_cache_capacity")]
    pub channel_cache_capacity: usize,

    /// Programs kept per channel; oldest by start time dropped first.
    #[serde(default = "default_max_programs_per_channel")]
    pub max_programs_per_channel: usize,

    /// How long a "what's on now" answer stays valid.
    #[serde(default = "default_current_snapshot_ttl_ms")]
    pub current_snapshot_ttl_ms: u64,

    /// Per-field character caps applied by the streaming decoder.
    #[serde(default = "default_max_id_chars")]
    pub max_id_chars: usize,
    #[serde(default = "default_max_time_chars")]
    pub max_time_chars: usize,
    #[serde(default = "default_max_title_chars")]
    pub max_title_chars: usize,
    #[serde(default = "default_max_description_chars")]
    pub max_description_chars: usize,
}

fn default_health_timeout_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    180_000
}
fn default_read_timeout_ms() -> u64 {
    180_000
}
fn default_fetch_batch_size() -> usize {
    40
}
fn default_window_cache_capacity() -> usize {
    32
}
fn default_channel_cache_capacity() -> usize {
    48
}
fn default_max_programs_per_channel() -> usize {
    512
}
fn default_current_snapshot_ttl_ms() -> u64 {
    60_000
}
fn default_max_id_chars() -> usize {
    128
}
fn default_max_time_chars() -> usize {
    64
}
fn default_max_title_chars() -> usize {
    256
}
fn default_max_description_chars() -> usize {
    1_024
}

impl Default for EpgConfig {
    fn default() -> Self {
        EpgConfig {
            health_timeout_ms: default_health_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            fetch_batch_size: default_fetch_batch_size(),
            window_cache_capacity: default_window_cache_capacity(),
            channel_cache_capacity: default_channel_cache_capacity(),
            max_programs_per_channel: default_max_programs_per_channel(),
            current_snapshot_ttl_ms: default_current_snapshot_ttl_ms(),
            max_id_chars: default_max_id_chars(),
            max_time_chars: default_max_time_chars(),
            max_title_chars: default_max_title_chars(),
            max_description_chars: default_max_description_chars(),
        }
    }
}

impl EpgConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present (ignore errors — it may not exist)
        let _ = dotenvy::dotenv();

        envy::prefixed("EPG_")
            .from_env::<EpgConfig>()
            .context("Failed to load EPG config from environment")
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn field_caps(&self) -> FieldCaps {
        FieldCaps {
            id: self.max_id_chars,
            time: self.max_time_chars,
            title: self.max_title_chars,
            description: self.max_description_chars,
        }
    }
}
