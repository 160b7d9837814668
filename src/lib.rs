//! Windowed EPG cache and fetch-coalescing engine for live-TV clients.
//!
//! Sits between a UI and an EPG HTTP service: windowed program fetches are
//! cached in an exact-match LRU, concurrent fetches for the same window are
//! coalesced into a single upstream request, fetched programs are merged into
//! bounded per-channel histories, and "what's on now" answers are memoised
//! with a short TTL. Fetch failures surface as empty program lists, never as
//! errors, so a dead EPG service degrades the guide instead of the player.

mod client;
mod clock;
mod config;
mod decode;
mod error;
mod models;
mod service;
mod snapshot;
mod store;
mod time;

pub use client::EpgClient;
pub use clock::{Clock, ClockState, SystemClock, TimeChangeResult, TimeChangeTrigger};
pub use config::EpgConfig;
pub use decode::{FieldCaps, decode_epg_response};
pub use error::{EpgError, Result};
pub use models::{ChannelSource, EpgChannel, EpgResponse, GuideWindow, Program, WindowKey};
pub use service::{EpgService, GuideAggregate};
pub use time::{format_utc_offset, parse_epg_timestamp};
