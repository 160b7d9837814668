/// HTTP transport for the EPG service.
///
/// Two endpoints: `GET /health` with a short timeout, and `POST /epg` with
/// long timeouts sized for multi-day guide payloads over slow STB networks.
/// Response bodies are streamed through the bounded decoder rather than
/// buffered whole.
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, warn};

use crate::config::EpgConfig;
use crate::decode;
use crate::error::EpgError;
use crate::models::{EpgChannel, EpgResponse, GuideWindow, Program};

// ── Wire DTOs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EpgChannelRequest<'a> {
    xmltv_id: &'a str,
}

#[derive(Debug, Serialize)]
struct EpgRequest<'a> {
    channels: Vec<EpgChannelRequest<'a>>,
    timezone: &'a str,
    from_date: String,
    to_date: String,
}

#[derive(Debug, Deserialize)]
struct EpgHealthResponse {
    status: String,
}

impl EpgHealthResponse {
    fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EpgClient {
    http: reqwest::Client,
    config: Arc<EpgConfig>,
}

impl EpgClient {
    pub fn new(config: Arc<EpgConfig>) -> Result<Self, EpgError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;
        Ok(EpgClient { http, config })
    }

    /// `GET {service_url}/health`. Healthy means HTTP 200 with
    /// `{"status": "ok"}`; anything else is a typed error so callers can
    /// present "service unreachable" separately from "zero programs".
    pub async fn check_health(&self, service_url: &str) -> Result<bool, EpgError> {
        debug!("Checking EPG service health: {service_url}/health");
        let resp = self
            .http
            .get(format!("{service_url}/health"))
            .timeout(self.config.health_timeout())
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            warn!("EPG health check failed with HTTP {status}");
            return Err(EpgError::Unhealthy(status));
        }

        let health: EpgHealthResponse = resp.json().await?;
        Ok(health.is_healthy())
    }

    /// Fetch one channel's programs for one window, trimmed to that window.
    pub async fn fetch_window(
        &self,
        service_url: &str,
        channel_id: &str,
        from_utc_millis: i64,
        to_utc_millis: i64,
        timezone: &str,
    ) -> Result<Vec<Program>, EpgError> {
        let window = GuideWindow {
            from_utc_millis,
            to_utc_millis,
        };
        let mut response = self
            .post_epg(service_url, &[channel_id], &window, timezone)
            .await?;
        let programs = response.epg.remove(channel_id).unwrap_or_default();
        Ok(trim_to_window(programs, &window))
    }

    /// Fetch one batch of channels for a guide prefetch. Channels with no
    /// surviving programs after window trimming are dropped from the map.
    pub async fn fetch_batch(
        &self,
        service_url: &str,
        channels: &[EpgChannel],
        window: &GuideWindow,
        timezone: &str,
    ) -> Result<EpgResponse, EpgError> {
        let ids: Vec<&str> = channels.iter().map(|c| c.xmltv_id.as_str()).collect();
        let response = self.post_epg(service_url, &ids, window, timezone).await?;
        Ok(trim_response_to_window(response, window))
    }

    async fn post_epg(
        &self,
        service_url: &str,
        xmltv_ids: &[&str],
        window: &GuideWindow,
        timezone: &str,
    ) -> Result<EpgResponse, EpgError> {
        let request = EpgRequest {
            channels: xmltv_ids
                .iter()
                .map(|id| EpgChannelRequest { xmltv_id: id })
                .collect(),
            timezone,
            from_date: window.from_iso(),
            to_date: window.to_iso(),
        };
        debug!(
            "EPG request: {} channel(s), window {} -> {}",
            xmltv_ids.len(),
            request.from_date,
            request.to_date,
        );

        let resp = self
            .http
            .post(format!("{service_url}/epg"))
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(EpgError::Status(status));
        }

        // Bridge the async body into the synchronous streaming decoder on a
        // blocking thread so a 100MB+ payload is parsed incrementally.
        let stream = resp.bytes_stream().map_err(io::Error::other);
        let reader = SyncIoBridge::new(StreamReader::new(stream));
        let caps = self.config.field_caps();
        let response = tokio::task::spawn_blocking(move || {
            decode::decode_epg_response(io::BufReader::new(reader), &caps)
        })
        .await??;

        debug!(
            "EPG response decoded: {}/{} channels, {} programs",
            response.channels_found, response.channels_requested, response.total_programs,
        );
        Ok(response)
    }
}

// ── Window trimming ───────────────────────────────────────────────────────────

/// Keep only programs overlapping the requested window.
fn trim_to_window(programs: Vec<Program>, window: &GuideWindow) -> Vec<Program> {
    programs
        .into_iter()
        .filter(|p| {
            p.stop_utc_millis >= window.from_utc_millis
                && p.start_utc_millis <= window.to_utc_millis
        })
        .collect()
}

fn trim_response_to_window(response: EpgResponse, window: &GuideWindow) -> EpgResponse {
    let epg: HashMap<String, Vec<Program>> = response
        .epg
        .into_iter()
        .filter_map(|(channel_id, programs)| {
            let kept = trim_to_window(programs, window);
            if kept.is_empty() {
                None
            } else {
                Some((channel_id, kept))
            }
        })
        .collect();

    EpgResponse {
        channels_found: epg.len(),
        total_programs: epg.values().map(Vec::len).sum(),
        epg,
        ..response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(id: &str, start: i64, stop: i64) -> Program {
        Program {
            id: id.to_string(),
            start_utc_millis: start,
            stop_utc_millis: stop,
            title: format!("Program {id}"),
            description: String::new(),
        }
    }

    #[test]
    fn trim_keeps_programs_overlapping_the_window_edges() {
        let window = GuideWindow {
            from_utc_millis: 100,
            to_utc_millis: 200,
        };
        let programs = vec![
            program("before", 0, 50),
            program("straddles_from", 50, 150),
            program("inside", 120, 180),
            program("straddles_to", 180, 250),
            program("after", 250, 300),
        ];

        let kept = trim_to_window(programs, &window);
        let ids: Vec<&str> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["straddles_from", "inside", "straddles_to"]);
    }

    #[test]
    fn trim_response_drops_emptied_channels_and_recounts() {
        let window = GuideWindow {
            from_utc_millis: 100,
            to_utc_millis: 200,
        };
        let mut epg = HashMap::new();
        epg.insert("ch1".to_string(), vec![program("a", 120, 180)]);
        epg.insert("ch2".to_string(), vec![program("b", 0, 50)]);
        let response = EpgResponse {
            channels_found: 2,
            total_programs: 2,
            epg,
            ..EpgResponse::default()
        };

        let trimmed = trim_response_to_window(response, &window);
        assert_eq!(trimmed.channels_found, 1);
        assert_eq!(trimmed.total_programs, 1);
        assert!(trimmed.epg.contains_key("ch1"));
        assert!(!trimmed.epg.contains_key("ch2"));
    }
}
