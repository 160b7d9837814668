use std::collections::HashMap;

use chrono::{DateTime, Days, NaiveTime, SecondsFormat, Utc};

// ── Program ──────────────────────────────────────────────────────────────────

/// A single guide entry, with both timestamps already normalised to UTC epoch
/// milliseconds by the decoder. A timestamp of `0` means "unknown time": it
/// never matches "currently airing" and sorts before everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub id: String,
    pub start_utc_millis: i64,
    pub stop_utc_millis: i64,
    pub title: String,
    pub description: String,
}

impl Program {
    /// Identity used to deduplicate programs across overlapping window
    /// fetches: the upstream `id` when present, else start time + title.
    pub fn identity(&self) -> String {
        if self.id.is_empty() {
            format!("{}:{}", self.start_utc_millis, self.title)
        } else {
            self.id.clone()
        }
    }

    /// True when `now` falls inside [start, stop].
    pub fn is_current(&self, now_utc_millis: i64) -> bool {
        self.start_utc_millis > 0
            && self.start_utc_millis <= now_utc_millis
            && now_utc_millis <= self.stop_utc_millis
    }
}

// ── Guide response ────────────────────────────────────────────────────────────

/// Decoded `/epg` response body (or the aggregate of several batch bodies).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpgResponse {
    pub update_mode: String,
    pub timestamp: String,
    pub channels_requested: usize,
    pub channels_found: usize,
    pub total_programs: usize,
    pub epg: HashMap<String, Vec<Program>>,
}

// ── Window key ────────────────────────────────────────────────────────────────

/// Exact-match cache key for one windowed fetch. No containment or merging
/// across keys with different bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub service_url: String,
    pub channel_id: String,
    pub from_utc_millis: i64,
    pub to_utc_millis: i64,
}

// ── Guide window ──────────────────────────────────────────────────────────────

/// A [from, to] UTC range for which programs are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuideWindow {
    pub from_utc_millis: i64,
    pub to_utc_millis: i64,
}

impl GuideWindow {
    /// Window covering the channels' deepest catch-up history (midnight UTC,
    /// `catchup_days` back) through `days_ahead` days at 23:59:59 UTC.
    pub fn calculate(channels: &[EpgChannel], days_ahead: u32, now: DateTime<Utc>) -> Self {
        let max_catchup = channels
            .iter()
            .filter(|c| c.has_epg())
            .map(|c| c.catchup_days.max(0) as u64)
            .max()
            .unwrap_or(0);
        let today = now.date_naive();
        let from_day = today.checked_sub_days(Days::new(max_catchup)).unwrap_or(today);
        let past_end = today
            .checked_add_days(Days::new(u64::from(days_ahead) + 1))
            .unwrap_or(today);
        GuideWindow {
            from_utc_millis: from_day.and_time(NaiveTime::MIN).and_utc().timestamp_millis(),
            to_utc_millis: past_end.and_time(NaiveTime::MIN).and_utc().timestamp_millis() - 1_000,
        }
    }

    pub fn from_iso(&self) -> String {
        iso_utc(self.from_utc_millis)
    }

    pub fn to_iso(&self) -> String {
        iso_utc(self.to_utc_millis)
    }
}

fn iso_utc(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── Channel collaborator ──────────────────────────────────────────────────────

/// A playlist channel as seen by the guide engine. Only the EPG-relevant
/// fields; playlist parsing itself lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpgChannel {
    pub name: String,
    /// XMLTV identifier used in `/epg` requests. Empty means the channel has
    /// no guide data.
    pub xmltv_id: String,
    /// Days of catch-up archive the channel advertises.
    pub catchup_days: i32,
}

impl EpgChannel {
    pub fn has_epg(&self) -> bool {
        !self.xmltv_id.trim().is_empty()
    }
}

/// Supplies the channel list for guide prefetching. Implemented by the
/// surrounding application (playlist store, database, …).
pub trait ChannelSource: Send + Sync {
    fn channels(&self) -> Vec<EpgChannel>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn program(id: &str, start: i64, stop: i64, title: &str) -> Program {
        Program {
            id: id.to_string(),
            start_utc_millis: start,
            stop_utc_millis: stop,
            title: title.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn identity_prefers_upstream_id() {
        let p = program("p1", 100, 200, "News");
        assert_eq!(p.identity(), "p1");
    }

    #[test]
    fn identity_falls_back_to_start_and_title() {
        let p = program("", 100, 200, "News");
        assert_eq!(p.identity(), "100:News");
    }

    #[test]
    fn unknown_start_time_is_never_current() {
        let p = program("p1", 0, i64::MAX, "News");
        assert!(!p.is_current(50));
    }

    #[test]
    fn is_current_is_inclusive_at_both_bounds() {
        let p = program("p1", 100, 200, "News");
        assert!(p.is_current(100));
        assert!(p.is_current(200));
        assert!(!p.is_current(99));
        assert!(!p.is_current(201));
    }

    #[test]
    fn calculate_window_spans_catchup_to_end_of_last_day() {
        let channels = vec![
            EpgChannel {
                name: "One".into(),
                xmltv_id: "one".into(),
                catchup_days: 3,
            },
            EpgChannel {
                name: "Two".into(),
                xmltv_id: "two".into(),
                catchup_days: 7,
            },
            // No EPG id, so its catch-up depth must not widen the window.
            EpgChannel {
                name: "Three".into(),
                xmltv_id: "".into(),
                catchup_days: 30,
            },
        ];
        let now = Utc.with_ymd_and_hms(2025, 10, 10, 12, 0, 0).unwrap();
        let window = GuideWindow::calculate(&channels, 2, now);

        let from = Utc.with_ymd_and_hms(2025, 10, 3, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 10, 12, 23, 59, 59).unwrap();
        assert_eq!(window.from_utc_millis, from.timestamp_millis());
        assert_eq!(window.to_utc_millis, to.timestamp_millis());
    }

    #[test]
    fn window_iso_renders_utc() {
        let now = Utc.with_ymd_and_hms(2025, 10, 10, 12, 0, 0).unwrap();
        let window = GuideWindow::calculate(&[], 0, now);
        assert_eq!(window.from_iso(), "2025-10-10T00:00:00Z");
        assert_eq!(window.to_iso(), "2025-10-10T23:59:59Z");
    }
}
