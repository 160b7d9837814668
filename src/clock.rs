/// Wall-clock and timezone access, behind a trait so tests can move time.
use chrono::{Local, Offset, TimeZone, Utc};
use tracing::warn;

use crate::time::format_utc_offset;

pub trait Clock: Send + Sync {
    /// Current instant as UTC epoch milliseconds.
    fn now_utc_millis(&self) -> i64;

    /// Local UTC offset, in minutes, at the given instant.
    fn utc_offset_minutes(&self, at_utc_millis: i64) -> i32;

    /// IANA timezone id, e.g. `Europe/Berlin`.
    fn timezone_id(&self) -> String;
}

/// The real system clock.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn utc_offset_minutes(&self, at_utc_millis: i64) -> i32 {
        let at = Utc
            .timestamp_millis_opt(at_utc_millis)
            .single()
            .unwrap_or_else(Utc::now);
        Local.offset_from_utc_datetime(&at.naive_utc()).fix().local_minus_utc() / 60
    }

    fn timezone_id(&self) -> String {
        iana_time_zone::get_timezone().unwrap_or_else(|e| {
            warn!("Failed to resolve IANA timezone id, falling back to UTC: {e}");
            "UTC".to_string()
        })
    }
}

/// The zone the engine last saw, used to tell a real timezone change apart
/// from a no-op event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockState {
    pub timezone_id: String,
    pub utc_offset_minutes: i32,
}

impl ClockState {
    pub fn capture(clock: &dyn Clock) -> Self {
        let now = clock.now_utc_millis();
        ClockState {
            timezone_id: clock.timezone_id(),
            utc_offset_minutes: clock.utc_offset_minutes(now),
        }
    }

    /// `+HH:MM` rendering of the captured offset, for request payloads.
    pub fn offset_string(&self) -> String {
        format_utc_offset(self.utc_offset_minutes)
    }
}

/// What the platform reported happening to the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChangeTrigger {
    /// The timezone may have changed.
    Timezone,
    /// The wall clock was set.
    TimeSet,
    /// The date rolled over or was set.
    Date,
    Unknown,
}

/// What the engine did about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChangeResult {
    /// Nothing relevant changed; caches kept.
    None,
    /// "Now" moved but UTC instants are still valid; only the
    /// current-program snapshot was invalidated.
    ClockChanged,
    /// The zone itself changed; all guide caches were purged.
    TimezoneChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_reports_a_plausible_now() {
        let clock = SystemClock;
        // 2020-01-01T00:00:00Z in millis; any real clock is past this.
        assert!(clock.now_utc_millis() > 1_577_836_800_000);
    }

    #[test]
    fn system_clock_offset_is_a_whole_number_of_minutes_in_range() {
        let clock = SystemClock;
        let offset = clock.utc_offset_minutes(clock.now_utc_millis());
        // Real zones span UTC-12:00 to UTC+14:00.
        assert!((-12 * 60..=14 * 60).contains(&offset));
    }

    #[test]
    fn captured_state_renders_its_offset() {
        let state = ClockState {
            timezone_id: "Europe/Berlin".to_string(),
            utc_offset_minutes: 120,
        };
        assert_eq!(state.offset_string(), "+02:00");
    }
}
