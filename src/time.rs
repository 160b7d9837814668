/// Upstream timestamp parsing.
///
/// EPG services emit program times in three formats depending on the
/// grabber that produced them. Everything is normalised to UTC epoch
/// milliseconds here so the rest of the engine never touches wall-clock
/// strings.
use chrono::{DateTime, NaiveDateTime};

/// Parse one upstream timestamp into UTC epoch milliseconds.
///
/// Formats accepted, in priority order:
/// 1. ISO-8601 with an explicit numeric offset: `2025-10-10T19:30:00+03:00`
/// 2. ISO-8601 without an offset (interpreted as UTC): `2025-10-10T19:30:00`
/// 3. XMLTV compact form: `20251010193000 +0300`
///
/// Anything else yields `0`, which downstream code treats as "unknown time"
/// (never currently airing, sorts first).
pub fn parse_epg_timestamp(raw: &str) -> i64 {
    let s = raw.trim();

    if s.len() >= 25 {
        if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%:z") {
            return dt.timestamp_millis();
        }
    }

    if s.len() == 19 {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return dt.and_utc().timestamp_millis();
        }
    }

    if s.len() >= 20 {
        if let Ok(dt) = DateTime::parse_from_str(s, "%Y%m%d%H%M%S %z") {
            return dt.timestamp_millis();
        }
    }

    0
}

/// Render a UTC offset in minutes as `+HH:MM` / `-HH:MM` for log lines.
pub fn format_utc_offset(total_minutes: i32) -> String {
    let sign = if total_minutes >= 0 { '+' } else { '-' };
    let absolute = total_minutes.unsigned_abs();
    format!("{sign}{:02}:{:02}", absolute / 60, absolute % 60)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn parses_iso_with_offset() {
        let expected = Utc
            .with_ymd_and_hms(2025, 10, 10, 16, 30, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(parse_epg_timestamp("2025-10-10T19:30:00+03:00"), expected);
        assert_eq!(parse_epg_timestamp("2025-10-10T16:30:00+00:00"), expected);
    }

    #[test]
    fn parses_iso_local_as_utc() {
        let expected = Utc
            .with_ymd_and_hms(2025, 10, 10, 19, 30, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(parse_epg_timestamp("2025-10-10T19:30:00"), expected);
    }

    #[test]
    fn xmltv_matches_iso_for_the_same_instant() {
        assert_eq!(
            parse_epg_timestamp("20251010193000 +0300"),
            parse_epg_timestamp("2025-10-10T19:30:00+03:00"),
        );
    }

    #[test]
    fn parses_negative_xmltv_offset() {
        let expected = Utc
            .with_ymd_and_hms(2025, 1, 2, 8, 0, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(parse_epg_timestamp("20250102013000 -0630"), expected);
    }

    #[test]
    fn malformed_input_yields_zero() {
        assert_eq!(parse_epg_timestamp(""), 0);
        assert_eq!(parse_epg_timestamp("not a time"), 0);
        assert_eq!(parse_epg_timestamp("2025-13-45T99:99:99"), 0);
        assert_eq!(parse_epg_timestamp("20251010"), 0);
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let expected = parse_epg_timestamp("2025-10-10T19:30:00+03:00");
        assert_eq!(parse_epg_timestamp(" 2025-10-10T19:30:00+03:00 "), expected);
    }

    #[test]
    fn formats_utc_offsets() {
        assert_eq!(format_utc_offset(0), "+00:00");
        assert_eq!(format_utc_offset(180), "+03:00");
        assert_eq!(format_utc_offset(-330), "-05:30");
    }
}
