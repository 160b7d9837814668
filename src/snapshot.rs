/// "What's on now" snapshot.
///
/// Channel lists ask for the current program far more often than the guide
/// changes, so answers are memoised for a short TTL. The whole snapshot is
/// an immutable object behind an `RwLock<Arc<_>>` that writers replace
/// wholesale; readers clone the `Arc` and never see a torn map.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::Program;

#[derive(Debug, Default)]
struct SnapshotInner {
    captured_at_utc_millis: i64,
    /// `Some(None)` for a channel means "checked, nothing currently airing".
    by_channel: HashMap<String, Option<Program>>,
}

#[derive(Debug)]
pub struct CurrentSnapshot {
    inner: RwLock<Arc<SnapshotInner>>,
    ttl_millis: i64,
}

impl CurrentSnapshot {
    pub fn new(ttl_millis: u64) -> Self {
        CurrentSnapshot {
            inner: RwLock::new(Arc::new(SnapshotInner::default())),
            ttl_millis: i64::try_from(ttl_millis).unwrap_or(i64::MAX),
        }
    }

    /// The cached answer for a channel, if the snapshot is still fresh and
    /// has one. Outer `None` means the caller must recompute.
    pub fn lookup(&self, channel_id: &str, now_utc_millis: i64) -> Option<Option<Program>> {
        let snapshot = Arc::clone(&self.inner.read().expect("snapshot lock poisoned"));
        if snapshot.captured_at_utc_millis == 0
            || now_utc_millis - snapshot.captured_at_utc_millis >= self.ttl_millis
        {
            return None;
        }
        snapshot.by_channel.get(channel_id).cloned()
    }

    /// Record one channel's current program. Builds a new snapshot carrying
    /// the other channels' answers forward and swaps it in whole.
    pub fn refresh(&self, channel_id: &str, current: Option<Program>, now_utc_millis: i64) {
        let mut guard = self.inner.write().expect("snapshot lock poisoned");
        let mut by_channel = guard.by_channel.clone();
        by_channel.insert(channel_id.to_string(), current);
        *guard = Arc::new(SnapshotInner {
            captured_at_utc_millis: now_utc_millis,
            by_channel,
        });
    }

    /// Drop every cached answer. Used when the system clock moves: program
    /// times are still valid UTC instants, but "now" is not where it was.
    pub fn invalidate(&self) {
        let mut guard = self.inner.write().expect("snapshot lock poisoned");
        *guard = Arc::new(SnapshotInner::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(id: &str) -> Program {
        Program {
            id: id.to_string(),
            start_utc_millis: 1_000,
            stop_utc_millis: 2_000,
            title: format!("Program {id}"),
            description: String::new(),
        }
    }

    #[test]
    fn empty_snapshot_forces_recompute() {
        let snapshot = CurrentSnapshot::new(60_000);
        assert_eq!(snapshot.lookup("ch1", 1_000), None);
    }

    #[test]
    fn fresh_entries_are_returned() {
        let snapshot = CurrentSnapshot::new(60_000);
        snapshot.refresh("ch1", Some(program("p1")), 1_000);
        assert_eq!(snapshot.lookup("ch1", 30_000), Some(Some(program("p1"))));
    }

    #[test]
    fn a_cached_none_is_a_valid_answer() {
        let snapshot = CurrentSnapshot::new(60_000);
        snapshot.refresh("ch1", None, 1_000);
        // "Checked, nothing airing" — not a miss.
        assert_eq!(snapshot.lookup("ch1", 30_000), Some(None));
    }

    #[test]
    fn stale_snapshot_forces_recompute() {
        let snapshot = CurrentSnapshot::new(60_000);
        snapshot.refresh("ch1", Some(program("p1")), 1_000);
        assert_eq!(snapshot.lookup("ch1", 61_000), None);
    }

    #[test]
    fn unknown_channel_in_fresh_snapshot_forces_recompute() {
        let snapshot = CurrentSnapshot::new(60_000);
        snapshot.refresh("ch1", Some(program("p1")), 1_000);
        assert_eq!(snapshot.lookup("ch2", 2_000), None);
    }

    #[test]
    fn refresh_carries_other_channels_forward() {
        let snapshot = CurrentSnapshot::new(60_000);
        snapshot.refresh("ch1", Some(program("p1")), 1_000);
        snapshot.refresh("ch2", Some(program("p2")), 2_000);
        assert_eq!(snapshot.lookup("ch1", 3_000), Some(Some(program("p1"))));
        assert_eq!(snapshot.lookup("ch2", 3_000), Some(Some(program("p2"))));
    }

    #[test]
    fn refresh_renews_the_ttl_for_the_whole_snapshot() {
        let snapshot = CurrentSnapshot::new(60_000);
        snapshot.refresh("ch1", Some(program("p1")), 1_000);
        snapshot.refresh("ch2", Some(program("p2")), 59_000);
        // ch1's answer rides on the newer capture time.
        assert_eq!(snapshot.lookup("ch1", 100_000), Some(Some(program("p1"))));
    }

    #[test]
    fn invalidate_drops_everything() {
        let snapshot = CurrentSnapshot::new(60_000);
        snapshot.refresh("ch1", Some(program("p1")), 1_000);
        snapshot.invalidate();
        assert_eq!(snapshot.lookup("ch1", 1_001), None);
    }
}
