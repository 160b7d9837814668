/// Per-channel merged program history.
///
/// Every window ever fetched for a channel is folded into one time-ordered,
/// deduplicated list, so overlapping-window fetches converge instead of
/// accumulating. Bounded both ways: an LRU over channels and a hard cap on
/// programs per channel.
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::models::Program;

#[derive(Debug)]
pub struct ChannelStore {
    channels: Mutex<LruCache<String, Vec<Program>>>,
    max_programs_per_channel: usize,
}

impl ChannelStore {
    pub fn new(channel_capacity: usize, max_programs_per_channel: usize) -> Self {
        let capacity = NonZeroUsize::new(channel_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        ChannelStore {
            channels: Mutex::new(LruCache::new(capacity)),
            max_programs_per_channel: max_programs_per_channel.max(1),
        }
    }

    /// Fold newly fetched programs into the channel's history. New data wins
    /// on identity collision; the result is sorted ascending by start time
    /// and capped by dropping the earliest entries. Merging is commutative
    /// over program sets and idempotent, so out-of-order completion of
    /// fetches for different windows never corrupts the history.
    pub fn merge(&self, channel_id: &str, new_programs: &[Program]) {
        if new_programs.is_empty() {
            return;
        }

        let mut channels = self.channels.lock().expect("channel store lock poisoned");
        let existing = channels.pop(channel_id).unwrap_or_default();

        let mut by_identity: HashMap<String, Program> =
            HashMap::with_capacity(existing.len() + new_programs.len());
        for program in existing {
            by_identity.insert(program.identity(), program);
        }
        for program in new_programs {
            by_identity.insert(program.identity(), program.clone());
        }

        let mut merged: Vec<Program> = by_identity.into_values().collect();
        merged.sort_by_key(|p| p.start_utc_millis);
        if merged.len() > self.max_programs_per_channel {
            let drop = merged.len() - self.max_programs_per_channel;
            merged.drain(..drop);
        }

        channels.put(channel_id.to_string(), merged);
    }

    /// The channel's full merged history, oldest first. Counts as an access
    /// for LRU purposes.
    pub fn get_all(&self, channel_id: &str) -> Vec<Program> {
        let mut channels = self.channels.lock().expect("channel store lock poisoned");
        channels.get(channel_id).cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.channels
            .lock()
            .expect("channel store lock poisoned")
            .clear();
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
    fn overlapping_windows_converge_without_duplicates() {
        let store = ChannelStore::new(48, 512);
        // Window [0, 100] then [50, 150]; p2 appears in both fetches.
        store.merge("ch1", &[program("p1", 0, 50), program("p2", 50, 100)]);
        store.merge("ch1", &[program("p2", 50, 100), program("p3", 100, 150)]);

        let all = store.get_all("ch1");
        let ids: Vec<&str> = all.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2", "p3"]);
        assert!(all.windows(2).all(|w| w[0].start_utc_millis <= w[1].start_utc_millis));
    }

    #[test]
    fn merge_is_idempotent() {
        let store = ChannelStore::new(48, 512);
        let programs = vec![program("p1", 0, 50), program("p2", 50, 100)];
        store.merge("ch1", &programs);
        store.merge("ch1", &programs);
        assert_eq!(store.get_all("ch1").len(), 2);
    }

    #[test]
    fn newer_data_wins_on_identity_collision() {
        let store = ChannelStore::new(48, 512);
        store.merge("ch1", &[program("p1", 0, 50)]);

        let mut updated = program("p1", 0, 60);
        updated.title = "Updated".to_string();
        store.merge("ch1", std::slice::from_ref(&updated));

        let all = store.get_all("ch1");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Updated");
        assert_eq!(all[0].stop_utc_millis, 60);
    }

    #[test]
    fn programs_without_ids_deduplicate_by_start_and_title() {
        let store = ChannelStore::new(48, 512);
        let mut anon = program("", 100, 200);
        anon.title = "News".to_string();
        store.merge("ch1", std::slice::from_ref(&anon));
        store.merge("ch1", std::slice::from_ref(&anon));
        assert_eq!(store.get_all("ch1").len(), 1);
    }

    #[test]
    fn per_channel_cap_keeps_the_most_recent_by_start() {
        let store = ChannelStore::new(48, 512);
        let programs: Vec<Program> = (0..600)
            .map(|i| program(&format!("p{i}"), i64::from(i) * 1_000, i64::from(i) * 1_000 + 900))
            .collect();
        store.merge("ch1", &programs);

        let all = store.get_all("ch1");
        assert_eq!(all.len(), 512);
        // The 88 earliest programs were dropped.
        assert_eq!(all[0].id, "p88");
        assert_eq!(all[511].id, "p599");
    }

    #[test]
    fn channel_lru_evicts_least_recently_used() {
        let store = ChannelStore::new(2, 512);
        store.merge("ch1", &[program("a", 0, 10)]);
        store.merge("ch2", &[program("b", 0, 10)]);
        // Touch ch1 so ch2 becomes the eviction candidate.
        assert!(!store.get_all("ch1").is_empty());
        store.merge("ch3", &[program("c", 0, 10)]);

        assert!(!store.get_all("ch1").is_empty());
        assert!(store.get_all("ch2").is_empty());
        assert!(!store.get_all("ch3").is_empty());
    }

    #[test]
    fn merging_nothing_is_a_no_op() {
        let store = ChannelStore::new(2, 512);
        store.merge("ch1", &[]);
        assert!(store.get_all("ch1").is_empty());
    }

    #[test]
    fn clear_empties_every_channel() {
        let store = ChannelStore::new(48, 512);
        store.merge("ch1", &[program("a", 0, 10)]);
        store.clear();
        assert!(store.get_all("ch1").is_empty());
    }
}
