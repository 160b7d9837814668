/// The guide engine: windowed fetch cache, single-flight coalescing, the
/// "what's on now" surface, guide prefetch, and time-change handling.
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use lru::LruCache;
use tracing::{debug, info, warn};

use crate::client::EpgClient;
use crate::clock::{Clock, ClockState, SystemClock, TimeChangeResult, TimeChangeTrigger};
use crate::config::EpgConfig;
use crate::error::EpgError;
use crate::models::{ChannelSource, EpgChannel, GuideWindow, Program, WindowKey};
use crate::snapshot::CurrentSnapshot;
use crate::store::ChannelStore;

type SharedFetch = Shared<BoxFuture<'static, Vec<Program>>>;

/// Outcome counters for a full guide prefetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideAggregate {
    pub channels_requested: usize,
    pub channels_found: usize,
    pub total_programs: usize,
    pub window: GuideWindow,
}

struct Inner {
    config: Arc<EpgConfig>,
    client: EpgClient,
    store: ChannelStore,
    snapshot: CurrentSnapshot,
    clock: Arc<dyn Clock>,
    clock_state: Mutex<ClockState>,
    windows: Mutex<LruCache<WindowKey, Vec<Program>>>,
    in_flight: Mutex<HashMap<WindowKey, SharedFetch>>,
    /// Bumped on every purge so a fetch that started before the purge cannot
    /// write its stale result back into the caches.
    generation: AtomicU64,
}

/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct EpgService {
    inner: Arc<Inner>,
}

impl EpgService {
    pub fn new(config: EpgConfig) -> Result<Self, EpgError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EpgConfig, clock: Arc<dyn Clock>) -> Result<Self, EpgError> {
        let config = Arc::new(config);
        let client = EpgClient::new(Arc::clone(&config))?;
        let window_capacity = NonZeroUsize::new(config.window_cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        let clock_state = ClockState::capture(clock.as_ref());
        info!(
            "EPG engine starting in zone {} ({})",
            clock_state.timezone_id,
            clock_state.offset_string(),
        );

        Ok(EpgService {
            inner: Arc::new(Inner {
                store: ChannelStore::new(
                    config.channel_cache_capacity,
                    config.max_programs_per_channel,
                ),
                snapshot: CurrentSnapshot::new(config.current_snapshot_ttl_ms),
                clock,
                clock_state: Mutex::new(clock_state),
                windows: Mutex::new(LruCache::new(window_capacity)),
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                client,
                config,
            }),
        })
    }

    // ── Windowed fetch with coalescing ────────────────────────────────────────

    /// Programs for one channel in one [from, to] window. Served from the
    /// window cache on an exact key match; otherwise at most one upstream
    /// fetch runs per key and every concurrent caller shares its result.
    /// Fetch failures come back as an empty list and are never cached.
    pub async fn get_windowed_programs_for_channel(
        &self,
        service_url: &str,
        channel_id: &str,
        from_utc_millis: i64,
        to_utc_millis: i64,
    ) -> Vec<Program> {
        let key = WindowKey {
            service_url: service_url.to_string(),
            channel_id: channel_id.to_string(),
            from_utc_millis,
            to_utc_millis,
        };

        if let Some(hit) = self
            .inner
            .windows
            .lock()
            .expect("window cache lock poisoned")
            .get(&key)
        {
            debug!("EPG window cache hit for {channel_id}");
            return hit.clone();
        }

        let shared = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .expect("in-flight map lock poisoned");

            if let Some(existing) = in_flight.get(&key) {
                debug!("Joining in-flight EPG fetch for {channel_id}");
                existing.clone()
            } else {
                // A fetch may have completed between the cache miss above and
                // taking this lock; its write-through lands before its
                // in-flight entry disappears, so re-check the cache here.
                if let Some(hit) = self
                    .inner
                    .windows
                    .lock()
                    .expect("window cache lock poisoned")
                    .get(&key)
                {
                    return hit.clone();
                }

                let service = self.clone();
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let _guard = InFlightGuard {
                        inner: Arc::clone(&service.inner),
                        key: task_key.clone(),
                    };
                    service.fetch_and_record(task_key).await
                });
                let shared: SharedFetch =
                    async move { handle.await.unwrap_or_default() }.boxed().shared();
                in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Runs inside the spawned fetch task. Owns the upstream call and the
    /// write-through; caller cancellation cannot interrupt it.
    async fn fetch_and_record(&self, key: WindowKey) -> Vec<Program> {
        let generation = self.inner.generation.load(Ordering::Acquire);
        let timezone = self.timezone_id();

        let result = self
            .inner
            .client
            .fetch_window(
                &key.service_url,
                &key.channel_id,
                key.from_utc_millis,
                key.to_utc_millis,
                &timezone,
            )
            .await;

        match result {
            Ok(programs) => {
                if self.inner.generation.load(Ordering::Acquire) != generation {
                    debug!(
                        "Discarding EPG fetch for {} completed across a cache purge",
                        key.channel_id,
                    );
                    return programs;
                }
                self.inner
                    .windows
                    .lock()
                    .expect("window cache lock poisoned")
                    .put(key.clone(), programs.clone());
                self.inner.store.merge(&key.channel_id, &programs);
                self.refresh_snapshot(&key.channel_id);
                programs
            }
            Err(e) => {
                warn!("EPG fetch failed for {}: {e}", key.channel_id);
                Vec::new()
            }
        }
    }

    // ── Current program ───────────────────────────────────────────────────────

    /// The program airing right now on a channel, if known. Memoised for the
    /// snapshot TTL; recomputed from the merged channel history after that.
    pub fn get_current_program(&self, channel_id: &str) -> Option<Program> {
        let now = self.inner.clock.now_utc_millis();
        if let Some(answer) = self.inner.snapshot.lookup(channel_id, now) {
            return answer;
        }
        self.refresh_snapshot(channel_id)
    }

    fn refresh_snapshot(&self, channel_id: &str) -> Option<Program> {
        let now = self.inner.clock.now_utc_millis();
        let current = self
            .inner
            .store
            .get_all(channel_id)
            .into_iter()
            .find(|p| p.is_current(now));
        self.inner.snapshot.refresh(channel_id, current.clone(), now);
        current
    }

    /// The channel's full merged program history, oldest first.
    pub fn get_programs_for_channel(&self, channel_id: &str) -> Vec<Program> {
        self.inner.store.get_all(channel_id)
    }

    // ── Guide prefetch ────────────────────────────────────────────────────────

    /// Probe the EPG service before a prefetch.
    pub async fn check_health(&self, service_url: &str) -> Result<bool, EpgError> {
        if service_url.trim().is_empty() {
            return Err(EpgError::MissingServiceUrl);
        }
        self.inner.client.check_health(service_url).await
    }

    /// Fetch guide data for every EPG-capable channel, in batches, merging
    /// everything into the channel store. Unlike windowed fetches, a failed
    /// batch aborts the whole prefetch with an error.
    pub async fn fetch_guide(
        &self,
        service_url: &str,
        source: &dyn ChannelSource,
        days_ahead: u32,
    ) -> Result<GuideAggregate, EpgError> {
        if service_url.trim().is_empty() {
            return Err(EpgError::MissingServiceUrl);
        }
        let channels: Vec<EpgChannel> = source
            .channels()
            .into_iter()
            .filter(EpgChannel::has_epg)
            .collect();
        if channels.is_empty() {
            return Err(EpgError::NoEpgChannels);
        }

        let now = chrono::DateTime::from_timestamp_millis(self.inner.clock.now_utc_millis())
            .unwrap_or_else(chrono::Utc::now);
        let window = GuideWindow::calculate(&channels, days_ahead, now);
        let timezone = self.timezone_id();
        info!(
            "Fetching guide for {} channel(s), window {} -> {}",
            channels.len(),
            window.from_iso(),
            window.to_iso(),
        );

        let mut aggregate = GuideAggregate {
            channels_requested: channels.len(),
            channels_found: 0,
            total_programs: 0,
            window,
        };
        for batch in channels.chunks(self.inner.config.fetch_batch_size.max(1)) {
            let response = self
                .inner
                .client
                .fetch_batch(service_url, batch, &window, &timezone)
                .await?;
            aggregate.channels_found += response.channels_found;
            aggregate.total_programs += response.total_programs;
            for (channel_id, programs) in &response.epg {
                self.inner.store.merge(channel_id, programs);
                self.refresh_snapshot(channel_id);
            }
        }

        info!(
            "Guide fetch complete: {}/{} channels, {} programs",
            aggregate.channels_found, aggregate.channels_requested, aggregate.total_programs,
        );
        Ok(aggregate)
    }

    // ── Time changes ──────────────────────────────────────────────────────────

    /// React to a platform clock or timezone event. A real zone change purges
    /// every cache (cached windows were requested with the old offset); a
    /// plain clock set only invalidates the current-program snapshot, since
    /// stored UTC instants remain valid.
    pub fn on_clock_or_timezone_event(&self, trigger: TimeChangeTrigger) -> TimeChangeResult {
        let live = ClockState::capture(self.inner.clock.as_ref());
        let zone_changed = {
            let mut state = self
                .inner
                .clock_state
                .lock()
                .expect("clock state lock poisoned");
            if *state != live {
                info!(
                    "Timezone changed: {} ({}) -> {} ({})",
                    state.timezone_id,
                    state.offset_string(),
                    live.timezone_id,
                    live.offset_string(),
                );
                *state = live;
                true
            } else {
                false
            }
        };

        if zone_changed {
            self.clear_cache();
            return TimeChangeResult::TimezoneChanged;
        }

        match trigger {
            TimeChangeTrigger::TimeSet | TimeChangeTrigger::Date => {
                info!("Clock changed ({trigger:?}); invalidating current-program snapshot");
                self.inner.snapshot.invalidate();
                TimeChangeResult::ClockChanged
            }
            TimeChangeTrigger::Timezone | TimeChangeTrigger::Unknown => TimeChangeResult::None,
        }
    }

    /// Drop every cache: windowed results, in-flight registrations, merged
    /// channel histories, and the current-program snapshot.
    pub fn clear_cache(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner
            .windows
            .lock()
            .expect("window cache lock poisoned")
            .clear();
        self.inner
            .in_flight
            .lock()
            .expect("in-flight map lock poisoned")
            .clear();
        self.inner.store.clear();
        self.inner.snapshot.invalidate();
        debug!("EPG caches cleared");
    }

    /// IANA zone id sent in `/epg` request bodies.
    fn timezone_id(&self) -> String {
        self.inner
            .clock_state
            .lock()
            .expect("clock state lock poisoned")
            .timezone_id
            .clone()
    }
}

/// Removes the in-flight registration when the fetch task finishes, whether
/// it returned, failed, or panicked. The write-through happens before this
/// drops, so no caller can miss both the cache and the in-flight entry.
struct InFlightGuard {
    inner: Arc<Inner>,
    key: WindowKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(&self.key);
        }
    }
}
