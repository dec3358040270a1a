//! Fetch orchestration: cache lookup, request coalescing, adapter dispatch.
//!
//! The orchestrator owns two maps keyed by descriptor [`Fingerprint`]:
//!
//! - the cache of normalized payloads, each valid until `stored_at + ttl`;
//! - the in-flight table holding one shared future per fingerprint, so any
//!   number of concurrent callers trigger a single adapter invocation.
//!
//! Both maps sit behind one mutex that is never held across an await. A fetch
//! runs on its own task; callers only await a shared handle to it, so a caller
//! that gives up does not cancel the fetch for everybody else. When the fetch
//! finishes, the in-flight entry is removed and the cache entry written under
//! the same lock acquisition.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::{
    adapters::{AdapterSet, CallbackRegistry},
    catalog::EngineSettings,
    data::{Record, normalize_records},
    descriptor::{Fingerprint, SourceDescriptor},
    error::{FetchError, FetchResult},
};

pub type Payload = Arc<Vec<Record>>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult<Payload>>>;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload: Payload,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct InFlightRequest {
    generation: u64,
    result: SharedFetch,
}

#[derive(Default)]
struct State {
    cache: HashMap<Fingerprint, CacheEntry>,
    in_flight: HashMap<Fingerprint, InFlightRequest>,
    generation: u64,
}

/// Snapshot of the orchestrator's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatus {
    pub cached_entries: usize,
    pub in_flight: usize,
}

struct Inner {
    adapters: AdapterSet,
    ttl: Duration,
    state: Mutex<State>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_fetch(
        &self,
        descriptor: SourceDescriptor,
        fingerprint: Fingerprint,
        generation: u64,
    ) -> FetchResult<Payload> {
        let outcome = match self.adapters.get(descriptor.kind) {
            Some(adapter) => adapter
                .fetch(&descriptor)
                .await
                .map(|raw| Arc::new(normalize_records(&raw))),
            None => Err(FetchError::config(format!(
                "no adapter registered for {} sources",
                descriptor.kind
            ))),
        };

        let mut state = self.lock_state();
        let current = state
            .in_flight
            .get(&fingerprint)
            .is_some_and(|request| request.generation == generation);
        if current {
            state.in_flight.remove(&fingerprint);
        }
        match &outcome {
            Ok(payload) if current => {
                let stored_at = Instant::now();
                let source_id = fingerprint.source_id();
                let before = state.cache.len();
                state
                    .cache
                    .retain(|key, entry| key.source_id() != source_id && entry.is_valid(stored_at));
                let evicted = before - state.cache.len();
                if evicted > 0 {
                    debug!("Evicted {evicted} superseded or expired cache entr(ies)");
                }
                state.cache.insert(
                    fingerprint.clone(),
                    CacheEntry {
                        fingerprint: fingerprint.clone(),
                        payload: Arc::clone(payload),
                        stored_at,
                        expires_at: stored_at + self.ttl,
                    },
                );
                info!(
                    "Cached {} record(s) for {fingerprint} (ttl {}s)",
                    payload.len(),
                    self.ttl.as_secs()
                );
            }
            Ok(_) => debug!("Source {fingerprint} was invalidated mid-fetch; result not cached"),
            Err(err) => warn!("Fetching {fingerprint} failed: {err}"),
        }
        outcome
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Orchestrator with the three standard adapters configured from `settings`.
    pub fn new(settings: &EngineSettings) -> Self {
        let adapters = AdapterSet::standard(settings.request_timeout(), settings.bridge_timeout());
        Self::with_adapters(adapters, settings.cache_ttl())
    }

    pub fn with_adapters(adapters: AdapterSet, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapters,
                ttl,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn callback_registry(&self) -> &Arc<CallbackRegistry> {
        self.inner.adapters.registry()
    }

    /// Returns the records for `descriptor`, from cache when a valid entry
    /// exists and `force_refresh` is false, otherwise from the shared fetch for
    /// its fingerprint (starting one if none is running).
    pub async fn load(
        &self,
        descriptor: &SourceDescriptor,
        force_refresh: bool,
    ) -> FetchResult<Payload> {
        descriptor.validate()?;
        let fingerprint = descriptor.fingerprint();
        let pending = {
            let mut state = self.inner.lock_state();
            if !force_refresh
                && let Some(entry) = state.cache.get(&fingerprint)
                && entry.is_valid(Instant::now())
            {
                debug!("Cache hit for {fingerprint}");
                return Ok(Arc::clone(&entry.payload));
            }
            match state.in_flight.get(&fingerprint) {
                Some(request) => {
                    debug!("Attaching to in-flight fetch for {fingerprint}");
                    request.result.clone()
                }
                None => self.start_fetch(&mut state, descriptor.clone(), fingerprint),
            }
        };
        pending.await
    }

    fn start_fetch(
        &self,
        state: &mut State,
        descriptor: SourceDescriptor,
        fingerprint: Fingerprint,
    ) -> SharedFetch {
        state.generation += 1;
        let generation = state.generation;
        info!("Fetching {fingerprint} via {} adapter", descriptor.kind);

        let inner = Arc::clone(&self.inner);
        let task_fingerprint = fingerprint.clone();
        let task = tokio::spawn(async move {
            inner
                .run_fetch(descriptor, task_fingerprint, generation)
                .await
        });
        let result = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => Err(FetchError::network(format!("fetch task failed: {err}"))),
            }
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            fingerprint,
            InFlightRequest {
                generation,
                result: result.clone(),
            },
        );
        result
    }

    /// Read-only peek at the newest valid payload cached for `source_id`.
    pub fn get_cached(&self, source_id: &str) -> Option<Payload> {
        let now = Instant::now();
        let state = self.inner.lock_state();
        state
            .cache
            .values()
            .filter(|entry| entry.fingerprint.source_id() == source_id && entry.is_valid(now))
            .max_by_key(|entry| entry.stored_at)
            .map(|entry| Arc::clone(&entry.payload))
    }

    /// The cache entry for exactly this descriptor value, expired or not.
    pub fn cache_entry(&self, descriptor: &SourceDescriptor) -> Option<CacheEntry> {
        self.inner
            .lock_state()
            .cache
            .get(&descriptor.fingerprint())
            .cloned()
    }

    /// Drops cached payloads and in-flight bookkeeping for `source_id`.
    /// Callers already waiting on a removed fetch still receive its result,
    /// but that result is not written to the cache.
    pub fn invalidate(&self, source_id: &str) {
        let mut state = self.inner.lock_state();
        let before = state.cache.len() + state.in_flight.len();
        state
            .cache
            .retain(|fingerprint, _| fingerprint.source_id() != source_id);
        state
            .in_flight
            .retain(|fingerprint, _| fingerprint.source_id() != source_id);
        let removed = before - state.cache.len() - state.in_flight.len();
        info!("Invalidated {removed} entr(ies) for source '{source_id}'");
    }

    pub fn invalidate_all(&self) {
        let mut state = self.inner.lock_state();
        state.cache.clear();
        state.in_flight.clear();
        info!("Cleared all cached and in-flight source data");
    }

    /// Removes expired cache entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.lock_state();
        let before = state.cache.len();
        state.cache.retain(|_, entry| entry.is_valid(now));
        before - state.cache.len()
    }

    pub fn status(&self) -> CacheStatus {
        let state = self.inner.lock_state();
        CacheStatus {
            cached_entries: state.cache.len(),
            in_flight: state.in_flight.len(),
        }
    }
}
