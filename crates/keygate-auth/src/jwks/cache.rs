//! TTL cache for a provider's key set with stale serving and single-flight
//! refresh.
//!
//! Readers load an `Arc<KeySet>` from an [`ArcSwapOption`] without taking a
//! lock. Refreshes are serialised behind one async mutex; whoever acquires it
//! re-checks the snapshot first, so concurrent misses collapse into a single
//! fetch. Once a set is past its TTL but still inside its grace window, only
//! the caller that wins the mutex waits on the fetch; the rest keep getting
//! the stale set.

use super::fetch::KeySetFetcher;
use super::{KeySet, signing_keys};
use crate::error::{FetchError, VerificationFailure};

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cache timing policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// How long a fetched set is served without refreshing.
    pub ttl: Duration,
    /// How long past `ttl` a set may still be served when refreshes fail.
    pub stale_grace: Duration,
    /// Minimum spacing between forced refreshes, and the retry backoff after
    /// a failed fetch. Also the floor for provider `max-age` hints.
    pub min_refresh_interval: Duration,
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            stale_grace: Duration::from_secs(3600),
            min_refresh_interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

/// Coarse cache state, for health endpoints and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing fetched yet, or the last set is past its grace window.
    Empty,
    /// Serving a set inside its TTL.
    Fresh,
    /// Serving a set past its TTL because refreshes fail.
    Stale,
}

/// Snapshot of cache health.
#[derive(Debug, Clone)]
pub struct CacheStatus {
    /// Current state.
    pub state: CacheState,
    /// Generation of the cached set (0 when empty).
    pub generation: u64,
    /// Number of keys in the cached set.
    pub key_count: usize,
    /// Text of the most recent fetch failure, cleared on success.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct RefreshState {
    last_attempt: Option<Instant>,
    last_failure: Option<Instant>,
    generation: u64,
}

/// Upper bound for deadlines computed from settings.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// `at + d`, saturating at [`FAR_FUTURE`] past `at`.
fn deadline(at: Instant, d: Duration) -> Instant {
    at.checked_add(d.min(FAR_FUTURE))
        .or_else(|| at.checked_add(Duration::from_secs(365 * 24 * 3600)))
        .unwrap_or(at)
}

#[derive(Debug, Clone, Copy)]
enum Refresh {
    IfExpired,
    Force { seen_generation: u64 },
}

/// Caches one provider's key set.
pub struct KeySetCache {
    fetcher: Arc<dyn KeySetFetcher>,
    settings: CacheSettings,
    snapshot: ArcSwapOption<KeySet>,
    last_error: ArcSwapOption<String>,
    refresh: Mutex<RefreshState>,
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetCache")
            .field("source", &self.fetcher.source())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl KeySetCache {
    /// Create an empty cache; nothing is fetched until first use.
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, settings: CacheSettings) -> Self {
        Self {
            fetcher,
            settings,
            snapshot: ArcSwapOption::empty(),
            last_error: ArcSwapOption::empty(),
            refresh: Mutex::new(RefreshState::default()),
        }
    }

    /// Where keys are fetched from.
    pub fn source(&self) -> &str {
        self.fetcher.source()
    }

    /// Timing policy.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// The cached set, refreshing first if it is missing or past its TTL.
    ///
    /// # Errors
    ///
    /// [`VerificationFailure::KeySetUnavailable`] when no set can be fetched
    /// and no previous set is inside its grace window.
    pub async fn current(&self) -> Result<Arc<KeySet>, VerificationFailure> {
        let now = Instant::now();
        match self.snapshot.load_full() {
            Some(set) if set.is_fresh(now) => Ok(set),
            Some(set) if set.is_usable(now) => match self.refresh.try_lock() {
                Ok(state) => self.refresh_locked(state, Refresh::IfExpired).await,
                Err(_) => {
                    debug!(
                        source = self.fetcher.source(),
                        generation = set.generation(),
                        "refresh in flight, serving stale JWKS"
                    );
                    Ok(set)
                }
            },
            _ => self.refresh(Refresh::IfExpired).await,
        }
    }

    /// Fetch a new set regardless of TTL (rate limited).
    ///
    /// # Errors
    ///
    /// As [`KeySetCache::current`].
    pub async fn force_refresh(&self) -> Result<Arc<KeySet>, VerificationFailure> {
        let seen_generation = self.snapshot.load_full().map_or(0, |s| s.generation());
        self.refresh(Refresh::Force { seen_generation }).await
    }

    /// Refresh unless someone else already replaced the set of `seen_generation`.
    pub(crate) async fn refresh_after(
        &self,
        seen_generation: u64,
    ) -> Result<Arc<KeySet>, VerificationFailure> {
        self.refresh(Refresh::Force { seen_generation }).await
    }

    /// Current health, without triggering a fetch or waiting on one.
    pub fn status(&self) -> CacheStatus {
        let last_error = self.last_error.load_full().map(|e| e.to_string());
        let now = Instant::now();
        match self.snapshot.load_full() {
            Some(set) if set.is_usable(now) => CacheStatus {
                state: if set.is_fresh(now) {
                    CacheState::Fresh
                } else {
                    CacheState::Stale
                },
                generation: set.generation(),
                key_count: set.keys().len(),
                last_error,
            },
            _ => CacheStatus {
                state: CacheState::Empty,
                generation: 0,
                key_count: 0,
                last_error,
            },
        }
    }

    async fn refresh(&self, mode: Refresh) -> Result<Arc<KeySet>, VerificationFailure> {
        let state = self.refresh.lock().await;
        self.refresh_locked(state, mode).await
    }

    async fn refresh_locked(
        &self,
        mut state: MutexGuard<'_, RefreshState>,
        mode: Refresh,
    ) -> Result<Arc<KeySet>, VerificationFailure> {
        let now = Instant::now();
        let cached = self.snapshot.load_full();

        // Double check: another caller may have refreshed while we waited.
        if let Some(set) = &cached {
            match mode {
                Refresh::IfExpired if set.is_fresh(now) => return Ok(Arc::clone(set)),
                Refresh::Force { seen_generation } if set.generation() != seen_generation => {
                    return Ok(Arc::clone(set));
                }
                _ => {}
            }
        }

        let backoff = self.settings.min_refresh_interval;
        let too_soon = match mode {
            Refresh::IfExpired => state
                .last_failure
                .is_some_and(|t| now.duration_since(t) < backoff),
            Refresh::Force { .. } => state
                .last_attempt
                .is_some_and(|t| now.duration_since(t) < backoff),
        };
        if too_soon {
            debug!(source = self.fetcher.source(), "JWKS refresh suppressed");
            let reason = self
                .last_error
                .load_full()
                .map_or_else(|| "refresh rate limited".to_string(), |e| e.to_string());
            return self.fallback(cached, now, reason);
        }

        state.last_attempt = Some(now);
        info!(source = self.fetcher.source(), "fetching JWKS");

        let fetched = match tokio::time::timeout(self.settings.fetch_timeout, self.fetcher.fetch())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };
        let keys = fetched.and_then(|f| signing_keys(&f.document).map(|keys| (keys, f.max_age)));

        match keys {
            Ok((keys, max_age)) => {
                let ttl = max_age.map_or(self.settings.ttl, |age| {
                    age.max(self.settings.min_refresh_interval)
                        .min(self.settings.ttl)
                });
                let fetched_at = Instant::now();
                let fresh_until = deadline(fetched_at, ttl);
                state.generation += 1;
                let set = Arc::new(KeySet::new(
                    keys,
                    fetched_at,
                    fresh_until,
                    deadline(fresh_until, self.settings.stale_grace),
                    state.generation,
                ));
                state.last_failure = None;
                self.last_error.store(None);
                self.snapshot.store(Some(Arc::clone(&set)));
                info!(
                    source = self.fetcher.source(),
                    generation = set.generation(),
                    key_count = set.keys().len(),
                    ttl_secs = ttl.as_secs(),
                    "JWKS refreshed"
                );
                Ok(set)
            }
            Err(e) => {
                warn!(source = self.fetcher.source(), error = %e, "JWKS fetch failed");
                state.last_failure = Some(now);
                self.last_error.store(Some(Arc::new(e.to_string())));
                self.fallback(cached, now, e.to_string())
            }
        }
    }

    fn fallback(
        &self,
        cached: Option<Arc<KeySet>>,
        now: Instant,
        reason: String,
    ) -> Result<Arc<KeySet>, VerificationFailure> {
        match cached {
            Some(set) if set.is_usable(now) => {
                if !set.is_fresh(now) {
                    warn!(
                        source = self.fetcher.source(),
                        generation = set.generation(),
                        "serving stale JWKS"
                    );
                }
                Ok(set)
            }
            _ => Err(VerificationFailure::KeySetUnavailable(reason)),
        }
    }
}
