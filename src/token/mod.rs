//! Token store for origins that gate their manifests behind a handshake.
//!
//! Lifecycle per channel key: empty at startup, populated by the first
//! successful bootstrap, unusable once its TTL has passed. Every read and
//! write of an entry happens while holding that key's async mutex, so
//! concurrent requests for the same channel share one bootstrap, whether it
//! succeeds or fails.

pub mod bootstrap;

use dashmap::DashMap;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use bootstrap::{extract_token, fetch_token};

/// Token bootstrap failures. All surface to the player as `500`.
///
/// Cloneable so that every caller waiting on a failed bootstrap gets the
/// same error.
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    #[error("bootstrap request failed: {0}")]
    Transport(Arc<reqwest::Error>),

    #[error("bootstrap endpoint returned {0}")]
    Status(StatusCode),

    #[error("no token in bootstrap response")]
    Missing,

    #[error("invalid bootstrap URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for TokenError {
    fn from(err: reqwest::Error) -> Self {
        TokenError::Transport(Arc::new(err))
    }
}

/// A cached token for one channel.
#[derive(Debug, Clone)]
pub struct TokenCacheEntry {
    pub token: String,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl TokenCacheEntry {
    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Observable state of a channel's token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    FetchingToken,
    HaveToken { expires_in: Duration },
    Expired,
}

#[derive(Debug, Default)]
struct SlotState {
    entry: Option<TokenCacheEntry>,
    /// Error of the last failed bootstrap, tagged with its flight number.
    failure: Option<(u64, TokenError)>,
}

#[derive(Debug, Default)]
struct Slot {
    /// Finished bootstraps on this key. Only bumped while `state` is locked.
    flights: AtomicU64,
    state: Mutex<SlotState>,
}

impl Slot {
    /// No usable token and nobody holding the lock.
    fn is_reclaimable(&self) -> bool {
        self.state
            .try_lock()
            .is_ok_and(|state| state.entry.as_ref().is_none_or(|e| !e.is_fresh()))
    }
}

/// Process-wide token cache keyed by `profile:channel`.
#[derive(Clone, Debug)]
pub struct TokenStore {
    slots: Arc<DashMap<String, Arc<Slot>>>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        self.slots.entry(key.to_string()).or_default().clone()
    }

    /// Remove `key` once no caller holds its slot and it has no fresh token.
    fn prune(&self, key: &str) {
        self.slots
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1 && slot.is_reclaimable());
    }

    /// Return the cached token for `key`, or run `bootstrap` to get one.
    ///
    /// Only one bootstrap per key runs at a time. Callers that queued behind
    /// it read its outcome: the stored token, or the same error. A request
    /// arriving after a failure has settled retries with a fresh bootstrap.
    pub async fn get_or_bootstrap<F, Fut>(&self, key: &str, bootstrap: F) -> Result<String, TokenError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, TokenError>>,
    {
        let slot = self.slot(key);
        let result = self.fly(&slot, key, bootstrap).await;
        drop(slot);

        if result.is_err() {
            self.prune(key);
        }
        result
    }

    async fn fly<F, Fut>(&self, slot: &Slot, key: &str, bootstrap: F) -> Result<String, TokenError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, TokenError>>,
    {
        let seen = slot.flights.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if let Some(cached) = state.entry.as_ref()
            && cached.is_fresh()
        {
            debug!("Token cache hit for {}", key);
            return Ok(cached.token.clone());
        }

        if let Some((flight, err)) = &state.failure
            && *flight > seen
        {
            debug!("Bootstrap for {} failed while waiting: {}", key, err);
            return Err(err.clone());
        }

        state.entry = None;
        let result = bootstrap().await;
        let flight = slot.flights.fetch_add(1, Ordering::AcqRel) + 1;

        match result {
            Ok(token) => {
                info!("Token bootstrapped for {}", key);
                state.failure = None;
                state.entry = Some(TokenCacheEntry {
                    token: token.clone(),
                    fetched_at: Instant::now(),
                    ttl: self.ttl,
                });
                Ok(token)
            }
            Err(err) => {
                state.failure = Some((flight, err.clone()));
                Err(err)
            }
        }
    }

    /// Drop the cached token for `key` if it is still `rejected`.
    ///
    /// A token refreshed by another request in the meantime is kept.
    pub async fn invalidate(&self, key: &str, rejected: &str) {
        let Some(slot) = self.slots.get(key).map(|s| s.clone()) else {
            return;
        };

        {
            let mut state = slot.state.lock().await;
            if state.entry.as_ref().is_some_and(|cached| cached.token == rejected) {
                debug!("Invalidating rejected token for {}", key);
                state.entry = None;
            }
        }

        drop(slot);
        self.prune(key);
    }

    /// Drop every idle key without a fresh token.
    pub fn cleanup(&self) {
        self.slots
            .retain(|_, slot| Arc::strong_count(slot) > 1 || !slot.is_reclaimable());
    }

    pub fn state(&self, key: &str) -> TokenState {
        let Some(slot) = self.slots.get(key).map(|s| s.clone()) else {
            return TokenState::NoToken;
        };

        let Ok(state) = slot.state.try_lock() else {
            return TokenState::FetchingToken;
        };

        match state.entry.as_ref() {
            None => TokenState::NoToken,
            Some(cached) if cached.is_fresh() => TokenState::HaveToken {
                expires_in: cached.ttl.saturating_sub(cached.fetched_at.elapsed()),
            },
            Some(_) => TokenState::Expired,
        }
    }

    /// Number of channels currently holding a fresh token.
    pub fn cached_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.value().state.try_lock().is_ok_and(|state| {
                    state.entry.as_ref().is_some_and(TokenCacheEntry::is_fresh)
                })
            })
            .count()
    }

    /// Number of keys currently tracked, fresh or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn caches_token_within_ttl() {
        let store = TokenStore::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let token = store
                .get_or_bootstrap("livetv:78", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("abc".to_string())
                })
                .await
                .unwrap();
            assert_eq!(token, "abc");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(store.state("livetv:78"), TokenState::HaveToken { .. }));
        assert_eq!(store.cached_count(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_refetched() {
        let store = TokenStore::new(Duration::from_millis(20));
        store
            .get_or_bootstrap("k", || async { Ok("old".to_string()) })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.state("k"), TokenState::Expired);
        assert_eq!(store.cached_count(), 0);

        let token = store
            .get_or_bootstrap("k", || async { Ok("new".to_string()) })
            .await
            .unwrap();
        assert_eq!(token, "new");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_bootstrap() {
        let store = TokenStore::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    store
                        .get_or_bootstrap("livetv:12", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok("shared".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_bootstrap_leaves_entry_empty() {
        let store = TokenStore::new(Duration::from_secs(60));

        let err = store
            .get_or_bootstrap("k", || async { Err(TokenError::Missing) })
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Missing));
        assert_eq!(store.state("k"), TokenState::NoToken);

        let token = store
            .get_or_bootstrap("k", || async { Ok("retry".to_string()) })
            .await
            .unwrap();
        assert_eq!(token, "retry");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_bootstrap() {
        let store = TokenStore::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let store = store.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    store
                        .get_or_bootstrap("livetv:1", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err(TokenError::Missing)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(matches!(task.await.unwrap(), Err(TokenError::Missing)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(200));

        // A request arriving after the failure settled bootstraps again
        let token = store
            .get_or_bootstrap("livetv:1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("recovered".to_string())
            })
            .await
            .unwrap();
        assert_eq!(token, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_keys_are_not_retained() {
        let store = TokenStore::new(Duration::from_secs(60));

        for channel in 0..1000 {
            let key = format!("livetv:{channel}");
            let _ = store
                .get_or_bootstrap(&key, || async { Err(TokenError::Missing) })
                .await;
        }

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn invalidated_keys_are_removed() {
        let store = TokenStore::new(Duration::from_secs(60));
        store
            .get_or_bootstrap("k", || async { Ok("t".to_string()) })
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        store.invalidate("k", "t").await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_expired_entries() {
        let store = TokenStore::new(Duration::from_millis(10));
        store
            .get_or_bootstrap("old", || async { Ok("a".to_string()) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let long_lived = TokenStore {
            ttl: Duration::from_secs(60),
            ..store.clone()
        };
        long_lived
            .get_or_bootstrap("fresh", || async { Ok("b".to_string()) })
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        store.cleanup();

        assert_eq!(store.len(), 1, "Expired entries should be removed");
        assert!(matches!(store.state("fresh"), TokenState::HaveToken { .. }));
    }

    #[tokio::test]
    async fn invalidate_only_drops_the_rejected_token() {
        let store = TokenStore::new(Duration::from_secs(60));
        store
            .get_or_bootstrap("k", || async { Ok("current".to_string()) })
            .await
            .unwrap();

        store.invalidate("k", "stale").await;
        assert!(matches!(store.state("k"), TokenState::HaveToken { .. }));

        store.invalidate("k", "current").await;
        assert_eq!(store.state("k"), TokenState::NoToken);
    }

    #[tokio::test]
    async fn state_reports_fetching_while_locked() {
        let store = TokenStore::new(Duration::from_secs(60));
        let slot = store.slot("k");
        let _held = slot.state.lock().await;

        assert_eq!(store.state("k"), TokenState::FetchingToken);
        assert_eq!(store.state("other"), TokenState::NoToken);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = TokenStore::new(Duration::from_secs(60));
        let a = store
            .get_or_bootstrap("a", || async { Ok("token-a".to_string()) })
            .await
            .unwrap();
        let b = store
            .get_or_bootstrap("b", || async { Ok("token-b".to_string()) })
            .await
            .unwrap();

        assert_eq!((a.as_str(), b.as_str()), ("token-a", "token-b"));
        assert_eq!(store.cached_count(), 2);
    }
}
