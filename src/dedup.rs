//! Sharing of in-flight requests between callers that ask for the same thing.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value as JsonValue;
use tokio::time::Instant;

/// Shared handle to a deduplicated request. Cloning it attaches another
/// caller to the same settlement.
pub type Deduplicated<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

const DEFAULT_TTL: Duration = Duration::from_millis(1_000);

/// Source of "now" for entry expiry.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Reads the tokio clock, which honors `tokio::time::pause`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Builds a deduplication key from a request's method, URL and JSON body.
///
/// Object keys serialize in sorted order, so structurally equal bodies give
/// equal keys. A missing body contributes an empty string.
pub fn generate_request_key(method: &str, url: &str, data: Option<&JsonValue>) -> String {
    let body = data.map(JsonValue::to_string).unwrap_or_default();
    format!("{method}:{url}:{body}")
}

struct PendingEntry<T, E> {
    id: u64,
    created_at: Instant,
    future: Deduplicated<T, E>,
}

struct Table<T, E, C> {
    ttl: Duration,
    clock: C,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingEntry<T, E>>>,
}

impl<T, E, C> Table<T, E, C> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry<T, E>>> {
        // Entries stay consistent even if a holder panicked mid-operation.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_if_current(&self, key: &str, id: u64) {
        let mut pending = self.lock();
        if pending.get(key).is_some_and(|entry| entry.id == id) {
            pending.remove(key);
        }
    }
}

/// Lets concurrent callers share one in-flight result per key.
///
/// Calls with the same key within `ttl` of the first call attach to its
/// result instead of running their own operation. A settled entry is
/// dropped `ttl` after settlement, and every lookup evicts entries older
/// than `ttl`.
///
/// Cloning is cheap; clones share the same table. Must be used from within
/// a tokio runtime.
pub struct RequestDeduplicator<T, E, C = TokioClock> {
    table: Arc<Table<T, E, C>>,
}

impl<T, E, C> Clone for RequestDeduplicator<T, E, C> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T, E, C> fmt::Debug for RequestDeduplicator<T, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("ttl", &self.table.ttl)
            .field("pending", &self.table.lock().len())
            .finish()
    }
}

impl<T, E> RequestDeduplicator<T, E, TokioClock>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, TokioClock)
    }
}

impl<T, E> Default for RequestDeduplicator<T, E, TokioClock>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<T, E, C> RequestDeduplicator<T, E, C>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: Clock,
{
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            table: Arc::new(Table {
                ttl,
                clock,
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.table.ttl
    }

    /// Number of entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry. Callers already attached still receive their result.
    pub fn clear(&self) {
        self.table.lock().clear();
    }

    /// Returns the shared result for `key`, starting `operation` only when no
    /// live entry exists.
    ///
    /// The lookup and the insert happen under one lock, so concurrent callers
    /// never start the same key twice. `operation` runs on a spawned task and
    /// completes even if every caller drops its handle.
    pub fn deduplicate<F, Fut>(&self, key: impl Into<String>, operation: F) -> Deduplicated<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let ttl = self.table.ttl;
        let now = self.table.clock.now();

        let (id, future) = {
            let mut pending = self.table.lock();
            pending.retain(|_, entry| now.saturating_duration_since(entry.created_at) <= ttl);

            if let Some(entry) = pending.get(&key) {
                #[cfg(feature = "tracing")]
                tracing::trace!(key = %key, "attaching to in-flight request");
                return entry.future.clone();
            }

            let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);
            let future = async move { operation().await }.boxed().shared();
            pending.insert(
                key.clone(),
                PendingEntry {
                    id,
                    created_at: now,
                    future: future.clone(),
                },
            );
            (id, future)
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(key = %key, "starting request");

        self.spawn_cleanup(key, id, future.clone());
        future
    }

    fn spawn_cleanup(&self, key: String, id: u64, future: Deduplicated<T, E>) {
        let table: Weak<Table<T, E, C>> = Arc::downgrade(&self.table);
        let ttl = self.table.ttl;
        tokio::spawn(async move {
            let _ = future.await;
            tokio::time::sleep(ttl).await;
            if let Some(table) = table.upgrade() {
                table.remove_if_current(&key, id);
            }
        });
    }
}
