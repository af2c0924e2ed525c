//! Idempotency and concurrency guard.
//!
//! Every lifecycle operation enters through [`OperationGuard::run`], which
//! enforces the protocol's "exactly-once effect, at-least-once call"
//! contract:
//!
//! * Operations are keyed by volume identity.  While one operation holds a
//!   key, an arriving call with the *same* request fingerprint joins it and
//!   receives the same outcome; a call with a *different* fingerprint fails
//!   fast with [`DriverError::Aborted`].
//! * Completed outcomes are retained for a bounded window so a retry after
//!   completion still observes the original result instead of re-executing.
//! * The operation body runs on a spawned task.  A caller that cancels
//!   (drops its future) stops waiting, but the backend operation keeps
//!   running and its token records the true outcome for later retries.
//!
//! The guard is the only cross-request mutable structure in the core; no
//! lock is held across a backend round-trip beyond the per-volume key
//! itself.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::DriverError;
use crate::types::LifecycleResponse;

/// Outcome of a lifecycle operation, as cached and replayed by the guard.
pub type OperationResult = Result<LifecycleResponse, DriverError>;

/// Canonical identity of a request: operation kind plus the JSON form of its
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an operation from its kind and parameters.
    pub fn of<T: Serialize>(kind: &str, params: &T) -> Self {
        // Struct field order is stable, so the JSON form is canonical for a
        // given request type.
        let params = serde_json::to_string(params).unwrap_or_default();
        Self(format!("{kind}:{params}"))
    }
}

/// An operation that is currently executing.
struct InFlight {
    fingerprint: Fingerprint,
    done: watch::Receiver<Option<OperationResult>>,
}

/// A terminal outcome retained to answer retries.
struct Completed {
    result: OperationResult,
    expires_at: Instant,
}

struct GuardInner {
    /// In-flight operations keyed by volume identity.
    inflight: DashMap<String, InFlight>,
    /// Terminal outcomes keyed by request fingerprint.
    completed: DashMap<Fingerprint, Completed>,
    retention: Duration,
    shutting_down: AtomicBool,
}

/// Per-volume serialization plus request deduplication.
#[derive(Clone)]
pub struct OperationGuard {
    inner: Arc<GuardInner>,
}

impl OperationGuard {
    /// Create a guard whose completed tokens live for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                inflight: DashMap::new(),
                completed: DashMap::new(),
                retention,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Execute `op` under the guard.
    ///
    /// `key` is the volume identity (volume ID, or the volume name for
    /// create, which precedes an assigned ID).  `fingerprint` identifies the
    /// exact request.
    #[instrument(skip(self, op, fingerprint))]
    pub async fn run<F>(&self, key: &str, fingerprint: Fingerprint, op: F) -> OperationResult
    where
        F: Future<Output = OperationResult> + Send + 'static,
    {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable("driver is shutting down".into()));
        }

        self.evict_expired();

        if let Some(hit) = self.inner.completed.get(&fingerprint) {
            debug!(key, "replaying cached outcome for retried request");
            return hit.result.clone();
        }

        let (tx, rx) = watch::channel(None);
        let wait_rx = match self.inner.inflight.entry(key.to_owned()) {
            Entry::Occupied(entry) => {
                if entry.get().fingerprint == fingerprint {
                    debug!(key, "joining equivalent in-flight operation");
                    entry.get().done.clone()
                } else {
                    warn!(key, "conflicting operation already in flight");
                    return Err(DriverError::Aborted(format!(
                        "a conflicting operation on {key} is already in flight"
                    )));
                }
            }
            Entry::Vacant(slot) => {
                // An identical operation may have finished between the first
                // token check and this claim: completion inserts its token
                // before releasing the volume key, so re-check here.
                if let Some(hit) = self.inner.completed.get(&fingerprint) {
                    debug!(key, "replaying outcome completed during key claim");
                    return hit.result.clone();
                }

                slot.insert(InFlight {
                    fingerprint: fingerprint.clone(),
                    done: rx.clone(),
                });

                // The operation itself runs detached: cancelling the caller
                // must not abort a backend call that may already be
                // committed remotely, and the token has to record the true
                // outcome either way.
                let inner = Arc::clone(&self.inner);
                let key = key.to_owned();
                tokio::spawn(async move {
                    let result = op.await;
                    // Transient failures are never retained: the caller's
                    // retry must reach the backend again and observe its
                    // current state, not a stale outage.
                    let transient = result.as_ref().is_err_and(|e| e.is_transient());
                    if !transient {
                        inner.completed.insert(
                            fingerprint,
                            Completed {
                                result: result.clone(),
                                expires_at: Instant::now() + inner.retention,
                            },
                        );
                    }
                    // Settle the tables before waking waiters so that a
                    // woken retry observes the cached outcome.
                    inner.inflight.remove(&key);
                    let _ = tx.send(Some(result));
                });
                rx
            }
        };

        Self::await_outcome(wait_rx).await
    }

    /// Wait for the in-flight operation to publish its outcome.
    async fn await_outcome(mut rx: watch::Receiver<Option<OperationResult>>) -> OperationResult {
        loop {
            {
                let current = rx.borrow_and_update();
                if let Some(result) = current.as_ref() {
                    return result.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(DriverError::Internal(
                    "operation completed without publishing an outcome".into(),
                ));
            }
        }
    }

    /// Drop completed tokens past their retention window.
    fn evict_expired(&self) {
        let now = Instant::now();
        self.inner.completed.retain(|_, c| c.expires_at > now);
    }

    /// Number of in-flight operations, for drain diagnostics.
    pub fn inflight_len(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Refuse new operations and wait for the in-flight ones to finish,
    /// then drop all retained tokens.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let receivers: Vec<_> = self
            .inner
            .inflight
            .iter()
            .map(|entry| entry.done.clone())
            .collect();
        for rx in receivers {
            let _ = Self::await_outcome(rx).await;
        }
        self.inner.completed.clear();
        debug!("operation guard drained");
    }
}
