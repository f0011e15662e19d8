use super::ConversationSession;
use crate::config::SessionConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::observability::semantic_conventions::span;
use dashmap::DashMap;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Map entry for one conversation.
///
/// `holders` counts leases that were handed out or are waiting for the lock.
/// It is only incremented while the map shard is locked, which is what lets
/// eviction check it race-free from inside `remove_if`.
struct SessionSlot {
    session: Arc<AsyncMutex<ConversationSession>>,
    holders: AtomicUsize,
    created_at: Instant,
    last_accessed: Mutex<Instant>,
}

impl SessionSlot {
    fn new(key: &str) -> Self {
        let now = Instant::now();
        Self {
            session: Arc::new(AsyncMutex::new(ConversationSession::new(key, now))),
            holders: AtomicUsize::new(0),
            created_at: now,
            last_accessed: Mutex::new(now),
        }
    }

    fn last_accessed(&self) -> Instant {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the timestamp forward, strictly, even when the clock has not advanced.
    fn touch(&self) -> Instant {
        let mut last = self
            .last_accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        *last = if now > *last {
            now
        } else {
            *last + Duration::from_nanos(1)
        };
        *last
    }

    fn is_idle(&self) -> bool {
        self.holders.load(Ordering::SeqCst) == 0 && self.session.try_lock().is_ok()
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_accessed()) > ttl && self.is_idle()
    }
}

/// Exclusive access to one conversation session for the length of a run.
///
/// Dropping the lease releases it; [`SessionLease::release`] does the same
/// and reports the refreshed timestamp. Either way release happens exactly once.
pub struct SessionLease {
    key: String,
    created: bool,
    released: bool,
    slot: Arc<SessionSlot>,
    guard: OwnedMutexGuard<ConversationSession>,
}

impl SessionLease {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when this acquisition created the session.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.created
    }

    /// Refresh the last-accessed time and unlock.
    pub fn release(mut self) -> Instant {
        self.finish()
    }

    fn finish(&mut self) -> Instant {
        if self.released {
            return self.slot.last_accessed();
        }
        self.released = true;
        let stamp = self.slot.touch();
        self.slot.holders.fetch_sub(1, Ordering::SeqCst);
        stamp
    }
}

impl Deref for SessionLease {
    type Target = ConversationSession;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("key", &self.key)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionPoolStats {
    pub sessions: usize,
    /// Sessions with a lease out or a request waiting for one.
    pub in_use: usize,
}

/// Conversation key → session mapping with per-session locking and TTL eviction.
pub struct SessionPool {
    slots: DashMap<String, Arc<SessionSlot>>,
    ttl: Duration,
    sweep_interval: Duration,
    lock_timeout: Duration,
    max_sessions: Option<usize>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.slots.len())
            .field("ttl", &self.ttl)
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl SessionPool {
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            slots: DashMap::new(),
            ttl: config.ttl(),
            sweep_interval: config.sweep_interval(),
            lock_timeout: config.lock_timeout(),
            max_sessions: config.max_sessions,
            shutdown: CancellationToken::new(),
        }
    }

    /// Lock the session for `key`, creating it if the key is new.
    ///
    /// Concurrent calls for an unseen key create exactly one session; the
    /// others wait for its lock. Waiting longer than the configured lock
    /// timeout fails with [`HarnessError::SessionLockTimeout`].
    pub async fn acquire(&self, key: &str) -> HarnessResult<SessionLease> {
        if self.shutdown.is_cancelled() {
            return Err(HarnessError::PoolClosed);
        }

        let mut created = false;
        let slot = {
            let entry = self.slots.entry(key.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(SessionSlot::new(key))
            });
            entry.holders.fetch_add(1, Ordering::SeqCst);
            Arc::clone(entry.value())
        };

        if created {
            debug!(conversation_key = %key, "Created session");
            self.enforce_capacity(key).await;
        }

        let waited = Instant::now();
        let guard =
            match tokio::time::timeout(self.lock_timeout, Arc::clone(&slot.session).lock_owned())
                .await
            {
                Ok(guard) => guard,
                Err(_) => {
                    slot.holders.fetch_sub(1, Ordering::SeqCst);
                    let waited_ms = u64::try_from(waited.elapsed().as_millis()).unwrap_or(u64::MAX);
                    warn!(conversation_key = %key, waited_ms, "Timed out waiting for session lock");
                    return Err(HarnessError::SessionLockTimeout {
                        conversation_key: key.to_string(),
                        waited_ms,
                    });
                }
            };

        let mut lease = SessionLease {
            key: key.to_string(),
            created,
            released: false,
            slot,
            guard,
        };

        // Shutdown may have drained the pool while we waited.
        if self.shutdown.is_cancelled() {
            return Err(HarnessError::PoolClosed);
        }

        lease.mark_accessed();
        Ok(lease)
    }

    /// Same as [`SessionLease::release`].
    pub fn release(&self, lease: SessionLease) -> Instant {
        lease.release()
    }

    /// Evict every idle session whose last access is older than the TTL and
    /// close its runtime client. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.is_expired(now, self.ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::new();
        for key in candidates {
            // Re-checked under the shard lock: a lease may have been taken since.
            if let Some(removed) = self
                .slots
                .remove_if(&key, |_, slot| slot.is_expired(now, self.ttl))
            {
                evicted.push(removed);
            }
        }

        let count = evicted.len();
        for (key, slot) in evicted {
            close_slot(&key, &slot, "expired").await;
        }
        if count > 0 {
            info!(evicted = count, remaining = self.slots.len(), "Session sweep evicted idle sessions");
        }
        count
    }

    /// Evict least-recently-used idle sessions until the cap holds again.
    async fn enforce_capacity(&self, keep: &str) {
        let Some(max) = self.max_sessions else {
            return;
        };
        let excess = self.slots.len().saturating_sub(max);
        if excess == 0 {
            return;
        }

        let mut idle: Vec<(String, Instant)> = self
            .slots
            .iter()
            .filter(|entry| entry.key() != keep && entry.is_idle())
            .map(|entry| (entry.key().clone(), entry.last_accessed()))
            .collect();
        idle.sort_by_key(|(_, last)| *last);

        let mut evicted = Vec::new();
        for (key, _) in idle {
            if evicted.len() == excess {
                break;
            }
            if let Some(removed) = self.slots.remove_if(&key, |_, slot| slot.is_idle()) {
                evicted.push(removed);
            }
        }

        if evicted.len() < excess {
            warn!(
                sessions = self.slots.len(),
                max_sessions = max,
                "Session cap exceeded and no idle session left to evict"
            );
        }
        for (key, slot) in evicted {
            close_slot(&key, &slot, "capacity").await;
        }
    }

    /// Remove an idle session now. Returns false when the key is unknown or
    /// the session is in use.
    pub async fn remove(&self, key: &str) -> bool {
        match self.slots.remove_if(key, |_, slot| slot.is_idle()) {
            Some((key, slot)) => {
                close_slot(&key, &slot, "removed").await;
                true
            }
            None => false,
        }
    }

    /// Run [`sweep`](Self::sweep) every sweep interval until shutdown or until
    /// the pool is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        let stop = self.shutdown.child_token();
        let interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        pool.sweep()
                            .instrument(tracing::debug_span!(span::SESSION_SWEEP))
                            .await;
                    }
                }
            }
            debug!("Session sweeper stopped");
        })
    }

    /// Stop the sweeper, refuse new acquisitions, and close every session.
    ///
    /// Sessions still in use are closed once their current lease is released.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let keys: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        let mut closed = 0;
        for key in keys {
            if let Some((key, slot)) = self.slots.remove(&key) {
                close_slot(&key, &slot, "shutdown").await;
                closed += 1;
            }
        }
        info!(closed, "Session pool shut down");
        closed
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    #[must_use]
    pub fn last_accessed(&self, key: &str) -> Option<Instant> {
        self.slots.get(key).map(|slot| slot.last_accessed())
    }

    #[must_use]
    pub fn created_at(&self, key: &str) -> Option<Instant> {
        self.slots.get(key).map(|slot| slot.created_at)
    }

    #[must_use]
    pub fn stats(&self) -> SessionPoolStats {
        let in_use = self
            .slots
            .iter()
            .filter(|entry| entry.holders.load(Ordering::SeqCst) > 0)
            .count();
        SessionPoolStats {
            sessions: self.slots.len(),
            in_use,
        }
    }

    /// Copy of a session's exchanges. Waits if the session is in use.
    pub async fn history(&self, key: &str) -> Option<Vec<super::Exchange>> {
        let session = self.slots.get(key).map(|slot| Arc::clone(&slot.session))?;
        let guard = session.lock().await;
        Some(guard.history().to_vec())
    }
}

async fn close_slot(key: &str, slot: &SessionSlot, reason: &'static str) {
    let mut session = slot.session.lock().await;
    session.close_client().await;
    info!(
        conversation_key = %key,
        reason,
        exchanges = session.history().len(),
        "Evicted session"
    );
}
