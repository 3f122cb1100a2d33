//! # Follow Dedup Cache
//!
//! A time-bounded map of follower name -> last accepted follow. The upstream
//! re-sends `new_follow` every time a viewer toggles the follow button, so the
//! classifier asks [`DedupCache::admit`] before announcing one.
//!
//! Enforcement happens at lookup time against the cooldown. The periodic
//! [`spawn_sweeper`] task is only garbage collection: it drops entries that
//! can no longer suppress anything, which bounds the map to the unique
//! followers seen within roughly one cooldown + one sweep interval.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct DedupCache {
    cooldown: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamps `username` as seen at `at`, replacing any previous stamp.
    pub fn record(&self, username: &str, at: Instant) {
        self.entries().insert(username.to_string(), at);
    }

    pub fn last_seen(&self, username: &str) -> Option<Instant> {
        self.entries().get(username).copied()
    }

    /// Check-and-stamp in one lock acquisition.
    ///
    /// Returns `false` when `username` was accepted less than one cooldown
    /// before `now`; the existing stamp is left untouched in that case.
    /// Otherwise stamps `now` and returns `true`.
    pub fn admit(&self, username: &str, now: Instant) -> bool {
        let mut entries = self.entries();
        if let Some(last) = entries.get(username) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        entries.insert(username.to_string(), now);
        true
    }

    /// Removes every entry older than the cooldown at `now`. Returns how
    /// many were removed.
    ///
    /// An entry exactly one cooldown old is kept; [`DedupCache::admit`]
    /// already lets that name through, so the next sweep takes it.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, seen| now.saturating_duration_since(*seen) <= self.cooldown);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Runs [`DedupCache::sweep`] every `every` until `shutdown` fires. The first
/// sweep happens one full interval after the call.
pub fn spawn_sweeper(
    cache: Arc<DedupCache>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Dedup sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = cache.sweep(Instant::now());
                    tracing::info!(removed, remaining = cache.len(), "Swept follow dedup cache");
                }
            }
        }
    })
}
