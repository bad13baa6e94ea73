//! Fixed-window request counter keyed by `(endpoint, identifier)`.
//!
//! Each key counts requests inside a window that opens on the first request
//! and closes `window` later. Because windows do not slide, a caller can get
//! up to twice the limit through by bursting at the end of one window and
//! again at the start of the next. That is the price of keeping a single
//! counter per key.
//!
//! Counters live in memory only; a restart forgets them, and separate
//! processes do not share them.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use crate::client::UNKNOWN_CLIENT;
use crate::metrics::ACTIVE_ENTRIES;
use crate::presets::{Policy, Preset, PresetTable};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

type Key = (String, String);

// Blank identifiers land in the shared unknown bucket
fn key(identifier: &str, endpoint: &str) -> Key {
    let identifier = if identifier.is_empty() {
        UNKNOWN_CLIENT
    } else {
        identifier
    };
    (endpoint.to_string(), identifier.to_string())
}

// Rate limit entry - one per (endpoint, identifier)
#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    reset_at: Instant,
}

impl RateLimitEntry {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now + window,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Instant,
}

impl RateLimitDecision {
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// Whole seconds until the window resets, rounded up and never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let wait = self.retry_after();
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        secs.max(1)
    }

    /// Wall-clock time at which the window resets.
    pub fn reset_at_utc(&self) -> DateTime<Utc> {
        let wait = chrono::Duration::from_std(self.retry_after()).unwrap_or(chrono::Duration::zero());
        Utc::now() + wait
    }
}

struct Sweeper {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// In-process rate limiter shared by every request handler.
pub struct RateLimiter {
    entries: Arc<DashMap<Key, RateLimitEntry>>,
    presets: PresetTable,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(PresetTable::default())
    }
}

impl RateLimiter {
    pub fn new(presets: PresetTable) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            presets,
            sweeper: Mutex::new(None),
        }
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    /// Count one request for `(endpoint, identifier)` and decide whether it
    /// may proceed.
    ///
    /// The entry's shard stays write-locked from lookup to increment, so
    /// concurrent callers on the same key never admit more than
    /// `policy.limit()` requests per window.
    pub fn check(&self, identifier: &str, endpoint: &str, policy: Policy) -> RateLimitDecision {
        let now = Instant::now();
        let limit = policy.limit();

        let mut entry = self
            .entries
            .entry(key(identifier, endpoint))
            .or_insert_with(|| RateLimitEntry::fresh(now, policy.window()));

        // window expired..? start over
        if entry.is_expired(now) {
            *entry = RateLimitEntry::fresh(now, policy.window());
        }

        entry.count = entry.count.saturating_add(1);

        RateLimitDecision {
            allowed: entry.count <= limit,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.reset_at,
        }
    }

    pub fn check_preset(&self, identifier: &str, preset: Preset) -> RateLimitDecision {
        self.check(identifier, preset.name(), self.presets.policy(preset))
    }

    /// Forget the counter for `(endpoint, identifier)`; the next check opens
    /// a new window. Returns whether there was anything to forget.
    pub fn reject(&self, identifier: &str, endpoint: &str) -> bool {
        self.entries
            .remove(&key(identifier, endpoint))
            .is_some()
    }

    /// Remove every entry whose window has already closed.
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`sweep`](Self::sweep) every `every` on a background task until
    /// [`stop`](Self::stop) is called or the limiter is dropped. Restarting
    /// replaces any running sweeper.
    pub fn start_sweeper(&self, every: Duration) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let entries = Arc::clone(&self.entries);
        let first_tick = Instant::now() + every;
        let handle = tokio::spawn(sweep_loop(entries, first_tick, every, shutdown_rx));

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Sweeper { shutdown_tx, handle });
        if let Some(previous) = previous {
            let _ = previous.shutdown_tx.send(());
        }
    }

    /// Stop the background sweeper. Returns the task handle so callers can
    /// wait for it to finish, or `None` if no sweeper was running.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let _ = sweeper.shutdown_tx.send(());
        Some(sweeper.handle)
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// Collect first, then remove one entry at a time. The conditional remove
// re-checks expiry so a key refreshed in between is kept. Expiry is
// `now >= reset_at`, the same boundary `check` uses to open a new window, so
// an entry sitting exactly at its reset instant is evicted.
fn sweep_expired(entries: &DashMap<Key, RateLimitEntry>) -> usize {
    let now = Instant::now();
    let expired: Vec<Key> = entries
        .iter()
        .filter(|entry| entry.value().is_expired(now))
        .map(|entry| entry.key().clone())
        .collect();

    expired
        .iter()
        .filter(|key| entries.remove_if(*key, |_, e| e.is_expired(now)).is_some())
        .count()
}

async fn sweep_loop(
    entries: Arc<DashMap<Key, RateLimitEntry>>,
    first_tick: Instant,
    every: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(first_tick, every);

    info!("Rate limit sweeper started (interval: {:?})", every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = sweep_expired(&entries);
                ACTIVE_ENTRIES.set(entries.len() as f64);
                debug!(
                    removed_entries = removed,
                    remaining_entries = entries.len(),
                    "Rate limit sweep completed"
                );
            }
            _ = &mut shutdown_rx => break,
        }
    }

    info!("Rate limit sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const HOUR: Duration = Duration::from_secs(3600);

    fn policy(limit: u32, window: Duration) -> Policy {
        Policy::new(limit, window).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_preset_allows_ten_then_denies() {
        let limiter = RateLimiter::default();

        for expected in (0..10).rev() {
            let decision = limiter.check_preset("1.2.3.4", Preset::Strict);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let eleventh = limiter.check_preset("1.2.3.4", Preset::Strict);
        assert!(!eleventh.allowed);
        assert_eq!(eleventh.remaining, 0);
        assert_eq!(eleventh.limit, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signup_window_expires_after_an_hour() {
        let limiter = RateLimiter::default();

        for _ in 0..3 {
            assert!(limiter.check_preset("5.6.7.8", Preset::Signup).allowed);
        }

        advance(Duration::from_secs(59 * 60)).await;
        assert!(!limiter.check_preset("5.6.7.8", Preset::Signup).allowed);

        advance(Duration::from_secs(2 * 60)).await;
        let fresh = limiter.check_preset("5.6.7.8", Preset::Signup);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_does_not_carry_partial_count() {
        let limiter = RateLimiter::default();
        let p = policy(5, Duration::from_secs(10));

        for _ in 0..8 {
            limiter.check("a", "ep", p);
        }
        advance(Duration::from_secs(10)).await;

        let decision = limiter.check("a", "ep", p);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_never_negative() {
        let limiter = RateLimiter::default();
        let p = policy(2, HOUR);

        for _ in 0..20 {
            let decision = limiter.check("a", "ep", p);
            assert!(decision.remaining <= 2);
        }
        assert_eq!(limiter.check("a", "ep", p).remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifiers_do_not_interfere() {
        let limiter = RateLimiter::default();
        let p = policy(1, HOUR);

        assert!(limiter.check("a", "ep", p).allowed);
        assert!(!limiter.check("a", "ep", p).allowed);
        assert!(limiter.check("b", "ep", p).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_do_not_interfere() {
        let limiter = RateLimiter::default();
        let p = policy(1, HOUR);

        assert!(limiter.check("a", "signup", p).allowed);
        assert!(!limiter.check("a", "signup", p).allowed);
        assert!(limiter.check("a", "strict", p).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_identifier_uses_unknown_bucket() {
        let limiter = RateLimiter::default();
        let p = policy(1, HOUR);

        assert!(limiter.check("", "ep", p).allowed);
        assert!(!limiter.check(UNKNOWN_CLIENT, "ep", p).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_starts_a_fresh_window() {
        let limiter = RateLimiter::default();
        let p = policy(1, HOUR);

        limiter.check("a", "ep", p);
        assert!(!limiter.check("a", "ep", p).allowed);

        assert!(limiter.reject("a", "ep"));
        assert!(!limiter.reject("a", "ep"));
        assert!(limiter.check("a", "ep", p).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_clears_unknown_bucket_for_blank_identifier() {
        let limiter = RateLimiter::default();
        let p = policy(1, HOUR);

        assert!(limiter.check("", "ep", p).allowed);
        assert!(!limiter.check("", "ep", p).allowed);

        assert!(limiter.reject("", "ep"));
        assert!(limiter.check("", "ep", p).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_entry_at_reset_instant() {
        let limiter = RateLimiter::default();
        limiter.check("a", "ep", policy(1, Duration::from_secs(60)));

        advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.sweep(), 1);
        assert!(limiter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired_entries() {
        let limiter = RateLimiter::default();

        limiter.check("short", "ep", policy(1, Duration::from_secs(60)));
        limiter.check("long", "ep", policy(1, HOUR));
        advance(Duration::from_secs(61)).await;

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.len(), 1);

        // the surviving entry keeps its count
        assert!(!limiter.check("long", "ep", policy(1, HOUR)).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_tracks_window() {
        let limiter = RateLimiter::default();
        let p = policy(1, Duration::from_secs(90));

        limiter.check("a", "ep", p);
        advance(Duration::from_millis(30_500)).await;

        let denied = limiter.check("a", "ep", p);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_at_least_one_second() {
        let limiter = RateLimiter::default();
        let p = policy(1, Duration::from_secs(1));

        let decision = limiter.check("a", "ep", p);
        advance(Duration::from_secs(5)).await;

        assert_eq!(decision.retry_after(), Duration::ZERO);
        assert_eq!(decision.retry_after_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_stopped() {
        let limiter = RateLimiter::default();
        limiter.check("a", "ep", policy(1, Duration::from_secs(30)));

        limiter.start_sweeper(Duration::from_secs(60));
        assert!(limiter.is_sweeping());

        advance(Duration::from_secs(61)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(limiter.is_empty());

        let handle = limiter.stop().expect("sweeper was running");
        handle.await.unwrap();
        assert!(!limiter.is_sweeping());
        assert!(limiter.stop().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reachable_after_poisoned_lock() {
        let limiter = Arc::new(RateLimiter::default());

        let poisoner = Arc::clone(&limiter);
        let _ = std::thread::spawn(move || {
            let _slot = poisoner.sweeper.lock().unwrap();
            panic!("poison the sweeper slot");
        })
        .join();
        assert!(limiter.sweeper.is_poisoned());

        limiter.start_sweeper(Duration::from_secs(60));
        assert!(limiter.is_sweeping());

        let handle = limiter.stop().expect("sweeper was registered");
        handle.await.unwrap();
        assert!(!limiter.is_sweeping());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_admit_at_most_limit() {
        let limiter = Arc::new(RateLimiter::default());
        let p = policy(50, HOUR);

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check("shared", "ep", p).allowed })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }
}
