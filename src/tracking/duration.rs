//! Live "active for" timers per opportunity.
//!
//! Each tracked opportunity keeps a start timestamp derived from the duration
//! the feed reported for it. Subscribers receive a formatted label right away
//! and then once per tick from a per-id task that only runs while the id has
//! subscribers. The start timestamp outlives its subscribers and is only
//! dropped by [`DurationTracker::purge_missing`] or [`DurationTracker::reset_all`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};

/// Below this elapsed time an opportunity counts as new.
pub const NEW_THRESHOLD_MS: u64 = 10_000;

/// Default period between subscriber notifications.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

static UNIT_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(second|minute|hour|s|m|h)").expect("valid regex"));
static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").expect("valid regex"));

/// Parse a reported duration ("34 seconds", "5m", "1 hour", "34") into milliseconds.
///
/// Anything unparseable is zero.
pub fn parse_reported_duration(raw: &str) -> u64 {
    if let Some(caps) = UNIT_DURATION.captures(raw) {
        let Ok(value) = caps[1].parse::<u64>() else {
            return 0;
        };
        let unit_ms = match caps[2].chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('s') => SECOND_MS,
            Some('m') => MINUTE_MS,
            Some('h') => HOUR_MS,
            _ => 0,
        };
        return value.saturating_mul(unit_ms);
    }

    BARE_NUMBER
        .captures(raw)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(SECOND_MS))
        .unwrap_or(0)
}

/// Format elapsed time using only its largest unit: `Active for 59s`, `2m`, `1h`.
pub fn format_elapsed(elapsed_ms: u64) -> String {
    if elapsed_ms < MINUTE_MS {
        format!("Active for {}s", elapsed_ms / SECOND_MS)
    } else if elapsed_ms < HOUR_MS {
        format!("Active for {}m", elapsed_ms / MINUTE_MS)
    } else {
        format!("Active for {}h", elapsed_ms / HOUR_MS)
    }
}

/// Subscriber callback: `(label, elapsed_ms)`.
pub type DurationCallback = Arc<dyn Fn(&str, u64) + Send + Sync>;

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// One-shot duration reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurationSnapshot {
    /// Formatted label.
    pub label: String,
    /// Elapsed milliseconds.
    pub elapsed_ms: u64,
    /// Whether the opportunity appeared less than ten seconds ago.
    pub is_new: bool,
}

impl DurationSnapshot {
    fn from_elapsed(elapsed_ms: u64) -> Self {
        Self {
            label: format_elapsed(elapsed_ms),
            elapsed_ms,
            is_new: elapsed_ms < NEW_THRESHOLD_MS,
        }
    }
}

/// Tracker bookkeeping counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Ids with a start timestamp.
    pub tracked: usize,
    /// Ids with a running tick task.
    pub active_timers: usize,
    /// Total subscriptions.
    pub subscribers: usize,
}

struct TrackerEntry {
    start_ms: i64,
    subscribers: Vec<(SubscriptionId, DurationCallback)>,
    ticker: Option<JoinHandle<()>>,
}

impl TrackerEntry {
    fn stop_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

struct Inner {
    entries: DashMap<String, TrackerEntry>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    next_subscription: AtomicU64,
}

impl Inner {
    fn elapsed_since(&self, start_ms: i64) -> u64 {
        self.clock.now_ms().saturating_sub(start_ms).max(0) as u64
    }
}

/// Per-opportunity elapsed-time tracker. Cloning shares the same state.
#[derive(Clone)]
pub struct DurationTracker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DurationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurationTracker")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for DurationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DurationTracker {
    /// Tracker on the system clock ticking every second.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_TICK)
    }

    /// Tracker on a custom clock and tick period.
    pub fn with_clock(clock: Arc<dyn Clock>, tick: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                clock,
                tick,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// (Re)seed `id` from its reported duration.
    ///
    /// Re-seeding replaces the start timestamp; a smaller report moves the
    /// start forward.
    pub fn track(&self, id: &str, reported_duration: &str) {
        let elapsed = parse_reported_duration(reported_duration);
        let start_ms = self
            .inner
            .clock
            .now_ms()
            .saturating_sub(i64::try_from(elapsed).unwrap_or(i64::MAX));

        self.inner
            .entries
            .entry(id.to_string())
            .and_modify(|entry| entry.start_ms = start_ms)
            .or_insert_with(|| TrackerEntry {
                start_ms,
                subscribers: Vec::new(),
                ticker: None,
            });
    }

    /// Seed every `(id, reported_duration)` pair.
    pub fn sync_batch<'a, I>(&self, batch: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut count = 0usize;
        for (id, reported) in batch {
            self.track(id, reported);
            count += 1;
        }
        debug!(count, "Synced opportunity durations");
    }

    /// Subscribe to `id`. The callback fires immediately and then every tick.
    ///
    /// Returns `None` when `id` is not tracked.
    pub fn subscribe<F>(&self, id: &str, callback: F) -> Option<Subscription>
    where
        F: Fn(&str, u64) + Send + Sync + 'static,
    {
        let callback: DurationCallback = Arc::new(callback);
        let subscription =
            SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));

        let elapsed = {
            let mut entry = self.inner.entries.get_mut(id)?;
            entry.subscribers.push((subscription, Arc::clone(&callback)));
            if entry.ticker.is_none() {
                entry.ticker = self.spawn_ticker(id);
            }
            self.inner.elapsed_since(entry.start_ms)
        };

        callback(&format_elapsed(elapsed), elapsed);

        Some(Subscription {
            tracker: self.clone(),
            id: id.to_string(),
            subscription,
            active: true,
        })
    }

    /// Remove one subscription. The tick task stops with the last subscriber;
    /// the start timestamp is kept.
    pub fn unsubscribe(&self, id: &str, subscription: SubscriptionId) -> bool {
        let Some(mut entry) = self.inner.entries.get_mut(id) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|(sid, _)| *sid != subscription);
        let removed = entry.subscribers.len() != before;
        if entry.subscribers.is_empty() {
            entry.stop_ticker();
        }
        removed
    }

    /// Current reading for `id`; unknown ids read as brand new.
    pub fn peek(&self, id: &str) -> DurationSnapshot {
        DurationSnapshot::from_elapsed(self.elapsed_ms(id).unwrap_or(0))
    }

    /// Elapsed milliseconds for a tracked id.
    pub fn elapsed_ms(&self, id: &str) -> Option<u64> {
        self.inner
            .entries
            .get(id)
            .map(|entry| self.inner.elapsed_since(entry.start_ms))
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.entries.contains_key(id)
    }

    /// Drop every id not in `current_ids`, stopping its tick task.
    pub fn purge_missing(&self, current_ids: &HashSet<String>) -> usize {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|id, entry| {
            if current_ids.contains(id) {
                true
            } else {
                entry.stop_ticker();
                false
            }
        });
        let purged = before.saturating_sub(self.inner.entries.len());
        if purged > 0 {
            debug!(purged, "Purged vanished opportunities");
        }
        purged
    }

    /// Stop every tick task and forget every id.
    pub fn reset_all(&self) {
        self.inner.entries.retain(|_, entry| {
            entry.stop_ticker();
            false
        });
    }

    /// Bookkeeping counts.
    pub fn stats(&self) -> TrackerStats {
        self.inner
            .entries
            .iter()
            .fold(TrackerStats::default(), |mut stats, entry| {
                stats.tracked += 1;
                stats.subscribers += entry.subscribers.len();
                if entry.ticker.is_some() {
                    stats.active_timers += 1;
                }
                stats
            })
    }

    fn spawn_ticker(&self, id: &str) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(id, "No async runtime, live duration updates disabled");
            return None;
        };

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.tick;
        let id = id.to_string();

        Some(runtime.spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };

                let (elapsed, subscribers) = match inner.entries.get(&id) {
                    Some(entry) => (
                        inner.elapsed_since(entry.start_ms),
                        entry
                            .subscribers
                            .iter()
                            .map(|(_, cb)| Arc::clone(cb))
                            .collect::<Vec<_>>(),
                    ),
                    None => break,
                };

                // Callbacks run without holding the map so they may re-seed.
                let label = format_elapsed(elapsed);
                for callback in subscribers {
                    callback(&label, elapsed);
                }
            }
        }))
    }
}

/// Handle to a live subscription; unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    tracker: DurationTracker,
    id: String,
    subscription: SubscriptionId,
    active: bool,
}

impl Subscription {
    /// Subscription id, usable with [`DurationTracker::unsubscribe`].
    pub fn id(&self) -> SubscriptionId {
        self.subscription
    }

    /// Opportunity this subscription follows.
    pub fn opportunity_id(&self) -> &str {
        &self.id
    }

    /// Unsubscribe now.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.tracker.unsubscribe(&self.id, self.subscription);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subscription", &self.subscription)
            .finish()
    }
}
