//! Suppresses repeated webhook deliveries (the platform delivers at least once).
//!
//! Entries are evicted by a periodic sweep only, so a key stays a duplicate
//! until the first sweep after it is older than the TTL.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::debug;

use crate::webhook::ChatMessageEvent;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Cache key for an event: `id`, else `message_id` (empty ids count as
/// missing), else a composite of
/// content, timestamp (or arrival time) and broadcaster.
///
/// Events without id or timestamp get a fresh arrival time per delivery and
/// are therefore never deduplicated.
pub fn dedup_key(event: &ChatMessageEvent, arrival_ms: i64) -> String {
    if let Some(id) = [&event.id, &event.message_id]
        .into_iter()
        .flatten()
        .find(|id| !id.is_empty())
    {
        return id.clone();
    }
    let ts = event
        .timestamp
        .clone()
        .unwrap_or_else(|| arrival_ms.to_string());
    let broadcaster = event
        .broadcaster_id()
        .map(|u| u.0)
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}_{}_{}", event.content(), ts, broadcaster)
}

pub struct WebhookDeduplicator {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl Default for WebhookDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl WebhookDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// `true` when the event is new and should be processed; marks it seen.
    pub fn check_and_mark(&self, event: &ChatMessageEvent) -> bool {
        self.check_and_mark_at(event, Instant::now(), Utc::now().timestamp_millis())
    }

    pub fn check_and_mark_at(&self, event: &ChatMessageEvent, now: Instant, arrival_ms: i64) -> bool {
        let key = dedup_key(event, arrival_ms);
        let mut seen = self.seen();
        if seen.contains_key(&key) {
            debug!(%key, "ignoring duplicate message");
            return false;
        }
        seen.insert(key, now);
        true
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut seen = self.seen();
        let before = seen.len();
        seen.retain(|_, first_seen| now.saturating_duration_since(*first_seen) <= self.ttl);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn seen(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}
