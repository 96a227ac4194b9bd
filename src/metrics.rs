//! Fire-and-forget operation counters and periodic depth snapshots.
//!
//! Counters are lock-free atomics incremented on the hot paths; the reporter
//! task periodically logs a snapshot together with per-state message counts
//! and the oldest message age, for consumption by an external observability
//! system.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::state::SqsState;

#[derive(Debug, Default)]
pub struct ServiceMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_deleted: AtomicU64,
    empty_receives: AtomicU64,
    messages_redriven: AtomicU64,
    queues_purged: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_deleted: u64,
    pub empty_receives: u64,
    pub messages_redriven: u64,
    pub queues_purged: u64,
}

impl ServiceMetrics {
    pub fn record_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_received(&self, n: u64) {
        self.messages_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_deleted(&self, n: u64) {
        self.messages_deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_empty_receive(&self) {
        self.empty_receives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redriven(&self, n: u64) {
        self.messages_redriven.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_purge(&self) {
        self.queues_purged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_deleted: self.messages_deleted.load(Ordering::Relaxed),
            empty_receives: self.empty_receives.load(Ordering::Relaxed),
            messages_redriven: self.messages_redriven.load(Ordering::Relaxed),
            queues_purged: self.queues_purged.load(Ordering::Relaxed),
        }
    }
}

/// Per-state message counts across all queues, plus the age of the oldest
/// stored message.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DepthSnapshot {
    pub queues: u64,
    pub delayed: u64,
    pub available: u64,
    pub in_flight: u64,
    pub oldest_message_age_secs: u64,
}

/// Logs counter and depth snapshots every `interval` until the process
/// exits.
pub async fn run_reporter(state: Arc<SqsState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately; skip it
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let counters = state.metrics().snapshot();
        let depth = state.depth_snapshot().await;
        info!(
            sent = counters.messages_sent,
            received = counters.messages_received,
            deleted = counters.messages_deleted,
            empty_receives = counters.empty_receives,
            redriven = counters.messages_redriven,
            purged = counters.queues_purged,
            queues = depth.queues,
            delayed = depth.delayed,
            available = depth.available,
            in_flight = depth.in_flight,
            oldest_message_age_secs = depth.oldest_message_age_secs,
            "queue metrics"
        );
    }
}
