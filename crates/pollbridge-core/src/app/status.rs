use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters for one worker. Updated from concurrently running cycles.
#[derive(Debug, Default)]
pub struct WorkerStats {
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    empty_polls: AtomicU64,
    delivered: AtomicU64,
    acknowledged: AtomicU64,
    receive_failures: AtomicU64,
    callback_failures: AtomicU64,
    ack_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsView {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub empty_polls: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub receive_failures: u64,
    pub callback_failures: u64,
    pub ack_failures: u64,
}

impl WorkerStats {
    pub(crate) fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn receive_failure(&self) {
        self.receive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsView {
        WorkerStatsView {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}
