//! Process-wide benchmark counters
//!
//! Everything here outlives a single session: overall receive statistics,
//! the connection-duration average and its batch count, and the number of
//! completed sessions. It is shared by reference between the event hub
//! (writer) and the orchestrator and front end (readers).

use crate::stats::duration::ConnDurationAverage;
use crate::stats::tracker::{ReceiveStats, RecvCounters, StatsReport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Counters that persist across sessions
#[derive(Debug, Default)]
pub struct BenchContext {
    stats: Mutex<ReceiveStats>,
    durations: Mutex<ConnDurationAverage>,
    connect_batches: AtomicU64,
    sessions_completed: AtomicU64,
    acceptor_registered: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl BenchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a tracker with a custom window or report cadence
    pub fn with_stats(stats: ReceiveStats) -> Self {
        Self {
            stats: Mutex::new(stats),
            ..Default::default()
        }
    }

    pub(crate) fn record_receive(&self, valid: bool) -> Option<StatsReport> {
        lock(&self.stats).on_receive(valid)
    }

    pub(crate) fn reset_session_stats(&self) {
        lock(&self.stats).on_session_reset();
    }

    /// Count one completed connect batch
    ///
    /// # Returns
    /// The new batch count
    pub(crate) fn count_connect_batch(&self) -> u64 {
        self.connect_batches.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fold a batch's connection duration into the average
    ///
    /// # Returns
    /// The new average in milliseconds
    pub(crate) fn record_connect_duration(&self, duration: Duration) -> f64 {
        let n = self.connect_batches.load(Ordering::SeqCst);
        lock(&self.durations).update(duration, n)
    }

    pub(crate) fn count_completed_session(&self) -> u64 {
        self.sessions_completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark the inbound-stream acceptor as registered
    ///
    /// # Returns
    /// true the first time, false on every later call
    pub(crate) fn claim_acceptor_registration(&self) -> bool {
        !self.acceptor_registered.swap(true, Ordering::SeqCst)
    }

    /// Undo [`Self::claim_acceptor_registration`] after a failed registration
    pub(crate) fn clear_acceptor_registration(&self) {
        self.acceptor_registered.store(false, Ordering::SeqCst);
    }

    /// Snapshot of all three receive horizons
    pub fn stats_report(&self) -> StatsReport {
        lock(&self.stats).report()
    }

    /// Process-lifetime receive counters
    pub fn overall(&self) -> RecvCounters {
        lock(&self.stats).overall()
    }

    /// Current-session receive counters
    pub fn session(&self) -> RecvCounters {
        lock(&self.stats).session()
    }

    /// Completed connect batches so far
    pub fn connect_batches(&self) -> u64 {
        self.connect_batches.load(Ordering::SeqCst)
    }

    /// Connection-duration average in milliseconds
    pub fn average_connection_ms(&self) -> f64 {
        lock(&self.durations).average_ms()
    }

    /// Number of times the average has been updated
    pub fn duration_updates(&self) -> u64 {
        lock(&self.durations).updates()
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.load(Ordering::SeqCst)
    }

    pub fn acceptor_registered(&self) -> bool {
        self.acceptor_registered.load(Ordering::SeqCst)
    }
}
