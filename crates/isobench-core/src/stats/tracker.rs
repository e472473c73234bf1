//! Valid/lost classification counters with a sliding window
//!
//! Every received packet carries a validity flag from the transport. The
//! tracker counts them overall, per session, and over the most recent
//! [`RECENT_WINDOW_SIZE`] packets, and produces a [`StatsReport`] every
//! [`REPORT_INTERVAL`] packets.

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use std::fmt;

/// Number of most recent classifications kept for the window metric
pub const RECENT_WINDOW_SIZE: usize = 1000;

/// Emit a report every N overall observations
pub const REPORT_INTERVAL: u64 = 100;

/// Valid/lost counter pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvCounters {
    /// Packets received with the valid flag set
    pub valid: u64,
    /// Packets reported lost or invalid
    pub lost: u64,
}

impl RecvCounters {
    /// Count one classification
    pub fn record(&mut self, valid: bool) {
        if valid {
            self.valid += 1;
        } else {
            self.lost += 1;
        }
    }

    /// Total classifications observed
    pub fn total(&self) -> u64 {
        self.valid + self.lost
    }

    /// Percentage of valid packets (0.0 when nothing was observed)
    pub fn percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.valid as f64 * 100.0 / total as f64
    }
}

impl fmt::Display for RecvCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Received {}/{} ({:.2}%) - Total packets lost {}",
            self.valid,
            self.total(),
            self.percentage(),
            self.lost
        )
    }
}

/// Fixed-capacity window of the most recent classifications
///
/// Overwrites the oldest entry once full. Only filled slots are ever
/// classified, so a window with `n < capacity` entries reports exactly `n`.
pub struct RecentWindow {
    ring: HeapRb<bool>,
    capacity: usize,
}

impl RecentWindow {
    /// Create an empty window
    ///
    /// # Arguments
    /// * `capacity` - Number of slots (clamped to at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: HeapRb::new(capacity),
            capacity,
        }
    }

    /// Push a classification, dropping the oldest when full
    pub fn push(&mut self, valid: bool) {
        let _ = self.ring.push_overwrite(valid);
    }

    /// Number of filled slots: `min(total pushed, capacity)`
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    /// Whether nothing has been pushed yet
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Classify the filled slots
    pub fn counters(&self) -> RecvCounters {
        let mut counters = RecvCounters::default();
        for &valid in self.ring.iter() {
            counters.record(valid);
        }
        counters
    }
}

impl fmt::Debug for RecentWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecentWindow")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Snapshot emitted every [`REPORT_INTERVAL`] observations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    /// Overall observations at the time of the report
    pub total: u64,
    /// Process-lifetime counters
    pub overall: RecvCounters,
    /// Current-session counters
    pub session: RecvCounters,
    /// Counters over the filled part of the recent window
    pub recent: RecvCounters,
    /// Number of entries the recent counters cover
    pub recent_len: usize,
}

/// Receive-side statistics tracker
///
/// Written only from the event path; readers take snapshots.
#[derive(Debug)]
pub struct ReceiveStats {
    overall: RecvCounters,
    session: RecvCounters,
    recent: RecentWindow,
    report_every: u64,
}

impl ReceiveStats {
    /// Create a tracker with the standard window size and report cadence
    pub fn new() -> Self {
        Self::with_window(RECENT_WINDOW_SIZE, REPORT_INTERVAL)
    }

    /// Create a tracker with a custom window size and report cadence
    pub fn with_window(window: usize, report_every: u64) -> Self {
        Self {
            overall: RecvCounters::default(),
            session: RecvCounters::default(),
            recent: RecentWindow::new(window),
            report_every: report_every.max(1),
        }
    }

    /// Record one received packet
    ///
    /// # Returns
    /// A report when the overall total reaches a multiple of the report interval
    pub fn on_receive(&mut self, valid: bool) -> Option<StatsReport> {
        self.overall.record(valid);
        self.session.record(valid);
        self.recent.push(valid);

        let total = self.overall.total();
        if total % self.report_every == 0 {
            Some(self.report())
        } else {
            None
        }
    }

    /// Clear the current-session counters
    ///
    /// Overall counters and the recent window persist across sessions.
    pub fn on_session_reset(&mut self) {
        self.session = RecvCounters::default();
    }

    /// Build a report from the current state
    pub fn report(&self) -> StatsReport {
        StatsReport {
            total: self.overall.total(),
            overall: self.overall,
            session: self.session,
            recent: self.recent.counters(),
            recent_len: self.recent.len(),
        }
    }

    /// Process-lifetime counters
    pub fn overall(&self) -> RecvCounters {
        self.overall
    }

    /// Current-session counters
    pub fn session(&self) -> RecvCounters {
        self.session
    }

    /// Counters over the recent window
    pub fn recent(&self) -> RecvCounters {
        self.recent.counters()
    }

    /// The recent window itself
    pub fn window(&self) -> &RecentWindow {
        &self.recent
    }
}

impl Default for ReceiveStats {
    fn default() -> Self {
        Self::new()
    }
}
