//! Periodic payload transmission
//!
//! While a session is `Active` a tokio task ticks at the SDU interval minus a
//! fixed skew. Each tick takes one buffer per connected stream, fills it with
//! the transmit pattern and submits it. Running out of buffers is expected
//! when the transport holds on to them: the rest of the tick is skipped and
//! the schedule keeps going.

use crate::link::buf::{PayloadPool, PoolExhausted};
use crate::link::events::EventHub;
use crate::link::transport::IsoTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Subtracted from the SDU interval so ticks never fall behind the radio
pub const TICK_SKEW: Duration = Duration::from_micros(100);

/// Log send progress every N successful submissions
pub const SEND_LOG_INTERVAL: u64 = 100;

/// Default number of payload buffers
pub const DEFAULT_PAYLOAD_BUFFERS: usize = 1;

/// Tick period for a given SDU interval
pub fn tick_period(interval_us: u32) -> Duration {
    Duration::from_micros(interval_us as u64)
        .saturating_sub(TICK_SKEW)
        .max(Duration::from_micros(1))
}

/// What happened during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every connected stream got a payload
    Sent(usize),
    /// Ran out of buffers after `sent` submissions
    Exhausted { sent: usize },
    /// The transport refused a payload after `sent` submissions
    Rejected { sent: usize },
}

/// Counters shared between the task and its handle
#[derive(Debug, Default)]
struct TxCounters {
    sent: AtomicU64,
    ticks: AtomicU64,
    exhausted: AtomicU64,
    rejected: AtomicU64,
}

/// Tick body, owned by the task
pub(crate) struct TxCore {
    transport: Arc<dyn IsoTransport>,
    hub: Arc<EventHub>,
    pool: PayloadPool,
    sdu: usize,
    counters: Arc<TxCounters>,
}

impl TxCore {
    pub(crate) fn tick(&mut self) -> TickOutcome {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let streams = self.hub.connected_streams();
        // All payloads of one tick carry the same sequence value
        let seq = self.counters.sent.load(Ordering::Relaxed) as u32;
        let mut sent = 0;

        for stream in streams {
            let mut buf = match self.pool.try_acquire() {
                Ok(buf) => buf,
                Err(PoolExhausted { capacity }) => {
                    error!(stream = %stream, capacity, "Could not allocate payload buffer");
                    self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                    return TickOutcome::Exhausted { sent };
                }
            };
            buf.fill_pattern(seq, self.sdu);

            if let Err(e) = self.transport.send(stream, buf) {
                error!(stream = %stream, "Unable to send payload: {}", e);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return TickOutcome::Rejected { sent };
            }

            sent += 1;
            let total = self.counters.sent.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_multiple_of(SEND_LOG_INTERVAL) {
                info!("Sending value {}", total);
            }
        }

        TickOutcome::Sent(sent)
    }
}

/// Handle to the running transmit task
pub struct TransmitScheduler {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    counters: Arc<TxCounters>,
    period: Duration,
}

impl TransmitScheduler {
    /// Spawn the transmit task on the current runtime
    ///
    /// # Arguments
    /// * `transport` - Where payloads are submitted
    /// * `hub` - Source of the connected-stream set
    /// * `pool` - Payload buffers
    /// * `interval_us` - SDU interval of the send direction
    /// * `sdu` - Payload size in bytes
    pub fn start(
        transport: Arc<dyn IsoTransport>,
        hub: Arc<EventHub>,
        pool: PayloadPool,
        interval_us: u32,
        sdu: u16,
    ) -> Self {
        let counters = Arc::new(TxCounters::default());
        let period = tick_period(interval_us);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let mut core = TxCore {
            transport,
            hub,
            pool,
            sdu: sdu as usize,
            counters: Arc::clone(&counters),
        };

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        core.tick();
                    }
                }
            }
        });

        debug!(period_us = period.as_micros() as u64, sdu, "Transmit scheduler started");

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
            counters,
            period,
        }
    }

    /// Stop the task and wait for it to exit
    ///
    /// A tick already running finishes first. Calling this twice is harmless.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Transmit task ended abnormally: {}", e);
            }
            debug!(sent = self.sent(), "Transmit scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Payloads successfully submitted
    pub fn sent(&self) -> u64 {
        self.counters.sent.load(Ordering::Relaxed)
    }

    /// Ticks executed
    pub fn ticks(&self) -> u64 {
        self.counters.ticks.load(Ordering::Relaxed)
    }

    /// Ticks cut short by buffer exhaustion
    pub fn exhausted_ticks(&self) -> u64 {
        self.counters.exhausted.load(Ordering::Relaxed)
    }

    /// Ticks cut short by a rejected submission
    pub fn rejected_ticks(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for TransmitScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::qos::{BenchConfig, TransportLimits};
    use crate::link::buf::PayloadBuf;
    use crate::link::events::TransportEvent;
    use crate::link::transport::{LinkId, PeerAddr, StreamId, TransportError};
    use crate::session::context::BenchContext;
    use std::sync::Mutex;

    /// Records payloads and keeps them until told to release
    #[derive(Default)]
    struct HoldingTransport {
        held: Mutex<Vec<(StreamId, PayloadBuf)>>,
        reject: Mutex<bool>,
    }

    impl HoldingTransport {
        fn release(&self) -> Vec<(StreamId, Option<u32>, usize)> {
            self.held
                .lock()
                .unwrap()
                .drain(..)
                .map(|(s, b)| (s, b.sequence(), b.len()))
                .collect()
        }
    }

    impl IsoTransport for HoldingTransport {
        fn limits(&self) -> TransportLimits {
            TransportLimits::default()
        }
        fn start_discovery(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn stop_discovery(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn connect_link(&self, _peer: &PeerAddr) -> Result<LinkId, TransportError> {
            Ok(LinkId(1))
        }
        fn disconnect_link(&self, _link: LinkId) -> Result<(), TransportError> {
            Ok(())
        }
        fn release_link(&self, _link: LinkId) {}
        fn start_advertising(&self, _service_name: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn register_stream_acceptor(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn bind_streams(
            &self,
            _link: LinkId,
            _streams: &[StreamId],
            _config: &BenchConfig,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn connect_streams(&self, _streams: &[StreamId]) -> Result<(), TransportError> {
            Ok(())
        }
        fn disconnect_stream(&self, _stream: StreamId) -> Result<(), TransportError> {
            Ok(())
        }
        fn send(&self, stream: StreamId, payload: PayloadBuf) -> Result<(), TransportError> {
            if *self.reject.lock().unwrap() {
                return Err(TransportError::NotConnected);
            }
            self.held.lock().unwrap().push((stream, payload));
            Ok(())
        }
    }

    fn connected_hub(streams: usize) -> Arc<EventHub> {
        let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", 2);
        hub.begin_session();
        let ids = hub.claim_streams(streams).unwrap();
        hub.deliver(TransportEvent::LinkConnected {
            link: LinkId(1),
            peer: PeerAddr::new([0; 6], false),
        });
        for id in ids {
            hub.deliver(TransportEvent::StreamConnected { stream: id });
        }
        hub
    }

    fn core(transport: Arc<HoldingTransport>, hub: Arc<EventHub>, buffers: usize) -> TxCore {
        TxCore {
            transport,
            hub,
            pool: PayloadPool::new(buffers, 16),
            sdu: 16,
            counters: Arc::new(TxCounters::default()),
        }
    }

    #[test]
    fn test_tick_period_subtracts_skew() {
        assert_eq!(tick_period(7500), Duration::from_micros(7400));
        assert_eq!(tick_period(256), Duration::from_micros(156));
    }

    #[test]
    fn test_tick_sends_one_per_stream() {
        let transport = Arc::new(HoldingTransport::default());
        let mut core = core(transport.clone(), connected_hub(2), 2);

        assert_eq!(core.tick(), TickOutcome::Sent(2));
        let sent = transport.release();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (StreamId(0), Some(0), 16));
        assert_eq!(sent[1], (StreamId(1), Some(0), 16));

        assert_eq!(core.tick(), TickOutcome::Sent(2));
        let sent = transport.release();
        assert_eq!(sent[0].1, Some(2));
    }

    #[test]
    fn test_exhaustion_skips_rest_of_tick_only() {
        let transport = Arc::new(HoldingTransport::default());
        let mut core = core(transport.clone(), connected_hub(2), 1);

        // Stream 0 takes the only buffer, stream 1 finds the pool empty
        assert_eq!(core.tick(), TickOutcome::Exhausted { sent: 1 });
        assert_eq!(core.counters.exhausted.load(Ordering::Relaxed), 1);

        // The transport finishes with the buffer before the next tick
        transport.release();
        assert_eq!(core.tick(), TickOutcome::Exhausted { sent: 1 });
        transport.release();
        assert_eq!(core.counters.sent.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_rejected_send_returns_buffer() {
        let transport = Arc::new(HoldingTransport::default());
        *transport.reject.lock().unwrap() = true;
        let mut core = core(transport.clone(), connected_hub(2), 1);

        assert_eq!(core.tick(), TickOutcome::Rejected { sent: 0 });
        assert_eq!(core.pool.available(), 1);
        assert_eq!(core.counters.sent.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_no_connected_streams() {
        let transport = Arc::new(HoldingTransport::default());
        let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", 2);
        let mut core = core(transport, hub, 1);
        assert_eq!(core.tick(), TickOutcome::Sent(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ticks_until_stopped() {
        let transport = Arc::new(HoldingTransport::default());
        let hub = connected_hub(1);
        let mut scheduler =
            TransmitScheduler::start(transport.clone(), hub, PayloadPool::new(8, 16), 1100, 16);
        assert_eq!(scheduler.period(), Duration::from_millis(1));

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            transport.release();
        }
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        let ticks = scheduler.ticks();
        assert!(ticks >= 5, "expected at least 5 ticks, got {}", ticks);
        assert_eq!(scheduler.sent(), ticks);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.ticks(), ticks);

        scheduler.stop().await;
    }
}
