//! Shared fixtures for the scenario tests
//!
//! `MockTransport` records every request and never completes anything on
//! its own: the test delivers events to the hub itself, in whatever order
//! the scenario needs.

#![allow(dead_code)]

use isobench::{
    BenchConfig, BenchContext, EventHub, IsoTransport, LinkId, Orchestrator, PayloadBuf,
    PeerAddr, Role, SessionResult, StreamId, TransportError, TransportEvent, TransportLimits,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const PEER: PeerAddr = PeerAddr {
    bytes: [0xC0, 0x00, 0x00, 0x00, 0x00, 0x01],
    random: true,
};

pub const LINK: LinkId = LinkId(1);

/// A request the orchestrator made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartDiscovery,
    StopDiscovery,
    ConnectLink(PeerAddr),
    DisconnectLink(LinkId),
    ReleaseLink(LinkId),
    StartAdvertising(String),
    RegisterAcceptor,
    Bind(LinkId, Vec<StreamId>),
    Connect(Vec<StreamId>),
    DisconnectStream(StreamId),
}

/// Payload as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub stream: StreamId,
    pub sequence: Option<u32>,
    pub len: usize,
}

pub struct MockTransport {
    limits: TransportLimits,
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    sent: Mutex<Vec<Sent>>,
    held: Mutex<Vec<PayloadBuf>>,
    hold_payloads: AtomicBool,
}

impl MockTransport {
    pub fn new(limits: TransportLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            hold_payloads: AtomicBool::new(false),
        })
    }

    /// Reject every future call of `op`
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Keep submitted payloads instead of releasing them right away
    pub fn hold_payloads(&self, hold: bool) {
        self.hold_payloads.store(hold, Ordering::SeqCst);
    }

    /// Release every held payload back to its pool
    pub fn release_payloads(&self) -> usize {
        let mut held = self.held.lock().unwrap();
        let count = held.len();
        held.clear();
        count
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_call(&self, call: &Call) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, call: Call) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(op) {
            return Err(TransportError::Rejected { op, code: -5 });
        }
        Ok(())
    }
}

impl IsoTransport for MockTransport {
    fn limits(&self) -> TransportLimits {
        self.limits
    }

    fn start_discovery(&self) -> Result<(), TransportError> {
        self.record("start_discovery", Call::StartDiscovery)
    }

    fn stop_discovery(&self) -> Result<(), TransportError> {
        self.record("stop_discovery", Call::StopDiscovery)
    }

    fn connect_link(&self, peer: &PeerAddr) -> Result<LinkId, TransportError> {
        self.record("connect_link", Call::ConnectLink(*peer))?;
        Ok(LINK)
    }

    fn disconnect_link(&self, link: LinkId) -> Result<(), TransportError> {
        self.record("disconnect_link", Call::DisconnectLink(link))
    }

    fn release_link(&self, link: LinkId) {
        self.calls.lock().unwrap().push(Call::ReleaseLink(link));
    }

    fn start_advertising(&self, service_name: &str) -> Result<(), TransportError> {
        self.record(
            "start_advertising",
            Call::StartAdvertising(service_name.to_string()),
        )
    }

    fn register_stream_acceptor(&self) -> Result<(), TransportError> {
        self.record("register_stream_acceptor", Call::RegisterAcceptor)
    }

    fn bind_streams(
        &self,
        link: LinkId,
        streams: &[StreamId],
        _config: &BenchConfig,
    ) -> Result<(), TransportError> {
        self.record("bind_streams", Call::Bind(link, streams.to_vec()))
    }

    fn connect_streams(&self, streams: &[StreamId]) -> Result<(), TransportError> {
        self.record("connect_streams", Call::Connect(streams.to_vec()))
    }

    fn disconnect_stream(&self, stream: StreamId) -> Result<(), TransportError> {
        self.record("disconnect_stream", Call::DisconnectStream(stream))
    }

    fn send(&self, stream: StreamId, payload: PayloadBuf) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains("send") {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(Sent {
            stream,
            sequence: payload.sequence(),
            len: payload.len(),
        });
        if self.hold_payloads.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push(payload);
        }
        Ok(())
    }
}

/// Orchestrator, hub and mock wired together
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub hub: Arc<EventHub>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(config: BenchConfig) -> Self {
        Self::with_limits(config, TransportLimits::default())
    }

    pub fn with_limits(config: BenchConfig, limits: TransportLimits) -> Self {
        Self::build(limits, |transport, hub| {
            Orchestrator::new(transport, hub, config)
        })
    }

    /// Customize the orchestrator before it is shared
    pub fn build(
        limits: TransportLimits,
        make: impl FnOnce(Arc<dyn IsoTransport>, Arc<EventHub>) -> Orchestrator,
    ) -> Self {
        let transport = MockTransport::new(limits);
        let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", limits.max_streams);
        let requests: Arc<dyn IsoTransport> = transport.clone();
        let orchestrator = Arc::new(make(requests, Arc::clone(&hub)));
        Self {
            transport,
            hub,
            orchestrator,
        }
    }

    /// Run one pass in the background
    pub fn spawn(&self, role: Role) -> JoinHandle<SessionResult> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move { orchestrator.run_session(role).await })
    }

    pub fn deliver(&self, event: TransportEvent) {
        self.hub.deliver(event);
    }

    /// Wait until the mock has seen `call`
    pub async fn wait_for_call(&self, call: Call) {
        let transport = Arc::clone(&self.transport);
        wait_until(move || transport.has_call(&call)).await;
    }

    /// Drive an initiator pass up to the point where every stream is connected
    pub async fn initiator_to_active(&self, streams: &[StreamId]) {
        self.wait_for_call(Call::StartDiscovery).await;
        self.deliver(TransportEvent::PeerDiscovered {
            addr: PEER,
            name: "isobench".to_string(),
            rssi: -50,
        });
        self.wait_for_call(Call::ConnectLink(PEER)).await;
        self.deliver(TransportEvent::LinkConnected {
            link: LINK,
            peer: PEER,
        });
        self.wait_for_call(Call::Connect(streams.to_vec())).await;
        for &stream in streams.iter().rev() {
            self.deliver(TransportEvent::StreamConnected { stream });
        }
    }

    /// Peer-initiated teardown of the link and `streams`
    pub fn peer_teardown(&self, streams: &[StreamId]) {
        self.deliver(TransportEvent::LinkDisconnected {
            link: LINK,
            reason: 0x13,
        });
        for &stream in streams {
            self.deliver(TransportEvent::StreamDisconnected {
                stream,
                reason: 0x13,
            });
        }
    }
}

/// Poll `cond` on virtual time until it holds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Let spawned tasks run for `ms` of virtual time
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn streams(n: u8) -> Vec<StreamId> {
    (0..n).map(StreamId).collect()
}
