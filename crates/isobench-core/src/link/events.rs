//! Transport events and rendezvous points
//!
//! The wireless stack reports completions from its own execution context.
//! Every report is a [`TransportEvent`] handed to [`EventHub::deliver`], which
//! is the single writer for stream slot state, receive statistics and the
//! connection-duration average. The orchestrator never touches those
//! directly: it blocks on one rendezvous point per event category and reads
//! the outcome afterwards.
//!
//! ## Rendezvous points
//!
//! | Category            | Given by                        | Limit         |
//! |---------------------|---------------------------------|---------------|
//! | discovered          | matching `PeerDiscovered`       | 1             |
//! | link connected      | `LinkConnected` / `LinkFailed`  | 1             |
//! | link disconnected   | `LinkDisconnected`              | 1             |
//! | stream accepted     | [`EventHub::accept_stream_request`] | pool size |
//! | stream connected    | `StreamConnected`               | pool size     |
//! | stream disconnected | `StreamDisconnected`            | pool size     |

use crate::link::pool::{StreamPool, StreamState};
use crate::link::transport::{LinkId, PeerAddr, StreamId};
use crate::session::context::BenchContext;
use crate::stats::tracker::StatsReport;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Completion reported by the wireless stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An advertiser was seen during discovery
    PeerDiscovered {
        addr: PeerAddr,
        name: String,
        rssi: i8,
    },
    /// A link came up (requested by us or by the peer)
    LinkConnected { link: LinkId, peer: PeerAddr },
    /// A link request failed
    LinkFailed { peer: PeerAddr, code: u8 },
    /// A link went down
    LinkDisconnected { link: LinkId, reason: u8 },
    /// A stream finished connecting
    StreamConnected { stream: StreamId },
    /// A stream went down
    StreamDisconnected { stream: StreamId, reason: u8 },
    /// A packet arrived (or was reported missing) on a stream
    DataReceived { stream: StreamId, valid: bool },
}

/// Observed state of the session's link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No link
    Down,
    /// Link established
    Up(LinkId),
    /// The last link request failed
    Failed { code: u8 },
}

/// Counting rendezvous point with an upper bound on banked signals
struct Rendezvous {
    sem: Semaphore,
    limit: usize,
}

impl Rendezvous {
    fn new(limit: usize) -> Self {
        Self {
            sem: Semaphore::new(0),
            limit: limit.max(1),
        }
    }

    fn give(&self) {
        if self.sem.available_permits() < self.limit {
            self.sem.add_permits(1);
        }
    }

    async fn take(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }

    async fn take_many(&self, count: u32) {
        if count == 0 {
            return;
        }
        if let Ok(permit) = self.sem.acquire_many(count).await {
            permit.forget();
        }
    }

    fn try_take(&self) -> bool {
        match self.sem.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    fn reset(&self) {
        while self.try_take() {}
    }

    fn pending(&self) -> usize {
        self.sem.available_permits()
    }
}

/// Mutable state shared between the event path and the orchestrator
#[derive(Debug)]
struct HubState {
    pool: StreamPool,
    session_active: bool,
    discovering: bool,
    accepting: bool,
    peer: Option<PeerAddr>,
    link: LinkStatus,
    accepted: usize,
    connect_ref: Option<Instant>,
    batch_open: bool,
    link_disconnect_requested: bool,
    /// Slots whose disconnect was still outstanding when their session ended
    stale: Vec<StreamId>,
}

/// Event sink for the transport and rendezvous hub for the orchestrator
pub struct EventHub {
    ctx: Arc<BenchContext>,
    service_name: String,
    state: Mutex<HubState>,
    discovered: Rendezvous,
    link_connected: Rendezvous,
    link_disconnected: Rendezvous,
    stream_accepted: Rendezvous,
    stream_connected: Rendezvous,
    stream_disconnected: Rendezvous,
    abort: watch::Sender<bool>,
}

impl EventHub {
    /// Create a hub
    ///
    /// # Arguments
    /// * `ctx` - Process-wide counters
    /// * `service_name` - Advertised name prefix the initiator looks for
    /// * `max_streams` - Stream slot count (the transport's concurrent-stream capacity)
    pub fn new(
        ctx: Arc<BenchContext>,
        service_name: impl Into<String>,
        max_streams: usize,
    ) -> Arc<Self> {
        let (abort, _) = watch::channel(false);
        Arc::new(Self {
            ctx,
            service_name: service_name.into(),
            state: Mutex::new(HubState {
                pool: StreamPool::new(max_streams),
                session_active: false,
                discovering: false,
                accepting: false,
                peer: None,
                link: LinkStatus::Down,
                accepted: 0,
                connect_ref: None,
                batch_open: false,
                link_disconnect_requested: false,
                stale: Vec::new(),
            }),
            discovered: Rendezvous::new(1),
            link_connected: Rendezvous::new(1),
            link_disconnected: Rendezvous::new(1),
            stream_accepted: Rendezvous::new(max_streams),
            stream_connected: Rendezvous::new(max_streams),
            stream_disconnected: Rendezvous::new(max_streams),
            abort,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Process-wide counters this hub writes to
    pub fn context(&self) -> &Arc<BenchContext> {
        &self.ctx
    }

    /// Service name the initiator matches against
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    // ------------------------------------------------------------------
    // Event path
    // ------------------------------------------------------------------

    /// Deliver one event from the transport
    pub fn deliver(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerDiscovered { addr, name, rssi } => {
                self.on_peer_discovered(addr, &name, rssi)
            }
            TransportEvent::LinkConnected { link, peer } => self.on_link_connected(link, peer),
            TransportEvent::LinkFailed { peer, code } => self.on_link_failed(peer, code),
            TransportEvent::LinkDisconnected { link, reason } => {
                self.on_link_disconnected(link, reason)
            }
            TransportEvent::StreamConnected { stream } => self.on_stream_connected(stream),
            TransportEvent::StreamDisconnected { stream, reason } => {
                self.on_stream_disconnected(stream, reason)
            }
            TransportEvent::DataReceived { stream, valid } => self.on_data(stream, valid),
        }
    }

    /// Inbound stream request from the peer
    ///
    /// Claims a free slot while a responder session is waiting for streams.
    ///
    /// # Returns
    /// The slot to bind the stream to, or None to refuse the request
    pub fn accept_stream_request(&self) -> Option<StreamId> {
        info!("Incoming stream request");

        let mut state = self.lock();
        if !state.accepting {
            warn!("No responder session is accepting streams, refusing request");
            return None;
        }

        match state.pool.claim() {
            Some(stream) => {
                state.accepted += 1;
                drop(state);
                info!(stream = %stream, "Returning stream instance");
                self.stream_accepted.give();
                Some(stream)
            }
            None => {
                drop(state);
                error!("Could not accept any more streams");
                None
            }
        }
    }

    fn on_peer_discovered(&self, addr: PeerAddr, name: &str, rssi: i8) {
        let mut state = self.lock();
        if !state.discovering || state.peer.is_some() {
            return;
        }
        if !name.starts_with(&self.service_name) {
            debug!(peer = %addr, name, "Ignoring advertiser");
            return;
        }

        state.peer = Some(addr);
        drop(state);

        info!("Found peer with address {} (RSSI {})", addr, rssi);
        self.discovered.give();
    }

    fn on_link_connected(&self, link: LinkId, peer: PeerAddr) {
        let mut state = self.lock();
        if !state.session_active {
            warn!(%link, "Link connected outside a session, ignoring");
            return;
        }
        state.link = LinkStatus::Up(link);
        state.link_disconnect_requested = false;
        state.peer = Some(peer);
        drop(state);

        info!("Connected: {}", peer);
        self.link_connected.give();
    }

    fn on_link_failed(&self, peer: PeerAddr, code: u8) {
        let mut state = self.lock();
        state.link = LinkStatus::Failed { code };
        drop(state);

        info!("Failed to connect to {}: {}", peer, code);
        self.link_connected.give();
    }

    fn on_link_disconnected(&self, link: LinkId, reason: u8) {
        let mut state = self.lock();
        if state.link != LinkStatus::Up(link) {
            debug!(%link, current = ?state.link, "Disconnect for a link that is not up, ignoring");
            return;
        }
        state.link = LinkStatus::Down;
        drop(state);

        info!("Disconnected: {} (reason 0x{:02x})", link, reason);
        self.link_disconnected.give();
    }

    fn on_stream_connected(&self, stream: StreamId) {
        let mut state = self.lock();
        if !matches!(state.link, LinkStatus::Up(_)) {
            warn!(stream = %stream, "Stream connected before its link, ignoring");
            return;
        }
        if state.pool.set_state(stream, StreamState::Connected).is_none() {
            warn!(stream = %stream, "Connected event for an unclaimed stream, ignoring");
            return;
        }
        // The old stream on this slot is gone if a new one came up on it
        state.stale.retain(|&s| s != stream);

        // With several streams this ends up as the time of the last one
        state.connect_ref = Some(Instant::now());
        state.batch_open = true;
        drop(state);

        info!(stream = %stream, "Stream connected");
        self.stream_connected.give();
    }

    fn on_stream_disconnected(&self, stream: StreamId, reason: u8) {
        let mut state = self.lock();
        if let Some(pos) = state.stale.iter().position(|&s| s == stream) {
            state.stale.swap_remove(pos);
            drop(state);
            debug!(stream = %stream, reason, "Late disconnect from an earlier session, ignoring");
            return;
        }
        match state.pool.set_state(stream, StreamState::Disconnected) {
            None => {
                warn!(stream = %stream, "Disconnected event for an unclaimed stream, ignoring");
                return;
            }
            Some(StreamState::Disconnected) => {
                debug!(stream = %stream, "Duplicate disconnected event");
                return;
            }
            Some(_) => {}
        }

        let duration = state
            .connect_ref
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        let first_of_batch = std::mem::take(&mut state.batch_open);
        drop(state);

        let average_ms = if first_of_batch {
            self.ctx.record_connect_duration(duration)
        } else {
            self.ctx.average_connection_ms()
        };

        info!(
            "Stream {} disconnected with reason 0x{:02x} after {} milliseconds (average duration {:.0})",
            stream,
            reason,
            duration.as_millis(),
            average_ms
        );
        self.stream_disconnected.give();
    }

    fn on_data(&self, stream: StreamId, valid: bool) {
        if let Some(report) = self.ctx.record_receive(valid) {
            log_report(&report);
        }
        if !valid {
            debug!(stream = %stream, "Packet lost");
        }
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Slots not claimed by any session
    pub fn free_streams(&self) -> usize {
        self.lock().pool.free_count()
    }

    /// Current state of a slot
    pub fn stream_state(&self, stream: StreamId) -> Option<StreamState> {
        self.lock().pool.state(stream)
    }

    /// Slots currently eligible for transmit
    pub fn connected_streams(&self) -> Vec<StreamId> {
        self.lock().pool.connected()
    }

    /// Slots claimed by the current session
    pub fn claimed_streams(&self) -> Vec<StreamId> {
        self.lock().pool.claimed()
    }

    /// Observed link state
    pub fn link_status(&self) -> LinkStatus {
        self.lock().link
    }

    /// Peer recorded by discovery or by the inbound link
    pub fn peer(&self) -> Option<PeerAddr> {
        self.lock().peer
    }

    /// Streams accepted in the current session
    pub fn accepted_streams(&self) -> usize {
        self.lock().accepted
    }

    /// Whether a session is running
    pub fn session_active(&self) -> bool {
        self.lock().session_active
    }

    /// Claimed slots that have not reported their disconnect yet
    pub fn live_streams(&self) -> usize {
        let state = self.lock();
        state
            .pool
            .claimed()
            .into_iter()
            .filter(|&s| state.pool.state(s) != Some(StreamState::Disconnected))
            .count()
    }

    /// Stream-disconnected signals banked but not yet consumed
    pub fn pending_stream_disconnects(&self) -> usize {
        self.stream_disconnected.pending()
    }

    // ------------------------------------------------------------------
    // Local teardown
    // ------------------------------------------------------------------

    /// Ask the running session to tear down
    ///
    /// # Returns
    /// false when no session is running
    pub fn request_local_teardown(&self) -> bool {
        if !self.lock().session_active {
            return false;
        }
        info!("Local teardown requested");
        self.abort.send_replace(true);
        true
    }

    /// Resolves once a local teardown has been requested
    pub(crate) async fn teardown_requested(&self) {
        let mut rx = self.abort.subscribe();
        if rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    // ------------------------------------------------------------------
    // Session bookkeeping (orchestrator side)
    // ------------------------------------------------------------------

    /// Reset per-session state before a new pass
    pub(crate) fn begin_session(&self) {
        let mut state = self.lock();
        let leaked = state.pool.release_all();
        if leaked > 0 {
            warn!(leaked, "Stream slots still claimed at session start, releasing");
        }
        state.session_active = true;
        state.discovering = false;
        state.accepting = false;
        state.peer = None;
        state.link = LinkStatus::Down;
        state.accepted = 0;
        state.connect_ref = None;
        state.batch_open = false;
        state.link_disconnect_requested = false;
        drop(state);

        self.discovered.reset();
        self.link_connected.reset();
        self.link_disconnected.reset();
        self.stream_accepted.reset();
        self.stream_connected.reset();
        self.stream_disconnected.reset();
        self.abort.send_replace(false);

        self.ctx.reset_session_stats();
    }

    /// Return every slot to the pool and close the session
    ///
    /// Slots still waiting for their disconnect event are remembered, so
    /// that event is dropped if it shows up during a later session.
    pub(crate) fn end_session(&self) {
        let mut state = self.lock();
        for stream in state.pool.claimed() {
            let outstanding = matches!(
                state.pool.state(stream),
                Some(StreamState::Connecting | StreamState::Connected | StreamState::Disconnecting)
            );
            if outstanding && !state.stale.contains(&stream) {
                warn!(stream = %stream, "Stream still up at session end");
                state.stale.push(stream);
            }
        }
        let released = state.pool.release_all();
        state.session_active = false;
        state.discovering = false;
        state.accepting = false;
        state.link = LinkStatus::Down;
        drop(state);

        debug!(released, "Stream slots returned to pool");
        self.abort.send_replace(false);
    }

    pub(crate) fn set_discovering(&self, discovering: bool) {
        self.lock().discovering = discovering;
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.lock().accepting = accepting;
    }

    pub(crate) fn claim_streams(&self, count: usize) -> Option<Vec<StreamId>> {
        self.lock().pool.claim_many(count)
    }

    pub(crate) fn mark_streams(&self, streams: &[StreamId], next: StreamState) {
        let mut state = self.lock();
        for &stream in streams {
            state.pool.set_state(stream, next);
        }
    }

    /// Mark the current link as being torn down locally
    ///
    /// # Returns
    /// The link to ask the transport to disconnect, or None when no link is
    /// up or its disconnect was already requested
    pub(crate) fn begin_link_disconnect(&self) -> Option<LinkId> {
        let mut state = self.lock();
        match state.link {
            LinkStatus::Up(link) if !state.link_disconnect_requested => {
                state.link_disconnect_requested = true;
                Some(link)
            }
            _ => None,
        }
    }

    /// Mark a stream as being torn down locally
    ///
    /// # Returns
    /// true if the transport should be asked to disconnect it; false when the
    /// slot is free, already disconnected, or already being disconnected
    pub(crate) fn begin_stream_disconnect(&self, stream: StreamId) -> bool {
        let mut state = self.lock();
        match state.pool.state(stream) {
            Some(current) if !current.is_terminating() => {
                state.pool.set_state(stream, StreamState::Disconnecting);
                true
            }
            _ => false,
        }
    }

    pub(crate) async fn wait_discovered(&self) {
        self.discovered.take().await
    }

    pub(crate) async fn wait_link_connected(&self) {
        self.link_connected.take().await
    }

    pub(crate) async fn wait_link_disconnected(&self) {
        self.link_disconnected.take().await
    }

    pub(crate) async fn wait_stream_accepted(&self) {
        self.stream_accepted.take().await
    }

    pub(crate) async fn wait_stream_connected(&self) {
        self.stream_connected.take().await
    }

    pub(crate) async fn wait_streams_connected(&self, count: usize) {
        self.stream_connected.take_many(count as u32).await
    }

    pub(crate) async fn wait_stream_disconnected(&self) {
        self.stream_disconnected.take().await
    }

    pub(crate) async fn wait_streams_disconnected(&self, count: usize) {
        self.stream_disconnected.take_many(count as u32).await
    }
}

/// Log the three-horizon receive report
pub fn log_report(report: &StatsReport) {
    info!("Overall     : {}", report.overall);
    info!("Current Sync: {}", report.session);
    info!("Latest {:<5}: {}", report.recent_len, report.recent);
}
