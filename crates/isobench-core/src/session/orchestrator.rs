//! Session orchestrator
//!
//! Drives one benchmark pass for either role: link setup, stream setup, the
//! active phase with the transmit scheduler running, and teardown. Every
//! step that depends on the wireless stack is a request to the
//! [`IsoTransport`] followed by a wait on the matching rendezvous point of
//! the [`EventHub`].
//!
//! ## Flows
//!
//! ```text
//! Initiator: Idle -> Discovering -> Linking -> BindingStreams
//!            -> StreamsConnecting -> Active -> Disconnecting -> Idle
//! Responder: Idle -> Advertising -> WaitingLink -> WaitingStreamRequest
//!            -> StreamsConnecting -> Active -> Disconnecting -> Idle
//! ```
//!
//! Any failure falls back to `Idle` after a best-effort cleanup and a
//! bounded wait for the transport to confirm it. A local teardown request
//! interrupts the unbounded waits.

use crate::config::qos::{BenchConfig, ConfigError};
use crate::link::buf::{PayloadPool, SEQUENCE_LEN};
use crate::link::events::{EventHub, LinkStatus};
use crate::link::pool::StreamState;
use crate::link::transport::{IsoTransport, LinkId, StreamId, TransportError};
use crate::session::scheduler::{TransmitScheduler, DEFAULT_PAYLOAD_BUFFERS};
use crate::session::state::{Role, SessionState, StateMachine};
use crate::stats::tracker::RecvCounters;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long a responder waits for the first inbound stream request
pub const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on waiting for disconnect events during teardown
pub const TEARDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a link could not be established
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    #[error("request rejected: {0}")]
    Request(TransportError),

    #[error("peer refused with code {code}")]
    Refused { code: u8 },

    #[error("link dropped while connecting")]
    Lost,
}

/// Failure kinds of one session pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("Discovery failed: {0}")]
    DiscoveryFailed(TransportError),

    #[error("Link failed: {0}")]
    LinkFailed(LinkFailure),

    #[error("Stream bind failed: {0}")]
    BindFailed(TransportError),

    #[error("No stream request within {0:?}")]
    StreamRequestTimeout(Duration),

    #[error("Stream connect failed: {0}")]
    ConnectFailed(TransportError),

    #[error("Advertising failed: {0}")]
    AdvertiseFailed(TransportError),

    #[error("Aborted by local request in state {state}")]
    Aborted { state: SessionState },

    #[error("Invalid {role} transition {from} -> {to}")]
    InvalidTransition {
        role: Role,
        from: SessionState,
        to: SessionState,
    },
}

/// Result of one session pass
pub type SessionResult = Result<SessionSummary, SessionError>;

/// Outcome of a successful pass
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub role: Role,
    /// Streams that reached the connected state
    pub streams: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Wall time spent in the pass
    pub duration: Duration,
    /// Payloads submitted by the transmit scheduler
    pub packets_sent: u64,
    /// Receive counters of this session
    pub session_stats: RecvCounters,
    /// Whether the teardown was requested locally
    pub local_teardown: bool,
}

/// Per-pass bookkeeping
struct Session {
    machine: StateMachine,
    config: BenchConfig,
    started_at: DateTime<Utc>,
    started: Instant,
    link: Option<LinkId>,
    streams: Vec<StreamId>,
    scheduler: Option<TransmitScheduler>,
    packets_sent: u64,
    local_teardown: bool,
}

impl Session {
    fn new(role: Role, config: BenchConfig) -> Self {
        Self {
            machine: StateMachine::new(role),
            config,
            started_at: Utc::now(),
            started: Instant::now(),
            link: None,
            streams: Vec::new(),
            scheduler: None,
            packets_sent: 0,
            local_teardown: false,
        }
    }

    fn advance(&mut self, next: SessionState) -> Result<(), SessionError> {
        self.machine.advance(next)?;
        info!(role = %self.machine.role(), "{}", next);
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.machine.state()
    }

    async fn stop_scheduler(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop().await;
            self.packets_sent = scheduler.sent();
        }
    }
}

/// Runs session passes against one transport
pub struct Orchestrator {
    transport: Arc<dyn IsoTransport>,
    hub: Arc<EventHub>,
    config: BenchConfig,
    payloads: PayloadPool,
    request_timeout: Duration,
    drain_timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// # Arguments
    /// * `transport` - Wireless stack request side
    /// * `hub` - The hub the transport delivers its events to
    /// * `config` - Configuration used for the next pass (validated when the pass starts)
    pub fn new(transport: Arc<dyn IsoTransport>, hub: Arc<EventHub>, config: BenchConfig) -> Self {
        let buf_size = transport.limits().tx_mtu.max(SEQUENCE_LEN as u16) as usize;
        Self {
            transport,
            hub,
            config,
            payloads: PayloadPool::new(DEFAULT_PAYLOAD_BUFFERS, buf_size),
            request_timeout: STREAM_REQUEST_TIMEOUT,
            drain_timeout: TEARDOWN_DRAIN_TIMEOUT,
        }
    }

    /// Use a different payload buffer pool
    pub fn with_payload_pool(mut self, pool: PayloadPool) -> Self {
        self.payloads = pool;
        self
    }

    /// Override the responder's stream request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the teardown drain bound
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Replace the configuration after validating it against the transport
    pub fn set_config(&mut self, config: BenchConfig) -> Result<(), ConfigError> {
        self.config = config.validate(&self.transport.limits())?;
        Ok(())
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Run one pass in the given role
    ///
    /// Returns once the session is back in `Idle`, whether it completed or
    /// failed. Every stream slot is back in the pool on return.
    pub async fn run_session(&self, role: Role) -> SessionResult {
        let config = self.config.clone().validate(&self.transport.limits())?;
        let mut session = Session::new(role, config);

        info!(%role, streams = session.config.stream_count, "Starting session");
        self.hub.begin_session();

        let result = match role {
            Role::Initiator => self.run_initiator(&mut session).await,
            Role::Responder => self.run_responder(&mut session).await,
        };

        session.stop_scheduler().await;
        if result.is_err() {
            self.cleanup();
            self.drain_teardown().await;
        }
        if let Some(link) = session.link.take() {
            self.transport.release_link(link);
        }
        let session_stats = self.hub.context().session();
        self.hub.end_session();
        let failed_in = session.state();
        session.machine.reset();

        match result {
            Ok(()) => {
                let completed = self.hub.context().count_completed_session();
                let summary = SessionSummary {
                    role,
                    streams: session.streams.len(),
                    started_at: session.started_at,
                    ended_at: Utc::now(),
                    duration: session.started.elapsed(),
                    packets_sent: session.packets_sent,
                    session_stats,
                    local_teardown: session.local_teardown,
                };
                info!(%role, completed, "Session finished");
                Ok(summary)
            }
            Err(e) => {
                warn!(%role, state = %failed_in, "Session failed: {}", e);
                Err(e)
            }
        }
    }

    /// Best-effort teardown of the current link and streams
    ///
    /// Skips slots that are free, already disconnected or already being
    /// disconnected, and asks for the link disconnect once per link, so
    /// calling it repeatedly is harmless.
    pub fn cleanup(&self) {
        if let Some(link) = self.hub.begin_link_disconnect() {
            info!("Disconnecting {}", link);
            if let Err(e) = self.transport.disconnect_link(link) {
                warn!(%link, "Failed to disconnect link: {}", e);
            }
        }

        for stream in self.hub.claimed_streams() {
            if !self.hub.begin_stream_disconnect(stream) {
                debug!(stream = %stream, "Already disconnecting, skipping");
                continue;
            }
            if let Err(e) = self.transport.disconnect_stream(stream) {
                // No event will follow a refused request
                warn!(stream = %stream, "Failed to disconnect stream: {}", e);
                self.hub.mark_streams(&[stream], StreamState::Disconnected);
            }
        }
    }

    /// Wait, bounded, for the link and every claimed stream to report down
    async fn drain_teardown(&self) {
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while matches!(self.hub.link_status(), LinkStatus::Up(_)) {
                self.hub.wait_link_disconnected().await;
            }
            while self.hub.live_streams() > 0 {
                self.hub.wait_stream_disconnected().await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                link = ?self.hub.link_status(),
                streams = self.hub.live_streams(),
                "Teardown not confirmed within {:?}",
                self.drain_timeout
            );
        }
    }

    /// Await `wait`, or return false if a local teardown is requested first
    async fn interruptible<F: Future<Output = ()>>(&self, wait: F) -> bool {
        tokio::select! {
            biased;
            _ = self.hub.teardown_requested() => false,
            _ = wait => true,
        }
    }

    fn abort(&self, session: &Session) -> SessionError {
        self.cleanup();
        SessionError::Aborted {
            state: session.state(),
        }
    }

    async fn run_initiator(&self, session: &mut Session) -> Result<(), SessionError> {
        session.advance(SessionState::Discovering)?;
        self.hub.set_discovering(true);
        self.transport.start_discovery().map_err(|e| {
            error!("Failed to start discovery: {}", e);
            SessionError::DiscoveryFailed(e)
        })?;
        info!("Scanning for '{}'", self.hub.service_name());

        let found = self.interruptible(self.hub.wait_discovered()).await;
        self.hub.set_discovering(false);
        if let Err(e) = self.transport.stop_discovery() {
            error!("Failed to stop discovery: {}", e);
            if found {
                return Err(SessionError::DiscoveryFailed(e));
            }
        }
        if !found {
            return Err(self.abort(session));
        }
        let peer = self
            .hub
            .peer()
            .ok_or(SessionError::DiscoveryFailed(TransportError::NotConnected))?;

        session.advance(SessionState::Linking)?;
        info!("Connecting to {}", peer);
        let link = self
            .transport
            .connect_link(&peer)
            .map_err(|e| {
                error!("Failed to request link: {}", e);
                SessionError::LinkFailed(LinkFailure::Request(e))
            })?;
        session.link = Some(link);

        if !self.interruptible(self.hub.wait_link_connected()).await {
            return Err(self.abort(session));
        }
        match self.hub.link_status() {
            LinkStatus::Up(up) => {
                if up != link {
                    warn!(requested = %link, established = %up, "Link handle mismatch");
                }
            }
            LinkStatus::Failed { code } => {
                return Err(SessionError::LinkFailed(LinkFailure::Refused { code }));
            }
            LinkStatus::Down => return Err(SessionError::LinkFailed(LinkFailure::Lost)),
        }

        session.advance(SessionState::BindingStreams)?;
        let count = session.config.stream_count;
        let Some(streams) = self.hub.claim_streams(count) else {
            error!(count, free = self.hub.free_streams(), "Not enough free stream slots");
            self.cleanup();
            return Err(SessionError::BindFailed(TransportError::NoResources));
        };
        session.streams = streams.clone();
        if let Err(e) = self
            .transport
            .bind_streams(link, &streams, &session.config)
        {
            error!("Failed to bind streams: {}", e);
            self.cleanup();
            return Err(SessionError::BindFailed(e));
        }
        info!(count, "Streams bound");

        session.advance(SessionState::StreamsConnecting)?;
        self.hub.mark_streams(&streams, StreamState::Connecting);
        if let Err(e) = self.transport.connect_streams(&streams) {
            error!("Failed to connect streams: {}", e);
            self.cleanup();
            return Err(SessionError::ConnectFailed(e));
        }
        let batches = self.hub.context().count_connect_batch();
        debug!(batches, "Connect batch requested");

        self.await_streams_connected(session, count).await?;
        self.run_active(session).await
    }

    async fn run_responder(&self, session: &mut Session) -> Result<(), SessionError> {
        session.advance(SessionState::Advertising)?;
        let ctx = self.hub.context();
        if ctx.claim_acceptor_registration() {
            if let Err(e) = self.transport.register_stream_acceptor() {
                error!("Failed to register stream acceptor: {}", e);
                ctx.clear_acceptor_registration();
                return Err(SessionError::AdvertiseFailed(e));
            }
        }
        self.hub.set_accepting(true);
        self.transport
            .start_advertising(self.hub.service_name())
            .map_err(|e| {
                error!("Failed to start advertising: {}", e);
                SessionError::AdvertiseFailed(e)
            })?;
        info!("Advertising as '{}'", self.hub.service_name());

        session.advance(SessionState::WaitingLink)?;
        let link = loop {
            if !self.interruptible(self.hub.wait_link_connected()).await {
                return Err(self.abort(session));
            }
            match self.hub.link_status() {
                LinkStatus::Up(link) => break link,
                other => warn!(?other, "Inbound link did not come up, waiting again"),
            }
        };
        session.link = Some(link);

        session.advance(SessionState::WaitingStreamRequest)?;
        info!("Waiting for stream request");
        let waited = tokio::time::timeout(
            self.request_timeout,
            self.interruptible(self.hub.wait_stream_accepted()),
        )
        .await;
        match waited {
            Ok(true) => {}
            Ok(false) => return Err(self.abort(session)),
            Err(_) => {
                error!("Timed out waiting for stream request");
                self.cleanup();
                return Err(SessionError::StreamRequestTimeout(self.request_timeout));
            }
        }

        session.advance(SessionState::StreamsConnecting)?;
        self.await_accepted_streams(session).await?;
        self.hub.set_accepting(false);
        session.streams = self.hub.claimed_streams();
        let batches = ctx.count_connect_batch();
        debug!(batches, "Connect batch complete");

        self.run_active(session).await
    }

    /// Wait for `count` stream-connected events, or fail if the link drops
    async fn await_streams_connected(
        &self,
        session: &Session,
        count: usize,
    ) -> Result<(), SessionError> {
        let link_lost = tokio::select! {
            biased;
            _ = self.hub.teardown_requested() => return Err(self.abort(session)),
            _ = self.hub.wait_streams_connected(count) => false,
            _ = self.hub.wait_link_disconnected() => true,
        };
        if link_lost {
            error!("Link lost while streams were connecting");
            self.cleanup();
            return Err(SessionError::ConnectFailed(TransportError::NotConnected));
        }
        info!(count, "All streams connected");
        Ok(())
    }

    /// Wait until every accepted stream is connected
    ///
    /// Requests may keep arriving while earlier streams connect, so the
    /// target is re-read after every event.
    async fn await_accepted_streams(&self, session: &Session) -> Result<(), SessionError> {
        let mut connected = 0;
        while connected < self.hub.accepted_streams() {
            let link_lost = tokio::select! {
                biased;
                _ = self.hub.teardown_requested() => return Err(self.abort(session)),
                _ = self.hub.wait_stream_connected() => false,
                _ = self.hub.wait_link_disconnected() => true,
            };
            if link_lost {
                error!("Link lost while streams were connecting");
                self.cleanup();
                return Err(SessionError::ConnectFailed(TransportError::NotConnected));
            }
            connected += 1;
        }
        info!(count = connected, "All streams connected");
        Ok(())
    }

    /// Active phase and teardown, shared by both roles
    async fn run_active(&self, session: &mut Session) -> Result<(), SessionError> {
        session.advance(SessionState::Active)?;

        match session.config.tx {
            Some(tx) => {
                session.scheduler = Some(TransmitScheduler::start(
                    Arc::clone(&self.transport),
                    Arc::clone(&self.hub),
                    self.payloads.clone(),
                    tx.interval_us,
                    tx.sdu,
                ));
            }
            None => info!("TX disabled, receiving only"),
        }

        let peer_teardown = self.interruptible(self.hub.wait_link_disconnected()).await;

        session.advance(SessionState::Disconnecting)?;
        if !peer_teardown {
            session.local_teardown = true;
            self.cleanup();
            if tokio::time::timeout(self.drain_timeout, self.hub.wait_link_disconnected())
                .await
                .is_err()
            {
                warn!("Link did not report disconnect within {:?}", self.drain_timeout);
            }
        }

        let expected = session.streams.len();
        if tokio::time::timeout(
            self.drain_timeout,
            self.hub.wait_streams_disconnected(expected),
        )
        .await
        .is_err()
        {
            warn!(
                expected,
                pending = self.hub.pending_stream_disconnects(),
                "Not every stream reported disconnect within {:?}",
                self.drain_timeout
            );
        }

        session.stop_scheduler().await;
        info!(sent = session.packets_sent, "Session torn down");
        Ok(())
    }
}
