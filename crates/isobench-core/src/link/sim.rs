//! In-process simulated wireless stack
//!
//! [`SimTransport`] plays the remote device. Discovery finds a peer
//! advertising the hub's service name, links and streams come up after short
//! delays, and every payload sent is looped back as a received packet. The
//! simulated peer ends the session after a configurable number of payloads.
//!
//! Completions are delivered from spawned tokio tasks, so a runtime must be
//! running when the transport is created.

use crate::config::qos::{BenchConfig, TransportLimits};
use crate::link::buf::PayloadBuf;
use crate::link::events::{EventHub, TransportEvent};
use crate::link::transport::{IsoTransport, LinkId, PeerAddr, StreamId, TransportError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Address of the simulated peer
pub const SIM_PEER: PeerAddr = PeerAddr {
    bytes: [0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01],
    random: true,
};

/// Reason code for a teardown requested by the remote user
pub const REASON_REMOTE_TERMINATED: u8 = 0x13;

/// Reason code for a teardown requested by the local host
pub const REASON_LOCAL_TERMINATED: u8 = 0x16;

fn default_link_delay_ms() -> u64 {
    20
}

fn default_stream_delay_ms() -> u64 {
    10
}

fn default_loss_every() -> u64 {
    50
}

fn default_session_packets() -> u64 {
    1000
}

fn default_peer_streams() -> usize {
    crate::DEFAULT_MAX_STREAMS
}

fn default_max_streams() -> usize {
    crate::DEFAULT_MAX_STREAMS
}

fn default_tx_mtu() -> u16 {
    crate::DEFAULT_TX_MTU
}

/// Behaviour of the simulated peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSettings {
    /// Delay before discovery results and link completions
    #[serde(default = "default_link_delay_ms")]
    pub link_delay_ms: u64,
    /// Delay between stream completions
    #[serde(default = "default_stream_delay_ms")]
    pub stream_delay_ms: u64,
    /// Mark every Nth looped-back packet invalid (0 = never)
    #[serde(default = "default_loss_every")]
    pub loss_every: u64,
    /// Peer tears the link down after this many payloads (0 = never)
    #[serde(default = "default_session_packets")]
    pub session_packets: u64,
    /// Stream requests the simulated initiator opens toward a responder
    #[serde(default = "default_peer_streams")]
    pub peer_streams: usize,
    /// Concurrent-stream capacity reported to the orchestrator
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
    /// Transport MTU reported to the orchestrator
    #[serde(default = "default_tx_mtu")]
    pub tx_mtu: u16,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            link_delay_ms: default_link_delay_ms(),
            stream_delay_ms: default_stream_delay_ms(),
            loss_every: default_loss_every(),
            session_packets: default_session_packets(),
            peer_streams: default_peer_streams(),
            max_streams: default_max_streams(),
            tx_mtu: default_tx_mtu(),
        }
    }
}

impl SimSettings {
    fn link_delay(&self) -> Duration {
        Duration::from_millis(self.link_delay_ms)
    }

    fn stream_delay(&self) -> Duration {
        Duration::from_millis(self.stream_delay_ms)
    }
}

#[derive(Debug, Default)]
struct SimState {
    next_link: u16,
    link: Option<LinkId>,
    streams: Vec<StreamId>,
    acceptor: bool,
    link_packets: u64,
    peer_teardown_pending: bool,
}

struct SimShared {
    hub: Arc<EventHub>,
    settings: SimSettings,
    runtime: Handle,
    state: Mutex<SimState>,
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_link(&self) -> LinkId {
        let mut state = self.lock();
        state.next_link = state.next_link.wrapping_add(1);
        let link = LinkId(state.next_link);
        state.link = Some(link);
        state.streams.clear();
        state.link_packets = 0;
        state.peer_teardown_pending = false;
        link
    }

    /// Tear down every stream, then the link
    fn teardown_events(&self, reason: u8) -> Vec<TransportEvent> {
        let mut state = self.lock();
        let Some(link) = state.link.take() else {
            return Vec::new();
        };
        let mut events: Vec<TransportEvent> = state
            .streams
            .drain(..)
            .map(|stream| TransportEvent::StreamDisconnected { stream, reason })
            .collect();
        events.push(TransportEvent::LinkDisconnected { link, reason });
        events
    }
}

/// Simulated transport backed by tokio timers
#[derive(Clone)]
pub struct SimTransport {
    shared: Arc<SimShared>,
}

impl SimTransport {
    /// Create a simulated transport delivering to `hub`
    ///
    /// # Returns
    /// An error if called outside a tokio runtime
    pub fn new(hub: Arc<EventHub>, settings: SimSettings) -> Result<Self, TransportError> {
        let runtime = Handle::try_current()
            .map_err(|e| TransportError::Unsupported(format!("no async runtime: {}", e)))?;
        Ok(Self {
            shared: Arc::new(SimShared {
                hub,
                settings,
                runtime,
                state: Mutex::new(SimState::default()),
            }),
        })
    }

    pub fn settings(&self) -> &SimSettings {
        &self.shared.settings
    }

    /// Deliver `events` in order after `delay`
    fn after(&self, delay: Duration, events: Vec<TransportEvent>) {
        if events.is_empty() {
            return;
        }
        let hub = Arc::clone(&self.shared.hub);
        self.shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            for event in events {
                hub.deliver(event);
            }
        });
    }

    /// Simulated initiator side: link to us, then request streams
    fn connect_as_peer(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            let settings = &shared.settings;
            tokio::time::sleep(settings.link_delay()).await;

            let link = shared.open_link();
            info!(%link, "Simulated initiator linking");
            shared.hub.deliver(TransportEvent::LinkConnected {
                link,
                peer: SIM_PEER,
            });

            if !shared.lock().acceptor {
                debug!("No stream acceptor registered, peer opens no streams");
                return;
            }

            let mut accepted = Vec::new();
            for _ in 0..settings.peer_streams {
                tokio::time::sleep(settings.stream_delay()).await;
                match shared.hub.accept_stream_request() {
                    Some(stream) => accepted.push(stream),
                    None => break,
                }
            }
            shared.lock().streams.extend(accepted.iter().copied());

            for stream in accepted {
                tokio::time::sleep(settings.stream_delay()).await;
                shared
                    .hub
                    .deliver(TransportEvent::StreamConnected { stream });
            }
        });
    }

    fn check_link(&self, link: LinkId) -> Result<(), TransportError> {
        if self.shared.lock().link == Some(link) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl IsoTransport for SimTransport {
    fn limits(&self) -> TransportLimits {
        TransportLimits {
            max_streams: self.shared.settings.max_streams,
            tx_mtu: self.shared.settings.tx_mtu,
        }
    }

    fn start_discovery(&self) -> Result<(), TransportError> {
        let name = self.shared.hub.service_name().to_string();
        self.after(
            self.shared.settings.link_delay(),
            vec![
                TransportEvent::PeerDiscovered {
                    addr: PeerAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], false),
                    name: "sim-other-device".to_string(),
                    rssi: -80,
                },
                TransportEvent::PeerDiscovered {
                    addr: SIM_PEER,
                    name,
                    rssi: -42,
                },
            ],
        );
        Ok(())
    }

    fn stop_discovery(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn connect_link(&self, peer: &PeerAddr) -> Result<LinkId, TransportError> {
        if self.shared.lock().link.is_some() {
            return Err(TransportError::Rejected {
                op: "connect_link",
                code: -114,
            });
        }
        let link = self.shared.open_link();
        let shared = Arc::clone(&self.shared);
        let peer = *peer;
        self.shared.runtime.spawn(async move {
            tokio::time::sleep(shared.settings.link_delay()).await;
            if shared.lock().link != Some(link) {
                debug!(%link, "Link released before it came up");
                return;
            }
            shared.hub.deliver(TransportEvent::LinkConnected { link, peer });
        });
        Ok(link)
    }

    fn disconnect_link(&self, link: LinkId) -> Result<(), TransportError> {
        self.check_link(link)?;
        let events = self.shared.teardown_events(REASON_LOCAL_TERMINATED);
        self.after(self.shared.settings.stream_delay(), events);
        Ok(())
    }

    fn release_link(&self, link: LinkId) {
        let mut state = self.shared.lock();
        if state.link == Some(link) {
            state.link = None;
            state.streams.clear();
        }
        drop(state);
        debug!(%link, "Link handle released");
    }

    fn start_advertising(&self, service_name: &str) -> Result<(), TransportError> {
        debug!(service_name, "Simulated advertising started");
        self.connect_as_peer();
        Ok(())
    }

    fn register_stream_acceptor(&self) -> Result<(), TransportError> {
        self.shared.lock().acceptor = true;
        Ok(())
    }

    fn bind_streams(
        &self,
        link: LinkId,
        streams: &[StreamId],
        config: &BenchConfig,
    ) -> Result<(), TransportError> {
        self.check_link(link)?;
        if streams.len() > self.shared.settings.max_streams {
            return Err(TransportError::NoResources);
        }
        debug!(count = streams.len(), tx = ?config.tx, rx = ?config.rx, "Binding streams");
        self.shared.lock().streams = streams.to_vec();
        Ok(())
    }

    fn connect_streams(&self, streams: &[StreamId]) -> Result<(), TransportError> {
        let bound = self.shared.lock().streams.clone();
        if streams.iter().any(|s| !bound.contains(s)) {
            return Err(TransportError::NotConnected);
        }
        // Completions arrive highest index first
        let delay = self.shared.settings.stream_delay();
        for (i, &stream) in streams.iter().rev().enumerate() {
            self.after(
                delay * (i as u32 + 1),
                vec![TransportEvent::StreamConnected { stream }],
            );
        }
        Ok(())
    }

    fn disconnect_stream(&self, stream: StreamId) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        let Some(pos) = state.streams.iter().position(|s| *s == stream) else {
            return Err(TransportError::NotConnected);
        };
        state.streams.remove(pos);
        drop(state);

        self.after(
            self.shared.settings.stream_delay(),
            vec![TransportEvent::StreamDisconnected {
                stream,
                reason: REASON_LOCAL_TERMINATED,
            }],
        );
        Ok(())
    }

    fn send(&self, stream: StreamId, payload: PayloadBuf) -> Result<(), TransportError> {
        let settings = &self.shared.settings;
        let mut state = self.shared.lock();
        if state.link.is_none() || !state.streams.contains(&stream) {
            return Err(TransportError::NotConnected);
        }
        state.link_packets += 1;
        let count = state.link_packets;
        let peer_done = settings.session_packets > 0
            && count >= settings.session_packets
            && !state.peer_teardown_pending;
        if peer_done {
            state.peer_teardown_pending = true;
        }
        drop(state);
        drop(payload);

        let valid = settings.loss_every == 0 || count % settings.loss_every != 0;
        self.shared
            .hub
            .deliver(TransportEvent::DataReceived { stream, valid });

        if peer_done {
            info!(count, "Simulated peer ending the session");
            let events = self.shared.teardown_events(REASON_REMOTE_TERMINATED);
            self.after(settings.stream_delay(), events);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::events::LinkStatus;
    use crate::session::context::BenchContext;

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: SimSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SimSettings::default());
        assert_eq!(settings.tx_mtu, 251);
    }

    #[test]
    fn test_new_requires_runtime() {
        let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", 2);
        assert!(matches!(
            SimTransport::new(hub, SimSettings::default()),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_unknown_link() {
        let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", 2);
        let sim = SimTransport::new(hub, SimSettings::default()).unwrap();
        assert_eq!(
            sim.disconnect_link(LinkId(9)),
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_link_allows_new_request() {
        let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", 2);
        let sim = SimTransport::new(Arc::clone(&hub), SimSettings::default()).unwrap();
        hub.begin_session();

        // Released before its completion fires: nothing reaches the hub
        let first = sim.connect_link(&SIM_PEER).unwrap();
        sim.release_link(first);
        tokio::time::sleep(sim.settings().link_delay() * 2).await;
        assert_eq!(hub.link_status(), LinkStatus::Down);

        let second = sim.connect_link(&SIM_PEER).unwrap();
        assert_ne!(first, second);
        assert_eq!(sim.disconnect_link(first), Err(TransportError::NotConnected));
        tokio::time::sleep(sim.settings().link_delay() * 2).await;
        assert_eq!(hub.link_status(), LinkStatus::Up(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_link_request_is_rejected() {
        let hub = EventHub::new(Arc::new(BenchContext::new()), "isobench", 2);
        let sim = SimTransport::new(hub, SimSettings::default()).unwrap();
        assert!(sim.connect_link(&SIM_PEER).is_ok());
        assert!(matches!(
            sim.connect_link(&SIM_PEER),
            Err(TransportError::Rejected { .. })
        ));
    }
}
