//! Request primitives consumed from the wireless stack
//!
//! Every method here is a request: it returns as soon as the stack has
//! accepted or rejected it. Completions (link up, stream up, data, teardown)
//! arrive later as [`TransportEvent`](super::events::TransportEvent)s
//! delivered to the [`EventHub`](super::events::EventHub).

use crate::config::qos::{BenchConfig, TransportLimits};
use crate::link::buf::PayloadBuf;
use std::fmt;
use thiserror::Error;

/// Errors returned by transport request primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{op} rejected by transport: {code}")]
    Rejected { op: &'static str, code: i32 },

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    #[error("Not connected")]
    NotConnected,

    #[error("No resources available")]
    NoResources,
}

/// Index of a stream slot (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u8);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of an established or pending link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u16);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link {}", self.0)
    }
}

/// Device address of a discovered or connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    /// Address bytes, most significant first
    pub bytes: [u8; 6],
    /// Random (true) or public (false) address
    pub random: bool,
}

impl PeerAddr {
    pub fn new(bytes: [u8; 6], random: bool) -> Self {
        Self { bytes, random }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({})",
            b[0],
            b[1],
            b[2],
            b[3],
            b[4],
            b[5],
            if self.random { "random" } else { "public" }
        )
    }
}

/// Request side of the wireless stack
///
/// Implementations deliver completions to the [`EventHub`](super::events::EventHub)
/// they were built with, possibly from their own threads or tasks.
pub trait IsoTransport: Send + Sync {
    /// Bounds this transport imposes on configurations
    fn limits(&self) -> TransportLimits;

    /// Start scanning for advertising peers
    fn start_discovery(&self) -> Result<(), TransportError>;

    /// Stop scanning
    fn stop_discovery(&self) -> Result<(), TransportError>;

    /// Request a link to `peer`; completion arrives as `LinkConnected` or `LinkFailed`
    fn connect_link(&self, peer: &PeerAddr) -> Result<LinkId, TransportError>;

    /// Request teardown of a link; completion arrives as `LinkDisconnected`
    fn disconnect_link(&self, link: LinkId) -> Result<(), TransportError>;

    /// Drop the local reference to a link handle
    fn release_link(&self, link: LinkId);

    /// Advertise the service so an initiator can find and link to us
    fn start_advertising(&self, service_name: &str) -> Result<(), TransportError>;

    /// Route inbound stream requests to the hub's acceptor
    fn register_stream_acceptor(&self) -> Result<(), TransportError>;

    /// Bind stream slots to a link with the given QoS
    fn bind_streams(
        &self,
        link: LinkId,
        streams: &[StreamId],
        config: &BenchConfig,
    ) -> Result<(), TransportError>;

    /// Request connection of bound streams as one batch
    fn connect_streams(&self, streams: &[StreamId]) -> Result<(), TransportError>;

    /// Request teardown of a single stream
    fn disconnect_stream(&self, stream: StreamId) -> Result<(), TransportError>;

    /// Submit one payload on a stream
    ///
    /// The transport owns the buffer from here on; dropping it (on rejection
    /// or after transmission) returns it to its pool.
    fn send(&self, stream: StreamId, payload: PayloadBuf) -> Result<(), TransportError>;
}
