//! Isobench Core - Session orchestration, transmit scheduling, and statistics
//!
//! This library drives isochronous streaming benchmarks between an initiator
//! (central) and a responder (peripheral). It sets up a link and one or more
//! streams through an [`IsoTransport`], pushes a steady cadence of fixed-size
//! payloads, and classifies every received packet as valid or lost.

pub mod config;
pub mod link;
pub mod session;
pub mod stats;

pub use config::qos::{BenchConfig, ConfigError, Phy, QosConfig, TransportLimits};
pub use link::buf::{PayloadBuf, PayloadPool};
pub use link::events::{EventHub, LinkStatus, TransportEvent};
pub use link::sim::{SimSettings, SimTransport};
pub use link::transport::{IsoTransport, LinkId, PeerAddr, StreamId, TransportError};
pub use session::context::BenchContext;
pub use session::orchestrator::{
    LinkFailure, Orchestrator, SessionError, SessionResult, SessionSummary,
};
pub use session::role_loop::{run_role_loop, RoleLoopSummary, RoleSource, ScriptedRoles};
pub use session::state::{Role, SessionState};
pub use stats::tracker::{ReceiveStats, RecvCounters, StatsReport};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default maximum number of concurrent streams the transport supports
pub const DEFAULT_MAX_STREAMS: usize = 2;

/// Default transport MTU for a single payload (bytes)
pub const DEFAULT_TX_MTU: u16 = 251;

/// Service name the responder advertises and the initiator looks for
pub const DEFAULT_SERVICE_NAME: &str = "isobench";
