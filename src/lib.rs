//! Isobench - isochronous stream benchmarking harness
//!
//! This library re-exports the session orchestrator, transmit scheduler and
//! statistics from `isobench-core`, plus the front end's persistent config
//! and console prompts.

pub mod config;
pub mod prompt;

pub use isobench_core::config::qos;
pub use isobench_core::{link, session, stats};

pub use isobench_core::{
    run_role_loop, BenchConfig, BenchContext, ConfigError, EventHub, IsoTransport, LinkFailure,
    LinkId, LinkStatus, Orchestrator, PayloadBuf, PayloadPool, PeerAddr, Phy, QosConfig,
    ReceiveStats, RecvCounters, Role, RoleLoopSummary, RoleSource, ScriptedRoles, SessionError,
    SessionResult, SessionState, SessionSummary, SimSettings, SimTransport, StatsReport,
    StreamId, TransportError, TransportEvent, TransportLimits,
};
pub use isobench_core::{BUILD_DATE, DEFAULT_MAX_STREAMS, DEFAULT_SERVICE_NAME, VERSION};
