//! Stream configuration
//!
//! Per-direction quality-of-service parameters and the per-session stream
//! count, validated against the bounds the transport imposes.

pub mod qos;
