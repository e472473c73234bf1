//! Transport seam and event delivery
//!
//! This module contains everything between the session orchestrator and the
//! wireless stack:
//! - Request primitives the orchestrator calls ([`transport`])
//! - Typed events and per-category rendezvous points ([`events`])
//! - The per-session stream slot pool ([`pool`])
//! - The bounded payload buffer pool ([`buf`])
//! - An in-process simulated stack ([`sim`])

pub mod buf;
pub mod events;
pub mod pool;
pub mod sim;
pub mod transport;
