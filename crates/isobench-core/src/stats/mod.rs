//! Receive statistics and connection-duration trends
//!
//! Classifies received packets as valid or lost across three horizons
//! (process lifetime, current session, most recent window) and keeps the
//! cumulative moving average of stream-set connection durations.

pub mod duration;
pub mod tracker;
