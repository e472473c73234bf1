//! Role-specific session state machine
//!
//! Each role walks its own chain of states. Forward steps follow the table in
//! [`SessionState::can_transition`]; any state may fall back to `Idle` on
//! abort. Everything else is rejected as an invalid transition.

use crate::session::orchestrator::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Which side of the link this device plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Central: discovers, links and creates streams
    Initiator,
    /// Peripheral: advertises and accepts streams
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initiator" | "central" | "c" => Ok(Role::Initiator),
            "responder" | "peripheral" | "p" => Ok(Role::Responder),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    // Initiator only
    Discovering,
    Linking,
    BindingStreams,
    // Responder only
    Advertising,
    WaitingLink,
    WaitingStreamRequest,
    // Shared
    StreamsConnecting,
    Active,
    Disconnecting,
}

impl SessionState {
    /// Whether `role` may move from `self` to `next`
    pub fn can_transition(self, role: Role, next: SessionState) -> bool {
        use SessionState::*;

        if next == Idle {
            return self != Idle;
        }

        match role {
            Role::Initiator => matches!(
                (self, next),
                (Idle, Discovering)
                    | (Discovering, Linking)
                    | (Linking, BindingStreams)
                    | (BindingStreams, StreamsConnecting)
                    | (StreamsConnecting, Active)
                    | (Active, Disconnecting)
            ),
            Role::Responder => matches!(
                (self, next),
                (Idle, Advertising)
                    | (Advertising, WaitingLink)
                    | (WaitingLink, WaitingStreamRequest)
                    | (WaitingStreamRequest, StreamsConnecting)
                    | (StreamsConnecting, Active)
                    | (Active, Disconnecting)
            ),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Discovering => "Discovering",
            SessionState::Linking => "Linking",
            SessionState::BindingStreams => "BindingStreams",
            SessionState::Advertising => "Advertising",
            SessionState::WaitingLink => "WaitingLink",
            SessionState::WaitingStreamRequest => "WaitingStreamRequest",
            SessionState::StreamsConnecting => "StreamsConnecting",
            SessionState::Active => "Active",
            SessionState::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

/// Current state plus the role whose table governs it
#[derive(Debug, Clone)]
pub struct StateMachine {
    role: Role,
    state: SessionState,
    history: Vec<SessionState>,
}

impl StateMachine {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// States visited so far, starting with `Idle`
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Move to `next` if the role's table allows it
    pub fn advance(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition(self.role, next) {
            return Err(SessionError::InvalidTransition {
                role: self.role,
                from: self.state,
                to: next,
            });
        }
        debug!(role = %self.role, from = %self.state, to = %next, "Session state change");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Return to `Idle` from wherever the session is (no-op when already idle)
    pub fn reset(&mut self) {
        if self.state != SessionState::Idle {
            self.state = SessionState::Idle;
            self.history.push(SessionState::Idle);
        }
    }
}
