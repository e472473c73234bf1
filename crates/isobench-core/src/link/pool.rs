//! Stream slot pool
//!
//! A fixed number of stream slots, one per concurrent stream the transport
//! supports. Slots are claimed by the bind path (initiator) or the accept
//! path (responder) and handed back in one go on full disconnect. State
//! changes coming from events are idempotent: a slot already disconnected
//! stays disconnected.

use crate::link::transport::StreamId;
use std::fmt;

/// Lifecycle of one stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not part of any session
    Free,
    /// Claimed by the session (bound or accepted), not yet connected
    Bound,
    /// Connect requested, waiting for the connected event
    Connecting,
    /// Connected and eligible for transmit
    Connected,
    /// Disconnect requested locally, waiting for the event
    Disconnecting,
    /// Disconnected event received
    Disconnected,
}

impl StreamState {
    /// Whether a disconnect request for this slot would be redundant
    pub fn is_terminating(self) -> bool {
        matches!(
            self,
            StreamState::Free | StreamState::Disconnecting | StreamState::Disconnected
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Free => "free",
            StreamState::Bound => "bound",
            StreamState::Connecting => "connecting",
            StreamState::Connected => "connected",
            StreamState::Disconnecting => "disconnecting",
            StreamState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Fixed set of stream slots
#[derive(Debug, Clone)]
pub struct StreamPool {
    slots: Vec<StreamState>,
}

impl StreamPool {
    /// Create a pool with `capacity` free slots (at most 256)
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![StreamState::Free; capacity.min(u8::MAX as usize + 1)],
        }
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots not claimed by any session
    pub fn free_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| **s == StreamState::Free)
            .count()
    }

    /// Claim the lowest free slot
    pub fn claim(&mut self) -> Option<StreamId> {
        let index = self.slots.iter().position(|s| *s == StreamState::Free)?;
        self.slots[index] = StreamState::Bound;
        Some(StreamId(index as u8))
    }

    /// Claim `count` slots at once, or none if not enough are free
    pub fn claim_many(&mut self, count: usize) -> Option<Vec<StreamId>> {
        if self.free_count() < count {
            return None;
        }
        let mut claimed = Vec::with_capacity(count);
        for _ in 0..count {
            claimed.push(self.claim()?);
        }
        Some(claimed)
    }

    /// Current state of a slot (None if out of range)
    pub fn state(&self, id: StreamId) -> Option<StreamState> {
        self.slots.get(id.0 as usize).copied()
    }

    /// Move a claimed slot to a new state
    ///
    /// Free slots cannot be moved (events for unclaimed slots are ignored),
    /// and a disconnected slot only leaves that state through [`Self::release_all`].
    ///
    /// # Returns
    /// The previous state if the change was applied
    pub fn set_state(&mut self, id: StreamId, next: StreamState) -> Option<StreamState> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let prev = *slot;
        match prev {
            StreamState::Free => None,
            StreamState::Disconnected if next != StreamState::Disconnected => None,
            _ => {
                *slot = next;
                Some(prev)
            }
        }
    }

    /// Slots in the given state
    pub fn in_state(&self, state: StreamState) -> Vec<StreamId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == state)
            .map(|(i, _)| StreamId(i as u8))
            .collect()
    }

    /// Slots currently eligible for transmit
    pub fn connected(&self) -> Vec<StreamId> {
        self.in_state(StreamState::Connected)
    }

    /// Slots claimed by the current session
    pub fn claimed(&self) -> Vec<StreamId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != StreamState::Free)
            .map(|(i, _)| StreamId(i as u8))
            .collect()
    }

    /// Return every slot to the free pool
    ///
    /// # Returns
    /// Number of slots that were claimed
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if *slot != StreamState::Free {
                *slot = StreamState::Free;
                released += 1;
            }
        }
        released
    }
}
