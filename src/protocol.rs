//! The protocol boundary.
//!
//! Agents run inside a researcher's protocol. They consult its run state on
//! every completion check and hand it a record of every state transition for
//! the local data store.

use crate::core::state::{AgentState, StateTransition};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// A stored record of one agent state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub previous: AgentState,
    pub current: AgentState,
    /// "Previous --> Current"
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl StateTransitionRecord {
    pub fn new(agent_id: &str, transition: &StateTransition) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            previous: transition.from,
            current: transition.to,
            description: transition.description(),
            timestamp: transition.at,
        }
    }
}

/// What an agent needs from its owning protocol.
pub trait Protocol: Send + Sync {
    /// Whether the protocol is running. Control is relinquished when it is not.
    fn is_running(&self) -> bool;

    /// Store a transition record.
    fn record_transition(&self, record: StateTransitionRecord);
}

/// An in-process protocol that streams records over a channel.
pub struct LocalProtocol {
    id: String,
    running: AtomicBool,
    records: Sender<StateTransitionRecord>,
}

impl LocalProtocol {
    /// Create a running protocol and the receiving end of its record stream.
    pub fn new(id: impl Into<String>) -> (Self, Receiver<StateTransitionRecord>) {
        let (records, receiver) = unbounded();
        let protocol = Self {
            id: id.into(),
            running: AtomicBool::new(true),
            records,
        };
        (protocol, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        tracing::info!(protocol = %self.id, running, "Protocol run state changed");
    }
}

impl Protocol for LocalProtocol {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn record_transition(&self, record: StateTransitionRecord) {
        if self.records.send(record).is_err() {
            tracing::debug!(protocol = %self.id, "Record receiver dropped; transition not stored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{AgentEvent, AgentStateMachine};
    use crate::policy::ControlTiers;

    #[test]
    fn test_records_are_streamed() {
        let (protocol, records) = LocalProtocol::new("study");
        let machine = AgentStateMachine::new();
        let transition = machine
            .begin(AgentEvent::BeginObservation, ControlTiers::Tiered)
            .unwrap()
            .finish();

        protocol.record_transition(StateTransitionRecord::new("compass", &transition));

        let record = records.try_recv().unwrap();
        assert_eq!(record.agent_id, "compass");
        assert_eq!(record.previous, AgentState::Idle);
        assert_eq!(record.current, AgentState::Observing);
        assert_eq!(record.description, "Idle --> Observing");
    }

    #[test]
    fn test_run_state() {
        let (protocol, _records) = LocalProtocol::new("study");
        assert!(protocol.is_running());
        protocol.set_running(false);
        assert!(!protocol.is_running());
    }
}
