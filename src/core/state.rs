//! Agent state machine.
//!
//! ```text
//!              BeginObservation             CriterionMet
//!   ┌──────┐ ─────────────────▶ ┌───────────┐ ─────────────▶ ┌───────────────┐
//!   │ Idle │ ◀───────────────── │ Observing │                │ ActiveControl │──┐
//!   └──────┘  CriterionUnmet /  └───────────┘                └───────────────┘  │
//!    │   ▲    ObservationCancelled                                              │ Relinquish
//!    │   │                                                                      ▼
//!    │   │        ControlEnded                                         ┌───────────────┐
//!    │   └──────────────────────────────────────────────────────────── │ EndingControl │
//!    │                                                                 └───────────────┘
//!    │  FastPath          ┌──────────────────────┐   Relinquish                 ▲
//!    └──────────────────▶ │ OpportunisticControl │ ─────────────────────────────┘
//!                         └──────────────────────┘
//! ```
//!
//! The state is read and written under one lock. A transition holds a
//! "transitioning" flag from the moment the new state is written until its
//! side effects are done; other transitions are refused in that window, so
//! exactly one of several racing callers wins.

use crate::policy::ControlTiers;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// State of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    Idle,
    Observing,
    OpportunisticControl,
    ActiveControl,
    EndingControl,
}

impl AgentState {
    /// Whether the agent holds sensing control in this state.
    pub fn is_controlling(self) -> bool {
        matches!(
            self,
            AgentState::OpportunisticControl | AgentState::ActiveControl
        )
    }

    /// The three-state view used by single-tier agents.
    pub fn coarse(self) -> CoarseState {
        match self {
            AgentState::Idle => CoarseState::Idle,
            AgentState::Observing => CoarseState::Observing,
            AgentState::OpportunisticControl
            | AgentState::ActiveControl
            | AgentState::EndingControl => CoarseState::ActionOngoing,
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Idle / Observing / ActionOngoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoarseState {
    Idle,
    Observing,
    ActionOngoing,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    /// A scheduled act cycle starts a fresh observation period
    BeginObservation,
    /// An observation arriving while idle met the fast-path criterion
    FastPath,
    /// The observation period ended with the criterion met
    CriterionMet,
    /// The observation period ended with the criterion not met
    CriterionUnmet,
    /// The observation period was cut short
    ObservationCancelled,
    /// Control is being given up
    Relinquish,
    /// Control side effects have been undone
    ControlEnded,
}

/// The transition table. `None` means the event does nothing in that state.
pub fn next_state(state: AgentState, event: AgentEvent, tiers: ControlTiers) -> Option<AgentState> {
    use AgentEvent::*;
    use AgentState::*;

    match (state, event) {
        (Idle, BeginObservation) => Some(Observing),
        (Idle, FastPath) => Some(match tiers {
            ControlTiers::Tiered => OpportunisticControl,
            ControlTiers::Single => ActiveControl,
        }),
        (Observing, CriterionMet) => Some(ActiveControl),
        (Observing, CriterionUnmet) | (Observing, ObservationCancelled) => Some(Idle),
        (OpportunisticControl, Relinquish) | (ActiveControl, Relinquish) => Some(EndingControl),
        (EndingControl, ControlEnded) => Some(Idle),
        _ => None,
    }
}

/// Why a transition was not made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRefusal {
    /// Another transition's side effects are still in flight
    Busy,
    /// The event does nothing in the current state
    NotPermitted { state: AgentState, event: AgentEvent },
}

/// A completed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn description(&self) -> String {
        format!("{} --> {}", self.from, self.to)
    }
}

struct MachineState {
    state: AgentState,
    transitioning: bool,
    entered_at: DateTime<Utc>,
}

/// Holds the current state and enforces legal transitions.
pub struct AgentStateMachine {
    inner: Mutex<MachineState>,
    // signalled whenever a transition's side effects finish
    settled: Condvar,
}

impl AgentStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MachineState {
                state: AgentState::Idle,
                transitioning: false,
                entered_at: Utc::now(),
            }),
            settled: Condvar::new(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.lock().state
    }

    /// When the current state was entered.
    pub fn entered_at(&self) -> DateTime<Utc> {
        self.lock().entered_at
    }

    /// Whether a transition's side effects are in flight.
    pub fn is_transitioning(&self) -> bool {
        self.lock().transitioning
    }

    /// Block until no transition is in flight, up to `timeout`.
    ///
    /// Returns `false` if a transition was still in flight when the timeout
    /// expired. Never call this while holding a [`TransitionGuard`].
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let inner = self.lock();
        let (inner, _) = self
            .settled
            .wait_timeout_while(inner, timeout, |s| s.transitioning)
            .unwrap_or_else(PoisonError::into_inner);
        !inner.transitioning
    }

    /// Check-and-set the state for `event`.
    ///
    /// On success the new state is already visible and the returned guard
    /// keeps other transitions out until it is finished or dropped. The lock
    /// itself is released before returning, so side effects run unlocked.
    pub fn begin(
        &self,
        event: AgentEvent,
        tiers: ControlTiers,
    ) -> Result<TransitionGuard<'_>, TransitionRefusal> {
        let mut inner = self.lock();
        if inner.transitioning {
            return Err(TransitionRefusal::Busy);
        }

        let from = inner.state;
        let to = next_state(from, event, tiers).ok_or(TransitionRefusal::NotPermitted {
            state: from,
            event,
        })?;

        let at = Utc::now();
        inner.state = to;
        inner.entered_at = at;
        inner.transitioning = true;

        Ok(TransitionGuard {
            machine: self,
            transition: StateTransition { from, to, at },
        })
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AgentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-flight transition. Dropping it ends the transitioning window.
pub struct TransitionGuard<'a> {
    machine: &'a AgentStateMachine,
    transition: StateTransition,
}

impl TransitionGuard<'_> {
    pub fn transition(&self) -> &StateTransition {
        &self.transition
    }

    /// Mark the transition's side effects as done.
    pub fn finish(self) -> StateTransition {
        self.transition.clone()
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.machine.lock().transitioning = false;
        self.machine.settled.notify_all();
    }
}
