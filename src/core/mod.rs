//! Core functionality for the adaptive sensing agents.
//!
//! This module contains:
//! - Bounded per-kind observation windows
//! - Window statistics and the pluggable control criteria
//! - Declarative (policy-defined) criteria
//! - The agent state machine

pub mod aspl;
pub mod criterion;
pub mod state;
pub mod statistics;
pub mod window;

// Re-export commonly used types
pub use aspl::DeclarativeCriterion;
pub use criterion::{
    is_met, AccelerationCriterion, CompassCriterion, ControlSettings, Criterion, Decision,
    HeadingRange, MagnitudeDeviation, NearSurface, ProbeSetting,
};
pub use state::{
    AgentEvent, AgentState, AgentStateMachine, CoarseState, StateTransition, TransitionGuard,
    TransitionRefusal,
};
pub use statistics::WindowStatistics;
pub use window::{ObservationWindows, WindowLimits, WindowSnapshot, DEFAULT_WINDOW_CAPACITY};
