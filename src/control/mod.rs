//! Control layer: agents, their resources and their schedules.
//!
//! This module contains:
//! - The generic adaptive agent and its error type
//! - The device resource coordinator (wake-lock + sampling rate)
//! - Transition side effects and completion-check decisions
//! - Cancellation, recurring scheduling and the agent runtime

pub mod agent;
pub mod cancel;
pub mod completion;
pub mod coordinator;
pub mod effects;
pub mod runtime;
pub mod scheduler;

// Re-export commonly used types
pub use agent::{
    AccelerationAgent, AdaptiveAgent, AgentContext, AgentError, CompassAgent, CompletionStatus,
    DeclarativeAgent,
};
pub use cancel::CancellationSignal;
pub use completion::{CompletionAction, CompletionActionScheduler};
pub use coordinator::{CoordinatorStats, DeviceResourceCoordinator, ResourceAnomaly};
pub use effects::{CompletionStep, RelinquishReason, SideEffect};
pub use runtime::AgentRuntime;
pub use scheduler::{
    RecurringTask, ScheduleHandle, ScheduleRequest, Scheduler, SchedulerError, TaskControl,
    TaskFuture, TokioScheduler,
};
