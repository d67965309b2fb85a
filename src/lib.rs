//! Adaptive Sensing Agent - per-sensor control of device sensing.
//!
//! This library provides agents that watch a stream of sensor observations
//! and decide, each on its own, when to escalate a device's sensing (keep it
//! awake, raise a probe's sampling rate) and when to give that control back.
//!
//! # Guarantees
//!
//! - **Single winner**: of a fast-path escalation and a scheduled act cycle
//!   racing out of Idle, exactly one takes control
//! - **Paired resources**: every elevate is matched by exactly one restore,
//!   including when an operation is cancelled midway
//! - **Wholesale policy updates**: a rejected policy leaves the previous one active
//! - **No crashes**: anomalies and inconclusive evaluations are logged and counted
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Adaptive Agent                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────┐           │
//! │  │   Probes    │──▶│ Observation  │──▶│  Criterion  │           │
//! │  │ (observe)   │   │   Windows    │   │ (evaluate)  │           │
//! │  └─────────────┘   └──────────────┘   └─────────────┘           │
//! │                                              │                  │
//! │                                              ▼                  │
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────┐           │
//! │  │ Completion  │◀──│    State     │──▶│  Resource   │           │
//! │  │   Checks    │   │   Machine    │   │ Coordinator │           │
//! │  └─────────────┘   └──────────────┘   └─────────────┘           │
//! │         │                 │                                     │
//! │         ▼                 ▼                                     │
//! │  ┌─────────────┐   ┌──────────────┐                             │
//! │  │  Scheduler  │   │   Protocol   │                             │
//! │  │   (tokio)   │   │  (records)   │                             │
//! │  └─────────────┘   └──────────────┘                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use adaptive_sensing_agent::control::{AccelerationAgent, AgentContext};
//! use adaptive_sensing_agent::diagnostics::create_shared_diagnostics;
//! use adaptive_sensing_agent::probe::{LoggingWakeLock, Observation, SharedWakeLock};
//! use adaptive_sensing_agent::protocol::LocalProtocol;
//! use std::sync::Arc;
//!
//! let (protocol, _records) = LocalProtocol::new("study");
//! let context = AgentContext::new(
//!     SharedWakeLock::new(Arc::new(LoggingWakeLock::new())),
//!     Arc::new(protocol),
//!     create_shared_diagnostics(),
//! );
//! let policy = serde_json::json!({
//!     "action-interval": "00:00:10",
//!     "observation-duration": "00:00:05",
//!     "threshold": 0.5,
//!     "completion-action-interval": "00:00:20",
//! });
//! let agent = AccelerationAgent::new("acceleration", &policy, context).unwrap();
//!
//! // a proximity reading below the sensor's range escalates immediately
//! let action = agent.observe(Observation::proximity(0.0, 5.0));
//! assert!(action.is_some());
//! ```

pub mod config;
pub mod control;
pub mod core;
pub mod diagnostics;
pub mod policy;
pub mod probe;
pub mod protocol;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use control::{
    AdaptiveAgent, AgentContext, AgentError, AgentRuntime, CancellationSignal, CompletionAction,
    CompletionActionScheduler, DeviceResourceCoordinator, Scheduler, TokioScheduler,
};
pub use core::{AgentState, Criterion, Decision, ObservationWindows, WindowSnapshot};
pub use diagnostics::{AgentDiagnostics, DiagnosticsStats, SharedDiagnostics};
pub use policy::{Policy, PolicyError};
pub use probe::{Observation, ObservationKind, Reading};
pub use protocol::{LocalProtocol, Protocol, StateTransitionRecord};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
