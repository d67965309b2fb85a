//! Diagnostics for the adaptive sensing agents.
//!
//! Counters for what the agents did and what went wrong without failing,
//! kept so a researcher can audit how often sensing was escalated.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_diagnostics, create_shared_diagnostics_with_persistence, AgentDiagnostics,
    DiagnosticsStats, SharedDiagnostics,
};
