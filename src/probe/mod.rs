//! Probe-side interfaces for the adaptive sensing core.
//!
//! Probes push [`Observation`]s into agents and accept sampling-rate
//! reconfiguration while an agent holds control. The OS bindings behind real
//! probes live outside this crate; [`synthetic`] provides a generator-backed
//! probe for simulation and tests.

pub mod synthetic;
pub mod types;
pub mod wake_lock;

// Re-export commonly used types
pub use synthetic::{ReadingGenerator, SyntheticProbe};
pub use types::{Observation, ObservationKind, Reading};
pub use wake_lock::{LoggingWakeLock, SharedWakeLock, WakeLock};

/// Failures reported by platform collaborators (probes, wake-locks).
///
/// These are logged by the caller and never halt an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The resource does not exist on this device
    Unavailable(String),
    /// The platform call was made and failed
    Failed(String),
    /// A release was requested with nothing held
    Unbalanced(String),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::Unavailable(e) => write!(f, "Unavailable: {e}"),
            PlatformError::Failed(e) => write!(f, "Platform call failed: {e}"),
            PlatformError::Unbalanced(e) => write!(f, "Unbalanced release: {e}"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// A probe whose sampling rate can be changed at run time.
///
/// Rates are expressed as maximum data stores per second; `None` means the
/// probe's unthrottled native rate.
pub trait ListeningProbe: Send + Sync {
    /// Kind of observation the probe produces.
    fn kind(&self) -> ObservationKind;

    /// Currently configured sampling rate.
    fn sampling_rate(&self) -> Option<f64>;

    /// Set a new sampling rate. Takes effect on the next restart.
    fn reconfigure(&self, rate: Option<f64>) -> Result<(), PlatformError>;

    /// Restart the probe so it picks up new settings.
    fn restart(&self) -> Result<(), PlatformError>;
}
