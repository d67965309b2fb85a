//! Agent diagnostics counters.
//!
//! Conditions that are absorbed locally (resource anomalies, inconclusive
//! evaluations, platform failures) surface only here and in the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Diagnostics for one session of one or more agents.
#[derive(Debug)]
pub struct AgentDiagnostics {
    /// Observations accepted into windows
    observations: AtomicU64,
    /// Committed state transitions
    transitions: AtomicU64,
    /// Entries into a controlling state
    control_episodes: AtomicU64,
    /// Completion checks run
    completion_checks: AtomicU64,
    /// Completion checks that kept control
    renewals: AtomicU64,
    /// Evaluations that had too little data to decide
    inconclusive_evaluations: AtomicU64,
    /// Double elevates and unbalanced restores/releases
    resource_anomalies: AtomicU64,
    /// Failed wake-lock or probe calls
    platform_failures: AtomicU64,
    /// Cumulative time control was held
    held_millis: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl AgentDiagnostics {
    pub fn new() -> Self {
        Self {
            observations: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            control_episodes: AtomicU64::new(0),
            completion_checks: AtomicU64::new(0),
            renewals: AtomicU64::new(0),
            inconclusive_evaluations: AtomicU64::new(0),
            resource_anomalies: AtomicU64::new(0),
            platform_failures: AtomicU64::new(0),
            held_millis: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create diagnostics that persist to `path`, resuming any saved totals.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut diagnostics = Self::new();
        diagnostics.persist_path = Some(path);

        if let Err(e) = diagnostics.load() {
            tracing::warn!("Could not load previous diagnostics: {e}");
        }

        diagnostics
    }

    pub fn record_observation(&self) {
        self.observations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_episode(&self) {
        self.control_episodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion_check(&self) {
        self.completion_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renewal(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inconclusive(&self) {
        self.inconclusive_evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self) {
        self.resource_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_platform_failure(&self) {
        self.platform_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a finished control period to the held total.
    pub fn record_held(&self, held: std::time::Duration) {
        let millis = u64::try_from(held.as_millis()).unwrap_or(u64::MAX);
        self.held_millis.fetch_add(millis, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            observations: self.observations.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            control_episodes: self.control_episodes.load(Ordering::Relaxed),
            completion_checks: self.completion_checks.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            inconclusive_evaluations: self.inconclusive_evaluations.load(Ordering::Relaxed),
            resource_anomalies: self.resource_anomalies.load(Ordering::Relaxed),
            platform_failures: self.platform_failures.load(Ordering::Relaxed),
            held_millis: self.held_millis.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedDiagnostics {
                stats: self.stats(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load saved totals from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let stats = Self::read_persisted(path)?;

                self.observations.store(stats.observations, Ordering::Relaxed);
                self.transitions.store(stats.transitions, Ordering::Relaxed);
                self.control_episodes
                    .store(stats.control_episodes, Ordering::Relaxed);
                self.completion_checks
                    .store(stats.completion_checks, Ordering::Relaxed);
                self.renewals.store(stats.renewals, Ordering::Relaxed);
                self.inconclusive_evaluations
                    .store(stats.inconclusive_evaluations, Ordering::Relaxed);
                self.resource_anomalies
                    .store(stats.resource_anomalies, Ordering::Relaxed);
                self.platform_failures
                    .store(stats.platform_failures, Ordering::Relaxed);
                self.held_millis.store(stats.held_millis, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Read persisted stats without creating a live diagnostics object.
    pub fn read_persisted(path: &std::path::Path) -> Result<DiagnosticsStats, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedDiagnostics =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(persisted.stats)
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.observations,
            &self.transitions,
            &self.control_episodes,
            &self.completion_checks,
            &self.renewals,
            &self.inconclusive_evaluations,
            &self.resource_anomalies,
            &self.platform_failures,
            &self.held_millis,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for AgentDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of diagnostics counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsStats {
    pub observations: u64,
    pub transitions: u64,
    pub control_episodes: u64,
    pub completion_checks: u64,
    pub renewals: u64,
    pub inconclusive_evaluations: u64,
    pub resource_anomalies: u64,
    pub platform_failures: u64,
    pub held_millis: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl DiagnosticsStats {
    pub fn summary(&self) -> String {
        format!(
            "Agent Diagnostics:\n\
             - Observations processed: {}\n\
             - State transitions: {}\n\
             - Control episodes: {}\n\
             - Completion checks: {} ({} renewed)\n\
             - Inconclusive evaluations: {}\n\
             - Resource anomalies: {}\n\
             - Platform failures: {}\n\
             - Control held: {:.1} seconds\n\
             - Session duration: {} seconds",
            self.observations,
            self.transitions,
            self.control_episodes,
            self.completion_checks,
            self.renewals,
            self.inconclusive_evaluations,
            self.resource_anomalies,
            self.platform_failures,
            self.held_millis as f64 / 1000.0,
            self.session_duration_secs
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDiagnostics {
    #[serde(flatten)]
    stats: DiagnosticsStats,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared diagnostics.
pub type SharedDiagnostics = Arc<AgentDiagnostics>;

pub fn create_shared_diagnostics() -> SharedDiagnostics {
    Arc::new(AgentDiagnostics::new())
}

pub fn create_shared_diagnostics_with_persistence(path: PathBuf) -> SharedDiagnostics {
    Arc::new(AgentDiagnostics::with_persistence(path))
}
