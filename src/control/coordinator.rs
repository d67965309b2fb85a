//! Paired acquisition of device resources while an agent holds control.
//!
//! `elevate` takes the wake-lock and raises the probe's sampling rate;
//! `restore` undoes both. Calls out of order are anomalies: they are logged,
//! counted and reported back, never raised as errors, and never leave a
//! resource half-held.

use crate::core::criterion::ControlSettings;
use crate::diagnostics::SharedDiagnostics;
use crate::policy::SamplingPolicy;
use crate::probe::{ListeningProbe, PlatformError, SharedWakeLock};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// An out-of-order resource call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceAnomaly {
    /// `elevate` while already elevated
    DoubleElevate,
    /// `restore` with nothing elevated
    RestoreWithoutElevate,
    /// The shared wake-lock had no holder to release
    UnbalancedRelease,
}

impl std::fmt::Display for ResourceAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceAnomaly::DoubleElevate => write!(f, "elevate called while already elevated"),
            ResourceAnomaly::RestoreWithoutElevate => {
                write!(f, "restore called without a prior elevate")
            }
            ResourceAnomaly::UnbalancedRelease => write!(f, "wake-lock released with no holder"),
        }
    }
}

/// Coordinator statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinatorStats {
    pub elevated: bool,
    pub elevations: u64,
    pub restorations: u64,
    pub anomalies: u64,
    pub held_total: Duration,
}

#[derive(Debug, Default)]
struct Held {
    elevated_since: Option<Instant>,
    wake_lock_held: bool,
    /// Rate to put back on restore; `None` if sampling was not changed
    restore_rate: Option<Option<f64>>,
    /// Which episode settings were applied, if any
    settings_source: Option<String>,
    elevations: u64,
    restorations: u64,
    anomalies: u64,
    held_total: Duration,
}

/// Wraps the wake-lock and the probe's sampling configuration for one agent.
pub struct DeviceResourceCoordinator {
    wake_lock: Arc<SharedWakeLock>,
    probe: Option<Arc<dyn ListeningProbe>>,
    diagnostics: SharedDiagnostics,
    // platform calls run under this lock so elevate and restore never
    // interleave; the agent's state lock is never held here
    held: Mutex<Held>,
}

impl DeviceResourceCoordinator {
    pub fn new(
        wake_lock: Arc<SharedWakeLock>,
        probe: Option<Arc<dyn ListeningProbe>>,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        Self {
            wake_lock,
            probe,
            diagnostics,
            held: Mutex::new(Held::default()),
        }
    }

    /// Acquire the wake-lock and apply the elevated sampling rate.
    ///
    /// Episode `settings`, when given, take precedence over the policy's
    /// sampling rates, and their end-of-control rate is pinned here so the
    /// matching `restore` applies it. Platform failures are logged; whatever
    /// was acquired is remembered so `restore` releases exactly that.
    pub fn elevate(
        &self,
        sampling: &SamplingPolicy,
        settings: Option<&ControlSettings>,
    ) -> Option<ResourceAnomaly> {
        let mut held = self.lock();
        if held.elevated_since.is_some() {
            held.anomalies += 1;
            drop(held);
            return Some(self.anomaly(ResourceAnomaly::DoubleElevate));
        }

        held.elevated_since = Some(Instant::now());
        held.elevations += 1;
        held.settings_source = settings.map(|s| s.source.clone());

        match self.wake_lock.acquire() {
            Ok(()) => held.wake_lock_held = true,
            Err(e) => self.platform_failure("acquire wake-lock", &e),
        }

        held.restore_rate = None;
        let Some(probe) = &self.probe else {
            return None;
        };
        let kind = probe.kind();
        let elevated = settings
            .and_then(|s| s.begin_rate(kind))
            .or(sampling.elevated_rate);

        if let Some(rate) = elevated {
            let previous = probe.sampling_rate();
            // the probe may have been reconfigured even if restart fails
            held.restore_rate = Some(
                settings
                    .and_then(|s| s.end_rate(kind))
                    .or(sampling.baseline_rate)
                    .or(previous),
            );
            match probe.reconfigure(Some(rate)).and_then(|_| probe.restart()) {
                Ok(()) => tracing::info!(
                    %kind,
                    from = ?previous,
                    to = rate,
                    settings = held.settings_source.as_deref().unwrap_or("policy"),
                    "Sampling rate elevated"
                ),
                Err(e) => self.platform_failure("elevate sampling rate", &e),
            }
        }

        None
    }

    /// Release the wake-lock and put the sampling rate back.
    pub fn restore(&self) -> Option<ResourceAnomaly> {
        let mut held = self.lock();
        let Some(since) = held.elevated_since.take() else {
            held.anomalies += 1;
            drop(held);
            return Some(self.anomaly(ResourceAnomaly::RestoreWithoutElevate));
        };

        let elapsed = since.elapsed();
        held.held_total += elapsed;
        held.restorations += 1;
        self.diagnostics.record_held(elapsed);

        let mut anomaly = None;
        if std::mem::take(&mut held.wake_lock_held) {
            match self.wake_lock.release() {
                Ok(()) => {}
                Err(PlatformError::Unbalanced(_)) => {
                    held.anomalies += 1;
                    anomaly = Some(self.anomaly(ResourceAnomaly::UnbalancedRelease));
                }
                Err(e) => self.platform_failure("release wake-lock", &e),
            }
        }

        let source = held.settings_source.take();
        if let (Some(probe), Some(rate)) = (&self.probe, held.restore_rate.take()) {
            match probe.reconfigure(rate).and_then(|_| probe.restart()) {
                Ok(()) => tracing::info!(
                    kind = %probe.kind(),
                    to = ?rate,
                    settings = source.as_deref().unwrap_or("policy"),
                    "Sampling rate restored"
                ),
                Err(e) => self.platform_failure("restore sampling rate", &e),
            }
        }

        anomaly
    }

    pub fn is_elevated(&self) -> bool {
        self.lock().elevated_since.is_some()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let held = self.lock();
        let current = held.elevated_since.map(|s| s.elapsed()).unwrap_or_default();
        CoordinatorStats {
            elevated: held.elevated_since.is_some(),
            elevations: held.elevations,
            restorations: held.restorations,
            anomalies: held.anomalies,
            held_total: held.held_total + current,
        }
    }

    fn anomaly(&self, anomaly: ResourceAnomaly) -> ResourceAnomaly {
        tracing::warn!(%anomaly, "Resource anomaly");
        self.diagnostics.record_anomaly();
        anomaly
    }

    fn platform_failure(&self, action: &str, error: &PlatformError) {
        tracing::warn!(%error, "Failed to {action}");
        self.diagnostics.record_platform_failure();
    }

    fn lock(&self) -> MutexGuard<'_, Held> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::create_shared_diagnostics;
    use crate::probe::types::{ObservationKind, Reading};
    use crate::probe::{LoggingWakeLock, SyntheticProbe};

    fn probe(rate: Option<f64>) -> Arc<SyntheticProbe> {
        Arc::new(SyntheticProbe::new(
            ObservationKind::Compass,
            rate,
            Arc::new(|_: u64| Reading::Compass { heading: 0.0 }),
        ))
    }

    fn coordinator(
        probe: Option<Arc<SyntheticProbe>>,
    ) -> (DeviceResourceCoordinator, Arc<LoggingWakeLock>, Arc<SharedWakeLock>) {
        let platform = Arc::new(LoggingWakeLock::new());
        let shared = SharedWakeLock::new(platform.clone());
        let coordinator = DeviceResourceCoordinator::new(
            shared.clone(),
            probe.map(|p| p as Arc<dyn ListeningProbe>),
            create_shared_diagnostics(),
        );
        (coordinator, platform, shared)
    }

    const ELEVATED: SamplingPolicy = SamplingPolicy {
        elevated_rate: Some(10.0),
        baseline_rate: None,
    };

    #[test]
    fn test_elevate_and_restore_pair() {
        let probe = probe(Some(1.0));
        let (coordinator, platform, shared) = coordinator(Some(probe.clone()));

        assert_eq!(coordinator.elevate(&ELEVATED, None), None);
        assert_eq!(probe.sampling_rate(), Some(10.0));
        assert_eq!(shared.holders(), 1);

        assert_eq!(coordinator.restore(), None);
        assert_eq!(probe.sampling_rate(), Some(1.0));
        assert_eq!(shared.holders(), 0);
        assert_eq!(platform.acquisitions(), 1);
        assert_eq!(platform.releases(), 1);

        let stats = coordinator.stats();
        assert_eq!(stats.elevations, stats.restorations);
        assert!(!stats.elevated);
    }

    #[test]
    fn test_double_elevate_is_reported_not_applied() {
        let (coordinator, platform, _) = coordinator(None);

        coordinator.elevate(&ELEVATED, None);
        assert_eq!(
            coordinator.elevate(&ELEVATED, None),
            Some(ResourceAnomaly::DoubleElevate)
        );
        assert_eq!(platform.acquisitions(), 1);

        coordinator.restore();
        assert_eq!(platform.releases(), 1);
        assert_eq!(coordinator.stats().anomalies, 1);
    }

    #[test]
    fn test_restore_without_elevate() {
        let (coordinator, platform, _) = coordinator(None);
        assert_eq!(
            coordinator.restore(),
            Some(ResourceAnomaly::RestoreWithoutElevate)
        );
        assert_eq!(platform.releases(), 0);
    }

    #[test]
    fn test_baseline_rate_overrides_previous() {
        let probe = probe(Some(1.0));
        let (coordinator, _, _) = coordinator(Some(probe.clone()));
        let sampling = SamplingPolicy {
            elevated_rate: Some(20.0),
            baseline_rate: Some(2.0),
        };

        coordinator.elevate(&sampling, None);
        coordinator.restore();
        assert_eq!(probe.sampling_rate(), Some(2.0));
    }

    #[test]
    fn test_episode_settings_override_policy_rates() {
        use crate::core::criterion::ProbeSetting;

        let probe = probe(Some(1.0));
        let (coordinator, _, _) = coordinator(Some(probe.clone()));
        let settings = ControlSettings {
            source: "heading-north".to_string(),
            begin: vec![ProbeSetting {
                target: Some(ObservationKind::Compass),
                sampling_rate: 30.0,
            }],
            end: vec![ProbeSetting {
                target: None,
                sampling_rate: 0.5,
            }],
        };
        let sampling = SamplingPolicy {
            elevated_rate: Some(20.0),
            baseline_rate: Some(2.0),
        };

        coordinator.elevate(&sampling, Some(&settings));
        assert_eq!(probe.sampling_rate(), Some(30.0));
        coordinator.restore();
        assert_eq!(probe.sampling_rate(), Some(0.5));

        // settings aimed at another probe kind fall back to the policy
        let elsewhere = ControlSettings {
            source: "heart".to_string(),
            begin: vec![ProbeSetting {
                target: Some(ObservationKind::HeartRate),
                sampling_rate: 30.0,
            }],
            end: Vec::new(),
        };
        coordinator.elevate(&sampling, Some(&elsewhere));
        assert_eq!(probe.sampling_rate(), Some(20.0));
        coordinator.restore();
        assert_eq!(probe.sampling_rate(), Some(2.0));
    }

    #[test]
    fn test_no_elevated_rate_leaves_sampling_alone() {
        let probe = probe(Some(1.0));
        let (coordinator, _, shared) = coordinator(Some(probe.clone()));

        coordinator.elevate(&SamplingPolicy::default(), None);
        assert_eq!(probe.sampling_rate(), Some(1.0));
        assert_eq!(shared.holders(), 1);
        coordinator.restore();
        assert_eq!(probe.restarts(), 0);
    }

    #[test]
    fn test_shared_wake_lock_across_coordinators() {
        let platform = Arc::new(LoggingWakeLock::new());
        let shared = SharedWakeLock::new(platform.clone());
        let diagnostics = create_shared_diagnostics();
        let a = DeviceResourceCoordinator::new(shared.clone(), None, diagnostics.clone());
        let b = DeviceResourceCoordinator::new(shared.clone(), None, diagnostics);

        a.elevate(&SamplingPolicy::default(), None);
        b.elevate(&SamplingPolicy::default(), None);
        a.restore();
        assert_eq!(platform.releases(), 0);
        b.restore();
        assert_eq!(platform.acquisitions(), 1);
        assert_eq!(platform.releases(), 1);
    }
}
