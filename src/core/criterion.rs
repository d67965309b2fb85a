//! Control criteria evaluated over observation windows.
//!
//! A criterion reduces a [`WindowSnapshot`] to a [`Decision`]. Evaluation
//! returns `None` when the window holds too little data to decide; callers
//! treat that exactly like "criterion not met".
//!
//! Boundary semantics are literal: magnitude deviation must strictly exceed
//! its threshold, while a heading exactly half the range away is in range.

use crate::core::statistics::mean_magnitude;
use crate::core::window::WindowSnapshot;
use crate::policy::{Policy, PolicyError};
use crate::probe::types::{Observation, ObservationKind, Reading};
use serde::{Deserialize, Serialize};

/// Outcome of a criterion evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the criterion holds
    pub met: bool,
    /// The criterion value the decision was based on
    pub value: f64,
}

impl Decision {
    pub fn new(met: bool, value: f64) -> Self {
        Self { met, value }
    }
}

/// Whether an optional decision counts as "met". Inconclusive is not met.
pub fn is_met(decision: Option<Decision>) -> bool {
    decision.is_some_and(|d| d.met)
}

/// A pluggable control criterion, selected per sensor kind.
pub trait Criterion: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Build the criterion from a policy's parameters.
    fn from_policy(policy: &Policy) -> Result<Self, PolicyError>
    where
        Self: Sized;

    /// Evaluate the full window.
    fn evaluate(&self, snapshot: &WindowSnapshot) -> Option<Decision>;

    /// Fast-path check for an observation arriving while the agent is idle.
    ///
    /// The default never escalates opportunistically.
    fn opportunistic(&self, _observation: &Observation, _snapshot: &WindowSnapshot) -> Option<Decision> {
        None
    }

    /// Sensing settings for the control episode a met `decision` starts.
    ///
    /// They are fixed when the episode begins, so whatever began control
    /// also ends it, even if the policy changes in between.
    fn control_settings(&self, _decision: &Decision) -> Option<ControlSettings> {
        None
    }
}

/// Probe settings applied when a control episode begins and ends.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlSettings {
    /// What chose these settings, for logs
    pub source: String,
    pub begin: Vec<ProbeSetting>,
    pub end: Vec<ProbeSetting>,
}

impl ControlSettings {
    /// Sampling rate to apply to a `kind` probe when control begins.
    pub fn begin_rate(&self, kind: ObservationKind) -> Option<f64> {
        rate_for(&self.begin, kind)
    }

    /// Sampling rate to restore on a `kind` probe when control ends.
    pub fn end_rate(&self, kind: ObservationKind) -> Option<f64> {
        rate_for(&self.end, kind)
    }
}

fn rate_for(settings: &[ProbeSetting], kind: ObservationKind) -> Option<f64> {
    settings
        .iter()
        .rev()
        .find(|s| s.target.map_or(true, |t| t == kind))
        .map(|s| s.sampling_rate)
}

/// One probe setting, written in a policy as
/// `{ "target-type": "acceleration", "property-name": "sampling-rate", "value": 50 }`.
///
/// Without a target the setting applies to whichever probe the agent controls.
/// `property-type` is accepted in place of `target-type`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawProbeSetting")]
pub struct ProbeSetting {
    pub target: Option<ObservationKind>,
    /// Maximum data stores per second
    pub sampling_rate: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawProbeSetting {
    #[serde(default)]
    target_type: Option<String>,
    #[serde(default)]
    property_type: Option<String>,
    property_name: String,
    value: f64,
}

impl TryFrom<RawProbeSetting> for ProbeSetting {
    type Error = String;

    fn try_from(raw: RawProbeSetting) -> Result<Self, Self::Error> {
        match raw.property_name.as_str() {
            "sampling-rate" | "max-data-stores-per-second" => {}
            other => return Err(format!("unsupported control setting '{other}'")),
        }
        if !(raw.value.is_finite() && raw.value > 0.0) {
            return Err(format!("sampling rate must be positive, got {}", raw.value));
        }

        let target = match raw.target_type.or(raw.property_type) {
            None => None,
            Some(name) => Some(
                ObservationKind::from_name(&name)
                    .ok_or_else(|| format!("unknown observation kind '{name}'"))?,
            ),
        };
        Ok(Self {
            target,
            sampling_rate: raw.value,
        })
    }
}

/// Average acceleration magnitude deviation from 1 g.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnitudeDeviation {
    pub threshold: f64,
}

impl MagnitudeDeviation {
    pub fn evaluate(&self, snapshot: &WindowSnapshot) -> Option<Decision> {
        // readings include gravity, so a device at rest averages 1 g
        let deviation = (mean_magnitude(snapshot.get(ObservationKind::Acceleration))? - 1.0).abs();
        Some(Decision::new(deviation > self.threshold, deviation))
    }
}

/// Most recent heading within `range / 2` degrees of a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadingRange {
    pub target: f64,
    pub range: f64,
}

impl HeadingRange {
    pub fn evaluate(&self, snapshot: &WindowSnapshot) -> Option<Decision> {
        match snapshot.latest(ObservationKind::Compass)?.reading {
            Reading::Compass { heading } => {
                let distance = heading_distance(self.target, heading);
                Some(Decision::new(distance <= self.range / 2.0, distance))
            }
            _ => None,
        }
    }
}

/// Most recent proximity reading closer than the sensor's maximum range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NearSurface;

impl NearSurface {
    pub fn evaluate(&self, snapshot: &WindowSnapshot) -> Option<Decision> {
        match snapshot.latest(ObservationKind::Proximity)?.reading {
            Reading::Proximity {
                distance,
                max_distance,
            } => Some(Decision::new(distance < max_distance, distance)),
            _ => None,
        }
    }
}

/// Shortest angular distance between two headings, in degrees.
pub fn heading_distance(a: f64, b: f64) -> f64 {
    let distance = (a - b).abs() % 360.0;
    distance.min(360.0 - distance)
}

/// Escalates when the device is moving or lying against a surface.
///
/// Window evaluation checks both conditions; the fast path checks the one
/// matching the arriving reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerationCriterion {
    pub magnitude: MagnitudeDeviation,
    pub near_surface: NearSurface,
}

impl Criterion for AccelerationCriterion {
    fn name(&self) -> &'static str {
        "acceleration"
    }

    fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        if policy.threshold < 0.0 {
            return Err(PolicyError::Invalid {
                key: "threshold".to_string(),
                reason: "magnitude threshold must not be negative".to_string(),
            });
        }
        Ok(Self {
            magnitude: MagnitudeDeviation {
                threshold: policy.threshold,
            },
            near_surface: NearSurface,
        })
    }

    fn evaluate(&self, snapshot: &WindowSnapshot) -> Option<Decision> {
        let near = self.near_surface.evaluate(snapshot);
        if is_met(near) {
            return near;
        }
        self.magnitude.evaluate(snapshot).or(near)
    }

    fn opportunistic(&self, observation: &Observation, snapshot: &WindowSnapshot) -> Option<Decision> {
        match observation.kind() {
            ObservationKind::Proximity => self.near_surface.evaluate(snapshot),
            ObservationKind::Acceleration => self.magnitude.evaluate(snapshot),
            _ => None,
        }
    }
}

/// Escalates while the device points toward a target heading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompassCriterion {
    pub heading: HeadingRange,
}

impl Criterion for CompassCriterion {
    fn name(&self) -> &'static str {
        "compass"
    }

    fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        let target = first_param(policy, &["target-heading", "thc-degrees"])?.unwrap_or(0.0);
        let range = first_param(policy, &["heading-range", "thr-degrees"])?.unwrap_or(45.0);
        if !(0.0..=360.0).contains(&range) {
            return Err(PolicyError::Invalid {
                key: "heading-range".to_string(),
                reason: format!("expected 0-360 degrees, got {range}"),
            });
        }
        Ok(Self {
            heading: HeadingRange { target, range },
        })
    }

    fn evaluate(&self, snapshot: &WindowSnapshot) -> Option<Decision> {
        self.heading.evaluate(snapshot)
    }

    fn opportunistic(&self, observation: &Observation, snapshot: &WindowSnapshot) -> Option<Decision> {
        match observation.kind() {
            ObservationKind::Compass => self.heading.evaluate(snapshot),
            _ => None,
        }
    }
}

/// The first of `keys` present in the policy; later keys are legacy names.
fn first_param(policy: &Policy, keys: &[&str]) -> Result<Option<f64>, PolicyError> {
    for key in keys {
        if let Some(value) = policy.param_f64(key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}
