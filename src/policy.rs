//! Agent control policy.
//!
//! A policy arrives as a JSON payload (pushed by a researcher, loaded from a
//! protocol file, or typed in by hand) and is parsed into an immutable
//! [`Policy`]. Agents replace their policy wholesale, so a half-updated policy
//! is never observable.
//!
//! Durations are written either as .NET-style time spans
//! (`"[d.]hh:mm:ss[.fff]"`) or as plain numbers of seconds, and may not
//! exceed [`MAX_DURATION`].

use crate::core::window::{WindowLimits, DEFAULT_WINDOW_CAPACITY};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Longest duration any policy key may hold.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How many control tiers an agent distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlTiers {
    /// Fast-path escalation enters opportunistic control; window-based
    /// escalation enters active control.
    #[default]
    Tiered,
    /// Every escalation enters active control ("action ongoing").
    Single,
}

/// Sampling-rate changes applied while control is held.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SamplingPolicy {
    /// Rate to apply on escalation; `None` leaves sampling untouched
    pub elevated_rate: Option<f64>,
    /// Rate to restore on relinquish; `None` restores whatever was configured before
    pub baseline_rate: Option<f64>,
}

/// Parsed, validated control policy.
#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub id: Option<String>,
    pub description: Option<String>,
    /// Interval between scheduled `act` cycles; `None` disables them
    #[serde(with = "duration_serde::option")]
    pub action_interval: Option<Duration>,
    /// How long an `act` cycle observes before evaluating its criterion
    #[serde(with = "duration_serde")]
    pub observation_duration: Duration,
    pub threshold: f64,
    /// Interval between completion checks while control is held
    #[serde(with = "duration_serde")]
    pub completion_check_interval: Duration,
    #[serde(with = "duration_serde::option")]
    pub tolerance_before: Option<Duration>,
    #[serde(with = "duration_serde::option")]
    pub tolerance_after: Option<Duration>,
    pub max_observed_count: Option<usize>,
    #[serde(with = "duration_serde::option")]
    pub max_observed_age: Option<Duration>,
    pub sampling: SamplingPolicy,
    pub tiers: ControlTiers,
    /// The full payload, for criterion-specific keys
    #[serde(skip)]
    params: Map<String, Value>,
}

impl Policy {
    /// Parse a policy from a JSON string.
    pub fn from_json_str(payload: &str) -> Result<Self, PolicyError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| PolicyError::Syntax(e.to_string()))?;
        Self::parse(&value)
    }

    /// Parse and validate a policy payload.
    pub fn parse(payload: &Value) -> Result<Self, PolicyError> {
        let params = payload.as_object().ok_or(PolicyError::NotAnObject)?.clone();

        let action_interval = match required(&params, &["action-interval"])? {
            Value::Null => None,
            value => Some(positive(duration_value("action-interval", value)?, "action-interval")?),
        };

        let observation_duration = duration_value(
            "observation-duration",
            required(
                &params,
                &["observation-duration", "active-observation-duration"],
            )?,
        )?;

        let threshold = number_value("threshold", required(&params, &["threshold"])?)?;

        let completion_check_interval = positive(
            duration_value(
                "completion-action-interval",
                required(
                    &params,
                    &[
                        "completion-action-interval",
                        "control-completion-check-interval",
                    ],
                )?,
            )?,
            "completion-action-interval",
        )?;

        let tolerance_before = optional_duration(&params, "tolerance-before")?;
        let tolerance_after = optional_duration(&params, "tolerance-after")?;

        let (max_observed_count, max_observed_age) = match params.get("observed-data") {
            None | Some(Value::Null) => (Some(DEFAULT_WINDOW_CAPACITY), None),
            Some(Value::Object(observed)) => {
                let count = match observed.get("max-count") {
                    None => Some(DEFAULT_WINDOW_CAPACITY),
                    Some(Value::Null) => None,
                    Some(value) => Some(count_value("observed-data.max-count", value)?),
                };
                let age = match observed.get("max-age") {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(duration_value("observed-data.max-age", value)?),
                };
                (count, age)
            }
            Some(_) => {
                return Err(PolicyError::Invalid {
                    key: "observed-data".to_string(),
                    reason: "expected an object".to_string(),
                })
            }
        };

        let sampling = SamplingPolicy {
            elevated_rate: optional_rate(&params, "elevated-sampling-rate")?,
            baseline_rate: optional_rate(&params, "baseline-sampling-rate")?,
        };

        let tiers = match params.get("control-tiers") {
            None | Some(Value::Null) => ControlTiers::default(),
            Some(Value::String(s)) if s == "tiered" => ControlTiers::Tiered,
            Some(Value::String(s)) if s == "single" => ControlTiers::Single,
            Some(other) => {
                return Err(PolicyError::Invalid {
                    key: "control-tiers".to_string(),
                    reason: format!("expected \"tiered\" or \"single\", got {other}"),
                })
            }
        };

        Ok(Self {
            id: optional_string(&params, "id"),
            description: optional_string(&params, "description"),
            action_interval,
            observation_duration,
            threshold,
            completion_check_interval,
            tolerance_before,
            tolerance_after,
            max_observed_count,
            max_observed_age,
            sampling,
            tiers,
            params,
        })
    }

    /// Window retention limits implied by the policy.
    pub fn window_limits(&self) -> WindowLimits {
        WindowLimits {
            max_count: self.max_observed_count,
            max_age: self
                .max_observed_age
                .and_then(|age| chrono::Duration::from_std(age).ok()),
        }
    }

    /// Raw access to a payload key.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    /// Numeric payload key, if present.
    pub fn param_f64(&self, key: &str) -> Result<Option<f64>, PolicyError> {
        self.param(key).map(|v| number_value(key, v)).transpose()
    }
}

/// Policy parse errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// The payload is not valid JSON
    Syntax(String),
    /// The payload is not a JSON object
    NotAnObject,
    /// A required key is absent
    Missing(String),
    /// A key is present but malformed
    Invalid { key: String, reason: String },
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::Syntax(e) => write!(f, "Policy is not valid JSON: {e}"),
            PolicyError::NotAnObject => write!(f, "Policy must be a JSON object"),
            PolicyError::Missing(key) => write!(f, "Policy is missing required key '{key}'"),
            PolicyError::Invalid { key, reason } => {
                write!(f, "Policy key '{key}' is invalid: {reason}")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Look up a required key, accepting legacy aliases after the primary name.
fn required<'a>(params: &'a Map<String, Value>, names: &[&str]) -> Result<&'a Value, PolicyError> {
    names
        .iter()
        .find_map(|name| params.get(*name))
        .ok_or_else(|| PolicyError::Missing(names[0].to_string()))
}

fn invalid(key: &str, reason: impl Into<String>) -> PolicyError {
    PolicyError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn number_value(key: &str, value: &Value) -> Result<f64, PolicyError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        // payloads edited by hand often quote numbers
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .ok_or_else(|| invalid(key, format!("expected a number, got {value}")))
}

fn count_value(key: &str, value: &Value) -> Result<usize, PolicyError> {
    match value.as_u64() {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(invalid(key, format!("expected a positive integer, got {value}"))),
    }
}

fn duration_value(key: &str, value: &Value) -> Result<Duration, PolicyError> {
    let duration = match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|secs| *secs >= 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| invalid(key, format!("expected a non-negative duration, got {n}")))?,
        Value::String(s) => {
            parse_time_span(s).ok_or_else(|| invalid(key, format!("unrecognized duration '{s}'")))?
        }
        other => return Err(invalid(key, format!("expected a duration, got {other}"))),
    };

    if duration > MAX_DURATION {
        return Err(invalid(
            key,
            format!("must not exceed {} days", MAX_DURATION.as_secs() / 86_400),
        ));
    }
    Ok(duration)
}

fn positive(duration: Duration, key: &str) -> Result<Duration, PolicyError> {
    if duration.is_zero() {
        Err(invalid(key, "must be greater than zero"))
    } else {
        Ok(duration)
    }
}

fn optional_duration(params: &Map<String, Value>, key: &str) -> Result<Option<Duration>, PolicyError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => duration_value(key, value).map(Some),
    }
}

fn optional_rate(params: &Map<String, Value>, key: &str) -> Result<Option<f64>, PolicyError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let rate = number_value(key, value)?;
            if rate > 0.0 {
                Ok(Some(rate))
            } else {
                Err(invalid(key, "sampling rate must be positive"))
            }
        }
    }
}

fn optional_string(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Parse a `[d.]hh:mm[:ss[.fff]]` time span.
pub fn parse_time_span(text: &str) -> Option<Duration> {
    let (head, tail) = text.trim().split_once(':')?;

    let (days, hours) = match head.split_once('.') {
        Some((d, h)) => (d.parse::<u64>().ok()?, h),
        None => (0, head),
    };
    let hours: u64 = hours.parse().ok()?;

    let (minutes, seconds) = match tail.split_once(':') {
        Some((m, s)) => (m.parse::<u64>().ok()?, s.parse::<f64>().ok()?),
        None => (tail.parse::<u64>().ok()?, 0.0),
    };

    if hours >= 24 || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let whole = days
        .checked_mul(24)?
        .checked_add(hours)?
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?;
    Duration::from_secs(whole).checked_add(Duration::from_secs_f64(seconds))
}

/// Serde support for Duration, as fractional seconds.
mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub mod option {
        use serde::{Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration.map(|d| d.as_secs_f64()).serialize(serializer)
        }
    }
}
