//! Declarative control criteria.
//!
//! Researchers can describe a criterion in the policy itself instead of
//! shipping a compiled agent. A policy lists statements; each statement holds
//! a criterion made of elements joined by a logic operator, and each element
//! aggregates one numeric property over one observation kind and compares it
//! to a target:
//!
//! ```json
//! { "statements": [ { "id": "moving", "criterion": {
//!     "logic": "disjunction",
//!     "elements": [ { "property-type": "acceleration", "property-name": "magnitude",
//!                     "aggregation": "average", "relation": "greater-than", "target": 1.5 } ] } } ] }
//! ```
//!
//! The first satisfied statement wins. A statement may also carry
//! `begin-control` and `end-control` probe settings; the statement that
//! began a control episode supplies the settings that end it.

use crate::core::criterion::{ControlSettings, Criterion, Decision, ProbeSetting};
use crate::core::window::WindowSnapshot;
use crate::policy::{Policy, PolicyError};
use crate::probe::types::{Observation, ObservationKind};
use serde::Deserialize;

/// Tolerance for numeric equality.
const EQUALITY_EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    Average,
    Maximum,
    Minimum,
    Mode,
    Newest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    EqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Logic {
    Conjunction,
    Disjunction,
}

/// One property comparison.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Element {
    #[serde(deserialize_with = "deserialize_kind")]
    pub property_type: ObservationKind,
    pub property_name: String,
    pub aggregation: Aggregation,
    pub relation: Relation,
    pub target: f64,
}

impl Element {
    /// Whether the element holds over the given observations.
    ///
    /// An element with no values to aggregate is not satisfied.
    pub fn satisfied_by(&self, observations: &[Observation]) -> bool {
        let values: Vec<f64> = observations
            .iter()
            .filter_map(|o| o.property(&self.property_name))
            .collect();

        match aggregate(self.aggregation, &values) {
            Some(value) => compare(self.relation, value, self.target),
            None => false,
        }
    }
}

/// Elements joined by a logic operator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatementCriterion {
    pub logic: Logic,
    pub elements: Vec<Element>,
}

impl StatementCriterion {
    pub fn satisfied_by(&self, snapshot: &WindowSnapshot) -> bool {
        let mut results = self
            .elements
            .iter()
            .map(|e| e.satisfied_by(snapshot.get(e.property_type)));

        match self.logic {
            // vacuously true for an empty element list
            Logic::Conjunction => results.all(|r| r),
            Logic::Disjunction => results.any(|r| r),
        }
    }
}

/// A named criterion with the probe settings to apply while it holds control.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Statement {
    pub id: String,
    pub criterion: StatementCriterion,
    #[serde(default)]
    pub begin_control: Vec<ProbeSetting>,
    #[serde(default)]
    pub end_control: Vec<ProbeSetting>,
}

/// Criterion defined by policy statements.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclarativeCriterion {
    pub statements: Vec<Statement>,
}

impl DeclarativeCriterion {
    /// Index of the first satisfied statement.
    pub fn satisfied_statement(&self, snapshot: &WindowSnapshot) -> Option<usize> {
        self.statements
            .iter()
            .position(|s| s.criterion.satisfied_by(snapshot))
    }
}

impl Criterion for DeclarativeCriterion {
    fn name(&self) -> &'static str {
        "declarative"
    }

    fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        let statements = match policy.param("statements") {
            None => Vec::new(),
            Some(value) => Vec::<Statement>::deserialize(value).map_err(|e| PolicyError::Invalid {
                key: "statements".to_string(),
                reason: e.to_string(),
            })?,
        };
        Ok(Self { statements })
    }

    /// The decision's value is the index of the satisfied statement, or -1.
    fn evaluate(&self, snapshot: &WindowSnapshot) -> Option<Decision> {
        if snapshot.is_empty() {
            return None;
        }
        Some(match self.satisfied_statement(snapshot) {
            Some(index) => Decision::new(true, index as f64),
            None => Decision::new(false, -1.0),
        })
    }

    /// Every arriving observation re-checks all statements.
    fn opportunistic(&self, _observation: &Observation, snapshot: &WindowSnapshot) -> Option<Decision> {
        self.evaluate(snapshot)
    }

    fn control_settings(&self, decision: &Decision) -> Option<ControlSettings> {
        if !decision.met || decision.value < 0.0 {
            return None;
        }
        let statement = self.statements.get(decision.value as usize)?;
        Some(ControlSettings {
            source: statement.id.clone(),
            begin: statement.begin_control.clone(),
            end: statement.end_control.clone(),
        })
    }
}

fn aggregate(aggregation: Aggregation, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(match aggregation {
        Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
        Aggregation::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Mode => mode(values),
        Aggregation::Newest => values[values.len() - 1],
    })
}

/// Most frequent value; ties go to the value seen first.
fn mode(values: &[f64]) -> f64 {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for &value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best = counts[0];
    for &(value, n) in &counts[1..] {
        if n > best.1 {
            best = (value, n);
        }
    }
    best.0
}

fn compare(relation: Relation, value: f64, target: f64) -> bool {
    match relation {
        Relation::EqualTo => (value - target).abs() < EQUALITY_EPSILON,
        Relation::GreaterThan => value > target,
        Relation::GreaterThanOrEqualTo => value >= target,
        Relation::LessThan => value < target,
        Relation::LessThanOrEqualTo => value <= target,
    }
}

fn deserialize_kind<'de, D>(deserializer: D) -> Result<ObservationKind, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    ObservationKind::from_name(&name)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown observation kind '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn criterion(statements: serde_json::Value) -> Result<DeclarativeCriterion, PolicyError> {
        let payload = json!({
            "action-interval": null,
            "observation-duration": 5,
            "threshold": 0,
            "completion-action-interval": 20,
            "statements": statements,
        });
        DeclarativeCriterion::from_policy(&Policy::parse(&payload).unwrap())
    }

    fn element(kind: &str, property: &str, aggregation: &str, relation: &str, target: f64) -> serde_json::Value {
        json!({
            "property-type": kind,
            "property-name": property,
            "aggregation": aggregation,
            "relation": relation,
            "target": target,
        })
    }

    #[test]
    fn test_aggregations() {
        let values = [3.0, 1.0, 3.0, 2.0, 1.0];
        assert_eq!(aggregate(Aggregation::Average, &values), Some(2.0));
        assert_eq!(aggregate(Aggregation::Maximum, &values), Some(3.0));
        assert_eq!(aggregate(Aggregation::Minimum, &values), Some(1.0));
        assert_eq!(aggregate(Aggregation::Mode, &values), Some(3.0));
        assert_eq!(aggregate(Aggregation::Newest, &values), Some(1.0));
        assert_eq!(aggregate(Aggregation::Average, &[]), None);
    }

    #[test]
    fn test_relations() {
        assert!(compare(Relation::EqualTo, 0.1 + 0.2, 0.3));
        assert!(!compare(Relation::GreaterThan, 1.0, 1.0));
        assert!(compare(Relation::GreaterThanOrEqualTo, 1.0, 1.0));
        assert!(compare(Relation::LessThan, 0.5, 1.0));
        assert!(compare(Relation::LessThanOrEqualTo, 1.0, 1.0));
    }

    #[test]
    fn test_first_satisfied_statement_wins() {
        let criterion = criterion(json!([
            { "id": "fast-heart", "criterion": { "logic": "conjunction",
                "elements": [ element("heart-rate", "bpm", "average", "greater-than", 120.0) ] } },
            { "id": "any-heart", "criterion": { "logic": "disjunction",
                "elements": [ element("heart-rate", "bpm", "newest", "greater-than", 0.0) ] } },
        ]))
        .unwrap();

        let window = WindowSnapshot::from_observations(vec![Observation::heart_rate(70.0)]);
        let decision = criterion.evaluate(&window).unwrap();
        assert!(decision.met);
        assert_eq!(decision.value, 1.0);
    }

    #[test]
    fn test_elements_without_data_are_unsatisfied() {
        let criterion = criterion(json!([
            { "id": "near", "criterion": { "logic": "disjunction",
                "elements": [ element("proximity", "distance", "newest", "less-than", 1.0) ] } },
        ]))
        .unwrap();

        let window = WindowSnapshot::from_observations(vec![Observation::compass(10.0)]);
        assert!(!criterion.evaluate(&window).unwrap().met);
        assert!(criterion.evaluate(&WindowSnapshot::default()).is_none());
    }

    #[test]
    fn test_empty_conjunction_is_satisfied() {
        let criterion = criterion(json!([
            { "id": "always", "criterion": { "logic": "conjunction", "elements": [] } },
        ]))
        .unwrap();
        let window = WindowSnapshot::from_observations(vec![Observation::compass(10.0)]);
        assert!(criterion.evaluate(&window).unwrap().met);
    }

    #[test]
    fn test_fast_path_checks_every_statement() {
        let criterion = criterion(json!([
            { "id": "racing", "criterion": { "logic": "conjunction",
                "elements": [ element("heart-rate", "bpm", "newest", "greater-than", 100.0) ] } },
        ]))
        .unwrap();

        let fast = Observation::heart_rate(150.0);
        let window = WindowSnapshot::from_observations(vec![fast.clone()]);
        assert!(criterion.opportunistic(&fast, &window).unwrap().met);

        let calm = Observation::heart_rate(60.0);
        let window = WindowSnapshot::from_observations(vec![calm.clone()]);
        assert!(!criterion.opportunistic(&calm, &window).unwrap().met);
    }

    #[test]
    fn test_control_settings_come_from_winning_statement() {
        let criterion = criterion(json!([
            { "id": "racing", "criterion": { "logic": "conjunction",
                "elements": [ element("heart-rate", "bpm", "newest", "greater-than", 150.0) ] },
              "begin-control": [ { "target-type": "heart-rate", "property-name": "sampling-rate", "value": 10 } ],
              "end-control": [ { "target-type": "heart-rate", "property-name": "sampling-rate", "value": 1 } ] },
            { "id": "elevated", "criterion": { "logic": "conjunction",
                "elements": [ element("heart-rate", "bpm", "newest", "greater-than", 100.0) ] },
              "begin-control": [ { "property-name": "sampling-rate", "value": 4 } ] },
        ]))
        .unwrap();

        let window = WindowSnapshot::from_observations(vec![Observation::heart_rate(120.0)]);
        let decision = criterion.evaluate(&window).unwrap();
        let settings = criterion.control_settings(&decision).unwrap();
        assert_eq!(settings.source, "elevated");
        assert_eq!(settings.begin_rate(ObservationKind::HeartRate), Some(4.0));
        assert_eq!(settings.end_rate(ObservationKind::HeartRate), None);

        let window = WindowSnapshot::from_observations(vec![Observation::heart_rate(160.0)]);
        let decision = criterion.evaluate(&window).unwrap();
        let settings = criterion.control_settings(&decision).unwrap();
        assert_eq!(settings.source, "racing");
        assert_eq!(settings.end_rate(ObservationKind::HeartRate), Some(1.0));

        let unmet = Decision::new(false, -1.0);
        assert!(criterion.control_settings(&unmet).is_none());
    }

    #[test]
    fn test_unsupported_control_setting_is_a_policy_error() {
        let result = criterion(json!([
            { "id": "bad", "criterion": { "logic": "conjunction", "elements": [] },
              "begin-control": [ { "property-name": "screen-brightness", "value": 1 } ] },
        ]));
        assert!(matches!(result, Err(PolicyError::Invalid { .. })));
    }

    #[test]
    fn test_unknown_kind_is_a_policy_error() {
        let result = criterion(json!([
            { "id": "bad", "criterion": { "logic": "conjunction",
                "elements": [ element("barometer", "pressure", "average", "greater-than", 1.0) ] } },
        ]));
        assert!(matches!(result, Err(PolicyError::Invalid { .. })));
    }
}
