//! Summary statistics over window contents.

use crate::probe::types::Observation;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Statistics of one numeric property across a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStatistics {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; 0 with fewer than two values
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl WindowStatistics {
    /// Compute statistics over raw values. Returns `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let std_dev = if values.len() < 2 {
            0.0
        } else {
            values.std_dev()
        };

        Some(Self {
            count: values.len(),
            mean: values.mean(),
            std_dev,
            min: values.min(),
            max: values.max(),
        })
    }

    /// Statistics of a named property over a window.
    ///
    /// Observations lacking the property are skipped.
    pub fn of_property(observations: &[Observation], property: &str) -> Option<Self> {
        let values: Vec<f64> = observations
            .iter()
            .filter_map(|o| o.property(property))
            .collect();
        Self::from_values(&values)
    }
}

/// Mean vector magnitude of the acceleration readings in a window.
pub fn mean_magnitude(observations: &[Observation]) -> Option<f64> {
    let magnitudes: Vec<f64> = observations.iter().filter_map(Observation::magnitude).collect();
    if magnitudes.is_empty() {
        None
    } else {
        Some(magnitudes.mean())
    }
}
