//! Observation types pushed into agents by probes.
//!
//! An observation is immutable once created: probes build it, windows store
//! copies of it, and criteria only ever read it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of sensor reading. Doubles as the slot index of an observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationKind {
    Acceleration,
    Compass,
    Proximity,
    Location,
    HeartRate,
}

impl ObservationKind {
    /// Number of observation kinds.
    pub const COUNT: usize = 5;

    /// All kinds, in slot order.
    pub const ALL: [ObservationKind; Self::COUNT] = [
        ObservationKind::Acceleration,
        ObservationKind::Compass,
        ObservationKind::Proximity,
        ObservationKind::Location,
        ObservationKind::HeartRate,
    ];

    /// Slot index of this kind.
    pub fn index(self) -> usize {
        match self {
            ObservationKind::Acceleration => 0,
            ObservationKind::Compass => 1,
            ObservationKind::Proximity => 2,
            ObservationKind::Location => 3,
            ObservationKind::HeartRate => 4,
        }
    }

    /// Parse a kind from its policy name (e.g. `"heart-rate"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "acceleration" | "accelerometer" => Some(ObservationKind::Acceleration),
            "compass" => Some(ObservationKind::Compass),
            "proximity" => Some(ObservationKind::Proximity),
            "location" => Some(ObservationKind::Location),
            "heart-rate" | "heartrate" => Some(ObservationKind::HeartRate),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObservationKind::Acceleration => "acceleration",
            ObservationKind::Compass => "compass",
            ObservationKind::Proximity => "proximity",
            ObservationKind::Location => "location",
            ObservationKind::HeartRate => "heart-rate",
        }
    }
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The typed payload of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Reading {
    /// Acceleration in units of g (gravity included).
    Acceleration { x: f64, y: f64, z: f64 },
    /// Heading in degrees, 0-360.
    Compass { heading: f64 },
    /// Distance to the nearest surface and the sensor's maximum range.
    Proximity { distance: f64, max_distance: f64 },
    Location {
        latitude: f64,
        longitude: f64,
        accuracy: f64,
    },
    HeartRate { bpm: f64 },
}

impl Reading {
    pub fn kind(&self) -> ObservationKind {
        match self {
            Reading::Acceleration { .. } => ObservationKind::Acceleration,
            Reading::Compass { .. } => ObservationKind::Compass,
            Reading::Proximity { .. } => ObservationKind::Proximity,
            Reading::Location { .. } => ObservationKind::Location,
            Reading::HeartRate { .. } => ObservationKind::HeartRate,
        }
    }
}

/// A timestamped sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Identity assigned on arrival
    pub id: Uuid,
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// The reading itself
    pub reading: Reading,
}

impl Observation {
    /// Create an observation stamped with the current time.
    pub fn new(reading: Reading) -> Self {
        Self::at(reading, Utc::now())
    }

    /// Create an observation with an explicit timestamp.
    pub fn at(reading: Reading, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            reading,
        }
    }

    pub fn acceleration(x: f64, y: f64, z: f64) -> Self {
        Self::new(Reading::Acceleration { x, y, z })
    }

    pub fn compass(heading: f64) -> Self {
        Self::new(Reading::Compass { heading })
    }

    pub fn proximity(distance: f64, max_distance: f64) -> Self {
        Self::new(Reading::Proximity {
            distance,
            max_distance,
        })
    }

    pub fn heart_rate(bpm: f64) -> Self {
        Self::new(Reading::HeartRate { bpm })
    }

    pub fn kind(&self) -> ObservationKind {
        self.reading.kind()
    }

    /// Euclidean magnitude of an acceleration reading.
    pub fn magnitude(&self) -> Option<f64> {
        match self.reading {
            Reading::Acceleration { x, y, z } => Some((x * x + y * y + z * z).sqrt()),
            _ => None,
        }
    }

    /// Look up a named numeric property of the reading.
    ///
    /// Used by declarative criteria, which address readings by property name
    /// rather than by type.
    pub fn property(&self, name: &str) -> Option<f64> {
        match (&self.reading, name) {
            (Reading::Acceleration { x, .. }, "x") => Some(*x),
            (Reading::Acceleration { y, .. }, "y") => Some(*y),
            (Reading::Acceleration { z, .. }, "z") => Some(*z),
            (Reading::Acceleration { .. }, "magnitude") => self.magnitude(),
            (Reading::Compass { heading }, "heading") => Some(*heading),
            (Reading::Proximity { distance, .. }, "distance") => Some(*distance),
            (Reading::Proximity { max_distance, .. }, "max-distance") => Some(*max_distance),
            (Reading::Location { latitude, .. }, "latitude") => Some(*latitude),
            (Reading::Location { longitude, .. }, "longitude") => Some(*longitude),
            (Reading::Location { accuracy, .. }, "accuracy") => Some(*accuracy),
            (Reading::HeartRate { bpm }, "bpm") => Some(*bpm),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceleration_magnitude() {
        let obs = Observation::acceleration(3.0, 4.0, 0.0);
        assert_eq!(obs.kind(), ObservationKind::Acceleration);
        assert!((obs.magnitude().unwrap() - 5.0).abs() < 0.001);
        assert!(Observation::compass(10.0).magnitude().is_none());
    }

    #[test]
    fn test_kind_slots_are_dense() {
        for (i, kind) in ObservationKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(ObservationKind::from_name(kind.name()), Some(*kind));
        }
    }

    #[test]
    fn test_named_properties() {
        let obs = Observation::proximity(0.0, 5.0);
        assert_eq!(obs.property("distance"), Some(0.0));
        assert_eq!(obs.property("max-distance"), Some(5.0));
        assert_eq!(obs.property("heading"), None);
    }

    #[test]
    fn test_observation_serializes_with_kind_tag() {
        let obs = Observation::heart_rate(72.0);
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["reading"]["kind"], "heart-rate");
        assert_eq!(json["reading"]["bpm"], 72.0);
    }
}
