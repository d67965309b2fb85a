//! Bounded per-kind observation windows.
//!
//! One slot per [`ObservationKind`], each a FIFO capped by count and
//! optionally by age. All slots sit behind a single lock, so a snapshot never
//! observes a half-applied insert or clear.

use crate::probe::types::{Observation, ObservationKind};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Default per-kind capacity.
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Retention limits applied on every insert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLimits {
    /// Maximum entries per kind (`None` = unbounded)
    pub max_count: Option<usize>,
    /// Maximum age of an entry (`None` = unbounded)
    pub max_age: Option<Duration>,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_count: Some(DEFAULT_WINDOW_CAPACITY),
            max_age: None,
        }
    }
}

struct Slots {
    limits: WindowLimits,
    slots: [VecDeque<Observation>; ObservationKind::COUNT],
}

impl Slots {
    fn trim(&mut self, kind: ObservationKind, now: DateTime<Utc>) {
        let limits = self.limits;
        let slot = &mut self.slots[kind.index()];

        if let Some(max_count) = limits.max_count {
            while slot.len() > max_count {
                slot.pop_front();
            }
        }

        // timestamps come from probes and may arrive out of order, so scan
        // the whole slot rather than stopping at the first young entry
        if let Some(max_age) = limits.max_age {
            slot.retain(|obs| now - obs.timestamp <= max_age);
        }
    }
}

/// The arena of observation windows owned by one agent.
pub struct ObservationWindows {
    inner: Mutex<Slots>,
}

impl ObservationWindows {
    pub fn new(limits: WindowLimits) -> Self {
        Self {
            inner: Mutex::new(Slots {
                limits,
                slots: Default::default(),
            }),
        }
    }

    /// Append an observation, evicting the oldest entries beyond the limits.
    pub fn insert(&self, observation: Observation) {
        self.insert_at(observation, Utc::now());
    }

    /// Insert with an explicit notion of "now" for age eviction.
    pub fn insert_at(&self, observation: Observation, now: DateTime<Utc>) {
        let mut inner = self.lock();
        let kind = observation.kind();
        inner.slots[kind.index()].push_back(observation);
        inner.trim(kind, now);
    }

    /// Copy of the entries for one kind, or `None` if the slot is empty.
    pub fn snapshot(&self, kind: ObservationKind) -> Option<Vec<Observation>> {
        let inner = self.lock();
        let slot = &inner.slots[kind.index()];
        if slot.is_empty() {
            None
        } else {
            Some(slot.iter().cloned().collect())
        }
    }

    /// Copy of every slot, taken under one lock.
    pub fn snapshot_all(&self) -> WindowSnapshot {
        let inner = self.lock();
        WindowSnapshot {
            slots: std::array::from_fn(|i| inner.slots[i].iter().cloned().collect()),
            taken_at: Utc::now(),
        }
    }

    /// Empty every slot.
    pub fn clear(&self) {
        let mut inner = self.lock();
        for slot in inner.slots.iter_mut() {
            slot.clear();
        }
    }

    /// Replace the retention limits. Existing entries are trimmed immediately.
    pub fn set_limits(&self, limits: WindowLimits) {
        let mut inner = self.lock();
        inner.limits = limits;
        let now = Utc::now();
        for kind in ObservationKind::ALL {
            inner.trim(kind, now);
        }
    }

    pub fn limits(&self) -> WindowLimits {
        self.lock().limits
    }

    /// Number of entries held for a kind.
    pub fn len(&self, kind: ObservationKind) -> usize {
        self.lock().slots[kind.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.iter().all(VecDeque::is_empty)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ObservationWindows {
    fn default() -> Self {
        Self::new(WindowLimits::default())
    }
}

/// Immutable copy of all windows at one instant.
#[derive(Debug, Clone, Default)]
pub struct WindowSnapshot {
    slots: [Vec<Observation>; ObservationKind::COUNT],
    taken_at: DateTime<Utc>,
}

impl WindowSnapshot {
    /// Build a snapshot directly from observations. Entries keep their order.
    pub fn from_observations(observations: impl IntoIterator<Item = Observation>) -> Self {
        let mut snapshot = Self {
            taken_at: Utc::now(),
            ..Self::default()
        };
        for obs in observations {
            snapshot.slots[obs.kind().index()].push(obs);
        }
        snapshot
    }

    pub fn get(&self, kind: ObservationKind) -> &[Observation] {
        &self.slots[kind.index()]
    }

    /// Most recently inserted observation of a kind.
    pub fn latest(&self, kind: ObservationKind) -> Option<&Observation> {
        self.slots[kind.index()].last()
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }
}
