//! Generator-backed probe for simulations.
//!
//! Emits readings from a closure on a background thread at the configured
//! sampling rate. Observations are delivered over a bounded channel, the same
//! way a platform probe would hand them to the agent host.

use crate::probe::types::{Observation, ObservationKind, Reading};
use crate::probe::{ListeningProbe, PlatformError};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Produces the reading for a given tick.
pub type ReadingGenerator = Arc<dyn Fn(u64) -> Reading + Send + Sync>;

/// Sampling rate used when the probe is unthrottled.
const NATIVE_RATE_HZ: f64 = 50.0;

/// A probe whose readings come from a generator closure.
pub struct SyntheticProbe {
    kind: ObservationKind,
    generator: ReadingGenerator,
    rate: Arc<Mutex<Option<f64>>>,
    sender: Sender<Observation>,
    receiver: Receiver<Observation>,
    running: Arc<AtomicBool>,
    tick: Arc<AtomicU64>,
    restarts: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticProbe {
    /// Create a stopped probe emitting `kind` readings at `rate` per second.
    pub fn new(kind: ObservationKind, rate: Option<f64>, generator: ReadingGenerator) -> Self {
        let (sender, receiver) = bounded(10_000);
        Self {
            kind,
            generator,
            rate: Arc::new(Mutex::new(rate)),
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            tick: Arc::new(AtomicU64::new(0)),
            restarts: AtomicU64::new(0),
            worker: Mutex::new(None),
        }
    }

    /// Start emitting readings.
    pub fn start(&self) -> Result<(), PlatformError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PlatformError::Failed(format!(
                "{} probe is already running",
                self.kind
            )));
        }

        let interval = interval_for(*self.rate.lock().unwrap_or_else(PoisonError::into_inner));
        let generator = self.generator.clone();
        let sender = self.sender.clone();
        let running = self.running.clone();
        let tick = self.tick.clone();

        let handle = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let n = tick.fetch_add(1, Ordering::Relaxed);
                let observation = Observation::new(generator(n));
                if sender.try_send(observation).is_err() {
                    // channel full: drop the reading rather than block the probe
                    tracing::debug!("Synthetic probe channel full, dropping reading");
                }
                thread::sleep(interval);
            }
        });

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop emitting readings and wait for the worker to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }

    /// Check if the probe is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the receiver for emitted observations.
    pub fn receiver(&self) -> &Receiver<Observation> {
        &self.receiver
    }

    /// Number of restarts since creation.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }
}

impl ListeningProbe for SyntheticProbe {
    fn kind(&self) -> ObservationKind {
        self.kind
    }

    fn sampling_rate(&self) -> Option<f64> {
        *self.rate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconfigure(&self, rate: Option<f64>) -> Result<(), PlatformError> {
        if let Some(r) = rate {
            if !(r.is_finite() && r > 0.0) {
                return Err(PlatformError::Failed(format!("invalid sampling rate {r}")));
            }
        }
        *self.rate.lock().unwrap_or_else(PoisonError::into_inner) = rate;
        Ok(())
    }

    fn restart(&self) -> Result<(), PlatformError> {
        let was_running = self.is_running();
        self.stop();
        self.restarts.fetch_add(1, Ordering::Relaxed);
        if was_running {
            self.start()?;
        }
        Ok(())
    }
}

impl Drop for SyntheticProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

fn interval_for(rate: Option<f64>) -> Duration {
    Duration::from_secs_f64(1.0 / rate.unwrap_or(NATIVE_RATE_HZ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compass_probe(rate: Option<f64>) -> SyntheticProbe {
        SyntheticProbe::new(
            ObservationKind::Compass,
            rate,
            Arc::new(|n: u64| Reading::Compass {
                heading: (n * 10 % 360) as f64,
            }),
        )
    }

    #[test]
    fn test_emits_observations_while_running() {
        let probe = compass_probe(Some(200.0));
        probe.start().unwrap();
        let first = probe.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
        probe.stop();

        assert_eq!(first.kind(), ObservationKind::Compass);
        assert!(!probe.is_running());
    }

    #[test]
    fn test_double_start_is_rejected() {
        let probe = compass_probe(Some(100.0));
        probe.start().unwrap();
        assert!(probe.start().is_err());
        probe.stop();
    }

    #[test]
    fn test_reconfigure_and_restart() {
        let probe = compass_probe(Some(5.0));
        probe.reconfigure(Some(20.0)).unwrap();
        probe.restart().unwrap();

        assert_eq!(probe.sampling_rate(), Some(20.0));
        assert_eq!(probe.restarts(), 1);
        assert!(!probe.is_running());
        assert!(probe.reconfigure(Some(-1.0)).is_err());
    }
}
