//! Device wake-lock handles.
//!
//! The platform lock is wrapped in a [`SharedWakeLock`] that counts holders so
//! several agents can share one device lock: the platform is only asked to
//! acquire on the first hold and to release on the last.

use crate::probe::PlatformError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Platform wake-lock binding.
pub trait WakeLock: Send + Sync {
    fn acquire(&self) -> Result<(), PlatformError>;
    fn release(&self) -> Result<(), PlatformError>;
}

/// Reference-counted wrapper around a platform [`WakeLock`].
pub struct SharedWakeLock {
    platform: Arc<dyn WakeLock>,
    holders: Mutex<usize>,
}

impl SharedWakeLock {
    pub fn new(platform: Arc<dyn WakeLock>) -> Arc<Self> {
        Arc::new(Self {
            platform,
            holders: Mutex::new(0),
        })
    }

    /// Add a holder, acquiring the platform lock if this is the first one.
    ///
    /// The holder is only counted if the platform call succeeded.
    pub fn acquire(&self) -> Result<(), PlatformError> {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        if *holders == 0 {
            self.platform.acquire()?;
        }
        *holders += 1;
        Ok(())
    }

    /// Drop a holder, releasing the platform lock when the last one leaves.
    pub fn release(&self) -> Result<(), PlatformError> {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        match *holders {
            0 => Err(PlatformError::Unbalanced(
                "wake-lock released with no holders".to_string(),
            )),
            1 => {
                *holders = 0;
                self.platform.release()
            }
            _ => {
                *holders -= 1;
                Ok(())
            }
        }
    }

    /// Number of current holders.
    pub fn holders(&self) -> usize {
        *self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A wake-lock that only logs. Used by the CLI, where no device lock exists.
#[derive(Debug, Default)]
pub struct LoggingWakeLock {
    acquisitions: AtomicU64,
    releases: AtomicU64,
}

impl LoggingWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

impl WakeLock for LoggingWakeLock {
    fn acquire(&self) -> Result<(), PlatformError> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Keeping device awake");
        Ok(())
    }

    fn release(&self) -> Result<(), PlatformError> {
        self.releases.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Letting device sleep");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingWakeLock;

    impl WakeLock for FailingWakeLock {
        fn acquire(&self) -> Result<(), PlatformError> {
            Err(PlatformError::Unavailable("no power manager".to_string()))
        }

        fn release(&self) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    #[test]
    fn test_platform_called_on_first_and_last_holder() {
        let platform = Arc::new(LoggingWakeLock::new());
        let shared = SharedWakeLock::new(platform.clone());

        shared.acquire().unwrap();
        shared.acquire().unwrap();
        assert_eq!(shared.holders(), 2);
        assert_eq!(platform.acquisitions(), 1);

        shared.release().unwrap();
        assert_eq!(platform.releases(), 0);
        shared.release().unwrap();
        assert_eq!(platform.releases(), 1);
        assert_eq!(shared.holders(), 0);
    }

    #[test]
    fn test_release_without_holder_is_unbalanced() {
        let shared = SharedWakeLock::new(Arc::new(LoggingWakeLock::new()));
        assert!(matches!(
            shared.release(),
            Err(PlatformError::Unbalanced(_))
        ));
    }

    #[test]
    fn test_failed_acquire_is_not_counted() {
        let shared = SharedWakeLock::new(Arc::new(FailingWakeLock));
        assert!(shared.acquire().is_err());
        assert_eq!(shared.holders(), 0);
    }
}
