//! Recurring task scheduling.
//!
//! Agents never own threads. Scheduled work (act cycles, completion checks)
//! is handed to a [`Scheduler`], which invokes it at a fixed interval until
//! the task asks to stop or the schedule is cancelled. Each invocation gets a
//! fresh [`CancellationSignal`] that fires if the schedule is cancelled while
//! the invocation runs, or when the invocation's execution budget is spent.

use crate::control::cancel::CancellationSignal;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// What a task wants after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = TaskControl> + Send>>;

/// A task body, called once per tick.
pub type RecurringTask = Box<dyn FnMut(CancellationSignal) -> TaskFuture + Send>;

/// Timing for a recurring task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    /// Label for logs
    pub name: String,
    pub interval: Duration,
    /// How much earlier than the interval the platform may run the task
    pub tolerance_before: Option<Duration>,
    /// How much later than the interval the platform may run the task
    pub tolerance_after: Option<Duration>,
}

impl ScheduleRequest {
    pub fn every(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            tolerance_before: None,
            tolerance_after: None,
        }
    }
}

/// Identifies a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(Uuid);

impl std::fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler rejected the request
    Unavailable(String),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::Unavailable(e) => write!(f, "Scheduler unavailable: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// External cooperative scheduler.
pub trait Scheduler: Send + Sync {
    /// Run `task` every `request.interval`, first after one interval.
    fn schedule_recurring(
        &self,
        request: ScheduleRequest,
        task: RecurringTask,
    ) -> Result<ScheduleHandle, SchedulerError>;

    /// Stop a schedule. A running invocation sees its signal fire.
    ///
    /// Returns false if the handle is unknown (already stopped).
    fn cancel(&self, handle: ScheduleHandle) -> bool;
}

type Registry = Arc<Mutex<HashMap<ScheduleHandle, CancellationSignal>>>;

/// [`Scheduler`] backed by tokio timers.
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
    budget: Option<Duration>,
    tasks: Registry,
    shut_down: AtomicBool,
}

impl TokioScheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// `budget` caps how long each invocation may run before its
    /// cancellation signal fires.
    pub fn new(budget: Option<Duration>) -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;
        Ok(Self::with_handle(runtime, budget))
    }

    pub fn with_handle(runtime: tokio::runtime::Handle, budget: Option<Duration>) -> Self {
        Self {
            runtime,
            budget,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of live schedules.
    pub fn active(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Cancel every schedule and refuse new ones.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        for (_, signal) in lock(&self.tasks).drain() {
            signal.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_recurring(
        &self,
        request: ScheduleRequest,
        mut task: RecurringTask,
    ) -> Result<ScheduleHandle, SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::Unavailable(format!(
                "cannot schedule '{}' after shutdown",
                request.name
            )));
        }
        if request.interval.is_zero() {
            return Err(SchedulerError::Unavailable(format!(
                "'{}' has a zero interval",
                request.name
            )));
        }

        let Some(first_tick) = Instant::now().checked_add(request.interval) else {
            return Err(SchedulerError::Unavailable(format!(
                "'{}' has an interval too long to schedule",
                request.name
            )));
        };

        let handle = ScheduleHandle(Uuid::new_v4());
        let schedule_signal = CancellationSignal::new();
        lock(&self.tasks).insert(handle, schedule_signal.clone());

        let tasks = self.tasks.clone();
        let budget = self.budget;
        let ScheduleRequest { name, interval, .. } = request;

        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = schedule_signal.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let invocation = CancellationSignal::new();
                let watchdog = {
                    let invocation = invocation.clone();
                    let schedule_signal = schedule_signal.clone();
                    tokio::spawn(async move {
                        match budget {
                            Some(budget) => tokio::select! {
                                _ = schedule_signal.cancelled() => {}
                                _ = tokio::time::sleep(budget) => {
                                    tracing::debug!("Invocation budget spent");
                                }
                            },
                            None => schedule_signal.cancelled().await,
                        }
                        invocation.cancel();
                    })
                };

                let control = task(invocation).await;
                watchdog.abort();

                if control == TaskControl::Stop {
                    tracing::debug!(task = %name, "Recurring task stopped itself");
                    break;
                }
            }

            lock(&tasks).remove(&handle);
        });

        Ok(handle)
    }

    fn cancel(&self, handle: ScheduleHandle) -> bool {
        match lock(&self.tasks).remove(&handle) {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }
}

fn lock(tasks: &Registry) -> MutexGuard<'_, HashMap<ScheduleHandle, CancellationSignal>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_task(count: Arc<AtomicU32>, stop_after: u32) -> RecurringTask {
        Box::new(move |_signal: CancellationSignal| -> TaskFuture {
            let count = count.clone();
            Box::pin(async move {
                if count.fetch_add(1, Ordering::SeqCst) + 1 >= stop_after {
                    TaskControl::Stop
                } else {
                    TaskControl::Continue
                }
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_task_stops() {
        let scheduler = TokioScheduler::new(None).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        scheduler
            .schedule_recurring(
                ScheduleRequest::every("count", Duration::from_secs(10)),
                counting_task(count.clone(), 3),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_schedule() {
        let scheduler = TokioScheduler::new(None).unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let handle = scheduler
            .schedule_recurring(
                ScheduleRequest::every("count", Duration::from_secs(1)),
                counting_task(count.clone(), u32::MAX),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));

        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let scheduler = TokioScheduler::new(None).unwrap();
        scheduler.shutdown();
        let result = scheduler.schedule_recurring(
            ScheduleRequest::every("late", Duration::from_secs(1)),
            counting_task(Arc::new(AtomicU32::new(0)), 1),
        );
        assert!(matches!(result, Err(SchedulerError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_rejects_unrepresentable_interval() {
        let scheduler = TokioScheduler::new(None).unwrap();
        let result = scheduler.schedule_recurring(
            ScheduleRequest::every("forever", Duration::MAX),
            counting_task(Arc::new(AtomicU32::new(0)), 1),
        );
        assert!(matches!(result, Err(SchedulerError::Unavailable(_))));
        assert_eq!(scheduler.active(), 0);
    }

    #[test]
    fn test_requires_runtime() {
        assert!(TokioScheduler::new(None).is_err());
    }
}
