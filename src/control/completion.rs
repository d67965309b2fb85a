//! Completion actions: the recurring re-check that runs while control is held.

use crate::control::agent::{AdaptiveAgent, AgentError, CompletionStatus};
use crate::control::cancel::CancellationSignal;
use crate::control::scheduler::{
    RecurringTask, ScheduleHandle, ScheduleRequest, Scheduler, TaskControl, TaskFuture,
};
use crate::core::criterion::Criterion;
use std::sync::Arc;
use std::time::Duration;

/// Returned when an agent takes control. Scheduling it keeps checking
/// whether control should be kept; the checks stop on their own once the
/// episode ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionAction {
    /// Control episode the action belongs to
    pub episode: u64,
    pub interval: Duration,
    pub tolerance_before: Option<Duration>,
    pub tolerance_after: Option<Duration>,
}

impl CompletionAction {
    pub fn request(&self, agent_id: &str) -> ScheduleRequest {
        ScheduleRequest {
            name: format!("{agent_id} completion check (episode {})", self.episode),
            interval: self.interval,
            tolerance_before: self.tolerance_before,
            tolerance_after: self.tolerance_after,
        }
    }
}

/// Installs completion actions on a [`Scheduler`].
#[derive(Clone)]
pub struct CompletionActionScheduler {
    scheduler: Arc<dyn Scheduler>,
}

impl CompletionActionScheduler {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Schedule `action` against `agent`.
    ///
    /// Each tick runs one completion check; the schedule ends when a check
    /// relinquishes control or finds its episode over. If the scheduler
    /// rejects the request the agent gives up control and the error is
    /// returned.
    pub fn schedule<C: Criterion>(
        &self,
        agent: &Arc<AdaptiveAgent<C>>,
        action: CompletionAction,
    ) -> Result<ScheduleHandle, AgentError> {
        let request = action.request(agent.id());
        let episode = action.episode;

        let task: RecurringTask = {
            let agent = agent.clone();
            Box::new(move |signal: CancellationSignal| -> TaskFuture {
                let agent = agent.clone();
                let action = action.clone();
                Box::pin(async move {
                    match agent.check_completion(&action, &signal) {
                        CompletionStatus::Continue => TaskControl::Continue,
                        CompletionStatus::Ended | CompletionStatus::Stale => TaskControl::Stop,
                    }
                })
            })
        };

        match self.scheduler.schedule_recurring(request, task) {
            Ok(handle) => {
                agent.attach_schedule(episode, handle, self.scheduler.clone());
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(agent = %agent.id(), episode, error = %e, "Could not schedule completion checks");
                agent.abandon_episode(episode);
                Err(e.into())
            }
        }
    }
}
