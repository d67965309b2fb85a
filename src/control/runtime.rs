//! Drives one agent from a scheduler.

use crate::control::agent::{AdaptiveAgent, AgentError};
use crate::control::cancel::CancellationSignal;
use crate::control::completion::CompletionActionScheduler;
use crate::control::scheduler::{
    RecurringTask, ScheduleHandle, ScheduleRequest, Scheduler, TaskControl, TaskFuture,
};
use crate::core::criterion::Criterion;
use crate::probe::types::Observation;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Schedules an agent's act cycles, feeds it observations and installs the
/// completion actions it returns.
pub struct AgentRuntime<C: Criterion> {
    agent: Arc<AdaptiveAgent<C>>,
    scheduler: Arc<dyn Scheduler>,
    completions: CompletionActionScheduler,
    act_schedule: Mutex<Option<ScheduleHandle>>,
}

impl<C: Criterion> AgentRuntime<C> {
    pub fn new(agent: Arc<AdaptiveAgent<C>>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            agent,
            completions: CompletionActionScheduler::new(scheduler.clone()),
            scheduler,
            act_schedule: Mutex::new(None),
        }
    }

    pub fn agent(&self) -> &Arc<AdaptiveAgent<C>> {
        &self.agent
    }

    /// Schedule act cycles at the policy's action interval.
    ///
    /// Policies without an action interval rely on the fast path alone.
    pub fn start(&self) -> Result<(), AgentError> {
        let mut act_schedule = self.lock_act();
        if let Some(previous) = act_schedule.take() {
            self.scheduler.cancel(previous);
        }

        let Some(interval) = self.agent.policy().action_interval else {
            tracing::info!(agent = %self.agent.id(), "No action interval; act cycles disabled");
            return Ok(());
        };

        let task: RecurringTask = {
            let agent = self.agent.clone();
            let completions = self.completions.clone();
            Box::new(move |signal: CancellationSignal| -> TaskFuture {
                let agent = agent.clone();
                let completions = completions.clone();
                Box::pin(async move {
                    match agent.act(&signal).await {
                        Ok(Some(action)) => {
                            // scheduling failures already returned the agent to Idle
                            let _ = completions.schedule(&agent, action);
                        }
                        Ok(None) => {}
                        Err(e) => tracing::debug!(agent = %agent.id(), error = %e, "Act cycle ended early"),
                    }
                    TaskControl::Continue
                })
            })
        };

        let request = ScheduleRequest::every(format!("{} act", self.agent.id()), interval);
        *act_schedule = Some(self.scheduler.schedule_recurring(request, task)?);
        tracing::info!(agent = %self.agent.id(), ?interval, "Act cycles scheduled");
        Ok(())
    }

    /// Replace the agent's policy and reschedule act cycles if running.
    pub fn update_policy(&self, payload: &Value) -> Result<(), AgentError> {
        self.agent.set_policy(payload)?;
        if self.lock_act().is_some() {
            self.start()?;
        }
        Ok(())
    }

    /// Hand an observation to the agent, scheduling completion checks if it
    /// took control through the fast path.
    pub fn ingest(&self, observation: Observation) -> Result<Option<ScheduleHandle>, AgentError> {
        match self.agent.observe(observation) {
            Some(action) => self.completions.schedule(&self.agent, action).map(Some),
            None => Ok(None),
        }
    }

    /// Stop act cycles and return the agent to Idle, releasing anything held.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_act().take() {
            self.scheduler.cancel(handle);
        }
        self.agent.reset();
        tracing::info!(agent = %self.agent.id(), "Agent runtime stopped");
    }

    pub fn is_started(&self) -> bool {
        self.lock_act().is_some()
    }

    fn lock_act(&self) -> MutexGuard<'_, Option<ScheduleHandle>> {
        self.act_schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
