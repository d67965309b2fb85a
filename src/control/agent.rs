//! The adaptive sensing agent.
//!
//! An [`AdaptiveAgent`] owns the observation windows and state machine for
//! one sensor kind and is generic over the [`Criterion`] that decides when
//! sensing should be escalated. Probes call [`observe`](AdaptiveAgent::observe)
//! from any thread; a scheduler calls [`act`](AdaptiveAgent::act) and
//! [`check_completion`](AdaptiveAgent::check_completion). All three are safe
//! to run concurrently: every state change goes through a single
//! check-and-set, and side effects run after the state lock is released.

use crate::control::cancel::CancellationSignal;
use crate::control::completion::CompletionAction;
use crate::control::coordinator::{CoordinatorStats, DeviceResourceCoordinator};
use crate::control::effects::{completion_step, effects_for, CompletionStep, RelinquishReason, SideEffect};
use crate::control::scheduler::{ScheduleHandle, Scheduler, SchedulerError};
use crate::core::criterion::{
    is_met, AccelerationCriterion, CompassCriterion, Criterion, Decision,
};
use crate::core::aspl::DeclarativeCriterion;
use crate::core::state::{AgentEvent, AgentState, AgentStateMachine, CoarseState, StateTransition, TransitionRefusal};
use crate::core::window::{ObservationWindows, WindowSnapshot};
use crate::diagnostics::SharedDiagnostics;
use crate::policy::{Policy, PolicyError};
use crate::probe::types::{Observation, ObservationKind};
use crate::probe::{ListeningProbe, SharedWakeLock};
use crate::protocol::{Protocol, StateTransitionRecord};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// How long reset and abandon wait for an in-flight transition.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

pub type AccelerationAgent = AdaptiveAgent<AccelerationCriterion>;
pub type CompassAgent = AdaptiveAgent<CompassCriterion>;
pub type DeclarativeAgent = AdaptiveAgent<DeclarativeCriterion>;

/// Agent errors surfaced to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// The policy payload was rejected; the previous policy is still active
    Policy(PolicyError),
    /// A schedule could not be installed; the agent fell back to Idle
    Scheduler(SchedulerError),
    /// The operation was cancelled; any acquired resources were released
    Cancelled,
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Policy(e) => write!(f, "Policy update failed: {e}"),
            AgentError::Scheduler(e) => write!(f, "{e}"),
            AgentError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Policy(e) => Some(e),
            AgentError::Scheduler(e) => Some(e),
            AgentError::Cancelled => None,
        }
    }
}

impl From<PolicyError> for AgentError {
    fn from(e: PolicyError) -> Self {
        AgentError::Policy(e)
    }
}

impl From<SchedulerError> for AgentError {
    fn from(e: SchedulerError) -> Self {
        AgentError::Scheduler(e)
    }
}

/// Result of one completion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Control is kept; check again after the interval
    Continue,
    /// Control was relinquished by this check
    Ended,
    /// The action belongs to an episode that is already over
    Stale,
}

/// Collaborators injected into an agent.
#[derive(Clone)]
pub struct AgentContext {
    pub wake_lock: Arc<SharedWakeLock>,
    pub probe: Option<Arc<dyn ListeningProbe>>,
    pub protocol: Arc<dyn Protocol>,
    pub diagnostics: SharedDiagnostics,
}

impl AgentContext {
    pub fn new(
        wake_lock: Arc<SharedWakeLock>,
        protocol: Arc<dyn Protocol>,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        Self {
            wake_lock,
            probe: None,
            protocol,
            diagnostics,
        }
    }

    /// Attach the probe whose sampling rate the agent may elevate.
    pub fn with_probe(mut self, probe: Arc<dyn ListeningProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// A policy together with the criterion built from it. Swapped as one unit.
struct ActivePolicy<C> {
    policy: Policy,
    criterion: C,
}

struct AttachedSchedule {
    episode: u64,
    handle: ScheduleHandle,
    scheduler: Arc<dyn Scheduler>,
}

/// Per-sensor adaptive control agent.
pub struct AdaptiveAgent<C: Criterion> {
    id: String,
    active: RwLock<Arc<ActivePolicy<C>>>,
    machine: AgentStateMachine,
    windows: ObservationWindows,
    coordinator: DeviceResourceCoordinator,
    protocol: Arc<dyn Protocol>,
    diagnostics: SharedDiagnostics,
    /// Number of the current (or last) control episode
    episode: AtomicU64,
    schedule: Mutex<Option<AttachedSchedule>>,
}

impl<C: Criterion> AdaptiveAgent<C> {
    /// Create an idle agent with an initial policy payload.
    pub fn new(id: impl Into<String>, policy: &Value, context: AgentContext) -> Result<Self, AgentError> {
        let active = Self::build_policy(policy)?;
        let windows = ObservationWindows::new(active.policy.window_limits());

        Ok(Self {
            id: id.into(),
            active: RwLock::new(Arc::new(active)),
            machine: AgentStateMachine::new(),
            windows,
            coordinator: DeviceResourceCoordinator::new(
                context.wake_lock,
                context.probe,
                context.diagnostics.clone(),
            ),
            protocol: context.protocol,
            diagnostics: context.diagnostics,
            episode: AtomicU64::new(0),
            schedule: Mutex::new(None),
        })
    }

    fn build_policy(payload: &Value) -> Result<ActivePolicy<C>, PolicyError> {
        let policy = Policy::parse(payload)?;
        let criterion = C::from_policy(&policy)?;
        Ok(ActivePolicy { policy, criterion })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the policy. On failure the previous policy stays active.
    pub fn set_policy(&self, payload: &Value) -> Result<(), AgentError> {
        let active = match Self::build_policy(payload) {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(agent = %self.id, error = %e, "Rejected policy update");
                return Err(e.into());
            }
        };

        self.windows.set_limits(active.policy.window_limits());
        tracing::info!(
            agent = %self.id,
            policy = active.policy.id.as_deref().unwrap_or("unnamed"),
            criterion = active.criterion.name(),
            "Policy updated"
        );
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(active);
        Ok(())
    }

    /// A copy of the active policy.
    pub fn policy(&self) -> Policy {
        self.active().policy.clone()
    }

    pub fn current_state(&self) -> AgentState {
        self.machine.state()
    }

    pub fn coarse_state(&self) -> CoarseState {
        self.machine.state().coarse()
    }

    /// Number of the current (or most recent) control episode; 0 before the first.
    pub fn episode(&self) -> u64 {
        self.episode.load(Ordering::SeqCst)
    }

    pub fn window_len(&self, kind: ObservationKind) -> usize {
        self.windows.len(kind)
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.windows.snapshot_all()
    }

    pub fn resource_stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    /// Evaluate the criterion over the current windows without acting.
    pub fn evaluate(&self) -> Option<Decision> {
        self.active().criterion.evaluate(&self.windows.snapshot_all())
    }

    /// Accept an observation from a probe.
    ///
    /// While idle, the observation may trigger the criterion's fast path and
    /// escalate straight to control, returning the completion action to
    /// schedule. Losing a race against a concurrent `act` is not an error;
    /// it returns `None`.
    pub fn observe(&self, observation: Observation) -> Option<CompletionAction> {
        self.diagnostics.record_observation();
        let trigger = (self.machine.state() == AgentState::Idle).then(|| observation.clone());
        self.windows.insert(observation);

        let observation = trigger?;
        let active = self.active();
        let decision = active
            .criterion
            .opportunistic(&observation, &self.windows.snapshot_all());
        if !is_met(decision) {
            return None;
        }

        match self.transition_on(AgentEvent::FastPath, &active, decision.as_ref()) {
            Ok(_) => {
                tracing::info!(
                    agent = %self.id,
                    kind = %observation.kind(),
                    value = decision.map(|d| d.value),
                    "Fast path escalated control"
                );
                Some(self.completion_action(&active.policy))
            }
            Err(refusal) => {
                tracing::debug!(agent = %self.id, ?refusal, "Fast path found agent busy");
                None
            }
        }
    }

    /// Run one act cycle: observe for the policy's observation duration,
    /// then evaluate the criterion and take control if it is met.
    ///
    /// Returns the completion action to schedule when control was taken, or
    /// `None` when the criterion was not met or the agent was not idle.
    /// Cancellation returns [`AgentError::Cancelled`] with the agent back in
    /// Idle and no resources held.
    pub async fn act(&self, cancel: &CancellationSignal) -> Result<Option<CompletionAction>, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let active = self.active();
        if let Err(refusal) = self.transition(AgentEvent::BeginObservation, &active) {
            tracing::debug!(agent = %self.id, ?refusal, "Act skipped");
            return Ok(None);
        }

        let completed = tokio::select! {
            _ = tokio::time::sleep(active.policy.observation_duration) => true,
            _ = cancel.cancelled() => false,
        };

        if !completed {
            if let Err(refusal) = self.transition(AgentEvent::ObservationCancelled, &active) {
                tracing::debug!(agent = %self.id, ?refusal, "Observation already ended");
            }
            return Err(AgentError::Cancelled);
        }

        let decision = active.criterion.evaluate(&self.windows.snapshot_all());
        if decision.is_none() {
            self.diagnostics.record_inconclusive();
            tracing::debug!(agent = %self.id, "Not enough data to evaluate criterion");
        }

        let event = if is_met(decision) {
            AgentEvent::CriterionMet
        } else {
            AgentEvent::CriterionUnmet
        };

        match self.transition_on(event, &active, decision.as_ref()) {
            Ok(transition) if transition.to.is_controlling() => {
                if cancel.is_cancelled() {
                    self.end_control(RelinquishReason::Cancelled);
                    return Err(AgentError::Cancelled);
                }
                tracing::info!(
                    agent = %self.id,
                    value = decision.map(|d| d.value),
                    "Criterion met, control taken"
                );
                Ok(Some(self.completion_action(&active.policy)))
            }
            Ok(_) => Ok(None),
            Err(refusal) => {
                // reset while observing
                tracing::debug!(agent = %self.id, ?refusal, "Observation ended elsewhere");
                Ok(None)
            }
        }
    }

    /// Re-evaluate whether control should be kept.
    ///
    /// Relinquishes when the protocol has stopped, the criterion no longer
    /// holds (or cannot be evaluated), or the invocation was cancelled.
    pub fn check_completion(&self, action: &CompletionAction, cancel: &CancellationSignal) -> CompletionStatus {
        if !self.machine.state().is_controlling() || action.episode != self.episode() {
            return CompletionStatus::Stale;
        }
        if cancel.is_cancelled() {
            return self.finish_check(RelinquishReason::Cancelled);
        }

        self.diagnostics.record_completion_check();
        let running = self.protocol.is_running();
        let decision = if running {
            self.evaluate()
        } else {
            None
        };
        if running && decision.is_none() {
            self.diagnostics.record_inconclusive();
        }

        match completion_step(running, decision) {
            CompletionStep::Renew if cancel.is_cancelled() => {
                self.finish_check(RelinquishReason::Cancelled)
            }
            CompletionStep::Renew => {
                self.diagnostics.record_renewal();
                tracing::debug!(
                    agent = %self.id,
                    episode = action.episode,
                    value = decision.map(|d| d.value),
                    "Control renewed"
                );
                CompletionStatus::Continue
            }
            CompletionStep::Relinquish(reason) => self.finish_check(reason),
        }
    }

    fn finish_check(&self, reason: RelinquishReason) -> CompletionStatus {
        match self.relinquish(reason) {
            Ok(()) => CompletionStatus::Ended,
            // another transition is in flight; try again next tick
            Err(TransitionRefusal::Busy) => CompletionStatus::Continue,
            Err(TransitionRefusal::NotPermitted { .. }) => CompletionStatus::Stale,
        }
    }

    /// Record the schedule driving an episode's completion checks so ending
    /// control cancels it. If the episode is already over the schedule is
    /// cancelled immediately.
    pub fn attach_schedule(&self, episode: u64, handle: ScheduleHandle, scheduler: Arc<dyn Scheduler>) -> bool {
        let mut attached = self.lock_schedule();
        if !self.machine.state().is_controlling() || episode != self.episode() {
            scheduler.cancel(handle);
            return false;
        }
        if let Some(previous) = attached.replace(AttachedSchedule {
            episode,
            handle,
            scheduler,
        }) {
            previous.scheduler.cancel(previous.handle);
        }
        true
    }

    /// Give up control held by `episode` because its schedule failed.
    pub fn abandon_episode(&self, episode: u64) {
        self.settle_then(RelinquishReason::ScheduleFailed, || {
            (episode == self.episode() && self.machine.state().is_controlling())
                .then(|| self.relinquish(RelinquishReason::ScheduleFailed))
        });
    }

    /// Return to Idle from any state, ending control if held.
    ///
    /// A transition still running its side effects (an elevate in progress,
    /// say) is waited out, so reset never leaves resources held.
    pub fn reset(&self) {
        self.settle_then(RelinquishReason::Reset, || match self.machine.state() {
            state if state.is_controlling() => Some(self.relinquish(RelinquishReason::Reset)),
            AgentState::Observing => Some(
                self.transition(AgentEvent::ObservationCancelled, &self.active())
                    .map(|_| ()),
            ),
            _ => None,
        });
    }

    fn end_control(&self, reason: RelinquishReason) {
        self.settle_then(reason, || {
            self.machine
                .state()
                .is_controlling()
                .then(|| self.relinquish(reason))
        });
    }

    /// Run `attempt` until it succeeds, declines (`None`) or is refused for a
    /// reason other than a transition in flight.
    fn settle_then<F>(&self, reason: RelinquishReason, attempt: F)
    where
        F: Fn() -> Option<Result<(), TransitionRefusal>>,
    {
        while let Some(result) = attempt() {
            match result {
                Ok(()) => return,
                Err(TransitionRefusal::Busy) => {
                    if !self.machine.wait_settled(SETTLE_TIMEOUT) {
                        tracing::warn!(
                            agent = %self.id,
                            %reason,
                            "Transition still in flight; giving up"
                        );
                        return;
                    }
                }
                Err(refusal) => {
                    tracing::debug!(agent = %self.id, ?refusal, %reason, "Could not return to Idle");
                    return;
                }
            }
        }
    }

    /// Controlling state -> EndingControl -> Idle.
    fn relinquish(&self, reason: RelinquishReason) -> Result<(), TransitionRefusal> {
        let active = self.active();
        self.transition(AgentEvent::Relinquish, &active)?;
        tracing::info!(agent = %self.id, episode = self.episode(), %reason, "Control relinquished");

        if let Err(refusal) = self.transition(AgentEvent::ControlEnded, &active) {
            tracing::warn!(agent = %self.id, ?refusal, "Control ended without returning to Idle");
        }
        Ok(())
    }

    /// Check-and-set the state, then run the transition's side effects with
    /// the state lock released.
    fn transition(&self, event: AgentEvent, active: &ActivePolicy<C>) -> Result<StateTransition, TransitionRefusal> {
        self.transition_on(event, active, None)
    }

    /// As [`transition`](Self::transition), for an event backed by a criterion
    /// decision; a control episode it starts takes the decision's settings.
    fn transition_on(
        &self,
        event: AgentEvent,
        active: &ActivePolicy<C>,
        decision: Option<&Decision>,
    ) -> Result<StateTransition, TransitionRefusal> {
        let guard = self.machine.begin(event, active.policy.tiers)?;
        let (from, to) = (guard.transition().from, guard.transition().to);

        for effect in effects_for(from, to) {
            match effect {
                SideEffect::ClearWindows => self.windows.clear(),
                SideEffect::Elevate => {
                    let episode = self.episode.fetch_add(1, Ordering::SeqCst) + 1;
                    self.diagnostics.record_control_episode();
                    let settings = decision.and_then(|d| active.criterion.control_settings(d));
                    self.coordinator.elevate(&active.policy.sampling, settings.as_ref());
                    tracing::info!(agent = %self.id, episode, state = %to, "Control episode started");
                }
                SideEffect::Restore => {
                    self.coordinator.restore();
                }
                SideEffect::CancelSchedule => self.cancel_schedule(),
                SideEffect::RecordTransition => {
                    self.diagnostics.record_transition();
                    let record = StateTransitionRecord::new(&self.id, guard.transition());
                    tracing::info!(agent = %self.id, "{}", record.description);
                    self.protocol.record_transition(record);
                }
            }
        }

        Ok(guard.finish())
    }

    fn cancel_schedule(&self) {
        if let Some(attached) = self.lock_schedule().take() {
            tracing::debug!(
                agent = %self.id,
                episode = attached.episode,
                schedule = %attached.handle,
                "Cancelling completion checks"
            );
            attached.scheduler.cancel(attached.handle);
        }
    }

    fn completion_action(&self, policy: &Policy) -> CompletionAction {
        CompletionAction {
            episode: self.episode(),
            interval: policy.completion_check_interval,
            tolerance_before: policy.tolerance_before,
            tolerance_after: policy.tolerance_after,
        }
    }

    fn active(&self) -> Arc<ActivePolicy<C>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Option<AttachedSchedule>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::create_shared_diagnostics;
    use crate::probe::LoggingWakeLock;
    use crate::protocol::LocalProtocol;
    use serde_json::json;
    use std::time::Duration;

    fn agent<C: Criterion>(payload: Value) -> (AdaptiveAgent<C>, Arc<LocalProtocol>) {
        let (protocol, _records) = LocalProtocol::new("test");
        let protocol = Arc::new(protocol);
        let context = AgentContext::new(
            SharedWakeLock::new(Arc::new(LoggingWakeLock::new())),
            protocol.clone(),
            create_shared_diagnostics(),
        );
        (AdaptiveAgent::new("test-agent", &payload, context).unwrap(), protocol)
    }

    fn acceleration_policy() -> Value {
        json!({
            "action-interval": "00:00:10",
            "observation-duration": "00:00:05",
            "threshold": 0.5,
            "completion-action-interval": "00:00:20",
        })
    }

    #[test]
    fn test_fast_path_escalates_from_idle_only() {
        let (agent, _) = agent::<AccelerationCriterion>(acceleration_policy());

        assert!(agent.observe(Observation::proximity(5.0, 5.0)).is_none());
        assert_eq!(agent.current_state(), AgentState::Idle);

        let action = agent.observe(Observation::proximity(0.0, 5.0)).unwrap();
        assert_eq!(agent.current_state(), AgentState::OpportunisticControl);
        assert_eq!(action.episode, 1);
        assert_eq!(action.interval, Duration::from_secs(20));

        assert!(agent.observe(Observation::proximity(0.0, 5.0)).is_none());
        assert_eq!(agent.resource_stats().elevations, 1);
    }

    #[test]
    fn test_failed_policy_update_keeps_previous() {
        let (agent, _) = agent::<AccelerationCriterion>(acceleration_policy());
        let result = agent.set_policy(&json!({ "threshold": 0.1 }));
        assert!(matches!(result, Err(AgentError::Policy(PolicyError::Missing(_)))));
        assert_eq!(agent.policy().threshold, 0.5);

        let mut updated = acceleration_policy();
        updated["threshold"] = json!(0.1);
        agent.set_policy(&updated).unwrap();
        assert_eq!(agent.policy().threshold, 0.1);
    }

    #[test]
    fn test_completion_check_relinquishes_when_protocol_stops() {
        let (agent, protocol) = agent::<AccelerationCriterion>(acceleration_policy());
        let action = agent.observe(Observation::proximity(0.0, 5.0)).unwrap();
        let signal = CancellationSignal::new();

        assert_eq!(agent.check_completion(&action, &signal), CompletionStatus::Continue);

        protocol.set_running(false);
        assert_eq!(agent.check_completion(&action, &signal), CompletionStatus::Ended);
        assert_eq!(agent.current_state(), AgentState::Idle);
        assert_eq!(agent.check_completion(&action, &signal), CompletionStatus::Stale);

        let stats = agent.resource_stats();
        assert_eq!(stats.elevations, 1);
        assert_eq!(stats.restorations, 1);
    }

    #[test]
    fn test_cancelled_completion_check_releases() {
        let (agent, _) = agent::<AccelerationCriterion>(acceleration_policy());
        let action = agent.observe(Observation::proximity(0.0, 5.0)).unwrap();
        let signal = CancellationSignal::new();
        signal.cancel();

        assert_eq!(agent.check_completion(&action, &signal), CompletionStatus::Ended);
        assert!(!agent.resource_stats().elevated);
    }

    #[test]
    fn test_single_tier_fast_path_is_active_control() {
        let mut payload = acceleration_policy();
        payload["control-tiers"] = json!("single");
        let (agent, _) = agent::<AccelerationCriterion>(payload);

        agent.observe(Observation::proximity(0.0, 5.0)).unwrap();
        assert_eq!(agent.current_state(), AgentState::ActiveControl);
        assert_eq!(agent.coarse_state(), CoarseState::ActionOngoing);
    }

    #[test]
    fn test_reset_ends_control() {
        let (agent, _) = agent::<AccelerationCriterion>(acceleration_policy());
        agent.observe(Observation::proximity(0.0, 5.0)).unwrap();
        agent.reset();
        assert_eq!(agent.current_state(), AgentState::Idle);
        assert!(!agent.resource_stats().elevated);

        agent.reset();
        assert_eq!(agent.resource_stats().anomalies, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_act_cancelled_while_observing() {
        let (agent, _) = agent::<AccelerationCriterion>(acceleration_policy());
        let agent = Arc::new(agent);
        let signal = CancellationSignal::new();

        let task = {
            let agent = agent.clone();
            let signal = signal.clone();
            tokio::spawn(async move { agent.act(&signal).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(agent.current_state(), AgentState::Observing);
        signal.cancel();

        assert_eq!(task.await.unwrap(), Err(AgentError::Cancelled));
        assert_eq!(agent.current_state(), AgentState::Idle);
        assert_eq!(agent.resource_stats().elevations, 0);
    }

    /// Fires a cancellation signal when the agent raises its sampling rate.
    struct CancelOnRestart {
        signal: CancellationSignal,
        rate: Mutex<Option<f64>>,
    }

    impl ListeningProbe for CancelOnRestart {
        fn kind(&self) -> ObservationKind {
            ObservationKind::Acceleration
        }

        fn sampling_rate(&self) -> Option<f64> {
            *self.rate.lock().unwrap()
        }

        fn reconfigure(&self, rate: Option<f64>) -> Result<(), crate::probe::PlatformError> {
            *self.rate.lock().unwrap() = rate;
            Ok(())
        }

        fn restart(&self) -> Result<(), crate::probe::PlatformError> {
            self.signal.cancel();
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_act_cancelled_after_taking_control() {
        let signal = CancellationSignal::new();
        let probe = Arc::new(CancelOnRestart {
            signal: signal.clone(),
            rate: Mutex::new(Some(1.0)),
        });
        let (protocol, _records) = LocalProtocol::new("test");
        let wake_lock = Arc::new(LoggingWakeLock::new());
        let context = AgentContext::new(
            SharedWakeLock::new(wake_lock.clone()),
            Arc::new(protocol),
            create_shared_diagnostics(),
        )
        .with_probe(probe.clone());

        let mut policy = acceleration_policy();
        policy["elevated-sampling-rate"] = json!(10);
        let agent = Arc::new(AccelerationAgent::new("test-agent", &policy, context).unwrap());

        let task = {
            let agent = agent.clone();
            let signal = signal.clone();
            tokio::spawn(async move { agent.act(&signal).await })
        };
        while agent.current_state() != AgentState::Observing {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            agent.observe(Observation::acceleration(0.0, 0.0, 1.6));
        }

        // the criterion is met, then the signal fires while elevating
        assert_eq!(task.await.unwrap(), Err(AgentError::Cancelled));
        assert_eq!(agent.current_state(), AgentState::Idle);

        let stats = agent.resource_stats();
        assert_eq!(stats.elevations, 1);
        assert_eq!(stats.restorations, 1);
        assert_eq!(wake_lock.acquisitions(), wake_lock.releases());
        assert_eq!(probe.sampling_rate(), Some(1.0));
    }

    #[test]
    fn test_abandon_ignores_other_episodes() {
        let (agent, _) = agent::<AccelerationCriterion>(acceleration_policy());
        agent.observe(Observation::proximity(0.0, 5.0)).unwrap();

        agent.abandon_episode(7);
        assert_eq!(agent.current_state(), AgentState::OpportunisticControl);

        agent.abandon_episode(1);
        assert_eq!(agent.current_state(), AgentState::Idle);
        assert_eq!(agent.resource_stats().restorations, 1);
    }
}
