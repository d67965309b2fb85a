//! Side effects of state transitions, as data.
//!
//! Deciding what a transition does is kept separate from doing it: the agent
//! commits a transition under the state lock, asks [`effects_for`] what to
//! do, and executes the list with the lock released.

use crate::core::criterion::Decision;
use crate::core::state::AgentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Empty every observation window
    ClearWindows,
    /// Acquire the wake-lock and elevate sampling
    Elevate,
    /// Release the wake-lock and restore sampling
    Restore,
    /// Cancel the recurring completion check
    CancelSchedule,
    /// Hand a transition record to the protocol
    RecordTransition,
}

/// Effects of moving from `from` to `to`, in execution order.
pub fn effects_for(from: AgentState, to: AgentState) -> Vec<SideEffect> {
    use SideEffect::*;

    let mut effects = Vec::with_capacity(3);
    if to == AgentState::Observing {
        effects.push(ClearWindows);
    }
    if !from.is_controlling() && to.is_controlling() {
        effects.push(Elevate);
    }
    if from.is_controlling() && !to.is_controlling() {
        effects.push(CancelSchedule);
        effects.push(Restore);
    }
    effects.push(RecordTransition);
    effects
}

/// What a completion check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStep {
    /// Keep control and check again after the interval
    Renew,
    /// Give control up
    Relinquish(RelinquishReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelinquishReason {
    ProtocolStopped,
    CriterionUnmet,
    /// Too little data to decide
    Inconclusive,
    Cancelled,
    Reset,
    ScheduleFailed,
}

impl std::fmt::Display for RelinquishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RelinquishReason::ProtocolStopped => "protocol is not running",
            RelinquishReason::CriterionUnmet => "criterion no longer met",
            RelinquishReason::Inconclusive => "no data to evaluate",
            RelinquishReason::Cancelled => "cancelled",
            RelinquishReason::Reset => "agent reset",
            RelinquishReason::ScheduleFailed => "completion check could not be scheduled",
        };
        f.write_str(text)
    }
}

/// Decide one completion check from the protocol run state and a criterion decision.
pub fn completion_step(protocol_running: bool, decision: Option<Decision>) -> CompletionStep {
    if !protocol_running {
        return CompletionStep::Relinquish(RelinquishReason::ProtocolStopped);
    }
    match decision {
        Some(d) if d.met => CompletionStep::Renew,
        Some(_) => CompletionStep::Relinquish(RelinquishReason::CriterionUnmet),
        None => CompletionStep::Relinquish(RelinquishReason::Inconclusive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentState::*;

    #[test]
    fn test_escalation_effects() {
        assert_eq!(
            effects_for(Idle, Observing),
            vec![SideEffect::ClearWindows, SideEffect::RecordTransition]
        );
        assert_eq!(
            effects_for(Observing, ActiveControl),
            vec![SideEffect::Elevate, SideEffect::RecordTransition]
        );
        assert_eq!(
            effects_for(Idle, OpportunisticControl),
            vec![SideEffect::Elevate, SideEffect::RecordTransition]
        );
    }

    #[test]
    fn test_relinquish_effects_pair_with_elevate() {
        assert_eq!(
            effects_for(ActiveControl, EndingControl),
            vec![
                SideEffect::CancelSchedule,
                SideEffect::Restore,
                SideEffect::RecordTransition
            ]
        );
        assert_eq!(effects_for(EndingControl, Idle), vec![SideEffect::RecordTransition]);
        assert_eq!(effects_for(Observing, Idle), vec![SideEffect::RecordTransition]);
    }

    #[test]
    fn test_completion_step() {
        let met = Some(Decision::new(true, 0.6));
        let unmet = Some(Decision::new(false, 0.2));

        assert_eq!(completion_step(true, met), CompletionStep::Renew);
        assert_eq!(
            completion_step(true, unmet),
            CompletionStep::Relinquish(RelinquishReason::CriterionUnmet)
        );
        assert_eq!(
            completion_step(true, None),
            CompletionStep::Relinquish(RelinquishReason::Inconclusive)
        );
        assert_eq!(
            completion_step(false, met),
            CompletionStep::Relinquish(RelinquishReason::ProtocolStopped)
        );
    }
}
