//! Transition table of the run lifecycle.

use super::model::{BatchOutcome, RunStatus, StageKind};

/// Side effect the poller performs alongside a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Trigger(StageKind),
    Dequeue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// `None` leaves the status unchanged.
    pub next: Option<RunStatus>,
    pub effect: Effect,
}

impl Transition {
    const STAY: Self = Self {
        next: None,
        effect: Effect::None,
    };

    fn to(next: RunStatus, effect: Effect) -> Self {
        Self {
            next: Some(next),
            effect,
        }
    }
}

/// One step of the lifecycle. `batch` is the outcome of the batch for the
/// stage the run is currently in, and is ignored outside `Planning` and
/// `Applying`.
pub fn transition(current: RunStatus, batch: BatchOutcome, approval_required: bool) -> Transition {
    use RunStatus::*;

    match (current, batch) {
        (Queued, _) => Transition::to(Planning, Effect::Trigger(StageKind::Plan)),
        (Planning, BatchOutcome::Failed) => Transition::to(Failed, Effect::Dequeue),
        (Planning, BatchOutcome::Succeeded) if approval_required => {
            Transition::to(PendingApproval, Effect::None)
        }
        (Planning, BatchOutcome::Succeeded) => Transition::to(Approved, Effect::None),
        (Planning, BatchOutcome::InProgress) => Transition::STAY,
        // Advanced by an explicit approval only.
        (PendingApproval, _) => Transition::STAY,
        (Approved, _) => Transition::to(Applying, Effect::Trigger(StageKind::Apply)),
        (Applying, BatchOutcome::Failed) => Transition::to(Failed, Effect::Dequeue),
        (Applying, BatchOutcome::Succeeded) => Transition::to(Succeeded, Effect::None),
        (Applying, BatchOutcome::InProgress) => Transition::STAY,
        (Succeeded | Failed, _) => Transition {
            next: None,
            effect: Effect::Dequeue,
        },
    }
}

/// The stage whose batch decides the next transition from `status`.
pub fn awaited_stage(status: RunStatus) -> Option<StageKind> {
    match status {
        RunStatus::Planning => Some(StageKind::Plan),
        RunStatus::Applying => Some(StageKind::Apply),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BatchOutcome::*;

    #[test]
    fn test_queued_triggers_plan() {
        let t = transition(RunStatus::Queued, InProgress, true);
        assert_eq!(t.next, Some(RunStatus::Planning));
        assert_eq!(t.effect, Effect::Trigger(StageKind::Plan));
    }

    #[test]
    fn test_planning_outcomes() {
        assert_eq!(transition(RunStatus::Planning, InProgress, true), Transition::STAY);
        assert_eq!(
            transition(RunStatus::Planning, Succeeded, true).next,
            Some(RunStatus::PendingApproval)
        );
        assert_eq!(
            transition(RunStatus::Planning, Succeeded, false).next,
            Some(RunStatus::Approved)
        );
        let failed = transition(RunStatus::Planning, Failed, false);
        assert_eq!(failed.next, Some(RunStatus::Failed));
        assert_eq!(failed.effect, Effect::Dequeue);
    }

    #[test]
    fn test_pending_approval_never_advances() {
        for batch in [InProgress, Succeeded, Failed] {
            assert_eq!(
                transition(RunStatus::PendingApproval, batch, true),
                Transition::STAY
            );
        }
    }

    #[test]
    fn test_approved_triggers_apply() {
        let t = transition(RunStatus::Approved, InProgress, true);
        assert_eq!(t.next, Some(RunStatus::Applying));
        assert_eq!(t.effect, Effect::Trigger(StageKind::Apply));
    }

    #[test]
    fn test_applying_outcomes() {
        assert_eq!(transition(RunStatus::Applying, InProgress, false), Transition::STAY);
        let ok = transition(RunStatus::Applying, Succeeded, false);
        assert_eq!(ok.next, Some(RunStatus::Succeeded));
        assert_eq!(ok.effect, Effect::None);
        let failed = transition(RunStatus::Applying, Failed, false);
        assert_eq!(failed.next, Some(RunStatus::Failed));
        assert_eq!(failed.effect, Effect::Dequeue);
    }

    #[test]
    fn test_terminal_states_dequeue_only() {
        for status in [RunStatus::Succeeded, RunStatus::Failed] {
            let t = transition(status, Succeeded, false);
            assert_eq!(t.next, None);
            assert_eq!(t.effect, Effect::Dequeue);
        }
    }

    #[test]
    fn test_awaited_stage() {
        assert_eq!(awaited_stage(RunStatus::Planning), Some(StageKind::Plan));
        assert_eq!(awaited_stage(RunStatus::Applying), Some(StageKind::Apply));
        assert_eq!(awaited_stage(RunStatus::Queued), None);
    }
}
