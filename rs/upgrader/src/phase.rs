use crate::error::{UpgraderError, UpgraderResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::AsRefStr;
use strum_macros::EnumIter;

/// The fixed workflow state machine. Happy path, in order:
/// `Pending → Proposed → Voting → VotePassed → AwaitingHeight →
/// ExportingState → SwitchingBinary → RestartingNodes → VerifyingHealth →
/// Completed`. `VoteRejected`, `Failed` and `Cancelled` are terminal exits
/// reachable from every non-terminal phase.
#[derive(
    Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize, EnumIter, AsRefStr,
)]
pub enum Phase {
    Pending,
    Proposed,
    Voting,
    VotePassed,
    AwaitingHeight,
    ExportingState,
    SwitchingBinary,
    RestartingNodes,
    VerifyingHealth,
    Completed,
    VoteRejected,
    Failed,
    Cancelled,
}

/// The outcome of one phase's action, fed to the transition table.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PhaseOutcome {
    Succeeded,
    Rejected,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::VoteRejected | Phase::Failed | Phase::Cancelled
        )
    }

    /// Position on the happy path; `None` for the failure exits. Used by the
    /// detector to decide whether an observation is ahead of or behind the
    /// persisted record.
    pub fn progress_rank(self) -> Option<u8> {
        match self {
            Phase::Pending => Some(0),
            Phase::Proposed => Some(1),
            Phase::Voting => Some(2),
            Phase::VotePassed => Some(3),
            Phase::AwaitingHeight => Some(4),
            Phase::ExportingState => Some(5),
            Phase::SwitchingBinary => Some(6),
            Phase::RestartingNodes => Some(7),
            Phase::VerifyingHealth => Some(8),
            Phase::Completed => Some(9),
            Phase::VoteRejected | Phase::Failed | Phase::Cancelled => None,
        }
    }

    /// Coarser grouping for reconciliation: the phases between reaching the
    /// target height and completion are not individually distinguishable
    /// from chain observations alone.
    pub(crate) fn observation_group(self) -> Option<u8> {
        match self {
            Phase::Pending => Some(0),
            Phase::Proposed => Some(1),
            Phase::Voting => Some(2),
            Phase::VotePassed => Some(3),
            Phase::AwaitingHeight => Some(4),
            Phase::ExportingState
            | Phase::SwitchingBinary
            | Phase::RestartingNodes
            | Phase::VerifyingHealth => Some(5),
            Phase::Completed => Some(6),
            Phase::VoteRejected | Phase::Failed | Phase::Cancelled => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Pure transition table. Everything not listed here is an
/// `InvalidTransition`, which makes illegal phase jumps a programming error
/// caught at the call site instead of a silently corrupted record.
pub fn next_phase(current: Phase, outcome: PhaseOutcome) -> UpgraderResult<Phase> {
    use Phase::*;

    let next = match (current, outcome) {
        (Pending, PhaseOutcome::Succeeded) => Proposed,
        (Proposed, PhaseOutcome::Succeeded) => Voting,
        (Voting, PhaseOutcome::Succeeded) => VotePassed,
        (Voting, PhaseOutcome::Rejected) => VoteRejected,
        (VotePassed, PhaseOutcome::Succeeded) => AwaitingHeight,
        (AwaitingHeight, PhaseOutcome::Succeeded) => ExportingState,
        (ExportingState, PhaseOutcome::Succeeded) => SwitchingBinary,
        (SwitchingBinary, PhaseOutcome::Succeeded) => RestartingNodes,
        (RestartingNodes, PhaseOutcome::Succeeded) => VerifyingHealth,
        (VerifyingHealth, PhaseOutcome::Succeeded) => Completed,
        (phase, PhaseOutcome::Failed) if !phase.is_terminal() => Failed,
        (phase, PhaseOutcome::Cancelled) if !phase.is_terminal() => Cancelled,
        (phase, outcome) => return Err(UpgraderError::InvalidTransition(phase, outcome)),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn happy_path_is_a_total_order() {
        let mut phase = Phase::Pending;
        let expected = [
            Phase::Proposed,
            Phase::Voting,
            Phase::VotePassed,
            Phase::AwaitingHeight,
            Phase::ExportingState,
            Phase::SwitchingBinary,
            Phase::RestartingNodes,
            Phase::VerifyingHealth,
            Phase::Completed,
        ];
        for next in expected {
            phase = next_phase(phase, PhaseOutcome::Succeeded).unwrap();
            assert_eq!(phase, next);
        }
        assert!(phase.is_terminal());
    }

    #[test]
    fn terminal_phases_accept_no_transition() {
        for phase in [Phase::Completed, Phase::VoteRejected, Phase::Failed, Phase::Cancelled] {
            for outcome in [
                PhaseOutcome::Succeeded,
                PhaseOutcome::Rejected,
                PhaseOutcome::Failed,
                PhaseOutcome::Cancelled,
            ] {
                assert!(matches!(
                    next_phase(phase, outcome),
                    Err(UpgraderError::InvalidTransition(_, _))
                ));
            }
        }
    }

    #[test]
    fn rejection_is_only_legal_while_voting() {
        assert_eq!(
            next_phase(Phase::Voting, PhaseOutcome::Rejected).unwrap(),
            Phase::VoteRejected
        );
        for phase in Phase::iter().filter(|p| *p != Phase::Voting) {
            assert!(next_phase(phase, PhaseOutcome::Rejected).is_err());
        }
    }

    #[test]
    fn every_non_terminal_phase_can_fail_or_cancel() {
        for phase in Phase::iter().filter(|p| !p.is_terminal()) {
            assert_eq!(next_phase(phase, PhaseOutcome::Failed).unwrap(), Phase::Failed);
            assert_eq!(
                next_phase(phase, PhaseOutcome::Cancelled).unwrap(),
                Phase::Cancelled
            );
        }
    }

    #[test]
    fn ranks_follow_the_happy_path() {
        let mut phase = Phase::Pending;
        let mut rank = phase.progress_rank().unwrap();
        while !phase.is_terminal() {
            phase = next_phase(phase, PhaseOutcome::Succeeded).unwrap();
            let next_rank = phase.progress_rank().unwrap();
            assert!(next_rank > rank);
            rank = next_rank;
        }
    }
}
