use crate::error::{UpgraderError, UpgraderResult};
use crate::phase::{next_phase, Phase, PhaseOutcome};
use crate::types::{DevnetRef, UpgradeSpec};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::SystemTime};

/// Locations of the optional genesis snapshots taken around the binary
/// switch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedGenesisPaths {
    pub pre_upgrade: Option<PathBuf>,
    pub post_upgrade: Option<PathBuf>,
}

/// The persisted, mutable workflow state of one upgrade — the central
/// entity of the engine. Mutated exclusively through the transition table
/// (`advance`) or detector reconciliation (`fast_forward`), and persisted by
/// the state store after every phase boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub name: String,
    pub namespace: String,
    pub devnet: DevnetRef,
    pub phase: Phase,
    /// On-chain governance proposal id; set exactly once, never reused
    /// across attempts.
    pub proposal_id: Option<u64>,
    /// Resolved upgrade height; absent until computable.
    pub target_height: Option<u64>,
    /// Count of orchestration passes; each resume counts as one.
    pub attempts: u32,
    /// Last recorded failure; cleared on every successful phase advance.
    pub last_error: Option<String>,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
    pub exported_genesis: ExportedGenesisPaths,
    /// The immutable spec this upgrade was created from; carried in the
    /// record so a resume needs nothing but the record itself.
    pub spec: UpgradeSpec,
}

impl UpgradeRecord {
    pub fn new(spec: UpgradeSpec) -> Self {
        let now = SystemTime::now();
        Self {
            name: format!("upgrade-{}", spec.devnet.name),
            namespace: spec.devnet.namespace.clone(),
            devnet: spec.devnet.clone(),
            phase: Phase::Pending,
            proposal_id: None,
            target_height: None,
            attempts: 0,
            last_error: None,
            started_at: now,
            updated_at: now,
            exported_genesis: ExportedGenesisPaths::default(),
            spec,
        }
    }

    /// Advance to the next phase for the given outcome. Clears `last_error`;
    /// the caller checkpoints the record afterwards.
    pub fn advance(&mut self, outcome: PhaseOutcome) -> UpgraderResult<Phase> {
        self.phase = next_phase(self.phase, outcome)?;
        self.last_error = None;
        self.updated_at = SystemTime::now();
        Ok(self.phase)
    }

    /// Jump forward to a phase the detector observed as already reached.
    /// Only strictly forward jumps on the happy path are accepted; the
    /// skipped phases' actions are not re-run.
    pub fn fast_forward(&mut self, observed: Phase) -> UpgraderResult<()> {
        let (current, target) = match (self.phase.progress_rank(), observed.progress_rank()) {
            (Some(current), Some(target)) => (current, target),
            _ => {
                return Err(UpgraderError::inconsistent(format!(
                    "cannot fast-forward from {} to {}",
                    self.phase, observed
                )))
            }
        };
        if target <= current {
            return Err(UpgraderError::inconsistent(format!(
                "fast-forward target {} is not ahead of {}",
                observed, self.phase
            )));
        }
        self.phase = observed;
        self.last_error = None;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// Move to the terminal `VoteRejected` phase after the detector observed
    /// a rejected tally on-chain, regardless of which non-terminal phase was
    /// checkpointed last.
    pub fn mark_rejected(&mut self, detail: impl ToString) -> UpgraderResult<()> {
        if self.phase.is_terminal() {
            return Err(UpgraderError::inconsistent(format!(
                "cannot reject an upgrade already terminal at {}",
                self.phase
            )));
        }
        self.phase = Phase::VoteRejected;
        self.last_error = Some(detail.to_string());
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// Record a phase failure without moving the phase.
    pub fn note_error(&mut self, error: &UpgraderError) {
        self.last_error = Some(error.to_string());
        self.updated_at = SystemTime::now();
    }

    /// Set the proposal id; at most once per record.
    pub fn set_proposal_id(&mut self, proposal_id: u64) -> UpgraderResult<()> {
        match self.proposal_id {
            None => {
                self.proposal_id = Some(proposal_id);
                Ok(())
            }
            Some(existing) => Err(UpgraderError::inconsistent(format!(
                "proposal id already set to {existing}, refusing to overwrite with {proposal_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BinaryRef, UpgradeHeight};

    fn test_spec() -> UpgradeSpec {
        UpgradeSpec {
            devnet: DevnetRef::new("default", "alpha"),
            title: "upgrade to v2".to_string(),
            description: "test".to_string(),
            target_binary: BinaryRef::Image("chaind:v2".to_string()),
            height: UpgradeHeight::BlocksFromNow(10),
            voting_period: None,
            export_before: false,
            export_after: false,
            export_dir: None,
        }
    }

    #[test]
    fn advance_clears_the_last_error() {
        let mut record = UpgradeRecord::new(test_spec());
        record.note_error(&UpgraderError::chain_unavailable("rpc down"));
        assert!(record.last_error.is_some());

        record.advance(PhaseOutcome::Succeeded).unwrap();
        assert_eq!(record.phase, Phase::Proposed);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn fast_forward_rejects_backward_jumps() {
        let mut record = UpgradeRecord::new(test_spec());
        record.fast_forward(Phase::AwaitingHeight).unwrap();
        assert_eq!(record.phase, Phase::AwaitingHeight);

        assert!(record.fast_forward(Phase::Proposed).is_err());
        assert!(record.fast_forward(Phase::AwaitingHeight).is_err());
        assert_eq!(record.phase, Phase::AwaitingHeight);
    }

    #[test]
    fn proposal_id_is_set_exactly_once() {
        let mut record = UpgradeRecord::new(test_spec());
        record.set_proposal_id(7).unwrap();
        assert!(matches!(
            record.set_proposal_id(8),
            Err(UpgraderError::Inconsistent(_))
        ));
        assert_eq!(record.proposal_id, Some(7));
    }
}
