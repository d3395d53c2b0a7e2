use crate::error::UpgraderResult;
use crate::phase::Phase;
use crate::ports::{ChainClient, NodeRepository, ProcessExecutor};
use crate::record::UpgradeRecord;
use crate::types::ProposalStatus;
use slog::{debug, Logger};
use std::sync::Arc;

/// What the live chain and process layer say about an upgrade, mapped onto
/// the phase enum independently of the persisted record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    pub phase: Phase,
    pub detail: String,
}

/// How the persisted record relates to the observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// Persisted and observed agree; resume from the checkpoint.
    InSync,
    /// The chain is ahead of the record: the action ran but the checkpoint
    /// was lost. Jump the record forward without re-running the skipped
    /// actions.
    FastForward(Phase),
    /// The proposal was rejected on-chain; the record must move to the
    /// terminal `VoteRejected` phase.
    Rejected,
    /// The chain is behind the record (state drift or rollback). Not
    /// reconcilable; surfaced for manual intervention.
    Drift(Phase),
}

/// Queries the chain and the process layer to determine the actual external
/// state of an in-flight or historical upgrade. The chain, not the record,
/// is the ground truth after an interruption.
pub struct StateDetector {
    chain: Arc<dyn ChainClient>,
    nodes: Arc<dyn NodeRepository>,
    process: Arc<dyn ProcessExecutor>,
    logger: Logger,
}

impl StateDetector {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        nodes: Arc<dyn NodeRepository>,
        process: Arc<dyn ProcessExecutor>,
        logger: Logger,
    ) -> Self {
        Self {
            chain,
            nodes,
            process,
            logger,
        }
    }

    pub async fn detect(&self, record: &UpgradeRecord) -> UpgraderResult<Observation> {
        let Some(proposal_id) = record.proposal_id else {
            return Ok(Observation {
                phase: Phase::Pending,
                detail: "no proposal submitted".to_string(),
            });
        };

        let observation = match self.chain.proposal_status(proposal_id).await? {
            ProposalStatus::NotFound => Observation {
                phase: Phase::Pending,
                detail: format!("proposal {proposal_id} unknown to the chain"),
            },
            ProposalStatus::Rejected => Observation {
                phase: Phase::VoteRejected,
                detail: format!("proposal {proposal_id} was rejected"),
            },
            ProposalStatus::VotingPeriod => self.observe_voting(record, proposal_id).await?,
            ProposalStatus::Passed => self.observe_passed(record, proposal_id).await?,
        };

        debug!(
            self.logger,
            "Detected phase {} for devnet {}: {}",
            observation.phase,
            record.devnet,
            observation.detail
        );
        Ok(observation)
    }

    /// Proposal exists and is in its voting period. The vote action counts
    /// as done only when every validator's vote is recorded; anything less
    /// maps back to `Proposed` so a resume re-runs the (idempotent) voting.
    async fn observe_voting(
        &self,
        record: &UpgradeRecord,
        proposal_id: u64,
    ) -> UpgraderResult<Observation> {
        let recorded = self.chain.recorded_votes(proposal_id).await?;
        let missing = self
            .nodes
            .nodes(&record.devnet)
            .await?
            .into_iter()
            .filter(|node| node.validator && !recorded.contains(&node.name))
            .count();

        Ok(if missing == 0 {
            Observation {
                phase: Phase::Voting,
                detail: format!("all votes recorded on proposal {proposal_id}"),
            }
        } else {
            Observation {
                phase: Phase::Proposed,
                detail: format!("{missing} validator vote(s) missing on proposal {proposal_id}"),
            }
        })
    }

    /// Proposal passed: distinguish waiting-for-height from the
    /// post-height phases via the chain height and reported node versions.
    async fn observe_passed(
        &self,
        record: &UpgradeRecord,
        proposal_id: u64,
    ) -> UpgraderResult<Observation> {
        let Some(target_height) = record.target_height else {
            return Ok(Observation {
                phase: Phase::VotePassed,
                detail: format!("proposal {proposal_id} passed, target height not recorded"),
            });
        };

        let height = self.chain.block_height().await?;
        if height < target_height {
            return Ok(Observation {
                phase: Phase::AwaitingHeight,
                detail: format!("chain at height {height}, upgrading at {target_height}"),
            });
        }

        let want = record.spec.target_binary.version_tag()?;
        let nodes = self.nodes.nodes(&record.devnet).await?;
        let total = nodes.len();
        let mut switched = 0usize;
        for node in &nodes {
            // A node that cannot report a version counts as not switched.
            match self.process.reported_version(&record.devnet, &node.name).await {
                Ok(version) if version == want => switched += 1,
                _ => {}
            }
        }

        Ok(if switched == total && total > 0 {
            // Never observe straight to Completed: health is re-verified,
            // not assumed.
            Observation {
                phase: Phase::VerifyingHealth,
                detail: format!("all {total} nodes report {want}"),
            }
        } else if switched > 0 {
            Observation {
                phase: Phase::SwitchingBinary,
                detail: format!("{switched} of {total} nodes report {want}"),
            }
        } else {
            Observation {
                phase: Phase::ExportingState,
                detail: format!("target height {target_height} reached, no node switched yet"),
            }
        })
    }
}

/// Compare the persisted phase against the observed one. Comparison happens
/// on coarse observation groups because the phases between height-reached
/// and completion cannot be told apart from the outside; within a group the
/// persisted checkpoint wins unless the observation is strictly ahead.
pub fn reconcile(persisted: Phase, observation: &Observation) -> Reconciliation {
    if observation.phase == Phase::VoteRejected {
        return Reconciliation::Rejected;
    }

    let (Some(observed_group), Some(persisted_group)) = (
        observation.phase.observation_group(),
        persisted.observation_group(),
    ) else {
        return Reconciliation::Drift(observation.phase);
    };

    if observed_group > persisted_group {
        return Reconciliation::FastForward(observation.phase);
    }
    if observed_group < persisted_group {
        return Reconciliation::Drift(observation.phase);
    }

    // Same group: fast-forward only on strict happy-path progress.
    match (observation.phase.progress_rank(), persisted.progress_rank()) {
        (Some(observed), Some(current)) if observed > current => {
            Reconciliation::FastForward(observation.phase)
        }
        _ => Reconciliation::InSync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(phase: Phase) -> Observation {
        Observation {
            phase,
            detail: String::new(),
        }
    }

    #[test]
    fn observed_ahead_fast_forwards() {
        assert_eq!(
            reconcile(Phase::Proposed, &obs(Phase::AwaitingHeight)),
            Reconciliation::FastForward(Phase::AwaitingHeight)
        );
        assert_eq!(
            reconcile(Phase::AwaitingHeight, &obs(Phase::SwitchingBinary)),
            Reconciliation::FastForward(Phase::SwitchingBinary)
        );
    }

    #[test]
    fn observed_behind_is_drift() {
        assert_eq!(
            reconcile(Phase::AwaitingHeight, &obs(Phase::Pending)),
            Reconciliation::Drift(Phase::Pending)
        );
        assert_eq!(
            reconcile(Phase::Voting, &obs(Phase::Proposed)),
            Reconciliation::Drift(Phase::Proposed)
        );
    }

    #[test]
    fn matching_phases_are_in_sync() {
        assert_eq!(reconcile(Phase::Voting, &obs(Phase::Voting)), Reconciliation::InSync);
        assert_eq!(
            reconcile(Phase::AwaitingHeight, &obs(Phase::AwaitingHeight)),
            Reconciliation::InSync
        );
    }

    #[test]
    fn post_height_group_keeps_the_checkpoint_unless_strictly_ahead() {
        // crash mid-switch: zero nodes switched maps to ExportingState, but
        // the record already checkpointed SwitchingBinary
        assert_eq!(
            reconcile(Phase::SwitchingBinary, &obs(Phase::ExportingState)),
            Reconciliation::InSync
        );
        // all nodes switched: strictly ahead within the group
        assert_eq!(
            reconcile(Phase::SwitchingBinary, &obs(Phase::VerifyingHealth)),
            Reconciliation::FastForward(Phase::VerifyingHealth)
        );
    }

    #[test]
    fn rejected_observation_wins_over_everything() {
        for persisted in [Phase::Proposed, Phase::Voting, Phase::AwaitingHeight] {
            assert_eq!(
                reconcile(persisted, &obs(Phase::VoteRejected)),
                Reconciliation::Rejected
            );
        }
    }
}
