use crate::error::{UpgraderError, UpgraderResult};
use crate::ports::{ChainClient, KeyLoader};
use crate::types::{NodeDescriptor, ProposalStatus};
use slog::{debug, info, Logger};
use std::sync::Arc;

/// Casts a "yes" vote from every validator of the devnet. Idempotent by
/// construction: validators whose votes are already recorded on-chain are
/// skipped, so re-invoking after a crash never double-votes.
pub struct VoteCoordinator {
    chain: Arc<dyn ChainClient>,
    keys: Arc<dyn KeyLoader>,
    logger: Logger,
}

impl VoteCoordinator {
    pub fn new(chain: Arc<dyn ChainClient>, keys: Arc<dyn KeyLoader>, logger: Logger) -> Self {
        Self {
            chain,
            keys,
            logger,
        }
    }

    pub async fn vote(
        &self,
        proposal_id: u64,
        validators: &[NodeDescriptor],
    ) -> UpgraderResult<()> {
        match self.chain.proposal_status(proposal_id).await? {
            ProposalStatus::VotingPeriod => {}
            ProposalStatus::Passed => {
                // A resume that lost its checkpoint can land here after the
                // tally; nothing left to do.
                info!(
                    self.logger,
                    "Proposal {} already passed, skipping votes", proposal_id
                );
                return Ok(());
            }
            ProposalStatus::Rejected | ProposalStatus::NotFound => {
                return Err(UpgraderError::VotingClosed(proposal_id))
            }
        }

        let recorded = self.chain.recorded_votes(proposal_id).await?;
        for validator in validators.iter().filter(|node| node.validator) {
            if recorded.contains(&validator.name) {
                debug!(
                    self.logger,
                    "Validator {} already voted on proposal {}", validator.name, proposal_id
                );
                continue;
            }
            let key = self.keys.signing_key(&validator.name).await?;
            self.chain.submit_vote(proposal_id, &key).await?;
            info!(
                self.logger,
                "Validator {} voted yes on proposal {}", validator.name, proposal_id
            );
        }
        Ok(())
    }
}
