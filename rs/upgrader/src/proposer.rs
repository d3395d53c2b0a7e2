use crate::error::{UpgraderError, UpgraderResult};
use crate::ports::{ChainClient, KeyLoader, NodeRepository};
use crate::types::{NodeDescriptor, UpgradePlan, UpgradeHeight, UpgradeSpec};
use slog::{info, Logger};
use std::sync::Arc;

/// Constructs and submits the on-chain governance upgrade proposal, signed
/// by the first validator of the devnet. One on-chain transaction per call;
/// the orchestrator guarantees it is invoked at most once per record by
/// skipping the call once a proposal id is set.
pub struct GovernanceProposer {
    chain: Arc<dyn ChainClient>,
    keys: Arc<dyn KeyLoader>,
    nodes: Arc<dyn NodeRepository>,
    logger: Logger,
}

impl GovernanceProposer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        keys: Arc<dyn KeyLoader>,
        nodes: Arc<dyn NodeRepository>,
        logger: Logger,
    ) -> Self {
        Self {
            chain,
            keys,
            nodes,
            logger,
        }
    }

    /// Validate the spec, resolve the target height against the current
    /// chain height, and submit the proposal. Returns the proposal id
    /// assigned by the chain and the resolved target height.
    pub async fn propose(&self, spec: &UpgradeSpec) -> UpgraderResult<(u64, u64)> {
        let version_tag = validate(spec)?;

        let current_height = self.chain.block_height().await?;
        let target_height = match spec.height {
            UpgradeHeight::Absolute(height) if height > current_height => height,
            UpgradeHeight::Absolute(height) => {
                return Err(UpgraderError::invalid_spec(format!(
                    "target height {height} is not above the current height {current_height}"
                )))
            }
            UpgradeHeight::BlocksFromNow(blocks) => current_height + blocks,
        };

        let proposer = self.pick_proposer(spec).await?;
        let key = self.keys.signing_key(&proposer.name).await?;

        let plan = UpgradePlan {
            name: version_tag,
            height: target_height,
            info: spec.description.clone(),
        };
        let proposal_id = self.chain.submit_proposal(&plan, &key).await?;

        info!(
            self.logger,
            "Submitted upgrade proposal {} for devnet {}: {} at height {}",
            proposal_id,
            spec.devnet,
            plan.name,
            target_height
        );
        Ok((proposal_id, target_height))
    }

    async fn pick_proposer(&self, spec: &UpgradeSpec) -> UpgraderResult<NodeDescriptor> {
        self.nodes
            .nodes(&spec.devnet)
            .await?
            .into_iter()
            .find(|node| node.validator)
            .ok_or_else(|| {
                UpgraderError::invalid_spec(format!("devnet {} has no validators", spec.devnet))
            })
    }
}

fn validate(spec: &UpgradeSpec) -> UpgraderResult<String> {
    if spec.title.trim().is_empty() {
        return Err(UpgraderError::invalid_spec("proposal title is empty"));
    }
    if matches!(spec.height, UpgradeHeight::BlocksFromNow(0)) {
        return Err(UpgraderError::invalid_spec(
            "height offset of zero blocks leaves no time for the upgrade",
        ));
    }
    if (spec.export_before || spec.export_after) && spec.export_dir.is_none() {
        return Err(UpgraderError::invalid_spec(
            "genesis export requested but no export directory given",
        ));
    }
    spec.target_binary.version_tag()
}
