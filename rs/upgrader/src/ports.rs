//! Collaborator capabilities consumed by the engine. The engine never
//! implements these; the daemon wires in concrete adapters and tests wire in
//! fakes.

use crate::error::UpgraderResult;
use crate::types::{
    BinaryRef, DevnetRef, NodeDescriptor, ProposalStatus, SigningKey, UpgradePlan,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Read and write access to the chain's governance and block-height state.
/// The chain is the authoritative source of truth the detector reconciles
/// against.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_height(&self) -> UpgraderResult<u64>;

    async fn proposal_status(&self, proposal_id: u64) -> UpgraderResult<ProposalStatus>;

    /// Names of the validators whose votes are already recorded on-chain for
    /// the proposal.
    async fn recorded_votes(&self, proposal_id: u64) -> UpgraderResult<BTreeSet<String>>;

    /// Submit the signed upgrade proposal transaction; returns the proposal
    /// id assigned by the chain.
    async fn submit_proposal(&self, plan: &UpgradePlan, key: &SigningKey)
        -> UpgraderResult<u64>;

    /// Cast a "yes" vote on the proposal with the given validator key.
    async fn submit_vote(&self, proposal_id: u64, key: &SigningKey) -> UpgraderResult<()>;
}

/// Resolves signing keys by validator identity.
#[async_trait]
pub trait KeyLoader: Send + Sync {
    async fn signing_key(&self, validator: &str) -> UpgraderResult<SigningKey>;
}

/// Read access to a devnet's node topology.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn nodes(&self, devnet: &DevnetRef) -> UpgraderResult<Vec<NodeDescriptor>>;
}

/// Node process lifecycle and binary binding.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn stop_node(&self, devnet: &DevnetRef, node: &str) -> UpgraderResult<()>;

    async fn start_node(&self, devnet: &DevnetRef, node: &str) -> UpgraderResult<()>;

    async fn restart_node(&self, devnet: &DevnetRef, node: &str) -> UpgraderResult<()>;

    /// Replace the binary reference in the node's runtime configuration.
    /// Takes effect on the next start.
    async fn rebind_binary(
        &self,
        devnet: &DevnetRef,
        node: &str,
        binary: &BinaryRef,
    ) -> UpgraderResult<()>;

    /// The version string the node's binary currently reports.
    async fn reported_version(&self, devnet: &DevnetRef, node: &str) -> UpgraderResult<String>;
}

/// Per-node health status. Consecutive-failure tracking is done by the
/// orchestrator, not the checker.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn is_healthy(&self, devnet: &DevnetRef, node: &str) -> UpgraderResult<bool>;
}

/// Produces a genesis snapshot file for a devnet at a point in time.
#[async_trait]
pub trait ExportService: Send + Sync {
    /// Export a genesis snapshot into `dir`; `label` distinguishes the
    /// pre-upgrade from the post-upgrade snapshot. Returns the written path.
    async fn export_genesis(
        &self,
        devnet: &DevnetRef,
        dir: &Path,
        label: &str,
    ) -> UpgraderResult<PathBuf>;
}
