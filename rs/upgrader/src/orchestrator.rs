use crate::config::UpgraderConfig;
use crate::error::{UpgraderError, UpgraderResult};
use crate::metrics::UpgraderMetrics;
use crate::phase::{Phase, PhaseOutcome};
use crate::ports::{
    ChainClient, ExportService, HealthChecker, KeyLoader, NodeRepository, ProcessExecutor,
};
use crate::proposer::GovernanceProposer;
use crate::record::UpgradeRecord;
use crate::store::StateStore;
use crate::switch::BinarySwitchExecutor;
use crate::types::ProposalStatus;
use crate::voter::VoteCoordinator;
use slog::{info, warn, Logger};
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// Drives one upgrade record through the phases from its current phase to a
/// terminal one. Strict state machine: each phase's action is attempted, and
/// only on success is the transition taken and the record checkpointed. On
/// failure the phase stays at the last completed one, `last_error` is
/// recorded, and the error is returned.
pub struct UpgradeOrchestrator {
    store: Arc<StateStore>,
    chain: Arc<dyn ChainClient>,
    nodes: Arc<dyn NodeRepository>,
    process: Arc<dyn ProcessExecutor>,
    health: Arc<dyn HealthChecker>,
    export: Arc<dyn ExportService>,
    proposer: GovernanceProposer,
    voter: VoteCoordinator,
    switcher: BinarySwitchExecutor,
    config: UpgraderConfig,
    metrics: Arc<UpgraderMetrics>,
    logger: Logger,
}

impl UpgradeOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        chain: Arc<dyn ChainClient>,
        keys: Arc<dyn KeyLoader>,
        nodes: Arc<dyn NodeRepository>,
        process: Arc<dyn ProcessExecutor>,
        health: Arc<dyn HealthChecker>,
        export: Arc<dyn ExportService>,
        config: UpgraderConfig,
        metrics: Arc<UpgraderMetrics>,
        logger: Logger,
    ) -> Self {
        let proposer = GovernanceProposer::new(
            Arc::clone(&chain),
            Arc::clone(&keys),
            Arc::clone(&nodes),
            logger.clone(),
        );
        let voter = VoteCoordinator::new(Arc::clone(&chain), Arc::clone(&keys), logger.clone());
        let switcher = BinarySwitchExecutor::new(
            Arc::clone(&process),
            Arc::clone(&nodes),
            logger.clone(),
        );
        Self {
            store,
            chain,
            nodes,
            process,
            health,
            export,
            proposer,
            voter,
            switcher,
            config,
            metrics,
            logger,
        }
    }

    /// Single pass from `record.phase` towards a terminal phase. On
    /// cancellation the record is left at its last checkpoint without an
    /// error note, eligible for a later resume.
    pub async fn execute(
        &self,
        token: &CancellationToken,
        record: &mut UpgradeRecord,
    ) -> UpgraderResult<()> {
        info!(
            self.logger,
            "Executing upgrade for devnet {} starting at phase {} (attempt {})",
            record.devnet,
            record.phase,
            record.attempts
        );

        while !record.phase.is_terminal() {
            if token.is_cancelled() {
                info!(
                    self.logger,
                    "Upgrade pass for devnet {} interrupted at phase {}",
                    record.devnet,
                    record.phase
                );
                return Err(UpgraderError::Interrupted);
            }

            match self.run_phase(token, record).await {
                Ok(outcome) => {
                    let entered = record.advance(outcome)?;
                    self.store.save(record)?;
                    self.metrics
                        .phase_transitions
                        .with_label_values(&[entered.as_ref()])
                        .inc();
                    info!(
                        self.logger,
                        "Devnet {} upgrade advanced to {}", record.devnet, entered
                    );
                }
                Err(UpgraderError::Interrupted) => return Err(UpgraderError::Interrupted),
                Err(e) => {
                    record.note_error(&e);
                    self.store.save(record)?;
                    self.metrics
                        .phase_failures
                        .with_label_values(&[record.phase.as_ref()])
                        .inc();
                    warn!(
                        self.logger,
                        "Devnet {} upgrade failed in phase {}: {}", record.devnet, record.phase, e
                    );
                    return Err(e);
                }
            }
        }

        match record.phase {
            Phase::Completed => self.metrics.upgrades_completed_total.inc(),
            Phase::VoteRejected => self.metrics.upgrades_rejected_total.inc(),
            _ => {}
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        token: &CancellationToken,
        record: &mut UpgradeRecord,
    ) -> UpgraderResult<PhaseOutcome> {
        match record.phase {
            Phase::Pending => {
                let (proposal_id, target_height) = self.proposer.propose(&record.spec).await?;
                record.set_proposal_id(proposal_id)?;
                record.target_height = Some(target_height);
                Ok(PhaseOutcome::Succeeded)
            }
            Phase::Proposed => {
                let proposal_id = proposal_id_of(record)?;
                let validators = self.nodes.nodes(&record.devnet).await?;
                self.voter.vote(proposal_id, &validators).await?;
                Ok(PhaseOutcome::Succeeded)
            }
            Phase::Voting => self.await_tally(token, record).await,
            Phase::VotePassed => Ok(PhaseOutcome::Succeeded),
            Phase::AwaitingHeight => {
                self.await_height(token, record).await?;
                Ok(PhaseOutcome::Succeeded)
            }
            Phase::ExportingState => {
                self.export_pre_upgrade(record).await?;
                Ok(PhaseOutcome::Succeeded)
            }
            Phase::SwitchingBinary => {
                self.switcher
                    .switch(&record.devnet, &record.spec.target_binary)
                    .await?;
                Ok(PhaseOutcome::Succeeded)
            }
            Phase::RestartingNodes => {
                for node in self.nodes.nodes(&record.devnet).await? {
                    self.process.restart_node(&record.devnet, &node.name).await?;
                }
                Ok(PhaseOutcome::Succeeded)
            }
            Phase::VerifyingHealth => {
                self.verify_health(token, record).await?;
                self.export_post_upgrade(record).await;
                Ok(PhaseOutcome::Succeeded)
            }
            phase => Err(UpgraderError::inconsistent(format!(
                "no action defined for terminal phase {phase}"
            ))),
        }
    }

    /// Poll the proposal tally until it passes or is rejected, bounded by
    /// the voting period.
    async fn await_tally(
        &self,
        token: &CancellationToken,
        record: &UpgradeRecord,
    ) -> UpgraderResult<PhaseOutcome> {
        let proposal_id = proposal_id_of(record)?;
        let deadline = record
            .spec
            .voting_period
            .unwrap_or(self.config.voting_deadline);
        let started = Instant::now();

        loop {
            match self.chain.proposal_status(proposal_id).await? {
                ProposalStatus::Passed => return Ok(PhaseOutcome::Succeeded),
                ProposalStatus::Rejected => {
                    warn!(
                        self.logger,
                        "Proposal {} for devnet {} was rejected", proposal_id, record.devnet
                    );
                    return Ok(PhaseOutcome::Rejected);
                }
                ProposalStatus::NotFound => {
                    return Err(UpgraderError::inconsistent(format!(
                        "proposal {proposal_id} disappeared during its voting period"
                    )))
                }
                ProposalStatus::VotingPeriod => {}
            }
            if started.elapsed() >= deadline {
                return Err(UpgraderError::timeout(format!(
                    "proposal {proposal_id} not decided within {deadline:?}"
                )));
            }
            self.sleep_or_cancel(token, self.config.poll_interval).await?;
        }
    }

    /// Block until the chain reaches the target height, bounded by the
    /// height deadline.
    async fn await_height(
        &self,
        token: &CancellationToken,
        record: &UpgradeRecord,
    ) -> UpgraderResult<()> {
        let target_height = record.target_height.ok_or_else(|| {
            UpgraderError::inconsistent("awaiting height without a resolved target height")
        })?;
        let started = Instant::now();

        loop {
            let height = self.chain.block_height().await?;
            if height >= target_height {
                info!(
                    self.logger,
                    "Devnet {} reached upgrade height {} (target {})",
                    record.devnet,
                    height,
                    target_height
                );
                return Ok(());
            }
            if started.elapsed() >= self.config.height_deadline {
                return Err(UpgraderError::timeout(format!(
                    "chain stuck at height {height}, target {target_height} not reached within {:?}",
                    self.config.height_deadline
                )));
            }
            self.sleep_or_cancel(token, self.config.poll_interval).await?;
        }
    }

    async fn export_pre_upgrade(&self, record: &mut UpgradeRecord) -> UpgraderResult<()> {
        if !record.spec.export_before || record.exported_genesis.pre_upgrade.is_some() {
            return Ok(());
        }
        let Some(dir) = record.spec.export_dir.clone() else {
            return Err(UpgraderError::invalid_spec(
                "genesis export requested but no export directory given",
            ));
        };
        let path = self
            .export
            .export_genesis(&record.devnet, &dir, "pre-upgrade")
            .await?;
        info!(
            self.logger,
            "Exported pre-upgrade genesis for devnet {} to {:?}", record.devnet, path
        );
        record.exported_genesis.pre_upgrade = Some(path);
        Ok(())
    }

    /// The post-upgrade snapshot is best-effort once the pre-upgrade one
    /// exists; a failure here must not fail an otherwise completed upgrade.
    async fn export_post_upgrade(&self, record: &mut UpgradeRecord) {
        if !record.spec.export_after {
            return;
        }
        let Some(dir) = record.spec.export_dir.clone() else {
            return;
        };
        match self
            .export
            .export_genesis(&record.devnet, &dir, "post-upgrade")
            .await
        {
            Ok(path) => {
                info!(
                    self.logger,
                    "Exported post-upgrade genesis for devnet {} to {:?}", record.devnet, path
                );
                record.exported_genesis.post_upgrade = Some(path);
            }
            Err(e) => {
                warn!(
                    self.logger,
                    "Post-upgrade genesis export for devnet {} failed: {}", record.devnet, e
                );
            }
        }
    }

    /// Poll node health until every node is healthy. A node counts as failed
    /// only after `unhealthy_threshold` consecutive unhealthy reports, which
    /// tolerates transient post-restart flakiness.
    async fn verify_health(
        &self,
        token: &CancellationToken,
        record: &UpgradeRecord,
    ) -> UpgraderResult<()> {
        let nodes = self.nodes.nodes(&record.devnet).await?;
        let mut strikes: BTreeMap<String, u32> = BTreeMap::new();
        let started = Instant::now();

        loop {
            let mut all_healthy = true;
            for node in &nodes {
                // A health endpoint that cannot be reached counts as an
                // unhealthy observation.
                let healthy = self
                    .health
                    .is_healthy(&record.devnet, &node.name)
                    .await
                    .unwrap_or(false);
                if healthy {
                    strikes.insert(node.name.clone(), 0);
                } else {
                    all_healthy = false;
                    let count = strikes.entry(node.name.clone()).or_insert(0);
                    *count += 1;
                    if *count >= self.config.unhealthy_threshold {
                        return Err(UpgraderError::UnhealthyNode(node.name.clone(), *count));
                    }
                }
            }
            if all_healthy {
                return Ok(());
            }
            if started.elapsed() >= self.config.health_deadline {
                return Err(UpgraderError::timeout(format!(
                    "devnet {} not healthy within {:?}",
                    record.devnet, self.config.health_deadline
                )));
            }
            self.sleep_or_cancel(token, self.config.poll_interval).await?;
        }
    }

    async fn sleep_or_cancel(
        &self,
        token: &CancellationToken,
        interval: Duration,
    ) -> UpgraderResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(interval) => Ok(()),
            _ = token.cancelled() => Err(UpgraderError::Interrupted),
        }
    }
}

fn proposal_id_of(record: &UpgradeRecord) -> UpgraderResult<u64> {
    record.proposal_id.ok_or_else(|| {
        UpgraderError::inconsistent(format!(
            "record for devnet {} is past Pending but has no proposal id",
            record.devnet
        ))
    })
}
