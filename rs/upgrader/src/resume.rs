use crate::config::UpgraderConfig;
use crate::detector::{reconcile, Reconciliation, StateDetector};
use crate::error::{UpgraderError, UpgraderResult};
use crate::metrics::UpgraderMetrics;
use crate::orchestrator::UpgradeOrchestrator;
use crate::phase::{Phase, PhaseOutcome};
use crate::ports::{
    ChainClient, ExportService, HealthChecker, KeyLoader, NodeRepository, ProcessExecutor,
};
use crate::record::UpgradeRecord;
use crate::store::StateStore;
use crate::types::{DevnetRef, UpgradeSpec};
use backoff::{backoff::Backoff, ExponentialBackoff};
use slog::{info, warn, Logger};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};
use tokio_util::sync::CancellationToken;

/// Wraps the upgrade orchestrator with per-devnet exclusivity, detection of
/// the actual on-chain state, and reconciliation before any action runs.
/// The single entry point for starting, resuming and retrying upgrades.
pub struct ResumableOrchestrator {
    store: Arc<StateStore>,
    detector: StateDetector,
    orchestrator: UpgradeOrchestrator,
    locks: Arc<Mutex<BTreeSet<DevnetRef>>>,
    metrics: Arc<UpgraderMetrics>,
    logger: Logger,
}

/// Held for the duration of one orchestration pass; dropping it releases
/// the devnet for the next pass.
struct DevnetLockGuard {
    locks: Arc<Mutex<BTreeSet<DevnetRef>>>,
    devnet: DevnetRef,
    metrics: Arc<UpgraderMetrics>,
}

impl Drop for DevnetLockGuard {
    fn drop(&mut self) {
        self.metrics.active_passes.dec();
        if let Ok(mut held) = self.locks.lock() {
            held.remove(&self.devnet);
        }
    }
}

impl ResumableOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: UpgraderConfig,
        chain: Arc<dyn ChainClient>,
        keys: Arc<dyn KeyLoader>,
        nodes: Arc<dyn NodeRepository>,
        process: Arc<dyn ProcessExecutor>,
        health: Arc<dyn HealthChecker>,
        export: Arc<dyn ExportService>,
        metrics: Arc<UpgraderMetrics>,
        logger: Logger,
    ) -> UpgraderResult<Self> {
        let store = Arc::new(StateStore::new(config.state_dir.clone(), logger.clone())?);
        let detector = StateDetector::new(
            Arc::clone(&chain),
            Arc::clone(&nodes),
            Arc::clone(&process),
            logger.clone(),
        );
        let orchestrator = UpgradeOrchestrator::new(
            Arc::clone(&store),
            chain,
            keys,
            nodes,
            process,
            health,
            export,
            config,
            Arc::clone(&metrics),
            logger.clone(),
        );
        Ok(Self {
            store,
            detector,
            orchestrator,
            locks: Arc::new(Mutex::new(BTreeSet::new())),
            metrics,
            logger,
        })
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    fn lock(&self, devnet: &DevnetRef) -> UpgraderResult<DevnetLockGuard> {
        let mut held = self
            .locks
            .lock()
            .map_err(|_| UpgraderError::inconsistent("devnet lock table poisoned"))?;
        if !held.insert(devnet.clone()) {
            return Err(UpgraderError::UpgradeInProgress(devnet.clone()));
        }
        self.metrics.active_passes.inc();
        Ok(DevnetLockGuard {
            locks: Arc::clone(&self.locks),
            devnet: devnet.clone(),
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Create a fresh record for the spec and run the first orchestration
    /// pass. Fails with `ActiveUpgradeExists` when a non-terminal record is
    /// already present; a leftover terminal record is archived first.
    pub async fn start(
        &self,
        token: &CancellationToken,
        spec: UpgradeSpec,
    ) -> UpgraderResult<Phase> {
        let _guard = self.lock(&spec.devnet)?;
        if let Some(existing) = self.store.load(&spec.devnet)? {
            if !existing.phase.is_terminal() {
                return Err(UpgraderError::ActiveUpgradeExists(spec.devnet.clone()));
            }
            let archived = self.store.archive(&spec.devnet)?;
            info!(
                self.logger,
                "Archived previous {} record for devnet {} to {:?}",
                existing.phase,
                spec.devnet,
                archived
            );
        }
        self.launch(token, spec).await
    }

    /// Archive the terminal record of a devnet and start a fresh attempt
    /// from the same spec.
    pub async fn retry(
        &self,
        token: &CancellationToken,
        devnet: &DevnetRef,
    ) -> UpgraderResult<Phase> {
        let _guard = self.lock(devnet)?;
        let Some(existing) = self.store.load(devnet)? else {
            return Err(UpgraderError::RecordNotFound(devnet.clone()));
        };
        if !existing.phase.is_terminal() {
            return Err(UpgraderError::ActiveUpgradeExists(devnet.clone()));
        }
        let archived = self.store.archive(devnet)?;
        info!(
            self.logger,
            "Retrying upgrade for devnet {}, previous {} record archived to {:?}",
            devnet,
            existing.phase,
            archived
        );
        self.launch(token, existing.spec).await
    }

    async fn launch(
        &self,
        token: &CancellationToken,
        spec: UpgradeSpec,
    ) -> UpgraderResult<Phase> {
        let mut record = UpgradeRecord::new(spec);
        record.attempts = 1;
        self.store.save(&record)?;
        self.orchestrator.execute(token, &mut record).await?;
        Ok(record.phase)
    }

    /// Abandon an interrupted upgrade: the record moves to the terminal
    /// `Cancelled` phase and is never resumed again. On-chain state is left
    /// exactly as the last pass left it.
    pub fn cancel(&self, devnet: &DevnetRef) -> UpgraderResult<Phase> {
        let _guard = self.lock(devnet)?;
        let Some(mut record) = self.store.load(devnet)? else {
            return Err(UpgraderError::RecordNotFound(devnet.clone()));
        };
        if record.phase.is_terminal() {
            return Err(UpgraderError::TerminalRecord(devnet.clone(), record.phase));
        }
        let from = record.phase;
        record.advance(PhaseOutcome::Cancelled)?;
        self.store.save(&record)?;
        info!(
            self.logger,
            "Cancelled upgrade for devnet {} at phase {}", devnet, from
        );
        Ok(record.phase)
    }

    /// Resume an interrupted upgrade. Safe to call unconditionally: a
    /// terminal record is a no-op returning the terminal phase. Before any
    /// action, the detector's observation of the live chain is reconciled
    /// against the persisted record.
    pub async fn resume(
        &self,
        token: &CancellationToken,
        devnet: &DevnetRef,
    ) -> UpgraderResult<Phase> {
        let _guard = self.lock(devnet)?;
        let Some(mut record) = self.store.load(devnet)? else {
            return Err(UpgraderError::RecordNotFound(devnet.clone()));
        };
        if record.phase.is_terminal() {
            info!(
                self.logger,
                "Upgrade for devnet {} already terminal at {}, nothing to resume",
                devnet,
                record.phase
            );
            return Ok(record.phase);
        }

        record.attempts += 1;
        self.metrics.resumes_total.inc();

        let observation = match self.detector.detect(&record).await {
            Ok(observation) => observation,
            Err(e) => {
                record.note_error(&e);
                self.store.save(&record)?;
                return Err(e);
            }
        };

        match reconcile(record.phase, &observation) {
            Reconciliation::InSync => {
                self.store.save(&record)?;
            }
            Reconciliation::FastForward(observed) => {
                info!(
                    self.logger,
                    "Fast-forwarding devnet {} from {} to observed phase {} ({})",
                    devnet,
                    record.phase,
                    observed,
                    observation.detail
                );
                record.fast_forward(observed)?;
                self.store.save(&record)?;
                self.metrics.fast_forwards_total.inc();
            }
            Reconciliation::Rejected => {
                warn!(
                    self.logger,
                    "Devnet {} upgrade proposal was rejected on-chain: {}",
                    devnet,
                    observation.detail
                );
                record.mark_rejected(&observation.detail)?;
                self.store.save(&record)?;
                self.metrics.upgrades_rejected_total.inc();
                return Ok(record.phase);
            }
            Reconciliation::Drift(observed) => {
                let e = UpgraderError::inconsistent(format!(
                    "observed phase {} is behind persisted phase {} ({}), possible chain rollback",
                    observed, record.phase, observation.detail
                ));
                // advance clears last_error, so the note must come after
                record.advance(PhaseOutcome::Failed)?;
                record.note_error(&e);
                self.store.save(&record)?;
                return Err(e);
            }
        }

        self.orchestrator.execute(token, &mut record).await?;
        Ok(record.phase)
    }

    /// Find every interrupted upgrade and drive each towards a terminal
    /// phase, continuing past individual failures so one stuck devnet does
    /// not block recovery of the others. Corrupt record files are reported
    /// alongside resume failures.
    pub async fn resume_all(&self, token: &CancellationToken) -> UpgraderResult<()> {
        let scan = self.store.list_active()?;
        let mut failures: Vec<(String, String)> = scan
            .corrupt
            .iter()
            .map(|e| ("<unreadable>".to_string(), e.to_string()))
            .collect();

        for record in scan.records {
            if token.is_cancelled() {
                return Err(UpgraderError::Interrupted);
            }
            if let Err(e) = self.resume(token, &record.devnet).await {
                failures.push((record.devnet.to_string(), e.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UpgraderError::ResumeFailed(failures))
        }
    }

    /// Daemon entry point: sweep for interrupted upgrades at a
    /// backoff-paced interval until cancelled.
    pub async fn resume_loop(&self, token: CancellationToken, mut backoff: ExponentialBackoff) {
        loop {
            match self.resume_all(&token).await {
                Ok(()) => backoff.reset(),
                Err(UpgraderError::Interrupted) => break,
                Err(e) => warn!(self.logger, "Resume sweep failed: {}", e),
            }

            let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => break,
            }
        }
    }
}
