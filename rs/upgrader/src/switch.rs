use crate::error::{UpgraderError, UpgraderResult};
use crate::ports::{NodeRepository, ProcessExecutor};
use crate::types::{BinaryRef, DevnetRef};
use slog::{info, warn, Logger};
use std::sync::Arc;

/// Swaps the binary of every node in a devnet: stop, rebind the binary
/// reference, restart, confirm the reported version. Nodes that already
/// report the target version are skipped, so re-running after a partial
/// switch only touches the remaining nodes.
///
/// Per-node failures are collected and reported together; a partial switch
/// is a reportable state for the caller, never retried here.
pub struct BinarySwitchExecutor {
    process: Arc<dyn ProcessExecutor>,
    nodes: Arc<dyn NodeRepository>,
    logger: Logger,
}

impl BinarySwitchExecutor {
    pub fn new(
        process: Arc<dyn ProcessExecutor>,
        nodes: Arc<dyn NodeRepository>,
        logger: Logger,
    ) -> Self {
        Self {
            process,
            nodes,
            logger,
        }
    }

    pub async fn switch(&self, devnet: &DevnetRef, target: &BinaryRef) -> UpgraderResult<()> {
        let want = target.version_tag()?;
        let mut failures: Vec<(String, String)> = Vec::new();

        for node in self.nodes.nodes(devnet).await? {
            match self.switch_node(devnet, &node.name, target, &want).await {
                Ok(true) => {
                    info!(self.logger, "Node {} switched to {}", node.name, want);
                }
                Ok(false) => {
                    info!(
                        self.logger,
                        "Node {} already reports {}, nothing to switch", node.name, want
                    );
                }
                Err(e) => {
                    warn!(self.logger, "Switch failed on node {}: {}", node.name, e);
                    failures.push((node.name, e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UpgraderError::SwitchFailed(failures))
        }
    }

    /// Returns `Ok(true)` if the node was switched, `Ok(false)` if it was
    /// already running the target version.
    async fn switch_node(
        &self,
        devnet: &DevnetRef,
        node: &str,
        target: &BinaryRef,
        want: &str,
    ) -> UpgraderResult<bool> {
        if self.process.reported_version(devnet, node).await? == want {
            return Ok(false);
        }

        self.process.stop_node(devnet, node).await?;
        self.process.rebind_binary(devnet, node, target).await?;
        self.process.start_node(devnet, node).await?;

        let got = self.process.reported_version(devnet, node).await?;
        if got != want {
            return Err(UpgraderError::inconsistent(format!(
                "node reports version {got} after switch, expected {want}"
            )));
        }
        Ok(true)
    }
}
