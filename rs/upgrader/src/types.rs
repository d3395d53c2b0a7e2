use crate::error::{UpgraderError, UpgraderResult};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

/// Identifies a devnet by namespace and name. At most one active upgrade
/// record exists per devnet.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DevnetRef {
    pub namespace: String,
    pub name: String,
}

impl DevnetRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DevnetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The binary a devnet should run after the upgrade, either as a container
/// image reference or a binary on the local filesystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryRef {
    Image(String),
    LocalPath(PathBuf),
}

impl BinaryRef {
    /// The version string nodes are expected to report once they run this
    /// binary. For images this is the tag; for local binaries the file name.
    pub fn version_tag(&self) -> UpgraderResult<String> {
        match self {
            BinaryRef::Image(image) => match image.rsplit_once(':') {
                Some((_, tag)) if !tag.is_empty() => Ok(tag.to_string()),
                _ => Err(UpgraderError::invalid_spec(format!(
                    "image reference `{image}` has no version tag"
                ))),
            },
            BinaryRef::LocalPath(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    UpgraderError::invalid_spec(format!(
                        "binary path {path:?} has no usable file name"
                    ))
                }),
        }
    }
}

impl fmt::Display for BinaryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryRef::Image(image) => write!(f, "image:{image}"),
            BinaryRef::LocalPath(path) => write!(f, "path:{}", path.display()),
        }
    }
}

/// How the upgrade height is chosen: pinned to an explicit block height, or
/// resolved as an offset from the chain height at proposal time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeHeight {
    Absolute(u64),
    BlocksFromNow(u64),
}

/// Immutable description of one upgrade, supplied when the upgrade is
/// created and persisted verbatim inside the record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSpec {
    pub devnet: DevnetRef,
    pub title: String,
    pub description: String,
    pub target_binary: BinaryRef,
    pub height: UpgradeHeight,
    /// Overrides the configured voting deadline when set.
    pub voting_period: Option<Duration>,
    pub export_before: bool,
    pub export_after: bool,
    pub export_dir: Option<PathBuf>,
}

/// A node of a devnet as reported by the node repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub validator: bool,
}

/// Governance status of a submitted proposal as reported by the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalStatus {
    /// The proposal id is unknown to the chain
    NotFound,
    VotingPeriod,
    Passed,
    Rejected,
}

/// The on-chain upgrade plan payload submitted with the proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradePlan {
    /// Plan name, by convention the target version tag.
    pub name: String,
    pub height: u64,
    pub info: String,
}

/// Opaque handle to a validator's signing key, resolved by the key loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningKey {
    pub validator: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_version_tag_is_the_tag_after_the_colon() {
        let binary = BinaryRef::Image("registry.local/chaind:v2.1.0".to_string());
        assert_eq!(binary.version_tag().unwrap(), "v2.1.0");
    }

    #[test]
    fn image_without_tag_is_rejected() {
        assert!(matches!(
            BinaryRef::Image("chaind".to_string()).version_tag(),
            Err(UpgraderError::InvalidSpec(_))
        ));
        assert!(matches!(
            BinaryRef::Image("chaind:".to_string()).version_tag(),
            Err(UpgraderError::InvalidSpec(_))
        ));
    }

    #[test]
    fn local_binary_version_tag_is_the_file_name() {
        let binary = BinaryRef::LocalPath(PathBuf::from("/opt/builds/chaind-v2.1.0"));
        assert_eq!(binary.version_tag().unwrap(), "chaind-v2.1.0");
    }
}
