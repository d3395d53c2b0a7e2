use crate::phase::{Phase, PhaseOutcome};
use crate::types::DevnetRef;
use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};

pub type UpgraderResult<T> = Result<T, UpgraderError>;

/// Enumerates the possible errors that the upgrade engine may encounter
#[derive(Debug)]
pub enum UpgraderError {
    /// The chain RPC endpoint could not be reached
    ChainUnavailable(String),

    /// The upgrade spec is malformed (bad height, missing version tag, ...)
    InvalidSpec(String),

    /// The chain rejected the proposal transaction at submission
    ProposalRejected(String),

    /// The proposal already left its voting period
    VotingClosed(u64),

    /// A phase deadline elapsed before the awaited external progress happened
    Timeout(String),

    /// The detector found live state it cannot reconcile with the record
    Inconsistent(String),

    /// A persisted record could not be parsed
    CorruptState(PathBuf, String),

    /// Another orchestration pass currently holds the devnet's upgrade lock
    UpgradeInProgress(DevnetRef),

    /// A non-terminal record already exists for the devnet
    ActiveUpgradeExists(DevnetRef),

    /// No persisted record exists for the devnet
    RecordNotFound(DevnetRef),

    /// The record is already in a terminal phase
    TerminalRecord(DevnetRef, Phase),

    /// The requested phase transition is not in the transition table
    InvalidTransition(Phase, PhaseOutcome),

    /// The binary switch failed on the listed nodes; pairs of (node, reason)
    SwitchFailed(Vec<(String, String)>),

    /// A node reported unhealthy the given number of consecutive times
    UnhealthyNode(String, u32),

    /// A validator's signing key could not be resolved
    KeyLoadError(String, String),

    /// An IO error occurred
    IoError(String, io::Error),

    /// The caller cancelled the in-flight pass; the record stays at its
    /// last checkpoint
    Interrupted,

    /// One or more upgrades could not be resumed; pairs of (devnet, reason)
    ResumeFailed(Vec<(String, String)>),
}

impl UpgraderError {
    pub fn chain_unavailable(msg: impl ToString) -> Self {
        UpgraderError::ChainUnavailable(msg.to_string())
    }

    pub fn invalid_spec(msg: impl ToString) -> Self {
        UpgraderError::InvalidSpec(msg.to_string())
    }

    pub fn inconsistent(msg: impl ToString) -> Self {
        UpgraderError::Inconsistent(msg.to_string())
    }

    pub fn timeout(msg: impl ToString) -> Self {
        UpgraderError::Timeout(msg.to_string())
    }

    pub fn key_load_error(validator: impl ToString, msg: impl ToString) -> Self {
        UpgraderError::KeyLoadError(validator.to_string(), msg.to_string())
    }

    pub fn corrupt_state(path: &Path, msg: impl ToString) -> Self {
        UpgraderError::CorruptState(path.to_path_buf(), msg.to_string())
    }

    pub(crate) fn file_write_error(file_path: &Path, e: io::Error) -> Self {
        UpgraderError::IoError(format!("Failed to write to file: {file_path:?}"), e)
    }

    pub(crate) fn file_read_error(file_path: &Path, e: io::Error) -> Self {
        UpgraderError::IoError(format!("Failed to read file: {file_path:?}"), e)
    }

    /// True for failures that a later `resume` may clear without operator
    /// intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpgraderError::ChainUnavailable(_)
                | UpgraderError::Timeout(_)
                | UpgraderError::Interrupted
        )
    }
}

impl fmt::Display for UpgraderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgraderError::ChainUnavailable(msg) => {
                write!(f, "Chain RPC endpoint unavailable: {msg}")
            }
            UpgraderError::InvalidSpec(msg) => write!(f, "Invalid upgrade spec: {msg}"),
            UpgraderError::ProposalRejected(msg) => {
                write!(f, "Chain rejected the upgrade proposal: {msg}")
            }
            UpgraderError::VotingClosed(proposal_id) => write!(
                f,
                "Proposal {proposal_id} already left its voting period"
            ),
            UpgraderError::Timeout(msg) => write!(f, "Deadline exceeded: {msg}"),
            UpgraderError::Inconsistent(msg) => {
                write!(f, "Observed chain state is inconsistent with the record: {msg}")
            }
            UpgraderError::CorruptState(path, msg) => {
                write!(f, "Persisted record {path:?} is corrupt: {msg}")
            }
            UpgraderError::UpgradeInProgress(devnet) => {
                write!(f, "An upgrade pass is already running for devnet {devnet}")
            }
            UpgraderError::ActiveUpgradeExists(devnet) => {
                write!(f, "Devnet {devnet} already has an active upgrade record")
            }
            UpgraderError::RecordNotFound(devnet) => {
                write!(f, "No upgrade record found for devnet {devnet}")
            }
            UpgraderError::TerminalRecord(devnet, phase) => write!(
                f,
                "Upgrade record for devnet {devnet} is terminal ({phase})"
            ),
            UpgraderError::InvalidTransition(phase, outcome) => write!(
                f,
                "No transition from phase {phase} for outcome {outcome:?}"
            ),
            UpgraderError::SwitchFailed(failures) => {
                write!(f, "Binary switch failed on {} node(s):", failures.len())?;
                for (node, reason) in failures {
                    write!(f, " [{node}: {reason}]")?;
                }
                Ok(())
            }
            UpgraderError::UnhealthyNode(node, count) => write!(
                f,
                "Node {node} reported unhealthy {count} consecutive times"
            ),
            UpgraderError::KeyLoadError(validator, msg) => {
                write!(f, "Failed to load signing key for validator {validator}: {msg}")
            }
            UpgraderError::IoError(msg, e) => {
                write!(f, "IO error, message: {msg:?}, error: {e:?}")
            }
            UpgraderError::Interrupted => write!(f, "Upgrade pass interrupted by the caller"),
            UpgraderError::ResumeFailed(failures) => {
                write!(f, "Failed to resume {} upgrade(s):", failures.len())?;
                for (devnet, reason) in failures {
                    write!(f, " [{devnet}: {reason}]")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for UpgraderError {}
