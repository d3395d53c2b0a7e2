//! Resumable upgrade orchestration for multi-node devnets.
//!
//! Drives a devnet through a governance-gated binary upgrade — propose,
//! vote, wait for the target height, export state, swap the binary, restart
//! and verify health — checkpointing a durable [`record::UpgradeRecord`]
//! after every phase boundary. A crashed or interrupted pass is picked up by
//! [`resume::ResumableOrchestrator::resume`], which first asks the
//! [`detector::StateDetector`] what actually happened on-chain and
//! reconciles before re-running anything, so on-chain side effects
//! (proposal, votes, binary swaps) happen at most once.
//!
//! The engine is transport-agnostic business logic: everything external —
//! chain RPC, signing keys, node topology, process control, health checks,
//! genesis export — is consumed through the traits in [`ports`].

pub mod config;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod ports;
pub mod proposer;
pub mod record;
pub mod resume;
pub mod store;
pub mod switch;
pub mod types;
pub mod voter;

pub use config::UpgraderConfig;
pub use error::{UpgraderError, UpgraderResult};
pub use phase::{Phase, PhaseOutcome};
pub use record::UpgradeRecord;
pub use resume::ResumableOrchestrator;
pub use types::{BinaryRef, DevnetRef, UpgradeHeight, UpgradeSpec};
