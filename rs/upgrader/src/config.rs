use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Tuning knobs of the upgrade engine. Deserializable from the daemon's
/// config file; every field has a default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgraderConfig {
    /// Directory holding one persisted record file per devnet.
    pub state_dir: PathBuf,
    /// Interval between polls of the chain while waiting for external
    /// progress (tally, height, health).
    pub poll_interval: Duration,
    /// Deadline for the voting period, unless the spec overrides it.
    pub voting_deadline: Duration,
    /// Deadline for the chain to reach the target height once the proposal
    /// passed.
    pub height_deadline: Duration,
    /// Deadline for post-switch health verification.
    pub health_deadline: Duration,
    /// A node must report unhealthy this many consecutive times before
    /// health verification is declared failed.
    pub unhealthy_threshold: u32,
}

impl Default for UpgraderConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".devnet/upgrades"),
            poll_interval: Duration::from_secs(2),
            voting_deadline: Duration::from_secs(300),
            height_deadline: Duration::from_secs(600),
            health_deadline: Duration::from_secs(120),
            unhealthy_threshold: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = UpgraderConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: UpgraderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let parsed: UpgraderConfig =
            serde_json::from_str(r#"{"unhealthy_threshold": 5}"#).unwrap();
        assert_eq!(parsed.unhealthy_threshold, 5);
        assert_eq!(parsed.poll_interval, UpgraderConfig::default().poll_interval);
    }
}
