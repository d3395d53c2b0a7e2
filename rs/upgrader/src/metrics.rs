use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus metrics of the upgrade engine.
#[derive(Clone)]
pub struct UpgraderMetrics {
    /// Successful phase transitions, labelled by the phase entered.
    pub phase_transitions: IntCounterVec,
    /// Failed phase actions, labelled by the phase that failed.
    pub phase_failures: IntCounterVec,
    pub resumes_total: IntCounter,
    pub fast_forwards_total: IntCounter,
    pub upgrades_completed_total: IntCounter,
    pub upgrades_rejected_total: IntCounter,
    /// Upgrade passes currently holding a devnet lock.
    pub active_passes: IntGauge,
}

impl UpgraderMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            phase_transitions: int_counter_vec(
                registry,
                "upgrader_phase_transitions_total",
                "Number of successful phase transitions, by phase entered",
                &["phase"],
            ),
            phase_failures: int_counter_vec(
                registry,
                "upgrader_phase_failures_total",
                "Number of failed phase actions, by phase",
                &["phase"],
            ),
            resumes_total: int_counter(
                registry,
                "upgrader_resumes_total",
                "Number of resume calls that reached reconciliation",
            ),
            fast_forwards_total: int_counter(
                registry,
                "upgrader_fast_forwards_total",
                "Number of records fast-forwarded to a phase observed on-chain",
            ),
            upgrades_completed_total: int_counter(
                registry,
                "upgrader_upgrades_completed_total",
                "Number of upgrades that reached the Completed phase",
            ),
            upgrades_rejected_total: int_counter(
                registry,
                "upgrader_upgrades_rejected_total",
                "Number of upgrades whose proposal was rejected",
            ),
            active_passes: int_gauge(
                registry,
                "upgrader_active_passes",
                "Upgrade passes currently holding a devnet lock",
            ),
        }
    }
}

fn int_counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("invalid metric definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration failed");
    counter
}

fn int_counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("invalid metric definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration failed");
    counter
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("invalid metric definition");
    registry
        .register(Box::new(gauge.clone()))
        .expect("metric registration failed");
    gauge
}
