use crate::qos::QoS;
use serde::{Deserialize, Serialize};

/// Full parameter matrix and timing budget for one sweep session.
///
/// Every pause the controller and the workers take is a field here so that
/// integration tests can shrink the whole sweep to milliseconds. Defaults are
/// the production values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// QoS levels used by workers when publishing to the broker.
    pub publisher_qos: Vec<QoS>,
    /// QoS levels the controller subscribes to the data namespace with
    /// (outermost sweep dimension).
    pub subscriber_qos: Vec<QoS>,
    /// Inter-message delays swept, in milliseconds.
    pub delays_ms: Vec<u64>,
    /// Active-worker counts swept.
    pub instance_counts: Vec<u32>,

    /// Pause between broadcasting the run configuration and the start
    /// trigger, so QoS/delay land before the instance count arms anyone.
    pub settle_ms: u64,
    /// Flat data-collection budget after the start trigger. Must exceed the
    /// workers' emission ceiling.
    pub collection_window_ms: u64,
    /// How long to wait for the termination quorum before proceeding with
    /// partial data.
    pub quorum_timeout_ms: u64,
    /// Polling interval while waiting for the quorum.
    pub quorum_poll_ms: u64,
    /// Per-cycle emission ceiling on the worker side.
    pub emit_window_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            publisher_qos: vec![QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce],
            subscriber_qos: vec![QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce],
            delays_ms: vec![0, 1, 2, 4],
            instance_counts: vec![1, 2, 3, 4, 5],
            settle_ms: 2_000,
            collection_window_ms: 70_000,
            quorum_timeout_ms: 60_000,
            quorum_poll_ms: 1_000,
            emit_window_ms: 60_000,
        }
    }
}

impl SweepConfig {
    /// Total number of parameter combinations in the sweep.
    pub fn combination_count(&self) -> usize {
        self.subscriber_qos.len()
            * self.publisher_qos.len()
            * self.delays_ms.len()
            * self.instance_counts.len()
    }
}

/// Partial sweep configuration loaded from a TOML file; unset fields keep
/// their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepConfigOverride {
    pub publisher_qos: Option<Vec<QoS>>,
    pub subscriber_qos: Option<Vec<QoS>>,
    pub delays_ms: Option<Vec<u64>>,
    pub instance_counts: Option<Vec<u32>>,
    pub settle_ms: Option<u64>,
    pub collection_window_ms: Option<u64>,
    pub quorum_timeout_ms: Option<u64>,
    pub quorum_poll_ms: Option<u64>,
    pub emit_window_ms: Option<u64>,
}

impl SweepConfigOverride {
    pub fn apply_to(&self, config: &mut SweepConfig) {
        if let Some(v) = &self.publisher_qos {
            config.publisher_qos = v.clone();
        }
        if let Some(v) = &self.subscriber_qos {
            config.subscriber_qos = v.clone();
        }
        if let Some(v) = &self.delays_ms {
            config.delays_ms = v.clone();
        }
        if let Some(v) = &self.instance_counts {
            config.instance_counts = v.clone();
        }
        if let Some(v) = self.settle_ms {
            config.settle_ms = v;
        }
        if let Some(v) = self.collection_window_ms {
            config.collection_window_ms = v;
        }
        if let Some(v) = self.quorum_timeout_ms {
            config.quorum_timeout_ms = v;
        }
        if let Some(v) = self.quorum_poll_ms {
            config.quorum_poll_ms = v;
        }
        if let Some(v) = self.emit_window_ms {
            config.emit_window_ms = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matrix_size_matches_the_full_sweep() {
        assert_eq!(SweepConfig::default().combination_count(), 3 * 3 * 4 * 5);
    }

    #[test]
    fn override_touches_only_set_fields() {
        let mut config = SweepConfig::default();
        let over = SweepConfigOverride {
            delays_ms: Some(vec![10]),
            settle_ms: Some(5),
            ..Default::default()
        };
        over.apply_to(&mut config);
        assert_eq!(config.delays_ms, vec![10]);
        assert_eq!(config.settle_ms, 5);
        assert_eq!(config.collection_window_ms, 70_000);
        assert_eq!(config.instance_counts, vec![1, 2, 3, 4, 5]);
    }
}
