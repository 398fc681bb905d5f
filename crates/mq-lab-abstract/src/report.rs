use crate::qos::QoS;
use crate::topic::TopicKey;
use serde::Serialize;
use std::fmt;

/// Per-topic metrics for one parameter combination.
///
/// `subscriber_qos` records the QoS the controller had actually subscribed
/// the data namespace with when this topic was analyzed, not a value cached
/// at startup.
#[derive(Debug, Clone, Serialize)]
pub struct TopicReport {
    pub key: TopicKey,
    pub subscriber_qos: QoS,
    /// Messages per second over the observed arrival span.
    pub message_rate: f64,
    /// Percentage of the expected sequence range never observed.
    pub loss_rate_pct: f64,
    /// Percentage of arrivals whose sequence number went backwards.
    pub misorder_rate_pct: f64,
    /// Median gap between successive arrivals, in milliseconds.
    pub median_gap_ms: f64,
}

impl fmt::Display for TopicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Topic: {} (broker to analyser QoS = {})",
            self.key, self.subscriber_qos
        )?;
        writeln!(
            f,
            "  Average Message Rate: {:.6} messages/second",
            self.message_rate
        )?;
        writeln!(f, "  Message Loss Rate: {:.6}%", self.loss_rate_pct)?;
        writeln!(f, "  Misorder Rate: {:.6}%", self.misorder_rate_pct)?;
        write!(f, "  Median Inter-message Gap: {:.6} ms", self.median_gap_ms)
    }
}
