use crate::qos::QoS;
use serde::Serialize;
use std::fmt;

/// Well-known topic names and subscription filters.
pub mod filters {
    /// Control namespace subscribed by every worker.
    pub const CONTROL: &str = "request/#";
    /// Data namespace subscribed by the controller.
    pub const DATA: &str = "counter/#";
    /// Broker status namespace subscribed by the controller.
    pub const STATUS: &str = "$SYS/#";

    pub const QOS: &str = "request/qos";
    pub const DELAY: &str = "request/delay";
    pub const INSTANCE_COUNT: &str = "request/instance_count";
    pub const START: &str = "request/start";
}

/// Identifies one worker's emission stream for one run: the worker instance
/// number plus the QoS/delay pair the stream was emitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TopicKey {
    pub instance: u32,
    pub qos: QoS,
    pub delay_ms: u64,
}

impl TopicKey {
    pub fn new(instance: u32, qos: QoS, delay_ms: u64) -> Self {
        Self {
            instance,
            qos,
            delay_ms,
        }
    }

    /// Topic carrying the sequence-numbered payloads.
    pub fn data_topic(&self) -> String {
        format!("counter/{}/{}/{}", self.instance, self.qos, self.delay_ms)
    }

    /// Companion topic carrying the terminate announcement.
    pub fn terminate_topic(&self) -> String {
        format!("{}/terminate", self.data_topic())
    }

    /// Parse a `counter/...` topic. Returns the key and whether the topic is
    /// the terminate companion.
    pub fn parse(topic: &str) -> Option<(TopicKey, bool)> {
        let rest = topic.strip_prefix("counter/")?;
        let mut parts = rest.split('/');
        let instance: u32 = parts.next()?.parse().ok()?;
        let qos: QoS = parts.next()?.parse().ok()?;
        let delay_ms: u64 = parts.next()?.parse().ok()?;
        let terminate = match parts.next() {
            None => false,
            Some("terminate") => true,
            Some(_) => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some((TopicKey::new(instance, qos, delay_ms), terminate))
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data_topic())
    }
}

/// MQTT-style filter matching: `#` matches any number of trailing levels,
/// `+` matches exactly one level. A wildcard in the first filter level never
/// matches a `$`-prefixed topic, so `counter/#` cannot capture `$SYS` lines.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('#') || filter.starts_with('+')) {
        return false;
    }
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_and_terminate_topics_round_trip() {
        let key = TopicKey::new(3, QoS::AtLeastOnce, 250);
        assert_eq!(key.data_topic(), "counter/3/1/250");
        assert_eq!(key.terminate_topic(), "counter/3/1/250/terminate");
        assert_eq!(TopicKey::parse("counter/3/1/250"), Some((key, false)));
        assert_eq!(TopicKey::parse("counter/3/1/250/terminate"), Some((key, true)));
    }

    #[test]
    fn rejects_malformed_counter_topics() {
        assert_eq!(TopicKey::parse("counter/3/1"), None);
        assert_eq!(TopicKey::parse("counter/3/7/250"), None);
        assert_eq!(TopicKey::parse("counter/3/1/250/extra"), None);
        assert_eq!(TopicKey::parse("request/qos"), None);
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("counter/#", "counter/1/0/100"));
        assert!(topic_matches("counter/#", "counter/1/0/100/terminate"));
        assert!(topic_matches("request/#", "request/start"));
        assert!(!topic_matches("counter/#", "request/start"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("counter/+/0/100", "counter/1/0/100"));
        assert!(!topic_matches("counter/+", "counter/1/0"));
        assert!(!topic_matches("counter/+/0/100", "counter/1/1/100"));
    }

    #[test]
    fn root_wildcards_skip_system_topics() {
        assert!(!topic_matches("#", "$SYS/broker/load"));
        assert!(!topic_matches("+/broker", "$SYS/broker"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/load"));
        assert!(topic_matches("#", "counter/1/0/100"));
    }
}
