use mq_lab_abstract::TopicKey;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

/// One observed arrival: the decoded sequence number and the monotonic-clock
/// reading taken in the delivery callback.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub sequence: i64,
    pub arrived_at: Instant,
}

/// Concurrent ingestion point for one combination's observations.
///
/// Two independent surfaces behind separate locks: per-topic arrival records
/// and the termination registry. Writers are the delivery threads; the
/// controller only reads once collection for the combination is over, so the
/// two surfaces never need cross-surface atomicity — except for `reset`,
/// which holds both locks so no arrival can straddle the combination
/// boundary.
pub struct MeasurementCollector {
    records: Mutex<HashMap<TopicKey, Vec<Sample>>>,
    terminations: Mutex<HashSet<TopicKey>>,
}

impl MeasurementCollector {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            terminations: Mutex::new(HashSet::new()),
        }
    }

    pub fn record_sample(&self, key: TopicKey, sequence: i64, arrived_at: Instant) {
        let mut records = self.records.lock().expect("record surface poisoned");
        records.entry(key).or_default().push(Sample {
            sequence,
            arrived_at,
        });
    }

    /// Register a terminate announcement. Returns true the first time a key
    /// is seen; duplicates leave the registry unchanged.
    pub fn record_termination(&self, key: TopicKey) -> bool {
        let mut terminations = self.terminations.lock().expect("termination surface poisoned");
        terminations.insert(key)
    }

    /// Number of distinct topic keys that have announced termination.
    pub fn termination_count(&self) -> usize {
        self.terminations
            .lock()
            .expect("termination surface poisoned")
            .len()
    }

    /// Clone out the per-topic records for analysis.
    pub fn snapshot(&self) -> HashMap<TopicKey, Vec<Sample>> {
        self.records.lock().expect("record surface poisoned").clone()
    }

    /// Clear both surfaces for the next combination. Anything arriving after
    /// this returns belongs to the new combination.
    pub fn reset(&self) {
        let mut records = self.records.lock().expect("record surface poisoned");
        let mut terminations = self.terminations.lock().expect("termination surface poisoned");
        records.clear();
        terminations.clear();
    }
}

impl Default for MeasurementCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mq_lab_abstract::QoS;
    use std::sync::Arc;

    fn key(instance: u32) -> TopicKey {
        TopicKey::new(instance, QoS::AtMostOnce, 100)
    }

    #[test]
    fn samples_keep_arrival_order() {
        let collector = MeasurementCollector::new();
        let now = Instant::now();
        collector.record_sample(key(1), 0, now);
        collector.record_sample(key(1), 2, now);
        collector.record_sample(key(1), 1, now);
        let snapshot = collector.snapshot();
        let sequences: Vec<i64> = snapshot[&key(1)].iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 2, 1]);
    }

    #[test]
    fn termination_registry_holds_each_key_once() {
        let collector = MeasurementCollector::new();
        assert!(collector.record_termination(key(1)));
        assert!(!collector.record_termination(key(1)));
        assert!(collector.record_termination(key(2)));
        assert_eq!(collector.termination_count(), 2);
    }

    #[test]
    fn reset_makes_topics_unseen_even_when_keys_are_reused() {
        let collector = MeasurementCollector::new();
        collector.record_sample(key(1), 0, Instant::now());
        collector.record_termination(key(1));
        collector.reset();
        assert!(collector.snapshot().is_empty());
        assert_eq!(collector.termination_count(), 0);
        // Same key again after the reset: attributed to the new combination.
        collector.record_sample(key(1), 0, Instant::now());
        assert_eq!(collector.snapshot()[&key(1)].len(), 1);
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let collector = Arc::new(MeasurementCollector::new());
        let mut handles = Vec::new();
        for instance in 1..=4u32 {
            let collector = Arc::clone(&collector);
            handles.push(std::thread::spawn(move || {
                for seq in 0..500i64 {
                    collector.record_sample(key(instance), seq, Instant::now());
                }
                collector.record_termination(key(instance));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = collector.snapshot();
        for instance in 1..=4u32 {
            assert_eq!(snapshot[&key(instance)].len(), 500);
        }
        assert_eq!(collector.termination_count(), 4);
    }
}
