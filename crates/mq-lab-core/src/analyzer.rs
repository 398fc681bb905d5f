use crate::collector::Sample;
use mq_lab_abstract::{QoS, TopicKey, TopicReport};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Turn one combination's raw observations into per-topic metrics.
///
/// `subscriber_qos` is the QoS the data namespace was subscribed with when
/// these samples were collected; it only labels the report. Topics with
/// fewer than two arrivals are skipped with a warning rather than reported
/// as total loss, so "no data" stays distinguishable from "lost everything".
pub fn analyze(records: &HashMap<TopicKey, Vec<Sample>>, subscriber_qos: QoS) -> Vec<TopicReport> {
    let mut keys: Vec<&TopicKey> = records.keys().collect();
    keys.sort_by_key(|k| (k.instance, k.qos.level(), k.delay_ms));

    let mut reports = Vec::new();
    for key in keys {
        let samples = &records[key];
        if samples.len() < 2 {
            warn!(topic = %key, samples = samples.len(), "insufficient samples, skipping topic");
            continue;
        }
        reports.push(analyze_topic(*key, samples, subscriber_qos));
    }
    reports
}

fn analyze_topic(key: TopicKey, samples: &[Sample], subscriber_qos: QoS) -> TopicReport {
    let count = samples.len();
    let total_time = samples[count - 1]
        .arrived_at
        .duration_since(samples[0].arrived_at)
        .as_secs_f64();
    let message_rate = if total_time > 0.0 {
        count as f64 / total_time
    } else {
        0.0
    };

    let min_seq = samples.iter().map(|s| s.sequence).min().unwrap_or(0);
    let max_seq = samples.iter().map(|s| s.sequence).max().unwrap_or(0);
    let expected = max_seq - min_seq + 1;
    let unique: HashSet<i64> = samples.iter().map(|s| s.sequence).collect();
    let loss_rate_pct = (1.0 - unique.len() as f64 / expected as f64) * 100.0;

    let misorders = samples
        .windows(2)
        .filter(|pair| pair[1].sequence < pair[0].sequence)
        .count();
    let misorder_rate_pct = misorders as f64 / count as f64 * 100.0;

    let mut gaps_ms: Vec<f64> = samples
        .windows(2)
        .map(|pair| {
            pair[1]
                .arrived_at
                .duration_since(pair[0].arrived_at)
                .as_secs_f64()
                * 1_000.0
        })
        .collect();
    let median_gap_ms = median(&mut gaps_ms);

    TopicReport {
        key,
        subscriber_qos,
        message_rate,
        loss_rate_pct,
        misorder_rate_pct,
        median_gap_ms,
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn key() -> TopicKey {
        TopicKey::new(1, QoS::AtMostOnce, 100)
    }

    /// Samples arriving `gap_ms` apart carrying the given sequence numbers.
    fn uniform(sequences: &[i64], gap_ms: u64) -> HashMap<TopicKey, Vec<Sample>> {
        let base = Instant::now();
        let samples = sequences
            .iter()
            .enumerate()
            .map(|(i, &sequence)| Sample {
                sequence,
                arrived_at: base + Duration::from_millis(gap_ms * i as u64),
            })
            .collect();
        HashMap::from([(key(), samples)])
    }

    #[test]
    fn clean_stream_reports_no_loss_and_no_misorder() {
        // 100 ms pacing, no drops: rate ~10/s, median gap ~100 ms.
        let sequences: Vec<i64> = (0..11).collect();
        let reports = analyze(&uniform(&sequences, 100), QoS::AtMostOnce);
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.loss_rate_pct, 0.0);
        assert_eq!(report.misorder_rate_pct, 0.0);
        assert!((report.message_rate - 10.0).abs() < 0.5);
        assert!((report.median_gap_ms - 100.0).abs() < 1.0);
    }

    #[test]
    fn duplicate_and_gap_count_against_the_expected_range() {
        // [0, 1, 1, 3]: expected range 4, three distinct values, no
        // backwards step.
        let reports = analyze(&uniform(&[0, 1, 1, 3], 10), QoS::AtMostOnce);
        let report = &reports[0];
        assert!((report.loss_rate_pct - 25.0).abs() < 1e-9);
        assert_eq!(report.misorder_rate_pct, 0.0);
    }

    #[test]
    fn backwards_sequence_is_one_misorder() {
        let reports = analyze(&uniform(&[0, 2, 1], 10), QoS::AtMostOnce);
        let report = &reports[0];
        assert!((report.misorder_rate_pct - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.loss_rate_pct, 0.0);
    }

    #[test]
    fn non_decreasing_arrivals_never_count_as_misordered() {
        let reports = analyze(&uniform(&[5, 5, 6, 9, 9, 12], 10), QoS::AtMostOnce);
        assert_eq!(reports[0].misorder_rate_pct, 0.0);
    }

    #[test]
    fn loss_rate_stays_in_range_without_duplicates() {
        let reports = analyze(&uniform(&[0, 4, 9], 10), QoS::AtMostOnce);
        let loss = reports[0].loss_rate_pct;
        assert!((0.0..=100.0).contains(&loss));
        assert!((loss - 70.0).abs() < 1e-9);
    }

    #[test]
    fn topics_with_fewer_than_two_samples_are_skipped() {
        let mut records = uniform(&[0], 10);
        records.insert(TopicKey::new(2, QoS::AtMostOnce, 100), Vec::new());
        assert!(analyze(&records, QoS::AtMostOnce).is_empty());
    }

    #[test]
    fn simultaneous_arrivals_report_zero_rate() {
        let base = Instant::now();
        let samples = vec![
            Sample { sequence: 0, arrived_at: base },
            Sample { sequence: 1, arrived_at: base },
        ];
        let records = HashMap::from([(key(), samples)]);
        let report = &analyze(&records, QoS::AtMostOnce)[0];
        assert_eq!(report.message_rate, 0.0);
        assert_eq!(report.median_gap_ms, 0.0);
    }

    #[test]
    fn median_gap_averages_the_middle_pair_for_even_counts() {
        let base = Instant::now();
        // Gaps: 10 ms, 30 ms -> median 20 ms.
        let samples = vec![
            Sample { sequence: 0, arrived_at: base },
            Sample { sequence: 1, arrived_at: base + Duration::from_millis(10) },
            Sample { sequence: 2, arrived_at: base + Duration::from_millis(40) },
        ];
        let records = HashMap::from([(key(), samples)]);
        let report = &analyze(&records, QoS::AtMostOnce)[0];
        assert!((report.median_gap_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn reports_come_out_sorted_by_topic_key() {
        let base = Instant::now();
        let mut records = HashMap::new();
        for instance in [3u32, 1, 2] {
            let samples = vec![
                Sample { sequence: 0, arrived_at: base },
                Sample { sequence: 1, arrived_at: base + Duration::from_millis(5) },
            ];
            records.insert(TopicKey::new(instance, QoS::AtMostOnce, 100), samples);
        }
        let reports = analyze(&records, QoS::AtMostOnce);
        let instances: Vec<u32> = reports.iter().map(|r| r.key.instance).collect();
        assert_eq!(instances, vec![1, 2, 3]);
    }
}
