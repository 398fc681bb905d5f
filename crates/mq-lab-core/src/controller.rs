use crate::analyzer::analyze;
use crate::collector::MeasurementCollector;
use crate::session::{ReportSink, SessionContext};
use anyhow::Context;
use mq_lab_abstract::{BusEvent, QoS, SweepConfig, filters};
use mq_lab_bus::{BusConnection, Delivery, DeliveryHandler};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of the post-collection wait for terminate announcements. A missed
/// quorum is not an error; the combination is analyzed with whatever data
/// arrived.
#[derive(Debug, Clone, Copy)]
pub struct QuorumOutcome {
    pub satisfied: bool,
    pub announced: usize,
    pub expected: u32,
}

#[derive(Debug, Clone, Copy)]
struct Combination {
    subscriber_qos: QoS,
    publisher_qos: QoS,
    delay_ms: u64,
    instance_count: u32,
}

/// Drives the parameter sweep: broadcasts each combination's configuration,
/// triggers the workers, waits out the collection window and the termination
/// quorum, then hands the collector's snapshot to the analyzer and resets
/// per-combination state.
pub struct RunController {
    conn: Arc<dyn BusConnection>,
    collector: Arc<MeasurementCollector>,
    session: Arc<SessionContext>,
    config: SweepConfig,
}

impl RunController {
    pub fn new(
        conn: Arc<dyn BusConnection>,
        collector: Arc<MeasurementCollector>,
        session: Arc<SessionContext>,
        config: SweepConfig,
    ) -> Self {
        Self {
            conn,
            collector,
            session,
            config,
        }
    }

    /// Delivery handler for the controller's bus connection. Runs on the
    /// connection's delivery thread, concurrently with the sweep driver;
    /// everything it touches is behind the collector's and session's locks.
    pub fn delivery_handler(
        collector: Arc<MeasurementCollector>,
        session: Arc<SessionContext>,
    ) -> DeliveryHandler {
        Box::new(move |delivery: Delivery| {
            let arrived_at = Instant::now();
            match BusEvent::decode(&delivery.topic, &delivery.payload) {
                Ok(BusEvent::Data { key, sequence }) => {
                    collector.record_sample(key, sequence, arrived_at);
                }
                Ok(BusEvent::Terminate { key }) => {
                    if collector.record_termination(key) {
                        info!(topic = %key, "termination announced");
                    }
                }
                Ok(BusEvent::BrokerStatus { topic, line }) => {
                    session.push_status(format!("{topic}: {line}"));
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "ignoring undecodable message"),
            }
        })
    }

    /// Run the full sweep, appending per-topic metrics to `results` and the
    /// accumulated broker status history to `info` after every combination.
    pub fn run(
        &self,
        results: &mut dyn ReportSink,
        info_sink: &mut dyn ReportSink,
    ) -> anyhow::Result<()> {
        self.conn
            .subscribe(filters::STATUS, QoS::AtMostOnce)
            .context("subscribe to broker status namespace")?;

        let config = self.config.clone();
        let mut ordinal = 1u32;
        for &subscriber_qos in &config.subscriber_qos {
            self.resubscribe_data(subscriber_qos)?;
            for &publisher_qos in &config.publisher_qos {
                for &delay_ms in &config.delays_ms {
                    for &instance_count in &config.instance_counts {
                        let combination = Combination {
                            subscriber_qos,
                            publisher_qos,
                            delay_ms,
                            instance_count,
                        };
                        self.run_combination(ordinal, combination, results, info_sink)?;
                        ordinal += 1;
                    }
                }
            }
        }
        info!(combinations = ordinal - 1, "sweep finished");
        Ok(())
    }

    /// Re-subscribe the data namespace at the new QoS. Unsubscribe first:
    /// the subscription is replaced, not stacked.
    fn resubscribe_data(&self, qos: QoS) -> anyhow::Result<()> {
        self.conn
            .unsubscribe(filters::DATA)
            .context("unsubscribe data namespace")?;
        self.conn
            .subscribe(filters::DATA, qos)
            .context("subscribe data namespace")?;
        info!(%qos, "subscribed to '{}'", filters::DATA);
        Ok(())
    }

    fn run_combination(
        &self,
        ordinal: u32,
        combination: Combination,
        results: &mut dyn ReportSink,
        info_sink: &mut dyn ReportSink,
    ) -> anyhow::Result<()> {
        let Combination {
            subscriber_qos,
            publisher_qos,
            delay_ms,
            instance_count,
        } = combination;
        info!(
            ordinal,
            instance_count,
            delay_ms,
            %publisher_qos,
            %subscriber_qos,
            "starting combination"
        );

        // QoS and delay must land before the instance count arms anyone,
        // hence the settling pause before the start trigger.
        self.publish_control(filters::QOS, &publisher_qos.to_string())?;
        self.publish_control(filters::DELAY, &delay_ms.to_string())?;
        self.publish_control(filters::INSTANCE_COUNT, &instance_count.to_string())?;
        thread::sleep(Duration::from_millis(self.config.settle_ms));
        self.publish_control(filters::START, "start")?;

        // Title first; the metrics block follows as a separate append once
        // collection is done.
        results.append(&format!(
            "{ordinal}. Combination of instance_count = {instance_count}, \
             delay = {delay_ms}, publisher to broker QoS = {publisher_qos}, \
             broker to analyser QoS = {subscriber_qos}"
        ))?;

        thread::sleep(Duration::from_millis(self.config.collection_window_ms));

        let quorum = self.wait_for_quorum(instance_count);
        if !quorum.satisfied {
            warn!(
                announced = quorum.announced,
                expected = quorum.expected,
                "timeout waiting for termination announcements, analyzing partial data"
            );
        }

        let snapshot = self.collector.snapshot();
        for report in analyze(&snapshot, subscriber_qos) {
            results.append(&format!("{report}\n"))?;
        }

        self.dump_status_history(ordinal, info_sink)?;
        self.collector.reset();
        Ok(())
    }

    fn publish_control(&self, topic: &str, payload: &str) -> anyhow::Result<()> {
        self.conn
            .publish(topic, payload.as_bytes(), QoS::AtLeastOnce)
            .with_context(|| format!("broadcast control message on '{topic}'"))
    }

    /// Poll until at least `expected` distinct topic keys have announced
    /// termination, or the timeout elapses.
    fn wait_for_quorum(&self, expected: u32) -> QuorumOutcome {
        let deadline = Instant::now() + Duration::from_millis(self.config.quorum_timeout_ms);
        loop {
            let announced = self.collector.termination_count();
            if announced >= expected as usize {
                return QuorumOutcome {
                    satisfied: true,
                    announced,
                    expected,
                };
            }
            if Instant::now() >= deadline {
                return QuorumOutcome {
                    satisfied: false,
                    announced,
                    expected,
                };
            }
            thread::sleep(Duration::from_millis(self.config.quorum_poll_ms));
        }
    }

    /// Re-emit the whole session's status history, tagged with the current
    /// combination ordinal. The history is intentionally never reset, so
    /// later blocks repeat earlier lines.
    fn dump_status_history(
        &self,
        ordinal: u32,
        info_sink: &mut dyn ReportSink,
    ) -> anyhow::Result<()> {
        info_sink.append(&format!("Combination {ordinal} System Information:"))?;
        for line in self.session.status_history() {
            info_sink.append(&line)?;
        }
        info_sink.append("")?;
        Ok(())
    }
}
