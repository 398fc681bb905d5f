use crate::client::{BusConnection, BusError, Delivery, DeliveryHandler};
use mq_lab_abstract::{QoS, topic_matches};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::debug;

/// Seeded transport-fault injection, applied per delivery. Loss only fires
/// at granted QoS 0, duplication only at granted QoS 1; `$`-prefixed topics
/// are always delivered verbatim.
#[derive(Debug, Clone)]
pub struct FaultProfile {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    /// Probability of holding a delivery back one slot, so it arrives after
    /// the next message to the same client.
    pub reorder_rate: f64,
    pub seed: u64,
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

struct Subscription {
    filter: String,
    qos: QoS,
}

struct ClientEntry {
    name: String,
    tx: Sender<Delivery>,
    subscriptions: Vec<Subscription>,
    // Reorder stash: a delivery held back until the next one for this client.
    held_back: Option<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    clients: HashMap<u64, ClientEntry>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    faults: FaultProfile,
    rng: Mutex<StdRng>,
    shutdown: AtomicBool,
}

/// In-process broker backing the harness and its tests. Each connection gets
/// a dedicated delivery thread, so handlers run concurrently with publishers
/// exactly as they would against a networked broker.
pub struct InProcessBroker {
    inner: Arc<BrokerInner>,
}

impl InProcessBroker {
    pub fn new(faults: FaultProfile) -> Self {
        let rng = StdRng::seed_from_u64(faults.seed);
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                faults,
                rng: Mutex::new(rng),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn connect(
        &self,
        client_name: &str,
        handler: DeliveryHandler,
    ) -> Result<Arc<dyn BusConnection>, BusError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionRefused);
        }
        let (tx, rx) = channel::<Delivery>();
        let id = {
            let mut state = self.inner.state.lock().expect("broker state poisoned");
            let id = state.next_id;
            state.next_id += 1;
            state.clients.insert(
                id,
                ClientEntry {
                    name: client_name.to_string(),
                    tx,
                    subscriptions: Vec::new(),
                    held_back: None,
                },
            );
            id
        };
        thread::Builder::new()
            .name(format!("bus-delivery-{client_name}"))
            .spawn(move || {
                while let Ok(delivery) = rx.recv() {
                    handler(delivery);
                }
            })
            .map_err(|_| BusError::ConnectionRefused)?;
        debug!(client = client_name, "client connected");
        self.inner
            .emit_status("$SYS/broker/log", &format!("client {client_name} connected"));
        self.inner.emit_client_count();
        Ok(Arc::new(BusHandle {
            inner: Arc::clone(&self.inner),
            id,
        }))
    }

    /// Refuse new connections and drop every client. Existing handles fail
    /// with `Disconnected` from here on.
    pub fn shut_down(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.lock().expect("broker state poisoned");
        state.clients.clear();
    }
}

impl BrokerInner {
    fn emit_client_count(&self) {
        let count = {
            let state = self.state.lock().expect("broker state poisoned");
            state.clients.len()
        };
        self.emit_status("$SYS/broker/clients/connected", &count.to_string());
    }

    fn emit_status(&self, topic: &str, line: &str) {
        self.route(topic, line.as_bytes(), QoS::AtMostOnce);
    }

    /// Fan a publish out to every matching subscription. Fault decisions are
    /// made under the state lock so the seeded stream is deterministic.
    fn route(&self, topic: &str, payload: &[u8], qos: QoS) {
        let exempt = topic.starts_with('$');
        let mut sends: Vec<(Sender<Delivery>, Delivery)> = Vec::new();
        {
            let mut state = self.state.lock().expect("broker state poisoned");
            let mut rng = self.rng.lock().expect("broker rng poisoned");
            for entry in state.clients.values_mut() {
                let Some(sub) = entry
                    .subscriptions
                    .iter()
                    .find(|s| topic_matches(&s.filter, topic))
                else {
                    continue;
                };
                let granted = qos.granted(sub.qos);
                let delivery = Delivery {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                    qos: granted,
                };
                if !exempt {
                    if granted == QoS::AtMostOnce && rng.random::<f64>() < self.faults.loss_rate {
                        debug!(client = %entry.name, topic, "delivery dropped");
                        continue;
                    }
                    if self.faults.reorder_rate > 0.0
                        && entry.held_back.is_none()
                        && rng.random::<f64>() < self.faults.reorder_rate
                    {
                        entry.held_back = Some(delivery);
                        continue;
                    }
                }
                let duplicate = !exempt
                    && granted == QoS::AtLeastOnce
                    && rng.random::<f64>() < self.faults.duplicate_rate;
                sends.push((entry.tx.clone(), delivery.clone()));
                if duplicate {
                    sends.push((entry.tx.clone(), delivery));
                }
                if let Some(stashed) = entry.held_back.take() {
                    sends.push((entry.tx.clone(), stashed));
                }
            }
        }
        for (tx, delivery) in sends {
            // A closed receiver just means the client went away mid-flight.
            let _ = tx.send(delivery);
        }
    }
}

struct BusHandle {
    inner: Arc<BrokerInner>,
    id: u64,
}

impl BusHandle {
    fn with_entry<R>(&self, f: impl FnOnce(&mut ClientEntry) -> R) -> Result<R, BusError> {
        let mut state = self.inner.state.lock().expect("broker state poisoned");
        match state.clients.get_mut(&self.id) {
            Some(entry) => Ok(f(entry)),
            None => Err(BusError::Disconnected),
        }
    }
}

impl BusConnection for BusHandle {
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), BusError> {
        {
            let state = self.inner.state.lock().expect("broker state poisoned");
            if !state.clients.contains_key(&self.id) {
                return Err(BusError::Publish {
                    topic: topic.to_string(),
                });
            }
        }
        self.inner.route(topic, payload, qos);
        Ok(())
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BusError> {
        let name = self.with_entry(|entry| {
            entry.subscriptions.retain(|s| s.filter != filter);
            entry.subscriptions.push(Subscription {
                filter: filter.to_string(),
                qos,
            });
            entry.name.clone()
        })?;
        self.inner.emit_status(
            "$SYS/broker/log",
            &format!("client {name} subscribed to {filter} at QoS {qos}"),
        );
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), BusError> {
        let name = self.with_entry(|entry| {
            entry.subscriptions.retain(|s| s.filter != filter);
            entry.name.clone()
        })?;
        self.inner.emit_status(
            "$SYS/broker/log",
            &format!("client {name} unsubscribed from {filter}"),
        );
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BusError> {
        let name = {
            let mut state = self.inner.state.lock().expect("broker state poisoned");
            match state.clients.remove(&self.id) {
                Some(entry) => entry.name,
                None => return Err(BusError::Disconnected),
            }
        };
        debug!(client = %name, "client disconnected");
        self.inner
            .emit_status("$SYS/broker/log", &format!("client {name} disconnected"));
        self.inner.emit_client_count();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn collecting_handler(tx: mpsc::Sender<Delivery>) -> DeliveryHandler {
        Box::new(move |delivery| {
            let _ = tx.send(delivery);
        })
    }

    fn recv_topic(rx: &mpsc::Receiver<Delivery>) -> Delivery {
        rx.recv_timeout(Duration::from_secs(2))
            .expect("expected a delivery")
    }

    #[test]
    fn publish_reaches_matching_subscriber() {
        let broker = InProcessBroker::new(FaultProfile::default());
        let (tx, rx) = mpsc::channel();
        let sub = broker.connect("sub", collecting_handler(tx)).unwrap();
        sub.subscribe("counter/#", QoS::AtLeastOnce).unwrap();

        let publisher = broker.connect("pub", Box::new(|_| {})).unwrap();
        publisher
            .publish("counter/1/0/100", b"42", QoS::ExactlyOnce)
            .unwrap();

        let delivery = recv_topic(&rx);
        assert_eq!(delivery.topic, "counter/1/0/100");
        assert_eq!(delivery.payload, b"42");
        // Granted QoS is the minimum of the two sides.
        assert_eq!(delivery.qos, QoS::AtLeastOnce);
    }

    #[test]
    fn non_matching_topics_are_not_delivered() {
        let broker = InProcessBroker::new(FaultProfile::default());
        let (tx, rx) = mpsc::channel();
        let sub = broker.connect("sub", collecting_handler(tx)).unwrap();
        sub.subscribe("counter/#", QoS::AtMostOnce).unwrap();

        let publisher = broker.connect("pub", Box::new(|_| {})).unwrap();
        publisher
            .publish("request/start", b"start", QoS::AtMostOnce)
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn loss_applies_only_at_granted_qos_zero() {
        let broker = InProcessBroker::new(FaultProfile {
            loss_rate: 1.0,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel();
        let sub = broker.connect("sub", collecting_handler(tx)).unwrap();
        sub.subscribe("counter/#", QoS::AtLeastOnce).unwrap();

        let publisher = broker.connect("pub", Box::new(|_| {})).unwrap();
        publisher
            .publish("counter/1/0/0", b"0", QoS::AtMostOnce)
            .unwrap();
        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "granted QoS 0 with loss_rate=1.0 must drop everything"
        );

        publisher
            .publish("counter/1/1/0", b"0", QoS::AtLeastOnce)
            .unwrap();
        assert_eq!(recv_topic(&rx).topic, "counter/1/1/0");
    }

    #[test]
    fn duplication_applies_at_granted_qos_one() {
        let broker = InProcessBroker::new(FaultProfile {
            duplicate_rate: 1.0,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel();
        let sub = broker.connect("sub", collecting_handler(tx)).unwrap();
        sub.subscribe("counter/#", QoS::AtLeastOnce).unwrap();

        let publisher = broker.connect("pub", Box::new(|_| {})).unwrap();
        publisher
            .publish("counter/1/1/0", b"7", QoS::AtLeastOnce)
            .unwrap();
        assert_eq!(recv_topic(&rx).payload, b"7");
        assert_eq!(recv_topic(&rx).payload, b"7");
    }

    #[test]
    fn reorder_holds_one_delivery_back() {
        let broker = InProcessBroker::new(FaultProfile {
            reorder_rate: 1.0,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel();
        let sub = broker.connect("sub", collecting_handler(tx)).unwrap();
        sub.subscribe("counter/#", QoS::ExactlyOnce).unwrap();

        let publisher = broker.connect("pub", Box::new(|_| {})).unwrap();
        for seq in 0..4 {
            publisher
                .publish("counter/1/2/0", seq.to_string().as_bytes(), QoS::ExactlyOnce)
                .unwrap();
        }
        let order: Vec<Vec<u8>> = (0..4).map(|_| recv_topic(&rx).payload).collect();
        assert_eq!(order, vec![b"1".to_vec(), b"0".to_vec(), b"3".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn system_topics_bypass_faults_and_root_wildcards() {
        let broker = InProcessBroker::new(FaultProfile {
            loss_rate: 1.0,
            ..Default::default()
        });
        let (sys_tx, sys_rx) = mpsc::channel();
        let sys = broker.connect("sys", collecting_handler(sys_tx)).unwrap();
        sys.subscribe("$SYS/#", QoS::AtMostOnce).unwrap();

        let (data_tx, data_rx) = mpsc::channel();
        let data = broker.connect("data", collecting_handler(data_tx)).unwrap();
        data.subscribe("#", QoS::AtMostOnce).unwrap();

        // The subscribe above already produced status lines for the $SYS
        // subscriber; the plain '#' subscriber must never see them.
        assert!(recv_topic(&sys_rx).topic.starts_with("$SYS/"));
        assert!(data_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn shut_down_broker_refuses_connections_and_fails_publishes() {
        let broker = InProcessBroker::new(FaultProfile::default());
        let conn = broker.connect("early", Box::new(|_| {})).unwrap();
        broker.shut_down();

        assert!(matches!(
            broker.connect("late", Box::new(|_| {})),
            Err(BusError::ConnectionRefused)
        ));
        assert!(matches!(
            conn.publish("counter/1/0/0", b"0", QoS::AtMostOnce),
            Err(BusError::Publish { .. })
        ));
    }
}
