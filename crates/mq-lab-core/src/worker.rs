use crate::timing::{CancelToken, PreciseSleep};
use anyhow::Context;
use mq_lab_abstract::{BusEvent, QoS, TopicKey, filters};
use mq_lab_bus::{BusConnection, BusError, Delivery, DeliveryHandler};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Assigned at creation, never changes.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    pub instance: u32,
    pub client_id: String,
}

impl WorkerIdentity {
    pub fn numbered(instance: u32) -> Self {
        Self {
            instance,
            client_id: format!("pub-{instance}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Per-cycle emission ceiling; the loop also exits early when disarmed.
    pub emit_window: Duration,
    pub default_qos: QoS,
    pub default_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            emit_window: Duration::from_secs(60),
            default_qos: QoS::AtMostOnce,
            default_delay: Duration::from_millis(1_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateSignal {
    Start,
    Shutdown,
}

/// Blocks the emission thread until the start condition is signalled. The
/// start flag stays set for the whole cycle and is cleared when the worker
/// returns to idle, mirroring how the control messages are idempotent
/// state updates rather than one-shot commands.
struct StartGate {
    state: Mutex<(bool, bool)>, // (start, shutdown)
    cv: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            state: Mutex::new((false, false)),
            cv: Condvar::new(),
        }
    }

    fn signal_start(&self) {
        let mut state = self.state.lock().expect("start gate poisoned");
        state.0 = true;
        self.cv.notify_all();
    }

    fn clear_start(&self) {
        self.state.lock().expect("start gate poisoned").0 = false;
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().expect("start gate poisoned");
        state.1 = true;
        self.cv.notify_all();
    }

    fn wait(&self) -> GateSignal {
        let mut state = self.state.lock().expect("start gate poisoned");
        loop {
            if state.1 {
                return GateSignal::Shutdown;
            }
            if state.0 {
                return GateSignal::Start;
            }
            state = self.cv.wait(state).expect("start gate poisoned");
        }
    }
}

/// The three fields the delivery thread shares with the emission thread.
/// Each is synchronized on its own; no cross-field atomicity is assumed.
struct Shared {
    qos: Mutex<QoS>,
    delay: Mutex<Duration>,
    active: CancelToken,
    gate: StartGate,
}

/// One emitting participant.
///
/// Lifecycle per cycle: Idle -> armed and waiting for start -> emitting
/// sequence-numbered payloads -> announcing termination -> Idle. Arming and
/// disarming happen through `request/instance_count`: a worker whose
/// instance number is within the announced count arms itself (which also
/// satisfies the start condition); one outside it disarms, cancelling an
/// in-progress emission loop at its next check point.
pub struct Worker;

impl Worker {
    pub fn spawn<C>(
        identity: WorkerIdentity,
        config: WorkerConfig,
        sleeper: Arc<dyn PreciseSleep>,
        connect: C,
    ) -> anyhow::Result<WorkerHandle>
    where
        C: FnOnce(DeliveryHandler) -> Result<Arc<dyn BusConnection>, BusError>,
    {
        let shared = Arc::new(Shared {
            qos: Mutex::new(config.default_qos),
            delay: Mutex::new(config.default_delay),
            active: CancelToken::new(),
            gate: StartGate::new(),
        });

        let handler = control_handler(identity.clone(), Arc::clone(&shared));
        let conn = connect(handler)
            .with_context(|| format!("worker {} failed to connect", identity.client_id))?;
        conn.subscribe(filters::CONTROL, QoS::AtMostOnce)
            .with_context(|| format!("worker {} failed to subscribe", identity.client_id))?;

        let thread = {
            let shared = Arc::clone(&shared);
            let conn = Arc::clone(&conn);
            let identity = identity.clone();
            thread::Builder::new()
                .name(format!("worker-{}", identity.instance))
                .spawn(move || emission_thread(identity, config, shared, conn, sleeper))
                .context("spawn worker emission thread")?
        };

        info!(client = %identity.client_id, "worker ready");
        Ok(WorkerHandle {
            shared,
            conn,
            thread,
        })
    }
}

fn control_handler(identity: WorkerIdentity, shared: Arc<Shared>) -> DeliveryHandler {
    Box::new(move |delivery: Delivery| {
        match BusEvent::decode(&delivery.topic, &delivery.payload) {
            // Stored for the next cycle; an in-progress cycle keeps the
            // values it captured at cycle start.
            Ok(BusEvent::QosUpdate(qos)) => {
                *shared.qos.lock().expect("worker qos poisoned") = qos;
            }
            Ok(BusEvent::DelayUpdate(ms)) => {
                *shared.delay.lock().expect("worker delay poisoned") = Duration::from_millis(ms);
            }
            Ok(BusEvent::InstanceCountUpdate(count)) => {
                if identity.instance <= count {
                    shared.active.arm();
                    shared.gate.signal_start();
                } else {
                    shared.active.cancel();
                }
            }
            Ok(BusEvent::StartTrigger) => shared.gate.signal_start(),
            // Data, terminate and status traffic is not addressed to workers.
            Ok(_) => {}
            Err(err) => {
                debug!(client = %identity.client_id, %err, "ignoring undecodable message");
            }
        }
    })
}

fn emission_thread(
    identity: WorkerIdentity,
    config: WorkerConfig,
    shared: Arc<Shared>,
    conn: Arc<dyn BusConnection>,
    sleeper: Arc<dyn PreciseSleep>,
) {
    loop {
        match shared.gate.wait() {
            GateSignal::Shutdown => break,
            GateSignal::Start => {}
        }
        if shared.active.is_cancelled() {
            // Start trigger aimed at a disarmed worker: stay idle.
            shared.gate.clear_start();
            continue;
        }
        run_cycle(&identity, &config, &shared, conn.as_ref(), sleeper.as_ref());
        shared.active.cancel();
        shared.gate.clear_start();
    }
    debug!(client = %identity.client_id, "worker shut down");
}

fn run_cycle(
    identity: &WorkerIdentity,
    config: &WorkerConfig,
    shared: &Shared,
    conn: &dyn BusConnection,
    sleeper: &dyn PreciseSleep,
) {
    // Capture the run parameters once; mid-cycle updates apply next cycle.
    let qos = *shared.qos.lock().expect("worker qos poisoned");
    let delay = *shared.delay.lock().expect("worker delay poisoned");
    let key = TopicKey::new(identity.instance, qos, delay.as_millis() as u64);
    let topic = key.data_topic();

    info!(client = %identity.client_id, %key, "emission cycle starting");
    let started = Instant::now();
    let mut sequence: u64 = 0;
    while !shared.active.is_cancelled() && started.elapsed() < config.emit_window {
        // A failed publish loses that sequence number; loss is the quantity
        // under measurement, not an error to recover from.
        if let Err(err) = conn.publish(&topic, sequence.to_string().as_bytes(), qos) {
            debug!(client = %identity.client_id, %err, "publish dropped");
        }
        sequence += 1;
        sleeper.sleep(delay);
    }

    if let Err(err) = conn.publish(&key.terminate_topic(), b"terminate", qos) {
        warn!(client = %identity.client_id, %err, "terminate announcement dropped");
    }
    info!(client = %identity.client_id, %key, emitted = sequence, "emission cycle finished");
}

pub struct WorkerHandle {
    shared: Arc<Shared>,
    conn: Arc<dyn BusConnection>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Cancel any in-progress cycle, stop the emission thread and drop the
    /// bus connection.
    pub fn stop(self) -> anyhow::Result<()> {
        self.shared.active.cancel();
        self.shared.gate.shutdown();
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("worker emission thread panicked"))?;
        let _ = self.conn.disconnect();
        Ok(())
    }
}
