use anyhow::{Context, Result};
use clap::Parser;
use mq_lab_abstract::{SweepConfig, SweepConfigOverride};
use mq_lab_bus::{FaultProfile, InProcessBroker};
use mq_lab_core::{
    FileSink, MeasurementCollector, RunController, SessionContext, SpinSleeper, Worker,
    WorkerConfig, WorkerIdentity,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless QoS sweep runner for the pub/sub benchmark lab")]
struct Args {
    /// Sweep configuration TOML overriding the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of worker agents to spawn.
    #[arg(long, default_value_t = 5)]
    workers: u32,

    /// Append-only file receiving combination titles and per-topic metrics.
    #[arg(long, default_value = "analysis_results.txt")]
    results: PathBuf,

    /// Append-only file receiving broker status lines per combination.
    #[arg(long, default_value = "sys_info.log")]
    sys_log: PathBuf,

    /// Probability of dropping a delivery granted at QoS 0.
    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,

    /// Probability of duplicating a delivery granted at QoS 1.
    #[arg(long, default_value_t = 0.0)]
    duplicate_rate: f64,

    /// Probability of holding a delivery back one slot.
    #[arg(long, default_value_t = 0.0)]
    reorder_rate: f64,

    /// Seed for the transport fault stream.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    info!("mq-lab eval host starting...");

    let config = load_config(&args)?;
    info!(
        combinations = config.combination_count(),
        workers = args.workers,
        "sweep configured"
    );

    let broker = InProcessBroker::new(FaultProfile {
        loss_rate: args.loss_rate,
        duplicate_rate: args.duplicate_rate,
        reorder_rate: args.reorder_rate,
        seed: args.seed,
    });

    let sleeper = Arc::new(SpinSleeper::default());
    let worker_config = WorkerConfig {
        emit_window: Duration::from_millis(config.emit_window_ms),
        ..Default::default()
    };
    let mut workers = Vec::new();
    for instance in 1..=args.workers {
        let identity = WorkerIdentity::numbered(instance);
        let name = identity.client_id.clone();
        let handle = Worker::spawn(identity, worker_config.clone(), sleeper.clone(), |handler| {
            broker.connect(&name, handler)
        })?;
        workers.push(handle);
    }

    let collector = Arc::new(MeasurementCollector::new());
    let session = Arc::new(SessionContext::new());
    let handler = RunController::delivery_handler(Arc::clone(&collector), Arc::clone(&session));
    let conn = broker
        .connect("analyser", handler)
        .context("connect controller to broker")?;
    let controller = RunController::new(conn, collector, session, config);

    let mut results = FileSink::create(&args.results)?;
    let mut sys_log = FileSink::create(&args.sys_log)?;
    controller.run(&mut results, &mut sys_log)?;

    for worker in workers {
        if let Err(err) = worker.stop() {
            warn!(%err, "worker did not stop cleanly");
        }
    }
    broker.shut_down();
    info!(
        results = %args.results.display(),
        sys_log = %args.sys_log.display(),
        "sweep complete"
    );
    Ok(())
}

fn load_config(args: &Args) -> Result<SweepConfig> {
    let mut config = SweepConfig::default();
    if let Some(path) = &args.config {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read sweep config {}", path.display()))?;
        let over: SweepConfigOverride =
            toml::from_str(&content).context("parse sweep config")?;
        over.apply_to(&mut config);
    }
    Ok(config)
}
