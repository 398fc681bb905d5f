pub mod analyzer;
pub mod collector;
pub mod controller;
pub mod session;
pub mod timing;
pub mod worker;

pub use analyzer::analyze;
pub use collector::{MeasurementCollector, Sample};
pub use controller::{QuorumOutcome, RunController};
pub use session::{FileSink, MemorySink, ReportSink, SessionContext};
pub use timing::{CancelToken, PreciseSleep, SpinSleeper};
pub use worker::{Worker, WorkerConfig, WorkerHandle, WorkerIdentity};
