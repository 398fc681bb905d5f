pub mod config;
pub mod message;
pub mod qos;
pub mod report;
pub mod topic;

pub use config::{SweepConfig, SweepConfigOverride};
pub use message::{BusEvent, DecodeError};
pub use qos::QoS;
pub use report::TopicReport;
pub use topic::{TopicKey, topic_matches};
// Well-known topic names live in one place so the controller and the workers
// cannot drift apart.
pub use topic::filters;
