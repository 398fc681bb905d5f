pub mod client;
pub mod inprocess;

pub use client::{BusConnection, BusError, Delivery, DeliveryHandler};
pub use inprocess::{FaultProfile, InProcessBroker};
