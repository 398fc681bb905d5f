use mq_lab_abstract::QoS;

/// A message handed to a connection's delivery handler. `qos` is the granted
/// delivery QoS (min of publish and subscription QoS).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Invoked on the connection's own delivery thread, one message at a time.
pub type DeliveryHandler = Box<dyn Fn(Delivery) + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The broker rejected the connection. Fatal to the affected party.
    #[error("connection refused by broker")]
    ConnectionRefused,
    /// The connection has been closed; no further operations are possible.
    #[error("client is no longer connected")]
    Disconnected,
    /// A single publish failed. Callers measuring loss drop the message and
    /// move on; nothing is retried.
    #[error("publish to '{topic}' failed")]
    Publish { topic: String },
}

/// Boundary to the message bus. One connection per participant; deliveries
/// for all of its subscriptions arrive asynchronously through the handler it
/// registered at connect time.
pub trait BusConnection: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), BusError>;
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BusError>;
    fn unsubscribe(&self, filter: &str) -> Result<(), BusError>;
    fn disconnect(&self) -> Result<(), BusError>;
}
