//! Transports that deliver named events to the dashboard.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(test)]
pub mod local;
pub mod mqtt;

pub type SubscriptionId = Uuid;

/// A single delivery: the event name it arrived on and its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub name: String,
    pub payload: Vec<u8>,
}

/// A live listener. Deliveries arrive on `events` in the order the transport
/// received them.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::Receiver<ChannelEvent>,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("Unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
}

#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Starts listening for `event`.
    async fn subscribe(&self, event: &str) -> Result<Subscription, ChannelError>;

    /// Stops a listener. Once this returns the transport holds no sender for
    /// the subscription.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError>;
}
