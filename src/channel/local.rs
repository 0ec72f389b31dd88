//! In-process channel standing in for the broker in tests.

use super::{ChannelError, ChannelEvent, EventChannel, Subscription, SubscriptionId};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

struct LocalSubscriber {
    event: String,
    tx: mpsc::Sender<ChannelEvent>,
}

pub struct LocalChannel {
    buffer: usize,
    subscribers: Mutex<HashMap<SubscriptionId, LocalSubscriber>>,
}

impl LocalChannel {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Delivers `payload` to every subscriber of `name`, waiting for queue
    /// space. Returns how many subscribers received it.
    pub async fn emit(&self, name: &str, payload: impl Into<Vec<u8>>) -> usize {
        let event = ChannelEvent {
            name: name.to_string(),
            payload: payload.into(),
        };

        let senders: Vec<mpsc::Sender<ChannelEvent>> = self
            .lock()
            .values()
            .filter(|s| s.event == name)
            .map(|s| s.tx.clone())
            .collect();

        let delivered = join_all(senders.iter().map(|tx| tx.send(event.clone())))
            .await
            .into_iter()
            .filter(Result::is_ok)
            .count();

        debug!("Emitted '{}' to {} subscriber(s)", name, delivered);
        delivered
    }

    /// Drops every sender, as a broker does when the connection goes away.
    pub fn drop_subscribers(&self) {
        self.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, LocalSubscriber>> {
        // A poisoned map is still structurally valid.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventChannel for LocalChannel {
    async fn subscribe(&self, event: &str) -> Result<Subscription, ChannelError> {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.lock().insert(
            id,
            LocalSubscriber {
                event: event.to_string(),
                tx,
            },
        );
        info!("Subscribed to local event '{}' ({})", event, id);
        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        let removed = self.lock().remove(&id);
        match removed {
            Some(subscriber) => {
                info!("Unsubscribed from local event '{}' ({})", subscriber.event, id);
                Ok(())
            }
            None => Err(ChannelError::UnknownSubscription(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_only_matching_subscribers() {
        let channel = LocalChannel::new(8);
        let mut sos = channel.subscribe("new-sos").await.unwrap();
        let mut other = channel.subscribe("heartbeat").await.unwrap();

        assert_eq!(channel.emit("new-sos", b"a".to_vec()).await, 1);
        assert_eq!(channel.emit("new-sos", b"b".to_vec()).await, 1);

        assert_eq!(sos.events.recv().await.unwrap().payload, b"a");
        assert_eq!(sos.events.recv().await.unwrap().payload, b"b");
        assert!(other.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_sender() {
        let channel = LocalChannel::new(8);
        let mut sub = channel.subscribe("new-sos").await.unwrap();
        assert_eq!(channel.subscriber_count(), 1);

        channel.unsubscribe(sub.id).await.unwrap();
        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.emit("new-sos", b"late".to_vec()).await, 0);
        assert!(sub.events.recv().await.is_none());

        assert!(matches!(
            channel.unsubscribe(sub.id).await,
            Err(ChannelError::UnknownSubscription(_))
        ));
    }
}
