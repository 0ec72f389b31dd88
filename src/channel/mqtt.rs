use super::{ChannelError, ChannelEvent, EventChannel, Subscription, SubscriptionId};
use crate::config::AppConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long the event loop gets to flush UNSUBSCRIBE and DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

struct MqttListener {
    client: AsyncClient,
    topic: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// MQTT transport. Every subscription gets its own broker connection, named
/// event = MQTT topic.
pub struct MqttChannel {
    broker: String,
    port: u16,
    username: String,
    password: String,
    keep_alive: Duration,
    buffer: usize,
    listeners: Mutex<HashMap<SubscriptionId, MqttListener>>,
}

impl MqttChannel {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            broker: config.mqtt_broker.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            keep_alive: Duration::from_secs(config.mqtt_keep_alive.max(1)),
            buffer: config.channel_buffer.max(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    fn options(&self, id: SubscriptionId) -> MqttOptions {
        let client_id = format!("siscom-sos-{}", id);
        let mut mqttoptions = MqttOptions::new(client_id, &self.broker, self.port);
        mqttoptions.set_keep_alive(self.keep_alive);
        if !self.username.is_empty() {
            mqttoptions.set_credentials(&self.username, &self.password);
        }
        mqttoptions
    }
}

#[async_trait]
impl EventChannel for MqttChannel {
    async fn subscribe(&self, event: &str) -> Result<Subscription, ChannelError> {
        let id = Uuid::new_v4();
        let (client, eventloop) = AsyncClient::new(self.options(id), self.buffer);

        client.subscribe(event, QoS::AtLeastOnce).await?;
        info!("Subscribing to {} on {}:{}", event, self.broker, self.port);

        let (tx, rx) = mpsc::channel(self.buffer);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(forward_publishes(
            eventloop,
            client.clone(),
            event.to_string(),
            tx,
            cancel.clone(),
        ));

        self.listeners.lock().await.insert(
            id,
            MqttListener {
                client,
                topic: event.to_string(),
                cancel,
                task,
            },
        );

        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        let listener = self
            .listeners
            .lock()
            .await
            .remove(&id)
            .ok_or(ChannelError::UnknownSubscription(id))?;

        let mut task = listener.task;
        let queued = listener
            .client
            .try_unsubscribe(listener.topic.as_str())
            .and_then(|_| listener.client.try_disconnect());

        // The event loop stops by itself once DISCONNECT has gone out.
        let flushed = match queued {
            Ok(()) => tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.ok(),
            Err(e) => {
                warn!("Could not queue MQTT unsubscribe for {}: {}", listener.topic, e);
                None
            }
        };

        let joined = match flushed {
            Some(joined) => {
                info!("Unsubscribed from {}", listener.topic);
                joined
            }
            None => {
                warn!("MQTT disconnect for {} not confirmed, dropping connection", listener.topic);
                listener.cancel.cancel();
                task.await
            }
        };
        if let Err(e) = joined {
            error!("MQTT event loop task failed: {}", e);
        }
        Ok(())
    }
}

/// Polls the connection and forwards publishes one by one, so the receiver
/// sees them in broker delivery order.
async fn forward_publishes(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let mut connected_before = false;

    loop {
        let notification = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            notification = eventloop.poll() => notification,
        };

        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = ChannelEvent {
                    name: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if tx.send(event).await.is_err() {
                    debug!("Listener for {} dropped, stopping event loop", topic);
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT Connected!");
                // The initial subscribe is already queued; re-issue it only
                // after a reconnect that lost the session.
                if connected_before && !ack.session_present {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        error!("Failed to resubscribe to {}: {}", topic, e);
                    }
                }
                connected_before = true;
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                info!("Subscription confirmed!");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent for {}", topic);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT Connection error: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }
}
