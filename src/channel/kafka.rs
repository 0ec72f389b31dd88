use super::{ChannelError, ChannelEvent, EventChannel, Subscription, SubscriptionId};
use crate::config::AppConfig;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct KafkaListener {
    topic: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Kafka transport with SASL/SCRAM authentication. Named event = topic.
pub struct KafkaChannel {
    client_config: ClientConfig,
    max_retries: u32,
    cooldown: Duration,
    buffer: usize,
    listeners: Mutex<HashMap<SubscriptionId, KafkaListener>>,
}

impl KafkaChannel {
    pub fn new(config: &AppConfig) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("group.id", &config.kafka_group_id)
            .set("auto.offset.reset", &config.kafka_auto_offset_reset)
            // SASL Configuration
            .set("security.protocol", &config.kafka_security_protocol)
            .set("sasl.mechanism", &config.kafka_sasl_mechanism)
            .set("sasl.username", &config.kafka_username)
            .set("sasl.password", &config.kafka_password);

        Self {
            client_config,
            max_retries: config.kafka_max_retries,
            cooldown: Duration::from_secs(config.kafka_circuit_breaker_cooldown),
            buffer: config.channel_buffer.max(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventChannel for KafkaChannel {
    async fn subscribe(&self, event: &str) -> Result<Subscription, ChannelError> {
        info!("Initializing Kafka consumer for topic: {}", event);

        let consumer: StreamConsumer = self.client_config.create()?;
        consumer.subscribe(&[event])?;
        info!("Subscribed to topic: {}", event);

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(consume(
            consumer,
            tx,
            self.max_retries,
            self.cooldown,
            cancel.clone(),
        ));

        self.listeners.lock().await.insert(
            id,
            KafkaListener {
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

        listener.cancel.cancel();
        if let Err(e) = listener.task.await {
            error!("Kafka consumer task failed: {}", e);
        }

        info!("Unsubscribed from topic: {}", listener.topic);
        Ok(())
    }
}

/// Receive loop with a circuit breaker. Messages are forwarded in the order
/// they are received; nothing is processed concurrently.
async fn consume(
    consumer: StreamConsumer,
    tx: mpsc::Sender<ChannelEvent>,
    max_retries: u32,
    cooldown: Duration,
    cancel: CancellationToken,
) {
    let mut consecutive_failures = 0;

    loop {
        // Circuit Breaker Check
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures,
                cooldown.as_secs()
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cooldown) => {}
            }
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = consumer.recv() => received,
        };

        let event = match received {
            Ok(m) => {
                consecutive_failures = 0;

                match m.payload() {
                    None => {
                        warn!("Received empty payload from Kafka");
                        continue;
                    }
                    Some(p) => ChannelEvent {
                        name: m.topic().to_string(),
                        payload: p.to_vec(),
                    },
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e, consecutive_failures, max_retries
                );

                // Small delay to prevent tight loop in case of minor network glitches
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            debug!("Listener dropped, stopping Kafka consumer");
            break;
        }
    }

    consumer.unsubscribe();
}
