//! Bridges the event channel into the reconciliation engine and publishes
//! snapshots for the dashboard.
//!
//! While active, one session task owns the [`AlertEngine`]. Channel deliveries
//! and operator resolutions both flow through that task, so they are applied
//! strictly one after another in the order they reach it.
//!
//! A session whose task stopped on its own (the transport closed the
//! subscription) counts as inactive.

use crate::channel::{ChannelError, ChannelEvent, EventChannel, SubscriptionId};
use crate::models::AlertRecord;
use crate::processor::alert_reconciler::{AlertCollection, AlertEngine};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

enum Command {
    Resolve {
        target: AlertRecord,
        done: oneshot::Sender<AlertCollection>,
    },
}

struct Session {
    subscription: SubscriptionId,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ChannelAdapter {
    channel: Arc<dyn EventChannel>,
    event_name: String,
    state: watch::Sender<AlertCollection>,
    session: Option<Session>,
}

impl ChannelAdapter {
    pub fn new(channel: Arc<dyn EventChannel>, event_name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(AlertCollection::new());
        Self {
            channel,
            event_name: event_name.into(),
            state,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.live_session().is_some()
    }

    fn live_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| !s.task.is_finished())
    }

    /// Latest published collection.
    pub fn snapshot(&self) -> AlertCollection {
        self.state.borrow().clone()
    }

    /// Receiver notified on every published collection.
    pub fn watch(&self) -> watch::Receiver<AlertCollection> {
        self.state.subscribe()
    }

    /// Subscribes to the configured event and starts the session task. The
    /// engine resumes from the last published collection. Does nothing when
    /// already active.
    pub async fn activate(&mut self) -> Result<(), AdapterError> {
        if self.is_active() {
            warn!("Adapter already listening for '{}'", self.event_name);
            return Ok(());
        }
        if let Some(stale) = self.session.take() {
            info!("Previous '{}' session ended, replacing it", self.event_name);
            self.release(stale).await?;
        }

        let subscription = self.channel.subscribe(&self.event_name).await?;
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let worker = SessionWorker {
            engine: AlertEngine::with_collection(self.snapshot()),
            event_name: self.event_name.clone(),
            state: self.state.clone(),
        };
        let task = tokio::spawn(worker.run(subscription.events, commands_rx, cancel.clone()));

        info!("Listening for '{}' ({})", self.event_name, subscription.id);
        self.session = Some(Session {
            subscription: subscription.id,
            commands: commands_tx,
            cancel,
            task,
        });
        Ok(())
    }

    /// Stops the session task and releases the subscription. No delivery is
    /// applied after this returns.
    pub async fn deactivate(&mut self) -> Result<(), AdapterError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        self.release(session).await?;
        info!("Stopped listening for '{}'", self.event_name);
        Ok(())
    }

    async fn release(&self, session: Session) -> Result<(), AdapterError> {
        session.cancel.cancel();
        if let Err(e) = session.task.await {
            error!("Session task for '{}' failed: {}", self.event_name, e);
        }

        match self.channel.unsubscribe(session.subscription).await {
            Ok(()) => Ok(()),
            // The transport already dropped it.
            Err(ChannelError::UnknownSubscription(id)) => {
                debug!("Subscription {} was already released", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Operator action: removes the alert matching `target` exactly and
    /// returns the collection published afterwards.
    pub async fn resolve(&self, target: AlertRecord) -> Result<AlertCollection, AdapterError> {
        let Some(session) = self.live_session() else {
            return Ok(self.resolve_published(&target));
        };

        let (done, result) = oneshot::channel();
        let sent = session
            .commands
            .send(Command::Resolve {
                target: target.clone(),
                done,
            })
            .await;
        match (sent, result.await) {
            (Ok(()), Ok(current)) => Ok(current),
            // The session stopped meanwhile; everything it ingested is
            // already published.
            _ => Ok(self.resolve_published(&target)),
        }
    }

    /// Applies a resolution straight to the published collection. Watchers
    /// are only notified when a record was removed.
    fn resolve_published(&self, target: &AlertRecord) -> AlertCollection {
        let mut published = AlertCollection::new();
        self.state.send_if_modified(|current| {
            let next = current.resolve(target);
            let removed = !next.ptr_eq(current);
            *current = next;
            published = current.clone();
            removed
        });
        published
    }
}

struct SessionWorker {
    engine: AlertEngine,
    event_name: String,
    state: watch::Sender<AlertCollection>,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<ChannelEvent>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        // Deliveries and commands are taken in whichever order they become
        // ready; only cancellation is checked first.
        loop {
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = events.recv() => match delivery {
                    Some(event) => self.on_event(event),
                    None => {
                        warn!("Channel closed the '{}' subscription", self.event_name);
                        break;
                    }
                },
                Some(command) = commands.recv() => self.on_command(command),
            }
        }
    }

    fn on_event(&mut self, event: ChannelEvent) {
        if event.name != self.event_name {
            debug!("Ignoring delivery on '{}'", event.name);
            return;
        }

        match AlertRecord::from_payload(&event.payload) {
            Ok(alert) => {
                info!(
                    "Received SOS from {} at {}, {}",
                    alert.user_id, alert.location.latitude, alert.location.longitude
                );
                let current = self.engine.ingest(alert);
                self.state.send_replace(current);
            }
            Err(e) => warn!("Discarding malformed SOS event: {}", e),
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Resolve { target, done } => {
                let before = self.engine.current().clone();
                let current = self.engine.resolve(&target);
                if !current.ptr_eq(&before) {
                    info!("Alert from {} resolved by operator", target.user_id);
                    self.state.send_replace(current.clone());
                } else {
                    info!("No exact match for alert from {}, nothing to resolve", target.user_id);
                }
                // The caller may have given up waiting.
                let _ = done.send(current);
            }
        }
    }
}
