mod adapter;
mod channel;
mod config;
mod dashboard;
mod models;
mod processor;

use adapter::ChannelAdapter;
use channel::mqtt::MqttChannel;
use channel::EventChannel;
use config::{AppConfig, Transport};
use dashboard::OperatorCommand;
use processor::alert_reconciler::AlertCollection;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging; stdout belongs to the dashboard
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Siscom SOS Dashboard ({:?} transport)...", config.transport);

    let channel = build_channel(&config)?;
    let mut adapter = ChannelAdapter::new(channel, config.sos_event_name.clone());
    adapter.activate().await?;

    let cancel = CancellationToken::new();
    let (drawn_tx, drawn_rx) = watch::channel(AlertCollection::new());
    let dashboard = tokio::spawn(dashboard::run_dashboard(
        adapter.watch(),
        drawn_tx,
        dashboard::display_offset(config.dashboard_utc_offset_minutes),
        Duration::from_millis(config.dashboard_clock_interval_ms),
        cancel.clone(),
    ));

    run_operator_console(&adapter, drawn_rx).await;

    info!("Shutting down...");
    if let Err(e) = adapter.deactivate().await {
        error!("Failed to release subscription: {}", e);
    }
    cancel.cancel();
    dashboard.await?;

    Ok(())
}

fn build_channel(config: &AppConfig) -> anyhow::Result<Arc<dyn EventChannel>> {
    match config.transport {
        Transport::Mqtt => Ok(Arc::new(MqttChannel::new(config))),
        #[cfg(feature = "kafka")]
        Transport::Kafka => Ok(Arc::new(channel::kafka::KafkaChannel::new(config))),
        #[cfg(not(feature = "kafka"))]
        Transport::Kafka => anyhow::bail!("Kafka transport requires building with `--features kafka`"),
    }
}

/// Reads operator commands until `quit`, end of input or Ctrl-C.
async fn run_operator_console(adapter: &ChannelAdapter, drawn: watch::Receiver<AlertCollection>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl-C");
                return;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Operator input closed");
                return;
            }
            Err(e) => {
                error!("Failed to read operator input: {}", e);
                return;
            }
        };

        match dashboard::parse_command(&line) {
            Ok(Some(OperatorCommand::Quit)) => return,
            Ok(Some(OperatorCommand::Resolve(card))) => {
                // Cards are numbered as last drawn; a refreshed card then
                // resolves to nothing.
                let Some(alert) = dashboard::card(&drawn.borrow(), card) else {
                    warn!("There is no alert card #{}", card);
                    continue;
                };
                if !adapter.is_active() {
                    warn!("Not receiving new alerts, the channel subscription has ended");
                }
                if let Err(e) = adapter.resolve(alert).await {
                    error!("Failed to resolve alert card #{}: {}", card, e);
                }
            }
            Ok(None) => {}
            Err(msg) => warn!("{}", msg),
        }
    }
}
