//! Terminal dashboard: redraws the outstanding alerts and takes operator
//! commands from stdin.

use crate::models::AlertRecord;
use crate::processor::alert_reconciler::AlertCollection;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::fmt::Write as _;
use std::io::Write as _;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CLEAR_SCREEN: &str = "\x1B[2J\x1B[H";

pub fn display_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| {
        warn!("UTC offset of {} minutes is out of range, using UTC", minutes);
        Utc.fix()
    })
}

/// Formats the whole screen for `alerts` as of `now`.
pub fn render(alerts: &AlertCollection, now: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = now.with_timezone(&offset);
    let mut out = String::new();

    let _ = writeln!(out, "LIVE SOS DASHBOARD  {}", local.format("%-I:%M:%S %P"));
    let _ = writeln!(out, "Real-time alert monitoring system engaged.  {}", local.format("%A, %-d %B %Y"));
    let _ = writeln!(out, "{}", "=".repeat(60));

    if alerts.is_empty() {
        let _ = writeln!(out, "ALL SYSTEMS NORMAL");
        let _ = writeln!(out, "Standing by for incoming alerts. The dashboard is live and listening.");
        return out;
    }

    for (i, alert) in alerts.iter().enumerate() {
        let _ = writeln!(out, "[{}] INCOMING ALERT", i + 1);
        let _ = writeln!(out, "    User ID:             {}", alert.user_id);
        let _ = writeln!(
            out,
            "    Message:             {}",
            alert.message.as_deref().unwrap_or("No message provided")
        );
        let _ = writeln!(
            out,
            "    Last Known Location: {}, {}",
            alert.location.latitude, alert.location.longitude
        );
        let _ = writeln!(out, "    Timestamp:           {}", format_timestamp(&alert.timestamp, offset));
        let _ = writeln!(out, "{}", "-".repeat(60));
    }
    let _ = writeln!(out, "Type `ack <n>` once action has been taken on alert <n>.");
    out
}

fn format_timestamp(raw: &str, offset: FixedOffset) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&offset).format("%d/%m/%Y, %-I:%M:%S %P").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Redraws on every published collection and on every clock tick until
/// cancelled or the publisher goes away. Each collection actually drawn is
/// sent on `drawn`, so operator commands refer to what is on screen.
pub async fn run_dashboard(
    mut alerts: watch::Receiver<AlertCollection>,
    drawn: watch::Sender<AlertCollection>,
    offset: FixedOffset,
    clock_interval: Duration,
    cancel: CancellationToken,
) {
    let mut clock = tokio::time::interval(clock_interval.max(Duration::from_millis(100)));
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = alerts.changed() => {
                if changed.is_err() {
                    debug!("Alert publisher closed, stopping dashboard");
                    break;
                }
            }
            _ = clock.tick() => {}
        }

        let current = alerts.borrow_and_update().clone();
        let screen = render(&current, Utc::now(), offset);
        {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = write!(stdout, "{}{}", CLEAR_SCREEN, screen).and_then(|_| stdout.flush()) {
                warn!("Failed to draw dashboard: {}", e);
            }
        }
        drawn.send_if_modified(|shown| {
            let changed = !shown.ptr_eq(&current);
            *shown = current;
            changed
        });
    }
}

/// The record behind card `number` (1-based) of a drawn collection.
pub fn card(drawn: &AlertCollection, number: usize) -> Option<AlertRecord> {
    drawn.get(number.checked_sub(1)?).cloned()
}

#[derive(Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    /// 1-based card number as shown on screen.
    Resolve(usize),
    Quit,
}

pub fn parse_command(line: &str) -> Result<Option<OperatorCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    match verb.to_lowercase().as_str() {
        "ack" | "done" => {
            let card = words
                .next()
                .ok_or_else(|| format!("`{}` needs a card number", verb))?;
            match card.parse::<usize>() {
                Ok(n) if n >= 1 => Ok(Some(OperatorCommand::Resolve(n))),
                _ => Err(format!("'{}' is not a card number", card)),
            }
        }
        "quit" | "exit" => Ok(Some(OperatorCommand::Quit)),
        other => Err(format!("Unknown command '{}'", other)),
    }
}
