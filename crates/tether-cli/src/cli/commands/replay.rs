//! Replay command: feeds a recorded stream through a live session.
//!
//! A background task plays the transport role, pushing records into a
//! bounded channel, while this task runs the tick loop a UI would run.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tether_core::LiveSession;
use tether_core::config::Config;
use tether_core::stream::CancelFn;
use tether_types::ProtocolEnvelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pause between idle ticks.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StreamKind {
    /// `{method, id?, params}` envelopes, one per line
    Protocol,
    /// Decoded items with a `type` field, one per line
    Items,
    /// Raw log text
    Log,
}

pub struct ReplayOptions<'a> {
    pub file: &'a Path,
    pub kind: StreamKind,
    pub max_per_tick: Option<usize>,
    pub full: bool,
    pub config: &'a Config,
}

pub async fn run(opts: ReplayOptions<'_>) -> Result<()> {
    let contents = std::fs::read_to_string(opts.file)
        .with_context(|| format!("Failed to read {}", opts.file.display()))?;

    let mut config = opts.config.clone();
    if let Some(max_per_tick) = opts.max_per_tick {
        config.streams.max_per_tick = max_per_tick;
    }
    let capacity = config.streams.channel_capacity.max(1);
    let producer = CancellationToken::new();

    let mut session = LiveSession::new(&config);
    match opts.kind {
        StreamKind::Protocol => {
            let records = parse_lines::<ProtocolEnvelope>(&contents, opts.file)?;
            let rx = spawn_producer(records, capacity, producer.clone());
            session.attach_protocol(rx, Some(cancel_fn(&producer)));
        }
        StreamKind::Items => {
            let records = parse_lines::<Value>(&contents, opts.file)?;
            let rx = spawn_producer(records, capacity, producer.clone());
            session.attach_items(rx, Some(cancel_fn(&producer)));
        }
        StreamKind::Log => {
            let chunks: Vec<String> = contents.split_inclusive('\n').map(str::to_string).collect();
            let rx = spawn_producer(chunks, capacity, producer.clone());
            session.attach_log(rx, Some(cancel_fn(&producer)));
            if opts.full && !session.is_debug_panel_expanded() {
                session.toggle_debug_panel();
            }
        }
    }

    let mut ticks = 0usize;
    let mut consumed = 0usize;
    loop {
        let report = session.tick();
        ticks += 1;
        consumed += report.streams().consumed;
        if session.is_idle() {
            break;
        }
        if !report.had_work() {
            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }
    session.settle().await;
    tracing::debug!(
        ticks,
        consumed,
        blocks = session.blocks().len(),
        "replay finished"
    );

    let lines = match opts.kind {
        StreamKind::Log => session.debug_panel_lines(),
        StreamKind::Protocol | StreamKind::Items => session.viewport_lines(),
    };
    for line in lines {
        println!("{line}");
    }

    if let Some(approval) = session.pending_approval() {
        eprintln!(
            "pending approval: {} ({})",
            approval.summary, approval.method
        );
    }
    if !session.last_error().is_empty() {
        eprintln!("error: {}", session.last_error());
    }

    session.shutdown();
    Ok(())
}

/// Parses one JSON record per non-blank line.
fn parse_lines<T: serde::de::DeserializeOwned>(contents: &str, file: &Path) -> Result<Vec<T>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| {
                format!("Failed to parse {} line {}", file.display(), index + 1)
            })
        })
        .collect()
}

/// Stand-in transport: sends every record, stopping early if cancelled.
fn spawn_producer<T: Send + 'static>(
    records: Vec<T>,
    capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        for record in records {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = tx.send(record) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn cancel_fn(token: &CancellationToken) -> CancelFn {
    let token = token.clone();
    Box::new(move || token.cancel())
}
