//! Background pretty-printer for log lines.
//!
//! Best effort: requests are dropped when the queue is full. Every accepted
//! request gets exactly one reply, so the owner can tell when the worker has
//! caught up.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// A line handed to the worker, tagged so stale results can be recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub generation: u64,
    pub line_id: u64,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatResult {
    pub generation: u64,
    pub line_id: u64,
    /// `None` when the line had nothing to format.
    pub formatted: Option<String>,
}

/// Pretty-prints the first JSON object (or array of containers) embedded in
/// `line`, keeping the text before and after it.
///
/// Returns `None` when there is nothing to format.
pub fn format_line(line: &str) -> Option<String> {
    line.match_indices(['{', '['])
        .find_map(|(start, _)| format_at(line, start))
}

fn format_at(line: &str, start: usize) -> Option<String> {
    let (prefix, payload) = line.split_at(start);
    let mut values = serde_json::Deserializer::from_str(payload).into_iter::<Value>();
    let value = values.next()?.ok()?;
    if !is_structured(&value) {
        return None;
    }
    let rest = &payload[values.byte_offset()..];
    let pretty = serde_json::to_string_pretty(&value).ok()?;
    Some(format!("{prefix}{pretty}{rest}"))
}

/// Objects, and arrays holding objects or arrays. `[1]` or `[INFO]`-style
/// tags stay as they are.
fn is_structured(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(|item| item.is_object() || item.is_array()),
        _ => false,
    }
}

/// Owner side of the formatter worker task.
///
/// Must be created inside a tokio runtime. Dropping the handle stops the worker.
#[derive(Debug)]
pub struct FormatterHandle {
    requests: mpsc::Sender<FormatRequest>,
    results: mpsc::Receiver<FormatResult>,
    cancel: CancellationToken,
    /// Accepted requests whose reply hasn't been received yet.
    in_flight: usize,
    closed: bool,
}

impl FormatterHandle {
    /// Both the request queue and the result channel hold `queue_capacity`
    /// entries. A full result channel stalls the worker, which in turn fills
    /// the request queue and makes [`Self::try_submit`] drop.
    pub fn spawn(queue_capacity: usize) -> Self {
        let capacity = queue_capacity.max(1);
        let (requests, request_rx) = mpsc::channel(capacity);
        let (result_tx, results) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        tokio::spawn(run_worker(request_rx, result_tx, cancel.clone()));
        Self {
            requests,
            results,
            cancel,
            in_flight: 0,
            closed: false,
        }
    }

    /// Enqueues without waiting. Returns `false` if the request was dropped.
    pub fn try_submit(&mut self, request: FormatRequest) -> bool {
        if self.closed {
            return false;
        }
        match self.requests.try_send(request) {
            Ok(()) => {
                self.in_flight += 1;
                true
            }
            Err(TrySendError::Full(request)) => {
                tracing::trace!(line_id = request.line_id, "format queue full, keeping raw line");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Requests that can be queued right now without being dropped.
    pub fn room(&self) -> usize {
        if self.closed {
            0
        } else {
            self.requests.capacity()
        }
    }

    /// Accepted requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Next ready result, if any. Never waits.
    pub fn try_recv(&mut self) -> Option<FormatResult> {
        let result = self.results.try_recv().ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(result)
    }

    /// Waits for the next result. `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<FormatResult> {
        match self.results.recv().await {
            Some(result) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(result)
            }
            None => {
                self.in_flight = 0;
                None
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stops the worker and discards undelivered results. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.in_flight = 0;
        self.cancel.cancel();
        self.results.close();
        while self.results.try_recv().is_ok() {}
    }
}

impl Drop for FormatterHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    mut requests: mpsc::Receiver<FormatRequest>,
    results: mpsc::Sender<FormatResult>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let result = FormatResult {
            generation: request.generation,
            line_id: request.line_id,
            formatted: format_line(&request.line),
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = results.send(result) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("format worker stopped");
}
