//! Non-blocking, per-tick bounded channel draining.
//!
//! Every stream controller wraps one of these. A tick drains at most
//! `max_per_tick` messages and never waits for more.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Stops the upstream producer. Invoked at most once, on explicit detach.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// Result of one `consume_tick` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// At least one message was handled.
    pub had_work: bool,
    /// The channel closed during this tick. Reported once; the consumer is
    /// detached afterwards.
    pub closed: bool,
    pub consumed: usize,
}

impl TickOutcome {
    /// Combines two outcomes from the same tick (for reporting only).
    pub fn merge(self, other: TickOutcome) -> TickOutcome {
        TickOutcome {
            had_work: self.had_work || other.had_work,
            closed: self.closed || other.closed,
            consumed: self.consumed + other.consumed,
        }
    }
}

/// Receive side of one attached stream plus its cancel callback.
pub struct BoundedConsumer<T> {
    rx: Option<mpsc::Receiver<T>>,
    cancel: Option<CancelFn>,
}

impl<T> Default for BoundedConsumer<T> {
    fn default() -> Self {
        Self::detached()
    }
}

impl<T> fmt::Debug for BoundedConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedConsumer")
            .field("attached", &self.rx.is_some())
            .field("has_cancel", &self.cancel.is_some())
            .finish()
    }
}

impl<T> BoundedConsumer<T> {
    pub fn new(rx: mpsc::Receiver<T>, cancel: Option<CancelFn>) -> Self {
        Self {
            rx: Some(rx),
            cancel,
        }
    }

    /// A consumer with nothing attached; every tick is a no-op.
    pub fn detached() -> Self {
        Self {
            rx: None,
            cancel: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.rx.is_some()
    }

    /// Replaces the current channel. The previous producer is cancelled.
    pub fn attach(&mut self, rx: mpsc::Receiver<T>, cancel: Option<CancelFn>) {
        self.cancel();
        self.rx = Some(rx);
        self.cancel = cancel;
    }

    /// Drains up to `max_per_tick` ready messages into `on_message`.
    ///
    /// Stops early when nothing is immediately available. A closed channel is
    /// reported once, then the channel and its cancel callback are dropped
    /// without invoking the callback (the producer already finished).
    pub fn consume_tick(
        &mut self,
        max_per_tick: usize,
        mut on_message: impl FnMut(T),
    ) -> TickOutcome {
        let Some(rx) = self.rx.as_mut() else {
            return TickOutcome::default();
        };

        let mut outcome = TickOutcome::default();
        while outcome.consumed < max_per_tick {
            match rx.try_recv() {
                Ok(message) => {
                    outcome.consumed += 1;
                    on_message(message);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    outcome.closed = true;
                    break;
                }
            }
        }
        outcome.had_work = outcome.consumed > 0;

        if outcome.closed {
            tracing::debug!(consumed = outcome.consumed, "stream channel closed");
            self.rx = None;
            self.cancel = None;
        }
        outcome
    }

    /// Detaches the channel and invokes the cancel callback, if any.
    pub fn cancel(&mut self) {
        self.rx = None;
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn drains_ready_messages_then_reports_close_once() {
        let (tx, rx) = mpsc::channel(8);
        let mut consumer = BoundedConsumer::new(rx, None);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();

        let mut seen = Vec::new();
        let outcome = consumer.consume_tick(10, |m| seen.push(m));
        assert_eq!(
            outcome,
            TickOutcome {
                had_work: true,
                closed: false,
                consumed: 2
            }
        );
        assert_eq!(seen, vec![1, 2]);

        drop(tx);
        let outcome = consumer.consume_tick(10, |m| seen.push(m));
        assert!(outcome.closed);
        assert_eq!(outcome.consumed, 0);
        assert!(!outcome.had_work);
        assert!(!consumer.is_attached());

        let outcome = consumer.consume_tick(10, |m| seen.push(m));
        assert_eq!(outcome, TickOutcome::default());
    }

    #[tokio::test]
    async fn respects_per_tick_cap() {
        let (tx, rx) = mpsc::channel(8);
        let mut consumer = BoundedConsumer::new(rx, None);
        for i in 0..5 {
            tx.send(i).await.unwrap();
        }

        let mut seen = Vec::new();
        assert_eq!(consumer.consume_tick(2, |m| seen.push(m)).consumed, 2);
        assert_eq!(consumer.consume_tick(2, |m| seen.push(m)).consumed, 2);
        assert_eq!(consumer.consume_tick(2, |m| seen.push(m)).consumed, 1);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn empty_channel_is_not_closed() {
        let (_tx, rx) = mpsc::channel::<u8>(1);
        let mut consumer = BoundedConsumer::new(rx, None);
        let outcome = consumer.consume_tick(10, |_| {});
        assert!(!outcome.closed);
        assert!(!outcome.had_work);
        assert!(consumer.is_attached());
    }

    #[tokio::test]
    async fn cancel_invokes_callback_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (_tx, rx) = mpsc::channel::<u8>(1);
        let mut consumer = BoundedConsumer::new(
            rx,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        consumer.cancel();
        consumer.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!consumer.is_attached());
    }

    #[tokio::test]
    async fn natural_close_does_not_cancel_producer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (tx, rx) = mpsc::channel::<u8>(1);
        let mut consumer = BoundedConsumer::new(
            rx,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        drop(tx);

        assert!(consumer.consume_tick(4, |_| {}).closed);
        consumer.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
