//! Schedule projections off the control loop; apply only the latest result.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::tracker::SequenceTracker;

/// CPU-bound transformation run on the blocking pool.
pub trait Projector: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn project(&self, input: Self::Input) -> Self::Output;
}

/// Output tagged with the sequence it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionResult<O> {
    pub sequence: u64,
    pub output: O,
}

/// "Last submitted wins" coordinator.
///
/// Superseded jobs still run to completion; their results are dropped when
/// they arrive. Results travel over a channel bounded by the tracked
/// capacity; a job finishing while it is full holds its blocking-pool thread
/// until the loop drains. Must be used inside a tokio runtime.
pub struct ProjectionCoordinator<P: Projector> {
    projector: Arc<P>,
    tracker: SequenceTracker,
    results_tx: mpsc::Sender<ProjectionResult<P::Output>>,
    results_rx: mpsc::Receiver<ProjectionResult<P::Output>>,
}

impl<P: Projector> fmt::Debug for ProjectionCoordinator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionCoordinator")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl<P: Projector> ProjectionCoordinator<P> {
    pub fn new(projector: P, tracked_capacity: usize) -> Self {
        let tracker = SequenceTracker::new(tracked_capacity);
        let (results_tx, results_rx) = mpsc::channel(tracker.capacity());
        Self {
            projector: Arc::new(projector),
            tracker,
            results_tx,
            results_rx,
        }
    }

    /// Starts a projection and returns its sequence.
    pub fn schedule(&mut self, input: P::Input) -> u64 {
        let sequence = self.tracker.track_next();
        let projector = Arc::clone(&self.projector);
        let results = self.results_tx.clone();
        tokio::task::spawn_blocking(move || {
            let output = projector.project(input);
            // Fails only once the coordinator is gone.
            let _ = results.blocking_send(ProjectionResult { sequence, output });
        });
        sequence
    }

    pub fn is_current(&self, sequence: u64) -> bool {
        self.tracker.is_current(sequence)
    }

    pub fn consume(&mut self, sequence: u64) {
        self.tracker.consume(sequence);
    }

    pub fn invalidate(&mut self) {
        self.tracker.invalidate();
    }

    /// A scheduled projection hasn't delivered yet.
    pub fn is_pending(&self) -> bool {
        self.tracker.latest().is_some()
    }

    /// Returns the output iff the result is current. Either way the sequence
    /// is consumed.
    pub fn accept(&mut self, result: ProjectionResult<P::Output>) -> Option<P::Output> {
        let current = self.tracker.is_current(result.sequence);
        self.tracker.consume(result.sequence);
        if current {
            Some(result.output)
        } else {
            tracing::trace!(sequence = result.sequence, "dropping stale projection");
            None
        }
    }

    /// Handles every ready result without waiting; returns the one to apply.
    pub fn drain(&mut self) -> Option<P::Output> {
        let mut applied = None;
        while let Ok(result) = self.results_rx.try_recv() {
            if let Some(output) = self.accept(result) {
                applied = Some(output);
            }
        }
        applied
    }

    /// Waits for the current projection, discarding stale ones on the way.
    ///
    /// Returns `None` immediately if nothing is pending.
    pub async fn wait_current(&mut self) -> Option<P::Output> {
        while self.is_pending() {
            let result = self.results_rx.recv().await?;
            if let Some(output) = self.accept(result) {
                return Some(output);
            }
        }
        None
    }
}
