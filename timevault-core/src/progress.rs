//! Fire-and-forget progress stream for lock and unlock operations.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub const CHANNEL_CAPACITY: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    Lock,
    Unlock,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Compressing,
    Encrypting,
    Decrypting,
    Extracting,
    Finalizing,
}

impl OperationKind {
    /// Stages in order with their percent band.
    fn bands(self) -> &'static [(Stage, f64, f64)] {
        match self {
            OperationKind::Lock => &[
                (Stage::Compressing, 0.0, 70.0),
                (Stage::Encrypting, 70.0, 90.0),
                (Stage::Finalizing, 90.0, 100.0),
            ],
            OperationKind::Unlock => &[
                (Stage::Decrypting, 0.0, 30.0),
                (Stage::Extracting, 30.0, 90.0),
                (Stage::Finalizing, 90.0, 100.0),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub operation_id: u64,
    pub operation: OperationKind,
    pub stage: Stage,
    pub percent: f64,
    pub current_file: Option<String>,
    pub bytes_processed: u64,
    pub total_bytes: u64,
}

/// Broadcasts events to any number of passive listeners. Sending never blocks;
/// a listener that falls behind loses the oldest events.
pub struct ProgressHub {
    tx: broadcast::Sender<ProgressEvent>,
    next_id: AtomicU64,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn reporter(&self, operation: OperationKind, current_file: Option<String>) -> StageReporter<'_> {
        StageReporter {
            hub: self,
            operation_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            operation,
            current_file,
            stage_idx: None,
            completed: None,
            last_percent: 0.0,
            total_bytes: 0,
            finished: false,
        }
    }

    fn publish(&self, event: ProgressEvent) {
        // No listeners is not an error.
        let _ = self.tx.send(event);
    }
}

/// One listener. Dropping it, or calling [`Subscription::unsubscribe`], detaches it.
pub struct Subscription {
    rx: Option<broadcast::Receiver<ProgressEvent>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.rx.take();
    }

    /// Next buffered event without waiting. Lagged events are skipped.
    pub fn try_next(&mut self) -> Option<ProgressEvent> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    debug!(skipped = n, "progress listener lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// All events currently buffered.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Block the current thread until the next event; `None` once the hub is gone.
    /// Must not be called from inside an async runtime.
    pub fn next_blocking(&mut self) -> Option<ProgressEvent> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.blocking_recv() {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "progress listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

}

/// Emits the events of one operation, keeping stages in order and percent
/// non-decreasing. Only [`StageReporter::finish`] reports 100.
pub struct StageReporter<'a> {
    hub: &'a ProgressHub,
    operation_id: u64,
    operation: OperationKind,
    current_file: Option<String>,
    stage_idx: Option<usize>,
    /// Highest stage whose final event went out; later events for it are dropped.
    completed: Option<usize>,
    last_percent: f64,
    total_bytes: u64,
    finished: bool,
}

impl StageReporter<'_> {
    pub fn operation_id(&self) -> u64 {
        self.operation_id
    }

    pub fn set_total_bytes(&mut self, total: u64) {
        self.total_bytes = total;
    }

    /// Intermediate event inside `stage`; `done / total` positions it within the band.
    pub fn advance(&mut self, stage: Stage, done: u64, total: u64) {
        let fraction = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        self.emit(stage, fraction, done, false, false);
    }

    /// Final event of `stage`, at the top of its band.
    pub fn complete(&mut self, stage: Stage, bytes_processed: u64) {
        if stage == Stage::Finalizing {
            self.finish(bytes_processed);
        } else {
            self.emit(stage, 1.0, bytes_processed, true, false);
        }
    }

    pub fn finish(&mut self, bytes_processed: u64) {
        self.emit(Stage::Finalizing, 1.0, bytes_processed, true, true);
    }

    fn emit(&mut self, stage: Stage, fraction: f64, bytes_processed: u64, closes_stage: bool, last: bool) {
        if self.finished {
            return;
        }
        let bands = self.operation.bands();
        let Some(idx) = bands.iter().position(|(s, _, _)| *s == stage) else {
            debug!(?stage, operation = ?self.operation, "stage not part of operation");
            return;
        };
        if self.stage_idx.is_some_and(|cur| idx < cur) {
            debug!(?stage, "ignoring out-of-order progress stage");
            return;
        }
        if self.completed.is_some_and(|done| idx <= done) {
            debug!(?stage, "ignoring progress for a completed stage");
            return;
        }
        let (_, lo, hi) = bands[idx];
        let mut percent = lo + (hi - lo) * fraction;
        if last {
            percent = 100.0;
            self.finished = true;
        } else if percent >= 100.0 {
            percent = 99.9;
        }
        percent = percent.max(self.last_percent);
        self.stage_idx = Some(idx);
        if closes_stage {
            self.completed = Some(idx);
        }
        self.last_percent = percent;
        self.hub.publish(ProgressEvent {
            operation_id: self.operation_id,
            operation: self.operation,
            stage,
            percent,
            current_file: self.current_file.clone(),
            bytes_processed,
            total_bytes: self.total_bytes,
        });
    }
}
