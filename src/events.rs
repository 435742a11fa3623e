use crate::insights::StorageInsight;
use crate::model::{ScanSession, StorageNode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

/// Typed events consumed by the presentation layer. The stream terminates
/// after `Completed`, `Cancelled` or `Failed`.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    PhaseStarted(String),
    Progress {
        items: u64,
        bytes: u64,
        current_path: Option<String>,
    },
    /// Compatibility event: first indexed node only, then batches.
    NodeIndexed(StorageNode),
    NodeIndexedBatch(Vec<StorageNode>),
    InsightReady(StorageInsight),
    Warning(String),
    Completed(Box<ScanSession>),
    Cancelled,
    /// Terminal: the scan aborted with an error (timeout included).
    Failed(String),
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Completed(_) | ScanEvent::Cancelled | ScanEvent::Failed(_)
        )
    }
}

/// Cooperative cancellation flag threaded through every task the orchestrator
/// and the recursive indexer spawn. Checked at every suspension point.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Sending half of the scan event stream. Emission is best-effort: a dropped
/// receiver never fails the scan, and nothing is emitted after cancellation
/// except a terminal event.
#[derive(Clone)]
pub struct EventSink {
    tx: UnboundedSender<ScanEvent>,
    cancel: CancelToken,
}

impl EventSink {
    pub fn channel(cancel: CancelToken) -> (Self, UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx, cancel }, rx)
    }

    pub fn emit(&self, event: ScanEvent) {
        if self.cancel.is_cancelled() && !event.is_terminal() {
            return;
        }
        let _ = self.tx.send(event);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(ScanEvent::Warning(message.into()));
    }
}

/// Dual-cadence progress throttle: fire when the accumulated item delta
/// crosses a threshold OR when a minimum wall-clock interval has elapsed.
/// Guarantees visible progress for scans dominated by a few huge directories
/// without flooding the channel for scans with many tiny files.
pub struct ProgressGate {
    item_threshold: u64,
    interval: Duration,
    last_items: u64,
    last_emit: Instant,
}

impl ProgressGate {
    pub fn new(item_threshold: u64, interval: Duration) -> Self {
        Self {
            item_threshold,
            interval,
            last_items: 0,
            last_emit: Instant::now(),
        }
    }

    pub fn should_emit(&mut self, items: u64) -> bool {
        let delta = items.saturating_sub(self.last_items);
        if delta >= self.item_threshold || self.last_emit.elapsed() >= self.interval {
            self.last_items = items;
            self.last_emit = Instant::now();
            true
        } else {
            false
        }
    }
}
