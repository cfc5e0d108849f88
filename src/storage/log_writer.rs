//! Asynchronous Log Writer
//!
//! Log persistence is decoupled from the critical path: entries are queued
//! on a bounded channel and flushed to the store by a background task.
//! Ordering is FIFO per writer, which is what gives every operation its
//! INIT < EXEC < (DONE|FAIL) guarantee. Observers must tolerate a short lag
//! between an operation's logical completion and its entry becoming visible;
//! `flush` is the barrier for anyone who cannot.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::{LogEntry, LogStore};

const DEFAULT_QUEUE_CAPACITY: usize = 256;

enum LogCommand {
    Write(LogEntry),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct LogWriter {
    tx: mpsc::Sender<LogCommand>,
}

impl LogWriter {
    /// Spawn the background flush task over the given store.
    pub fn spawn(store: Arc<dyn LogStore>) -> Self {
        Self::spawn_with_capacity(store, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(store: Arc<dyn LogStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogCommand>(capacity);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    LogCommand::Write(entry) => {
                        if let Err(e) = store.append(&entry).await {
                            error!(
                                context_id = %entry.context_id,
                                entry_type = %entry.entry_type,
                                phase = %entry.phase,
                                error = %e,
                                "Failed to persist log entry"
                            );
                        }
                    }
                    LogCommand::Flush(ack) => {
                        // Everything queued before this command has already
                        // been drained; acknowledge the barrier.
                        let _ = ack.send(());
                    }
                }
            }
            debug!("Log writer drained and stopped");
        });

        Self { tx }
    }

    /// Queue an entry. Applies backpressure when the queue is full; an entry
    /// is only lost if the writer task is already gone at shutdown.
    pub async fn log(&self, entry: LogEntry) {
        if self.tx.send(LogCommand::Write(entry)).await.is_err() {
            error!("Log writer task stopped, entry dropped");
        }
    }

    /// Wait until everything queued so far is persisted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LogCommand::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LogPhase, MemoryLogStore};

    #[tokio::test]
    async fn test_entries_persist_in_submission_order() {
        let store = Arc::new(MemoryLogStore::new());
        let writer = LogWriter::spawn(store.clone());

        for phase in [LogPhase::Init, LogPhase::Exec, LogPhase::Done] {
            writer.log(LogEntry::new("task-1", "oracle-read", phase)).await;
        }
        writer.flush().await;

        let entries = store.entries_for("task-1").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].phase, LogPhase::Init);
        assert_eq!(entries[1].phase, LogPhase::Exec);
        assert_eq!(entries[2].phase, LogPhase::Done);
    }

    #[tokio::test]
    async fn test_flush_is_a_barrier() {
        let store = Arc::new(MemoryLogStore::new());
        let writer = LogWriter::spawn_with_capacity(store.clone(), 4);

        for i in 0..20 {
            writer
                .log(
                    LogEntry::new("task-2", "oracle-update", LogPhase::Init)
                        .with_operation(format!("op-{i}")),
                )
                .await;
        }
        writer.flush().await;

        assert_eq!(store.entries_for("task-2").await.unwrap().len(), 20);
    }
}
