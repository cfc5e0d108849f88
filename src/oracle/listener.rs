//! Event-Listening Task Loop
//!
//! Each `EventListening` task owns one subscription: matched events arrive
//! over a bounded channel and a dedicated loop executes the configured
//! destination write once per event, with the event's filtered field values
//! as parameters. Unregistering signals the loop, which stops between
//! dispatches (an operation already sent to a leaf completes) and drains
//! whatever is still buffered without executing it.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::leaf::{EventFilter, LedgerEvent};

use super::manager::{RelayContext, process_task};
use super::types::OracleTask;

pub(crate) struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ListenerHandle {
    /// Signal the loop and wait for it to stop.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Listener task did not stop cleanly");
        }
    }
}

pub(crate) fn spawn_listener(
    ctx: RelayContext,
    task_id: String,
    entry: Arc<RwLock<OracleTask>>,
    filter: EventFilter,
    mut events: mpsc::Receiver<LedgerEvent>,
) -> ListenerHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        let params = event.select_fields(&filter);
                        debug!(
                            task_id = %task_id,
                            signature = %event.signature,
                            params = ?params,
                            "Event matched, relaying"
                        );
                        // Failures are contained on the task's operation
                        // list; the subscription stays up.
                        if let Err(e) = process_task(&ctx, &entry, Some(params)).await {
                            warn!(task_id = %task_id, error = %e, "Event relay failed");
                        }
                    }
                    None => {
                        debug!(task_id = %task_id, "Event channel closed");
                        break;
                    }
                },
            }
        }

        // Drain buffered events without executing them.
        let mut drained = 0;
        while events.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(task_id = %task_id, drained, "Dropped buffered events on teardown");
        }
    });

    ListenerHandle {
        shutdown: shutdown_tx,
        join,
    }
}
