//! The background pipeline: watch the store, queue new records, and extract
//! text from them one at a time.
//!
//! Two tasks run while a [`Processor`] is alive. The watcher task turns
//! filesystem notifications into reconciliation passes, which mark new records
//! as queued and push them onto the work queue. The consumer task drains that
//! queue in order, handing each record to the [`ExtractionManager`]. Only the
//! consumer ever touches the document, so it is never read by two
//! extractions at once.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    async_utils::{JoinWorker, spawn_blocking_propagating_panics},
    extraction::{ExtractionManager, ProcessOutcome},
    prelude::*,
    status::{SharedObserver, StatusObserver},
    store::Record,
};

pub mod debounce;
pub mod dispatch;
pub mod watcher;

use self::{
    dispatch::DispatchQueue,
    watcher::{Subscription, WatchLoop},
};

/// The default quiet period after the last store change.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(200);

/// A running watch-and-extract pipeline.
pub struct Processor {
    cancel: CancellationToken,
    watcher: JoinWorker,
    consumer: JoinWorker,
}

impl Processor {
    /// Start watching `manager`'s store. We're subscribed by the time this
    /// returns, so no later write can be missed.
    pub async fn start(
        manager: ExtractionManager,
        observer: SharedObserver,
        quiet_period: Duration,
    ) -> Result<Self> {
        let store = manager.store().clone();
        let subscription = Subscription::watch(&store)?;
        let (queue, receiver) = DispatchQueue::new();

        // Anything queued by an earlier session but never finished goes first.
        let records = {
            let store = store.clone();
            spawn_blocking_propagating_panics(move || store.load_or_empty()).await
        };
        let restored = queue.restore(&records);
        if !restored.is_empty() {
            observer.report(&format!(
                "Resuming {} previously queued rectangles",
                restored.len()
            ));
        }
        observer.report(&format!("Watching {} for changes", store.path().display()));

        let cancel = CancellationToken::new();
        let watch_loop = WatchLoop {
            store,
            queue: queue.clone(),
            observer: observer.clone(),
            quiet_period,
        };
        let watcher = JoinWorker::from_handle(tokio::spawn(
            watch_loop.run(subscription, cancel.clone()),
        ));
        let consumer = JoinWorker::from_handle(tokio::spawn(consume(
            manager,
            queue,
            receiver,
            observer,
            cancel.clone(),
        )));
        Ok(Self {
            cancel,
            watcher,
            consumer,
        })
    }

    /// Stop watching and wait for both tasks to exit. A record that is being
    /// extracted right now is finished first. Nothing is reconciled after
    /// this returns.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.watcher.and(self.consumer).join().await
    }
}

/// Drain the work queue, one record at a time, in the order queued.
#[instrument(level = "debug", name = "consume", skip_all)]
async fn consume(
    manager: ExtractionManager,
    queue: DispatchQueue,
    mut receiver: mpsc::UnboundedReceiver<Record>,
    observer: SharedObserver,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            record = receiver.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };
        process_one(&manager, &queue, &record, observer.as_ref()).await;
    }
    debug!("Consumer exiting");
    Ok(())
}

/// Extract one record, reporting what happened. Never fails: every problem
/// is reported to `observer` and we move on.
async fn process_one(
    manager: &ExtractionManager,
    queue: &DispatchQueue,
    record: &Record,
    observer: &dyn StatusObserver,
) {
    let id = record.id;
    observer.report(&format!("Processing rectangle ID {id}"));
    match manager.process_rectangle(record).await {
        Ok(ProcessOutcome::Completed { strategy }) => {
            observer.report(&format!(
                "Extracted text for rectangle ID {id} using {strategy}"
            ));
        }
        Ok(ProcessOutcome::Unhandled { error }) => {
            // Failed records may be requeued later.
            queue.release(id);
            observer.report(&format!(
                "No strategy could extract rectangle ID {id}: {error}"
            ));
        }
        Ok(ProcessOutcome::Deleted) => {
            observer.report(&format!(
                "Rectangle ID {id} was deleted during processing"
            ));
        }
        Err(err) => {
            error!(id, "Could not process rectangle: {:?}", err);
            observer.report(&format!("Error processing rectangle ID {id}: {err:#}"));
        }
    }
}
