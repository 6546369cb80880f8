//! Watching the store file for outside edits.
//!
//! We subscribe to change notifications for the store's directory, keep only
//! the ones naming the store file, and wait for a quiet period before running
//! a reconciliation pass. Our own saves also trigger notifications, but a
//! second pass finds nothing to do and writes nothing, so this settles.

use std::{ffi::OsString, sync::Arc, time::Duration};

use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _,
    event::{AccessKind, AccessMode},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    prelude::*,
    status::SharedObserver,
    store::{AnnotationStore, Mutation, Record, StoreError},
};

use super::{debounce::Debouncer, dispatch::DispatchQueue};

/// A live filesystem subscription. Dropping it unsubscribes.
pub struct Subscription {
    _watcher: Option<RecommendedWatcher>,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl Subscription {
    /// Start watching the directory containing `store`.
    pub fn watch(store: &AnnotationStore) -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // The receiver only goes away once we've stopped.
            let _ = tx.send(event);
        })
        .context("cannot create filesystem watcher")?;
        watcher
            .watch(store.dir(), RecursiveMode::NonRecursive)
            .with_context(|| format!("cannot watch {:?}", store.dir().display()))?;
        Ok(Self {
            _watcher: Some(watcher),
            events,
        })
    }

    /// A subscription fed by hand, for tests.
    #[cfg(test)]
    pub fn from_channel(events: mpsc::UnboundedReceiver<notify::Result<Event>>) -> Self {
        Self {
            _watcher: None,
            events,
        }
    }
}

/// Does this event mean the store file may have new contents?
fn is_store_change(event: &Event, file_name: &OsString) -> bool {
    let writes = match event.kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    };
    writes
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

/// Mark every unseen record as handed off and queue it.
///
/// The marking, the save and the queueing all happen while we hold the
/// store's lock. Returns the records that were actually queued.
pub fn reconcile(
    store: &AnnotationStore,
    queue: &DispatchQueue,
) -> Result<Vec<Record>, StoreError> {
    let guard = store.lock()?;
    let fresh = guard.update(|records| {
        let mut fresh = vec![];
        for record in records.iter_mut().filter(|r| !r.event_complete) {
            record.event_complete = true;
            fresh.push(record.clone());
        }
        if fresh.is_empty() {
            Ok(Mutation::Unchanged(fresh))
        } else {
            Ok(Mutation::Changed(fresh))
        }
    })?;
    let queued = fresh
        .into_iter()
        .filter(|record| queue.dispatch(record.clone()))
        .collect();
    drop(guard);
    Ok(queued)
}

/// The watcher's event loop.
pub struct WatchLoop {
    pub store: Arc<AnnotationStore>,
    pub queue: DispatchQueue,
    pub observer: SharedObserver,
    pub quiet_period: Duration,
}

impl WatchLoop {
    /// Run until `cancel` fires. Performs one reconciliation pass up front,
    /// to catch anything written while nobody was watching.
    #[instrument(level = "debug", name = "watch", skip_all)]
    pub async fn run(
        self,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) -> Result<()> {
        let file_name = self
            .store
            .path()
            .file_name()
            .map(|n| n.to_owned())
            .ok_or_else(|| anyhow!("store path has no file name"))?;
        let mut debouncer = Debouncer::new(self.quiet_period);

        self.reconcile_and_report().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = subscription.events.recv() => match event {
                    Some(Ok(event)) => {
                        if is_store_change(&event, &file_name) {
                            trace!(kind = ?event.kind, "Store changed");
                            debouncer.reset();
                        }
                    }
                    Some(Err(err)) => warn!("Filesystem watcher error: {}", err),
                    None => {
                        warn!("Filesystem watcher went away");
                        break;
                    }
                },
                _ = debouncer.wait() => self.reconcile_and_report().await,
            }
        }
        debouncer.cancel();
        drop(subscription);
        self.observer.report(&format!(
            "Stopped watching {}",
            self.store.path().display()
        ));
        Ok(())
    }

    async fn reconcile_and_report(&self) {
        let store = self.store.clone();
        let queue = self.queue.clone();
        let result =
            spawn_blocking_propagating_panics(move || reconcile(&store, &queue)).await;
        match result {
            Ok(queued) => {
                for record in queued {
                    self.observer.report(&format!(
                        "Detected new rectangle ID {} on page {}",
                        record.id, record.page
                    ));
                }
            }
            Err(err) => {
                // We'll try again on the next change.
                error!("Could not reconcile annotation store: {:?}", err);
                self.observer
                    .report(&format!("Could not read annotation store: {err}"));
            }
        }
    }
}
