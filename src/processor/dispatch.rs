//! The processor's work queue, plus the set of IDs it has already handed out.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::mpsc;

use crate::{
    prelude::*,
    store::{Record, RecordState},
};

/// Sending side of the work queue. Cloning shares the same dispatched set.
///
/// The dispatched set is a per-session cache. It only exists so that a record
/// is never queued twice while its first attempt is still pending.
#[derive(Clone)]
pub struct DispatchQueue {
    dispatched: Arc<Mutex<HashSet<u64>>>,
    sender: mpsc::UnboundedSender<Record>,
}

impl DispatchQueue {
    /// Create an empty queue and its receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Record>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            dispatched: Arc::new(Mutex::new(HashSet::new())),
            sender,
        };
        (queue, receiver)
    }

    fn dispatched(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.dispatched.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `record` unless its ID was already dispatched this session.
    /// Returns `true` if it was queued.
    pub fn dispatch(&self, record: Record) -> bool {
        let mut dispatched = self.dispatched();
        let id = record.id;
        if !dispatched.insert(id) {
            trace!(id, "Already dispatched");
            return false;
        }
        if self.sender.send(record).is_err() {
            warn!(id, "Work queue is closed, not dispatching");
            dispatched.remove(&id);
            return false;
        }
        true
    }

    /// Note that `id` needs no processing this session.
    pub fn mark_done(&self, id: u64) {
        self.dispatched().insert(id);
    }

    /// Allow `id` to be dispatched again, after it has reached a state that
    /// can be requeued.
    pub fn release(&self, id: u64) {
        self.dispatched().remove(&id);
    }

    #[cfg(test)]
    pub fn contains(&self, id: u64) -> bool {
        self.dispatched().contains(&id)
    }

    /// Seed the dispatched set from the store at startup.
    ///
    /// Records handed to the queue by an earlier session but never finished
    /// are queued again. Completed records are marked done. Failed records
    /// are left alone until someone requeues them.
    pub fn restore(&self, records: &[Record]) -> Vec<u64> {
        let mut redispatched = vec![];
        for record in records {
            match record.state() {
                RecordState::Queued => {
                    if self.dispatch(record.clone()) {
                        redispatched.push(record.id);
                    }
                }
                RecordState::Completed => self.mark_done(record.id),
                RecordState::Unseen | RecordState::Failed => {}
            }
        }
        redispatched
    }
}
