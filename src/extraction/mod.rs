//! Turning a record's region into text.
//!
//! The [`ExtractionManager`] owns the document handle and an ordered list of
//! [`ExtractionStrategy`]s. For each record it tries every strategy in
//! registration order, and the first one that both accepts the record and
//! succeeds wins. A strategy that declines or fails just passes the record on
//! to the next one. Whatever happens, the outcome is written back into the
//! store.

use std::sync::Arc;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    document::Document,
    prelude::*,
    status::StatusObserver,
    store::{AnnotationStore, ExtractionMetadata, Mutation, Record},
};

pub mod strategies;

pub use self::strategies::{ExtractionStrategy, StrategyKind};

/// Text produced by a strategy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractionResult {
    /// The extracted text.
    pub text: String,

    /// Where the text came from, for example `pdf_text`.
    pub source: String,

    /// Which strategy produced it, and how sure it is.
    pub metadata: ExtractionMetadata,
}

/// What happened when we processed a record.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessOutcome {
    /// A strategy produced text, and it has been saved.
    Completed { strategy: String },

    /// Every strategy declined or failed. The record has been marked failed.
    Unhandled { error: String },

    /// The record was deleted from the store before we could save anything.
    Deleted,
}

/// Counts from [`ExtractionManager::process_pending`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Runs strategies against records and persists the results.
pub struct ExtractionManager {
    /// The document all our records refer to. Read-only, and never shared
    /// with another manager.
    document: Box<dyn Document>,

    /// Where results are saved.
    store: Arc<AnnotationStore>,

    /// Our strategies, in the order they should be tried.
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractionManager {
    /// Create a manager with no strategies.
    pub fn new(document: Box<dyn Document>, store: Arc<AnnotationStore>) -> Self {
        Self {
            document,
            store,
            strategies: vec![],
        }
    }

    /// Add a strategy to the end of the list.
    pub fn register_strategy(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        debug!(strategy = strategy.name(), "Registered strategy");
        self.strategies.push(strategy);
    }

    /// Builder-style [`Self::register_strategy`].
    pub fn with_strategy(mut self, strategy: Box<dyn ExtractionStrategy>) -> Self {
        self.register_strategy(strategy);
        self
    }

    /// The names of our strategies, in order.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn store(&self) -> &Arc<AnnotationStore> {
        &self.store
    }

    /// Extract text for `record` and save the outcome.
    ///
    /// Strategy failures never escape from here. An `Err` means we couldn't
    /// save the outcome, and the record is left as it was.
    #[instrument(level = "debug", skip_all, fields(id = record.id, page = record.page))]
    pub async fn process_rectangle(&self, record: &Record) -> Result<ProcessOutcome> {
        let document = self.document.as_ref();
        let mut failures = vec![];
        for strategy in &self.strategies {
            let name = strategy.name();
            match strategy.can_handle(record, document).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(strategy = name, "Strategy declined");
                    failures.push(format!("{name}: declined"));
                    continue;
                }
                Err(err) => {
                    warn!(strategy = name, "Strategy failed to check record: {:?}", err);
                    failures.push(format!("{name}: {err:#}"));
                    continue;
                }
            }
            match strategy.extract_text(record, document).await {
                Ok(result) => {
                    debug!(strategy = name, text = %result.text, "Extracted text");
                    let saved = self
                        .save_outcome(record, move |r| r.complete(&result))
                        .await?;
                    return Ok(if saved {
                        ProcessOutcome::Completed {
                            strategy: name.to_owned(),
                        }
                    } else {
                        ProcessOutcome::Deleted
                    });
                }
                Err(err) => {
                    warn!(strategy = name, "Strategy failed: {:?}", err);
                    failures.push(format!("{name}: {err:#}"));
                }
            }
        }

        let error = if failures.is_empty() {
            "no extraction strategies registered".to_owned()
        } else {
            failures.join("; ")
        };
        let saved = {
            let error = error.clone();
            self.save_outcome(record, move |r| r.fail(error)).await?
        };
        Ok(if saved {
            ProcessOutcome::Unhandled { error }
        } else {
            ProcessOutcome::Deleted
        })
    }

    /// Process every record that has no extraction status yet, in store
    /// order.
    ///
    /// This reads the store strictly: a corrupt store is an error.
    #[instrument(level = "debug", skip_all)]
    pub async fn process_pending(
        &self,
        observer: &dyn StatusObserver,
    ) -> Result<PendingSummary> {
        let store = self.store.clone();
        let pending = spawn_blocking_propagating_panics(move || store.load())
            .await?
            .into_iter()
            .filter(|r| r.extraction_status.is_none())
            .collect::<Vec<_>>();
        observer.report(&format!("{} rectangles pending", pending.len()));

        let mut summary = PendingSummary::default();
        for record in pending {
            observer.report(&format!("Processing rectangle ID {}", record.id));
            match self.process_rectangle(&record).await? {
                ProcessOutcome::Completed { strategy } => {
                    summary.completed += 1;
                    observer.report(&format!(
                        "Extracted text for rectangle ID {} using {}",
                        record.id, strategy
                    ));
                }
                ProcessOutcome::Unhandled { error } => {
                    summary.failed += 1;
                    observer.report(&format!(
                        "No strategy could extract rectangle ID {}: {}",
                        record.id, error
                    ));
                }
                ProcessOutcome::Deleted => {
                    observer.report(&format!(
                        "Rectangle ID {} was deleted during processing",
                        record.id
                    ));
                }
            }
        }
        Ok(summary)
    }

    /// Apply `update` to the stored copy of `record`. Returns `false` if the
    /// record no longer exists.
    async fn save_outcome<F>(&self, record: &Record, update: F) -> Result<bool>
    where
        F: FnOnce(&mut Record) + Send + 'static,
    {
        let store = self.store.clone();
        let (id, page) = (record.id, record.page);
        let saved = spawn_blocking_propagating_panics(move || {
            store.update(|records| {
                match records.iter_mut().find(|r| r.id == id && r.page == page) {
                    Some(stored) => {
                        update(stored);
                        Ok(Mutation::Changed(true))
                    }
                    None => Ok(Mutation::Unchanged(false)),
                }
            })
        })
        .await
        .with_context(|| format!("failed to save extraction result for rectangle {id}"))?;
        if !saved {
            warn!(id, page, "Record vanished before its result could be saved");
        }
        Ok(saved)
    }
}
