//! Extraction strategy interface.
//!
//! A strategy looks at a record and decides whether it can produce text for
//! it. The [`ExtractionManager`](super::ExtractionManager) asks each
//! registered strategy in order, so cheap and precise strategies should be
//! registered before expensive or fuzzy ones.

use clap::ValueEnum;

use crate::{document::Document, prelude::*, store::Record};

use super::ExtractionResult;

pub mod pdf_text;
pub mod tesseract;

pub use self::{pdf_text::PdfTextStrategy, tesseract::TesseractStrategy};

/// Interface to a text extraction strategy.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync + 'static {
    /// A short, stable name, recorded in each result's metadata.
    fn name(&self) -> &str;

    /// Can this strategy produce text for `record`?
    async fn can_handle(&self, record: &Record, document: &dyn Document) -> Result<bool>;

    /// Produce text for `record`. Only called after `can_handle` returned
    /// `true`. May still fail, in which case the next strategy is tried.
    async fn extract_text(
        &self,
        record: &Record,
        document: &dyn Document,
    ) -> Result<ExtractionResult>;
}

/// Built-in strategies, selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    /// Use the PDF's own text layer.
    PdfText,
    /// OCR the captured image with `tesseract`.
    Tesseract,
}

impl StrategyKind {
    /// Build this strategy. Relative capture paths are resolved against
    /// `project_dir`.
    pub fn build(self, project_dir: &Path) -> Box<dyn ExtractionStrategy> {
        match self {
            StrategyKind::PdfText => Box::new(PdfTextStrategy::new()),
            StrategyKind::Tesseract => Box::new(TesseractStrategy::new(project_dir)),
        }
    }
}
