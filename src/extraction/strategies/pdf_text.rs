//! A strategy that reads the PDF's own text layer.

use crate::{
    document::Document,
    extraction::ExtractionResult,
    prelude::*,
    store::{ExtractionMetadata, Record},
};

use super::ExtractionStrategy;

/// Reads the text layer clipped to the record's rectangle.
///
/// This will miss any "non-searchable" text in a PDF, but it's exact when it
/// works, so it always reports full confidence.
#[derive(Default)]
#[non_exhaustive]
pub struct PdfTextStrategy {}

impl PdfTextStrategy {
    /// The name recorded in extraction metadata.
    pub const NAME: &'static str = "simple_text";

    /// The extraction source recorded on completed records.
    pub const SOURCE: &'static str = "pdf_text";

    pub fn new() -> Self {
        Self {}
    }

    /// Get the text inside the record's rectangle.
    async fn clipped_text(&self, record: &Record, document: &dyn Document) -> Result<String> {
        let page = document.load_page(record.page).await?;
        page.extract_text(&record.rect).await
    }
}

#[async_trait]
impl ExtractionStrategy for PdfTextStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(level = "debug", skip_all, fields(id = record.id, page = record.page))]
    async fn can_handle(&self, record: &Record, document: &dyn Document) -> Result<bool> {
        let text = self.clipped_text(record, document).await?;
        debug!(%text, "Found text in rectangle");
        Ok(!text.trim().is_empty())
    }

    #[instrument(level = "debug", skip_all, fields(id = record.id, page = record.page))]
    async fn extract_text(
        &self,
        record: &Record,
        document: &dyn Document,
    ) -> Result<ExtractionResult> {
        let text = self.clipped_text(record, document).await?;
        Ok(ExtractionResult {
            text: text.trim().to_owned(),
            source: Self::SOURCE.to_owned(),
            metadata: ExtractionMetadata {
                strategy: Self::NAME.to_owned(),
                confidence: 1.0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::{
        document::testing::FakeDocument,
        store::{NewRecord, Rect},
    };

    fn record(page: usize, rect: [f64; 4]) -> Record {
        Record::new(
            1,
            NewRecord::new(page, Rect::from(rect)),
            NaiveDateTime::default(),
        )
    }

    #[tokio::test]
    async fn accepts_regions_with_text() -> Result<()> {
        let doc = FakeDocument::with_pages(2).with_text(
            1,
            Rect::from([10.0, 10.0, 40.0, 20.0]),
            "  Invoice #42\n",
        );
        let strategy = PdfTextStrategy::new();

        let hit = record(1, [0.0, 0.0, 50.0, 50.0]);
        assert!(strategy.can_handle(&hit, &doc).await?);
        let result = strategy.extract_text(&hit, &doc).await?;
        assert_eq!(result.text, "Invoice #42");
        assert_eq!(result.source, "pdf_text");
        assert_eq!(result.metadata.strategy, "simple_text");
        assert_eq!(result.metadata.confidence, 1.0);

        let miss = record(0, [0.0, 0.0, 50.0, 50.0]);
        assert!(!strategy.can_handle(&miss, &doc).await?);
        Ok(())
    }

    #[tokio::test]
    async fn whitespace_only_text_is_declined() -> Result<()> {
        let doc = FakeDocument::with_pages(1).with_text(
            0,
            Rect::from([1.0, 1.0, 2.0, 2.0]),
            " \n\t ",
        );
        let strategy = PdfTextStrategy::new();
        assert!(!strategy.can_handle(&record(0, [0.0, 0.0, 5.0, 5.0]), &doc).await?);
        Ok(())
    }

    #[tokio::test]
    async fn out_of_range_pages_are_errors() {
        let doc = FakeDocument::with_pages(1);
        let strategy = PdfTextStrategy::new();
        assert!(
            strategy
                .can_handle(&record(3, [0.0, 0.0, 5.0, 5.0]), &doc)
                .await
                .is_err()
        );
    }
}
