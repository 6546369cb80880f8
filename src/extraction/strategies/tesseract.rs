//! Tesseract OCR strategy.

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    cpu_limit::with_cpu_semaphore,
    document::Document,
    extraction::ExtractionResult,
    prelude::*,
    store::{ExtractionMetadata, Record},
};

use super::ExtractionStrategy;

/// OCRs the region capture written by the viewer, using the `tesseract` CLI
/// tool.
///
/// This is the fallback for scanned pages with no text layer. It never looks
/// at the PDF itself.
pub struct TesseractStrategy {
    /// Directory that relative capture paths are relative to.
    base_dir: PathBuf,
}

impl TesseractStrategy {
    pub const NAME: &'static str = "tesseract";
    pub const SOURCE: &'static str = "ocr";

    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_owned(),
        }
    }

    /// Where is this record's capture, if it has one?
    fn image_path(&self, record: &Record) -> Option<PathBuf> {
        if record.image_path.as_os_str().is_empty() {
            None
        } else {
            Some(self.base_dir.join(&record.image_path))
        }
    }
}

#[async_trait]
impl ExtractionStrategy for TesseractStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn can_handle(&self, record: &Record, _document: &dyn Document) -> Result<bool> {
        match self.image_path(record) {
            Some(path) => tokio::fs::try_exists(&path)
                .await
                .with_context(|| format!("cannot check for {:?}", path.display())),
            None => Ok(false),
        }
    }

    #[instrument(level = "debug", skip_all, fields(id = record.id, page = record.page))]
    async fn extract_text(
        &self,
        record: &Record,
        _document: &dyn Document,
    ) -> Result<ExtractionResult> {
        let path = self
            .image_path(record)
            .ok_or_else(|| anyhow!("record {} has no captured image", record.id))?;

        let output = with_cpu_semaphore(|| async {
            Command::new("tesseract")
                .arg(&path)
                .arg("stdout")
                .output()
                .await
                .context("cannot run tesseract")
        })
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        let text = String::from_utf8(output.stdout)
            .context("tesseract output was not valid UTF-8")?;
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("tesseract found no text in {:?}", path.display()));
        }
        Ok(ExtractionResult {
            text: text.to_owned(),
            source: Self::SOURCE.to_owned(),
            metadata: ExtractionMetadata {
                strategy: Self::NAME.to_owned(),
                confidence: 1.0,
            },
        })
    }
}
