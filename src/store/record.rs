//! Annotation records, as they appear in the store file.

use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde_json::{Map, Value};

use crate::{extraction::ExtractionResult, prelude::*};

use super::StoreError;

/// The on-disk layout of a store file.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct StoreFile {
    /// The document these annotations belong to.
    #[serde(rename = "pdf_path", alias = "sourcePath", default)]
    pub source_path: PathBuf,

    /// The highest ID ever handed out, so that deleting the newest record
    /// doesn't let its ID be reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_assigned_id: Option<u64>,

    /// Our annotation records, in insertion order.
    #[serde(default)]
    pub rectangles: Vec<Record>,

    /// Any top-level keys written by other tools.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoreFile {
    /// The ID to assign to the next appended record.
    pub fn next_id(&self) -> Result<u64, StoreError> {
        let max_existing = self.rectangles.iter().map(|r| r.id).max().unwrap_or(0);
        max_existing
            .max(self.last_assigned_id.unwrap_or(0))
            .checked_add(1)
            .ok_or(StoreError::IdsExhausted)
    }
}

/// A rectangle in PDF points, with the origin at the top left of the page.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    /// Build a rectangle from two arbitrary corners, the way a drag gesture
    /// reports them.
    pub fn from_corners(a: (f64, f64), b: (f64, f64)) -> Self {
        Self {
            x1: a.0.min(b.0),
            y1: a.1.min(b.1),
            x2: a.0.max(b.0),
            y2: a.1.max(b.1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Check that this rectangle has a positive area.
    pub fn validate(&self) -> Result<(), StoreError> {
        // Written this way so that NaN coordinates are rejected too.
        if self.x1 < self.x2 && self.y1 < self.y2 {
            Ok(())
        } else {
            Err(StoreError::InvalidRect { rect: *self })
        }
    }
}

impl From<[f64; 4]> for Rect {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<Rect> for [f64; 4] {
    fn from(rect: Rect) -> Self {
        [rect.x1, rect.y1, rect.x2, rect.y2]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

impl FromStr for Rect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let coords = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse rectangle: {:?}", s))?;
        match coords.as_slice() {
            &[x1, y1, x2, y2] => Ok(Self::from_corners((x1, y1), (x2, y2))),
            _ => Err(anyhow!(
                "Expected 4 comma-separated coordinates, found {}: {:?}",
                coords.len(),
                s
            )),
        }
    }
}

/// Width and height of a record's rectangle. Always recomputed from the
/// rectangle when saving.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl From<&Rect> for Dimensions {
    fn from(rect: &Rect) -> Self {
        Self {
            width: rect.width(),
            height: rect.height(),
        }
    }
}

/// Terminal extraction states.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// A strategy produced text for this record.
    Completed,

    /// Every strategy declined or failed. Use `requeue` to try again.
    Failed,
}

/// Information about how text was extracted.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ExtractionMetadata {
    /// The name of the strategy that produced the text.
    #[serde(default)]
    pub strategy: String,

    /// How confident the strategy is, between 0.0 and 1.0.
    #[serde(default)]
    pub confidence: f64,
}

/// Where a record is in its processing lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    /// Not yet noticed by the watcher.
    Unseen,
    /// Handed to the processing queue, but no result yet.
    Queued,
    Completed,
    Failed,
}

/// One marked region of a page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Record {
    /// Unique within a project. Assigned by the store.
    pub id: u64,

    /// Zero-based page index.
    pub page: usize,

    /// The marked region, as `[x1, y1, x2, y2]`.
    #[schemars(with = "[f64; 4]")]
    pub rect: Rect,

    /// Derived from `rect`. Never trusted on read.
    #[serde(default)]
    pub dimensions: Dimensions,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Full-resolution capture of the region, written by the viewer.
    #[serde(default)]
    pub image_path: PathBuf,

    /// Thumbnail of the capture, written by the viewer.
    #[serde(default)]
    pub thumbnail_path: PathBuf,

    /// When this record was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,

    /// Set once the watcher has handed this record to the processing queue.
    #[serde(rename = "eventComplete", default)]
    pub event_complete: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_status: Option<ExtractionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,

    /// Where the text came from, for example `pdf_text` or `ocr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_metadata: Option<ExtractionMetadata>,

    /// Why extraction failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,

    /// Any other keys written by other tools.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// Create a fresh, unseen record.
    pub fn new(id: u64, new: NewRecord, timestamp: NaiveDateTime) -> Self {
        Self {
            id,
            page: new.page,
            dimensions: Dimensions::from(&new.rect),
            rect: new.rect,
            description: new.description,
            keywords: new.keywords,
            image_path: new.image_path,
            thumbnail_path: new.thumbnail_path,
            timestamp: Some(timestamp),
            event_complete: false,
            extraction_status: None,
            extracted_text: None,
            extraction_source: None,
            extraction_metadata: None,
            extraction_error: None,
            extra: Map::new(),
        }
    }

    /// Recompute our derived fields.
    pub fn refresh_dimensions(&mut self) {
        self.dimensions = Dimensions::from(&self.rect);
    }

    pub fn state(&self) -> RecordState {
        match (self.event_complete, self.extraction_status) {
            (false, _) => RecordState::Unseen,
            (true, None) => RecordState::Queued,
            (true, Some(ExtractionStatus::Completed)) => RecordState::Completed,
            (true, Some(ExtractionStatus::Failed)) => RecordState::Failed,
        }
    }

    /// Record a successful extraction.
    pub fn complete(&mut self, result: &ExtractionResult) {
        self.event_complete = true;
        self.extraction_status = Some(ExtractionStatus::Completed);
        self.extracted_text = Some(result.text.clone());
        self.extraction_source = Some(result.source.clone());
        self.extraction_metadata = Some(result.metadata.clone());
        self.extraction_error = None;
    }

    /// Record that no strategy could extract text.
    pub fn fail(&mut self, error: String) {
        self.event_complete = true;
        self.extraction_status = Some(ExtractionStatus::Failed);
        self.extracted_text = None;
        self.extraction_source = None;
        self.extraction_metadata = None;
        self.extraction_error = Some(error);
    }

    /// Return this record to the unseen state, so the watcher picks it up
    /// again.
    pub fn rearm(&mut self) {
        self.event_complete = false;
        self.extraction_status = None;
        self.extracted_text = None;
        self.extraction_source = None;
        self.extraction_metadata = None;
        self.extraction_error = None;
    }
}

/// User-supplied fields for a new record.
#[derive(Clone, Debug)]
pub struct NewRecord {
    pub page: usize,
    pub rect: Rect,
    pub description: String,
    pub keywords: Vec<String>,
    pub image_path: PathBuf,
    pub thumbnail_path: PathBuf,
}

impl NewRecord {
    /// A new record with no metadata or capture paths.
    pub fn new(page: usize, rect: Rect) -> Self {
        Self {
            page,
            rect,
            description: String::new(),
            keywords: vec![],
            image_path: PathBuf::new(),
            thumbnail_path: PathBuf::new(),
        }
    }
}
