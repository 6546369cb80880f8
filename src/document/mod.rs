//! Read-only access to document pages.
//!
//! We never render pixels here. All we need from a document is its page count
//! and the text inside a rectangle on a page.

use crate::{prelude::*, store::Rect};

pub mod layout;
pub mod poppler;

pub use self::{layout::PageLayout, poppler::PopplerDocument};

/// A document we can pull text out of.
#[async_trait]
pub trait Document: Send + Sync + 'static {
    /// How many pages does this document have?
    fn page_count(&self) -> usize;

    /// Load a single page. Fails if `page_idx` is out of range.
    async fn load_page(&self, page_idx: usize) -> Result<Box<dyn Page>>;
}

/// A single page of a [`Document`].
#[async_trait]
pub trait Page: Send + Sync {
    /// Extract plain text from the part of this page inside `clip`.
    async fn extract_text(&self, clip: &Rect) -> Result<String>;
}

/// Check a page index against a page count.
pub fn check_page_index(page_idx: usize, page_count: usize) -> Result<()> {
    if page_idx < page_count {
        Ok(())
    } else {
        Err(anyhow!(
            "page {} is out of range for a document with {} pages",
            page_idx,
            page_count
        ))
    }
}
