//! Projects: one directory per annotated document.
//!
//! ```text
//! <projects_dir>/<pdf stem>_<YYYYmmdd_HHMMSS>/
//!     rectangle_map.json
//!     pdf_content.txt
//!     pdf_content.json
//!     screenshots/
//!         thumbnails/
//! ```

use std::sync::Arc;

use chrono::Local;
use tokio::fs;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    document::{PageLayout, PopplerDocument},
    prelude::*,
    store::{AnnotationStore, STORE_FILE_NAME},
};

/// Region captures written by the viewer.
pub const SCREENSHOTS_DIR: &str = "screenshots";

/// Thumbnails of region captures, inside [`SCREENSHOTS_DIR`].
pub const THUMBNAILS_DIR: &str = "thumbnails";

/// Plain-text dump of the whole document.
pub const FULL_TEXT_FILE_NAME: &str = "pdf_content.txt";

/// Positioned text blocks for the whole document.
pub const LAYOUT_FILE_NAME: &str = "pdf_content.json";

/// The contents of [`LAYOUT_FILE_NAME`].
#[derive(Debug, Serialize)]
struct LayoutFile<'a> {
    pdf_path: &'a Path,
    page_count: usize,
    pages: &'a [PageLayout],
}

/// An open project.
pub struct Project {
    dir: PathBuf,
    store: Arc<AnnotationStore>,
}

impl Project {
    /// Create a new project for `pdf_path` under `projects_dir`, with an
    /// empty store.
    #[instrument(level = "debug", skip_all, fields(pdf = %pdf_path.display()))]
    pub async fn init(projects_dir: &Path, pdf_path: &Path) -> Result<Self> {
        let pdf_path = fs::canonicalize(pdf_path)
            .await
            .with_context(|| format!("cannot find {:?}", pdf_path.display()))?;
        let stem = pdf_path
            .file_stem()
            .ok_or_else(|| anyhow!("{:?} has no file name", pdf_path.display()))?
            .to_string_lossy();
        let name = format!("{}_{}", stem, Local::now().format("%Y%m%d_%H%M%S"));

        fs::create_dir_all(projects_dir)
            .await
            .with_context(|| format!("cannot create {:?}", projects_dir.display()))?;
        let dir = projects_dir.join(&name);
        fs::create_dir(&dir)
            .await
            .with_context(|| format!("cannot create project {:?}", dir.display()))?;
        let thumbnails = dir.join(SCREENSHOTS_DIR).join(THUMBNAILS_DIR);
        fs::create_dir_all(&thumbnails)
            .await
            .with_context(|| format!("cannot create {:?}", thumbnails.display()))?;

        let store = Arc::new(AnnotationStore::new(dir.join(STORE_FILE_NAME), pdf_path));
        {
            let store = store.clone();
            spawn_blocking_propagating_panics(move || store.save(vec![])).await?;
        }
        info!(project = %dir.display(), "Created project");
        Ok(Self { dir, store })
    }

    /// Open an existing project directory.
    pub async fn open(dir: &Path) -> Result<Self> {
        let store_path = dir.join(STORE_FILE_NAME);
        let store =
            spawn_blocking_propagating_panics(move || AnnotationStore::open_existing(store_path))
                .await
                .with_context(|| format!("{:?} is not a project", dir.display()))?;
        Ok(Self {
            dir: dir.to_owned(),
            store: Arc::new(store),
        })
    }

    /// The project's name, which is also its directory name.
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_owned())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pdf_path(&self) -> &Path {
        self.store.source_path()
    }

    pub fn store(&self) -> &Arc<AnnotationStore> {
        &self.store
    }

    /// Open our document.
    pub async fn open_document(&self, password: Option<&str>) -> Result<PopplerDocument> {
        PopplerDocument::open(self.pdf_path(), password).await
    }

    /// Write the text of every page of `document` to [`FULL_TEXT_FILE_NAME`],
    /// and its text blocks to [`LAYOUT_FILE_NAME`].
    #[instrument(level = "debug", skip_all)]
    pub async fn extract_full_text(&self, document: &PopplerDocument) -> Result<PathBuf> {
        let raw = document.extract_full_text().await?;
        let path = self.dir.join(FULL_TEXT_FILE_NAME);
        fs::write(&path, format_full_text(&raw))
            .await
            .with_context(|| format!("cannot write {:?}", path.display()))?;

        let pages = document.extract_layout().await?;
        self.write_layout(&pages).await?;
        Ok(path)
    }

    async fn write_layout(&self, pages: &[PageLayout]) -> Result<PathBuf> {
        let layout = LayoutFile {
            pdf_path: self.pdf_path(),
            page_count: pages.len(),
            pages,
        };
        let path = self.dir.join(LAYOUT_FILE_NAME);
        let json = serde_json::to_string_pretty(&layout)?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("cannot write {:?}", path.display()))?;
        Ok(path)
    }

    /// Copy the document, the store, thumbnails and region captures into
    /// `<dest>/<name>/`. Returns the new directory.
    #[instrument(level = "debug", skip_all, fields(dest = %dest.display()))]
    pub async fn export(&self, dest: &Path) -> Result<PathBuf> {
        let export_dir = dest.join(self.name());
        let screenshots = export_dir.join(SCREENSHOTS_DIR);
        fs::create_dir_all(&screenshots)
            .await
            .with_context(|| format!("cannot create {:?}", screenshots.display()))?;

        copy_into(self.pdf_path(), &export_dir).await?;
        copy_into(self.store.path(), &export_dir).await?;

        let thumbnails = self.dir.join(SCREENSHOTS_DIR).join(THUMBNAILS_DIR);
        if fs::try_exists(&thumbnails).await.unwrap_or(false) {
            copy_dir(&thumbnails, &screenshots.join(THUMBNAILS_DIR)).await?;
        }

        let store = self.store.clone();
        let records = spawn_blocking_propagating_panics(move || store.load()).await?;
        for record in records {
            if record.image_path.as_os_str().is_empty() {
                continue;
            }
            let image = self.dir.join(&record.image_path);
            if fs::try_exists(&image).await.unwrap_or(false) {
                copy_into(&image, &screenshots).await?;
            } else {
                warn!(id = record.id, image = %image.display(), "Capture is missing, not exporting");
            }
        }
        info!(export = %export_dir.display(), "Exported project");
        Ok(export_dir)
    }
}

/// Turn `pdftotext` output into our page-delimited text format.
fn format_full_text(raw: &str) -> String {
    // Every page ends with a form feed, including the last.
    let raw = raw.strip_suffix('\x0C').unwrap_or(raw);
    let mut out = String::new();
    for (idx, page) in raw.split('\x0C').enumerate() {
        out.push_str(&format!("=== Page {} ===\n", idx + 1));
        out.push_str(page.trim_end());
        out.push_str("\n\n");
    }
    out
}

/// Copy a file into `dir`, keeping its name.
async fn copy_into(file: &Path, dir: &Path) -> Result<()> {
    let name = file
        .file_name()
        .ok_or_else(|| anyhow!("{:?} has no file name", file.display()))?;
    fs::copy(file, dir.join(name))
        .await
        .with_context(|| format!("cannot copy {:?} to {:?}", file.display(), dir.display()))?;
    Ok(())
}

/// Recursively copy a directory.
async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let mut pending = vec![(from.to_owned(), to.to_owned())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to)
            .await
            .with_context(|| format!("cannot create {:?}", to.display()))?;
        let mut entries = fs::read_dir(&from)
            .await
            .with_context(|| format!("cannot read {:?}", from.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await.with_context(|| {
                    format!("cannot copy {:?}", entry.path().display())
                })?;
            }
        }
    }
    Ok(())
}
