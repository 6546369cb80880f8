//! Documents backed by the `pdfinfo` and `pdftotext` CLI tools from
//! `poppler-utils`.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
    store::Rect,
};

use super::{
    Document, Page, check_page_index,
    layout::{PageLayout, parse_bbox_layout},
};

/// Resolution passed to `pdftotext`. At 72 DPI, crop pixels are PDF points.
const POINTS_DPI: &str = "72";

/// Poppler prints "error" for lots of things.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// ...but these are just noise for damaged cross-reference tables.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A PDF on disk. We shell out to poppler for every page we touch, so there's
/// no open file handle to share or to close.
#[derive(Debug)]
pub struct PopplerDocument {
    path: PathBuf,
    password: Option<String>,
    page_count: usize,
}

impl PopplerDocument {
    /// Open a PDF, reading its page count.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path, password: Option<&str>) -> Result<Self> {
        let page_count = get_pdf_page_count(path, password).await?;
        debug!(page_count, "Opened PDF");
        Ok(Self {
            path: path.to_owned(),
            password: password.map(ToOwned::to_owned),
            page_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extract the text of every page, with layout preserved. Pages are
    /// separated by form feeds.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn extract_full_text(&self) -> Result<String> {
        let mut cmd = Command::new("pdftotext");
        cmd.arg("-layout");
        add_password_arg(self.password.as_deref(), &mut cmd);
        run_pdftotext(cmd, &self.path).await
    }

    /// Extract positioned text blocks for every page.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn extract_layout(&self) -> Result<Vec<PageLayout>> {
        let mut cmd = Command::new("pdftotext");
        cmd.arg("-bbox-layout");
        add_password_arg(self.password.as_deref(), &mut cmd);
        let xhtml = run_pdftotext(cmd, &self.path).await?;
        parse_bbox_layout(&xhtml)
            .with_context(|| format!("cannot parse layout of {:?}", self.path.display()))
    }
}

#[async_trait]
impl Document for PopplerDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn load_page(&self, page_idx: usize) -> Result<Box<dyn Page>> {
        check_page_index(page_idx, self.page_count)
            .with_context(|| format!("cannot load page of {:?}", self.path.display()))?;
        Ok(Box::new(PopplerPage {
            path: self.path.clone(),
            password: self.password.clone(),
            index: page_idx,
        }))
    }
}

/// A page of a [`PopplerDocument`].
struct PopplerPage {
    path: PathBuf,
    password: Option<String>,
    index: usize,
}

#[async_trait]
impl Page for PopplerPage {
    #[instrument(level = "debug", skip_all, fields(page = self.index, clip = %clip))]
    async fn extract_text(&self, clip: &Rect) -> Result<String> {
        // The command-line tools use 1-based, inclusive page ranges.
        let page_no = (self.index + 1).to_string();
        let (x, y, w, h) = crop_box(clip);
        let mut cmd = Command::new("pdftotext");
        cmd.arg("-f")
            .arg(&page_no)
            .arg("-l")
            .arg(&page_no)
            .arg("-r")
            .arg(POINTS_DPI)
            .arg("-x")
            .arg(x.to_string())
            .arg("-y")
            .arg(y.to_string())
            .arg("-W")
            .arg(w.to_string())
            .arg("-H")
            .arg(h.to_string());
        add_password_arg(self.password.as_deref(), &mut cmd);
        let text = run_pdftotext(cmd, &self.path).await?;
        // pdftotext ends every page with a form feed.
        Ok(text.trim_end_matches('\x0C').to_owned())
    }
}

/// Convert a rectangle to the integer crop box `pdftotext` wants, rounding
/// outwards so we never lose a partially covered glyph.
fn crop_box(clip: &Rect) -> (i64, i64, i64, i64) {
    let x = clip.x1.floor().max(0.0) as i64;
    let y = clip.y1.floor().max(0.0) as i64;
    let w = (clip.x2.ceil() as i64 - x).max(1);
    let h = (clip.y2.ceil() as i64 - y).max(1);
    (x, y, w, h)
}

fn add_password_arg(password: Option<&str>, cmd: &mut Command) {
    if let Some(password) = password {
        cmd.arg("-opw").arg(password);
    }
}

/// Run a prepared `pdftotext` command on `path`, writing to standard output.
async fn run_pdftotext(mut cmd: Command, path: &Path) -> Result<String> {
    // We use `with_cpu_semaphore` because `pdftotext` will happily use 100% of
    // a CPU on a large page.
    let output = with_cpu_semaphore(|| async {
        cmd.arg(path).arg("-").output().await.with_context(|| {
            format!("failed to run pdftotext on {:?}", path.display())
        })
    })
    .await?;
    check_for_command_failure("pdftotext", &output, Some(is_error_line))?;
    String::from_utf8(output.stdout).context("pdftotext output was not valid UTF-8")
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path, password: Option<&str>) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let mut cmd = Command::new("pdfinfo");
    add_password_arg(password, &mut cmd);
    let output = cmd
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties.
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }

    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}
