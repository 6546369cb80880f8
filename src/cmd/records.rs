//! Subcommands that edit or inspect a project's records directly: `add`,
//! `list`, `remove` and `requeue`.
//!
//! These stand in for the viewer. A running `watch` in another process picks
//! up anything they write.

use clap::Args;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    prelude::*,
    project::Project,
    store::{NewRecord, Rect},
};

use super::print_json;

/// Add command line arguments.
#[derive(Debug, Args)]
pub struct AddOpts {
    /// The project directory.
    pub project: PathBuf,

    /// Zero-based page index.
    #[clap(long)]
    pub page: usize,

    /// The region, in PDF points from the top left, as `X1,Y1,X2,Y2`.
    #[clap(long, allow_hyphen_values = true)]
    pub rect: Rect,

    #[clap(long, default_value = "")]
    pub description: String,

    /// May be repeated.
    #[clap(long = "keyword")]
    pub keywords: Vec<String>,

    /// Capture of the region, relative to the project directory.
    #[clap(long)]
    pub image_path: Option<PathBuf>,

    /// Thumbnail of the capture, relative to the project directory.
    #[clap(long)]
    pub thumbnail_path: Option<PathBuf>,
}

/// The `add` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_add(opts: &AddOpts) -> Result<()> {
    let project = Project::open(&opts.project).await?;
    let new = NewRecord {
        page: opts.page,
        rect: opts.rect,
        description: opts.description.clone(),
        keywords: opts.keywords.clone(),
        image_path: opts.image_path.clone().unwrap_or_default(),
        thumbnail_path: opts.thumbnail_path.clone().unwrap_or_default(),
    };
    let store = project.store().clone();
    let record = spawn_blocking_propagating_panics(move || store.append(new)).await?;
    print_json(&record)
}

/// List command line arguments.
#[derive(Debug, Args)]
pub struct ListOpts {
    /// The project directory.
    pub project: PathBuf,
}

/// The `list` subcommand. Unlike the watcher, this refuses to treat a
/// corrupt store as empty.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_list(opts: &ListOpts) -> Result<()> {
    let project = Project::open(&opts.project).await?;
    let store = project.store().clone();
    let records = spawn_blocking_propagating_panics(move || store.load()).await?;
    print_json(&records)
}

/// Remove command line arguments.
#[derive(Debug, Args)]
pub struct RemoveOpts {
    /// The project directory.
    pub project: PathBuf,

    #[clap(long)]
    pub id: u64,

    #[clap(long)]
    pub page: usize,
}

/// The `remove` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_remove(opts: &RemoveOpts) -> Result<()> {
    let project = Project::open(&opts.project).await?;
    let store = project.store().clone();
    let (id, page) = (opts.id, opts.page);
    let removed = spawn_blocking_propagating_panics(move || store.remove(id, page)).await?;
    print_json(&removed)
}

/// Requeue command line arguments.
#[derive(Debug, Args)]
pub struct RequeueOpts {
    /// The project directory.
    pub project: PathBuf,

    /// Only requeue these IDs. By default, every failed record is requeued.
    #[clap(long = "id")]
    pub ids: Vec<u64>,
}

/// The `requeue` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_requeue(opts: &RequeueOpts) -> Result<()> {
    let project = Project::open(&opts.project).await?;
    let store = project.store().clone();
    let ids = opts.ids.clone();
    let requeued =
        spawn_blocking_propagating_panics(move || store.requeue_failed(&ids)).await?;
    if requeued.is_empty() {
        info!("No failed rectangles to requeue");
    }
    print_json(&requeued)
}
