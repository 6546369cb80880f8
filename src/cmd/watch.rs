//! The `watch` and `process-pending` subcommands.

use std::sync::Arc;

use clap::Args;

use crate::{
    prelude::*,
    processor::Processor,
    project::Project,
    ui::{ProgressConfig, SpinnerObserver, Ui},
};

use super::ProcessorOpts;

/// Watch command line arguments.
#[derive(Debug, Args)]
pub struct WatchOpts {
    /// The project directory.
    pub project: PathBuf,

    #[clap(flatten)]
    pub processor_opts: ProcessorOpts,
}

/// The `watch` subcommand. Runs until interrupted.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_watch(ui: Ui, opts: &WatchOpts) -> Result<()> {
    let project = Project::open(&opts.project).await?;
    let manager = opts.processor_opts.build_manager(&project).await?;

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "👀",
        msg: "Watching for rectangles",
        done_msg: "Stopped watching",
    });
    let observer = Arc::new(SpinnerObserver::new(spinner.clone()));
    let processor =
        Processor::start(manager, observer, opts.processor_opts.quiet_period()).await?;

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;
    info!("Interrupted, finishing current rectangle");
    processor.stop().await?;
    spinner.finish();
    Ok(())
}

/// Process-pending command line arguments.
#[derive(Debug, Args)]
pub struct ProcessPendingOpts {
    /// The project directory.
    pub project: PathBuf,

    #[clap(flatten)]
    pub processor_opts: ProcessorOpts,
}

/// The `process-pending` subcommand: one pass over every record without an
/// extraction status, without watching.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_process_pending(ui: Ui, opts: &ProcessPendingOpts) -> Result<()> {
    let project = Project::open(&opts.project).await?;
    let manager = opts.processor_opts.build_manager(&project).await?;

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📄",
        msg: "Processing pending rectangles",
        done_msg: "Processed pending rectangles",
    });
    let observer = SpinnerObserver::new(spinner.clone());
    let summary = manager.process_pending(&observer).await?;
    spinner.finish();
    info!(
        completed = summary.completed,
        failed = summary.failed,
        "Finished processing"
    );
    Ok(())
}
