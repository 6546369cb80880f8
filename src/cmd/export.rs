//! The `export` subcommand.

use clap::Args;

use crate::{prelude::*, project::Project};

/// Export command line arguments.
#[derive(Debug, Args)]
pub struct ExportOpts {
    /// The project directory.
    pub project: PathBuf,

    /// Where to put the exported copy.
    pub dest: PathBuf,
}

/// The `export` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_export(opts: &ExportOpts) -> Result<()> {
    let project = Project::open(&opts.project).await?;
    let export_dir = project.export(&opts.dest).await?;
    println!("{}", export_dir.display());
    Ok(())
}
