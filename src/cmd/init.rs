//! The `init` subcommand.

use clap::Args;

use crate::{
    prelude::*,
    project::Project,
    ui::{ProgressConfig, Ui},
};

/// Init command line arguments.
#[derive(Debug, Args)]
pub struct InitOpts {
    /// The PDF to annotate.
    pub pdf_path: PathBuf,

    /// Where to create the project directory.
    #[clap(long, default_value = "pdf_projects")]
    pub projects_dir: PathBuf,

    /// Password for encrypted PDFs.
    #[clap(long)]
    pub password: Option<String>,

    /// Don't write `pdf_content.txt` or `pdf_content.json`.
    #[clap(long)]
    pub skip_full_text: bool,
}

/// The `init` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_init(ui: Ui, opts: &InitOpts) -> Result<()> {
    let project = Project::init(&opts.projects_dir, &opts.pdf_path).await?;

    if !opts.skip_full_text {
        let spinner = ui.new_spinner(&ProgressConfig {
            emoji: "📄",
            msg: "Extracting full text",
            done_msg: "Extracted full text",
        });
        let document = project.open_document(opts.password.as_deref()).await?;
        let path = project.extract_full_text(&document).await?;
        spinner.finish();
        debug!(path = %path.display(), "Wrote full text");
    }

    println!("{}", project.dir().display());
    Ok(())
}
