use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod cpu_limit;
mod document;
mod extraction;
mod prelude;
mod processor;
mod project;
mod status;
mod store;
mod ui;

/// Extract text from regions marked on PDF pages.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
External tools:
  - pdfinfo, pdftotext (poppler-utils): required.
  - tesseract: only needed for `--strategy tesseract`.

Environment Variables:
  - RUST_LOG (optional): Logging filter, for example `region_scribe=debug`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Create a project for a PDF.
    Init(cmd::init::InitOpts),
    /// Mark a new rectangle, as the viewer would.
    Add(cmd::records::AddOpts),
    /// Print every rectangle in a project as JSON.
    List(cmd::records::ListOpts),
    /// Delete a rectangle.
    Remove(cmd::records::RemoveOpts),
    /// Watch a project and extract text from new rectangles until
    /// interrupted.
    Watch(cmd::watch::WatchOpts),
    /// Extract text from every rectangle that has none yet, then exit.
    ProcessPending(cmd::watch::ProcessPendingOpts),
    /// Return failed rectangles to the queue.
    Requeue(cmd::records::RequeueOpts),
    /// Copy a project and its captures somewhere else.
    Export(cmd::export::ExportOpts),
    /// Print the JSON Schema of the store file.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Init(_)
            | Cmd::Add(_)
            | Cmd::List(_)
            | Cmd::Remove(_)
            | Cmd::Requeue(_)
            | Cmd::Export(_) => true,
            Cmd::Watch(_) | Cmd::ProcessPending(_) => false,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide spinners if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Init(opts) => cmd::init::cmd_init(ui, opts).await?,
        Cmd::Add(opts) => cmd::records::cmd_add(opts).await?,
        Cmd::List(opts) => cmd::records::cmd_list(opts).await?,
        Cmd::Remove(opts) => cmd::records::cmd_remove(opts).await?,
        Cmd::Watch(opts) => cmd::watch::cmd_watch(ui, opts).await?,
        Cmd::ProcessPending(opts) => cmd::watch::cmd_process_pending(ui, opts).await?,
        Cmd::Requeue(opts) => cmd::records::cmd_requeue(opts).await?,
        Cmd::Export(opts) => cmd::export::cmd_export(opts).await?,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await?,
    }
    Ok(())
}
