//! Command-line entry points.

use std::time::Duration;

use clap::Args;

use crate::{
    extraction::{ExtractionManager, StrategyKind},
    prelude::*,
    project::Project,
};

pub mod export;
pub mod init;
pub mod records;
pub mod schema;
pub mod watch;

/// Common options for subcommands that extract text.
#[derive(Debug, Clone, Args)]
pub struct ProcessorOpts {
    /// How long the store must be quiet before we look for new rectangles.
    #[clap(long = "quiet-period-ms", default_value = "200")]
    pub quiet_period_ms: u64,

    /// Extraction strategies to try, in order. May be repeated.
    #[clap(
        long = "strategy",
        value_enum,
        default_values_t = [StrategyKind::PdfText]
    )]
    pub strategies: Vec<StrategyKind>,

    /// Password for encrypted PDFs.
    #[clap(long)]
    pub password: Option<String>,
}

impl ProcessorOpts {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Open `project`'s document and register our strategies.
    pub async fn build_manager(&self, project: &Project) -> Result<ExtractionManager> {
        let document = project.open_document(self.password.as_deref()).await?;
        let mut manager = ExtractionManager::new(Box::new(document), project.store().clone());
        for kind in &self.strategies {
            manager.register_strategy(kind.build(project.dir()));
        }
        debug!(strategies = ?manager.strategy_names(), "Built extraction manager");
        Ok(manager)
    }
}

/// Print a value as pretty JSON on standard output.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}
