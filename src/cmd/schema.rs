//! The `schema` subcommand.

use clap::Args;
use schemars::schema_for;

use crate::{prelude::*, store::StoreFile};

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand. Prints the JSON Schema of the store file.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = schema_for!(StoreFile);
    let mut schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    schema_str.push('\n');

    match &schema_opts.output_path {
        Some(path) => tokio::fs::write(path, schema_str)
            .await
            .with_context(|| format!("failed to write schema to {:?}", path.display()))?,
        None => print!("{schema_str}"),
    }
    Ok(())
}
