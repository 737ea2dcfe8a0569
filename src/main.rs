mod catalog;
mod config;
mod connection;
mod direct_connection;
mod error;
#[cfg(test)]
mod memory;
mod pipelines;
mod query;
mod report;
mod runner;
mod seed;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog::CatalogRun;
use direct_connection::MongoCollection;
use error::RunnerError;
use pipelines::PipelineRegistry;
use report::Reporter;

/// Runs a fixed catalog of queries, updates, aggregation reports and index
/// commands against a MongoDB collection of books and prints every result.
///
/// Connection settings and catalog parameters are read from a YAML file.
/// Results go to stdout, logs to stderr.
#[derive(Parser)]
#[command(name = "mongo-catalog-runner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a catalog of MongoDB queries and reports against a books collection", long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/mongo-catalog-runner/config.yaml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the connection URI from the configuration
    #[arg(long, value_name = "URI")]
    uri: Option<String>,

    /// Override the database name from the configuration
    #[arg(long, value_name = "NAME")]
    database: Option<String>,

    /// Override the collection name from the configuration
    #[arg(long, value_name = "NAME")]
    collection: Option<String>,

    /// Insert the sample books before running the catalog
    #[arg(long)]
    seed: bool,

    /// List the available aggregation reports and exit
    #[arg(long)]
    list_reports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mongo_catalog_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_overrides(cli.uri, cli.database, cli.collection)?;
    tracing::info!(
        "Target collection: {}.{}",
        config.connection.database_name,
        config.connection.collection_name
    );

    let mut registry = PipelineRegistry::with_builtins();
    for report in &config.reports {
        tracing::info!("Registering custom report: {}", report.name);
        registry.register_custom(report, &config.fields)?;
    }

    if cli.list_reports {
        for template in registry.templates() {
            let origin = if template.is_builtin() { "built-in" } else { "custom" };
            println!(
                "{} v{} ({}): {}",
                template.name, template.version, origin, template.description
            );
        }
        return Ok(());
    }

    let collection = MongoCollection::connect(&config.connection, &config.timeouts)
        .await
        .map_err(|e| aborted(e).context("Failed to connect to MongoDB"))?;

    let run = CatalogRun {
        catalog: &config.catalog,
        fields: &config.fields,
        registry: &registry,
        seed: cli.seed,
    };
    let mut reporter = Reporter::new(std::io::stdout().lock());

    catalog::run_scoped(&collection, &run, &mut reporter)
        .await
        .map_err(aborted)?;

    Ok(())
}

/// Log a fatal failure with its kind and hand it to the top level.
fn aborted(e: RunnerError) -> anyhow::Error {
    tracing::error!("Catalog aborted after a {} failure: {}", e.kind_label(), e);
    e.into()
}
