use anyhow::Result;
use clap::Parser;
use tracing::info;

use uatu_compare::{AppConfig, Pipeline, RunOptions, RunStatus};

/// Compare marketplace prices for a product.
#[derive(Debug, Parser)]
#[command(name = "uatu-compare", version, about)]
struct Cli {
    /// Product to look up
    query: String,

    /// Search results requested per query
    #[arg(long)]
    max_results: Option<u32>,

    /// Which primary-site listing to open (0-based)
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// Page-load timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uatu_compare=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let mut options = RunOptions::from_config(&config);
    options.selection_index = cli.index;
    options.headless = options.headless && !cli.headful;
    if let Some(timeout) = cli.timeout {
        options.timeout_ms = timeout;
    }
    if let Some(max_results) = cli.max_results {
        options.max_results = max_results;
    }

    info!("Starting Uatu Compare...");
    let pipeline = Pipeline::from_config(&config)?;
    let envelope = pipeline.run(&cli.query, options).await;

    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if envelope.status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
