use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use gdelt_etl::app::ports::{Notifier, RawSource};
use gdelt_etl::config::Config;
use gdelt_etl::constants::{EXIT_LOADED, EXIT_STARTUP_FAILURE};
use gdelt_etl::infra::file_source::FileSource;
use gdelt_etl::infra::http_source::HttpExportSource;
use gdelt_etl::infra::notifier::{LogNotifier, WebhookNotifier};
use gdelt_etl::infra::quarantine_store::FileQuarantineStore;
use gdelt_etl::infra::region_source::GeoJsonRegionSource;
use gdelt_etl::infra::sqlite_sink::SqliteLoadSink;
use gdelt_etl::logging;
use gdelt_etl::observability::metrics;
use gdelt_etl::pipeline::{Orchestrator, PipelinePorts, RunOutcome};

#[derive(Parser)]
#[command(name = "gdelt_etl")]
#[command(about = "Batch ETL for GDELT event exports")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, enrich, validate and load (or quarantine) the latest export
    Run {
        /// Config file (defaults to config.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Read the export from a local .CSV or .zip file instead of downloading
        #[arg(long)]
        input: Option<PathBuf>,
        /// Region GeoJSON path or URL
        #[arg(long)]
        regions: Option<String>,
        /// Stop after the quality gate: no quarantine, no load
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the configuration and print it with overrides applied
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn build_ports(config: &Config) -> anyhow::Result<PipelinePorts> {
    let timeout = config.source.timeout();

    let source: Arc<dyn RawSource> = match &config.source.local_path {
        Some(path) => Arc::new(FileSource::new(path)),
        None => Arc::new(
            HttpExportSource::new(&config.source.master_list_url, timeout)
                .context("Failed to build HTTP client")?,
        ),
    };

    let notifier: Arc<dyn Notifier> = match &config.alert.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url, timeout).context("Failed to build webhook client")?,
        ),
        None => {
            warn!("No alert webhook configured, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    Ok(PipelinePorts {
        source,
        regions: Arc::new(GeoJsonRegionSource::new(
            &config.regions.location,
            &config.regions.id_property,
            &config.regions.name_property,
            timeout,
        )),
        quarantine: Arc::new(FileQuarantineStore::new(&config.quarantine.root)),
        notifier,
        load_sink: Arc::new(SqliteLoadSink::new(
            &config.load.database_path,
            config.load.mode,
        )),
    })
}

fn print_outcome(outcome: &RunOutcome) {
    let report = outcome.report();
    println!("\n📊 Quality report ({}):", report.summary());
    for check in &report.checks {
        let mark = if check.passed { "✅" } else { "❌" };
        println!("   {} {:<16} {}", mark, check.check_name, check.detail);
    }
    match outcome {
        RunOutcome::Loaded { table, rows, .. } => println!("\n✅ Loaded {} rows into {}", rows, table),
        RunOutcome::Quarantined { receipt, .. } => {
            println!("\n⚠️  Dataset quarantined at {}", receipt.location)
        }
        RunOutcome::DryRun { .. } => println!("\n🔍 Dry run, nothing persisted"),
    }
}

async fn run(
    config_path: Option<PathBuf>,
    input: Option<PathBuf>,
    regions: Option<String>,
    dry_run: bool,
) -> i32 {
    let mut config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EXIT_STARTUP_FAILURE;
        }
    };
    if let Some(input) = input {
        config.source.local_path = Some(input);
    }
    if let Some(regions) = regions {
        config.regions.location = regions;
    }

    // Held until the end of the run so buffered log lines are flushed
    let _guard = match logging::init_logging(&config.logging.dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return EXIT_STARTUP_FAILURE;
        }
    };

    if let Err(e) = metrics::init(config.metrics.pushgateway_url.clone(), &config.metrics.instance) {
        warn!("Metrics disabled: {:#}", e);
    }

    let ports = match build_ports(&config) {
        Ok(ports) => ports,
        Err(e) => {
            error!("Failed to build pipeline: {:#}", e);
            return EXIT_STARTUP_FAILURE;
        }
    };

    let orchestrator = Orchestrator::new(ports, config.orchestrator_settings(dry_run));
    let code = match orchestrator.run().await {
        Ok(outcome) => {
            print_outcome(&outcome);
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("\n❌ {}", e);
            e.exit_code()
        }
    };

    if let Err(e) = metrics::push_all_metrics().await {
        warn!("Failed to push metrics: {:#}", e);
    }
    info!(exit_code = code, "ETL job finished");
    code
}

fn check_config(config_path: Option<PathBuf>) -> i32 {
    match Config::load(config_path.as_deref()) {
        Ok(config) => {
            match toml::to_string_pretty(&config) {
                Ok(text) => println!("{}", text),
                Err(e) => eprintln!("Configuration is valid but could not be rendered: {}", e),
            }
            EXIT_LOADED
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            EXIT_STARTUP_FAILURE
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            config,
            input,
            regions,
            dry_run,
        } => run(config, input, regions, dry_run).await,
        Commands::CheckConfig { config } => check_config(config),
    };
    std::process::exit(code);
}
