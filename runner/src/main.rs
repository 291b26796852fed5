mod commands;
mod config;
mod server;

#[cfg(test)]
mod server_test;

use crate::{
    commands::{CommandError, DeriveArgs, ImportArgs},
    config::ReportConfig,
    server::ServiceState,
};
use clap::{Parser, Subcommand};
use std::{error::Error, net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tsbs_report_analysis::BaselineStore;
use tsbs_report_ingest::ReportLoader;

#[derive(Debug, Parser)]
#[command(name = "tsbs-report", version)]
#[command(about = "Dashboard and baseline tooling for TSBS benchmark runs")]
struct Cli {
    /// YAML configuration, defaults apply when it does not exist
    #[arg(short, long, default_value = "tsbs-report.yaml")]
    config: PathBuf,
    /// directory holding the run directories, overrides data.path
    #[arg(short, long)]
    data: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the dashboard API
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Compute a baseline from a window of runs
    DeriveBaseline(DeriveArgs),
    /// Convert a baseline CSV into a baseline document
    ImportBaseline(ImportArgs),
    /// List the dates and branches present in the data
    ListAvailable,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn serve(config: &ReportConfig) -> Result<(), CommandError> {
    let loader = Arc::new(ReportLoader::new(config.loader_config())?);
    let load = loader.start_background_load();
    loader.start_watcher();
    loader.start_maintenance();

    let state = ServiceState::new(
        Arc::clone(&loader),
        BaselineStore::new(&config.baselines.dir),
        &config.server,
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CommandError::Runtime)?;

    let served = runtime.block_on(server::serve(
        config.server.bind,
        state,
        load,
        config.server.startup_wait(),
    ));
    loader.shutdown();

    served.map_err(CommandError::Server)
}

fn run(cli: Cli, config: ReportConfig) -> Result<(), CommandError> {
    let baselines = BaselineStore::new(&config.baselines.dir);

    match cli.command {
        Command::Serve { .. } => serve(&config),
        Command::DeriveBaseline(args) => {
            let store = commands::load_dataset(&config)?;
            let derivation = commands::derive_baseline(&store.get_data(), &args, &baselines)?;

            if args.dry_run {
                println!("{}", serde_json::to_string_pretty(&derivation.baselines)?);
            }
            info!(
                configurations = derivation.baselines.len(),
                "Baseline derivation finished"
            );
            Ok(())
        }
        Command::ImportBaseline(args) => {
            let document = commands::import_baseline(&args, &baselines)?;

            if args.dry_run {
                println!("{}", serde_json::to_string_pretty(&document)?);
            }
            Ok(())
        }
        Command::ListAvailable => {
            let store = commands::load_dataset(&config)?;
            let rows = store.get_data();

            if rows.is_empty() {
                println!("No data available");
                return Ok(());
            }

            println!("Total records: {}", rows.len());
            for (date, branch, count) in commands::available_data(&rows) {
                println!("  {date} - {branch}: {count} records");
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match ReportConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {e}", cli.config.to_string_lossy());
            return ExitCode::FAILURE;
        }
    };
    if let Some(data) = &cli.data {
        config.data.path = data.clone();
    }
    if let Command::Serve { bind: Some(bind) } = &cli.command {
        config.server.bind = *bind;
    }

    if config.preflight_checks() {
        error!("Configuration is invalid, see the errors above");
        return ExitCode::FAILURE;
    }

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            let mut source = e.source();
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
