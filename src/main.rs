use clap::{Parser, Subcommand};
use kpi_server::config::Config;
use kpi_server::connectors::Connector;
use kpi_server::logging;
use kpi_server::metrics;
use kpi_server::server::{self, AppState};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kpi_server")]
#[command(about = "Security KPI dashboard backend")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file (defaults to ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover modules, build data sources and serve the HTTP API
    Serve {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the ordered module list as JSON
    Modules,
    /// Test every configured data source
    CheckConnectors,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    logging::init_logging(&config.app.log_level);

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let state = AppState::from_config(config).with_metrics(metrics::init_metrics());
            state.registry.discover_modules();
            server::start_server(state).await?;
        }
        Commands::Modules => {
            let state = AppState::from_config(config);
            let modules = state.registry.get_modules_info();
            println!("{}", serde_json::to_string_pretty(&modules)?);
        }
        Commands::CheckConnectors => {
            let state = AppState::from_config(config);
            if state.data_sources.is_empty() {
                warn!("No data sources configured");
            }

            let mut all_healthy = true;
            let mut report = Vec::new();
            for connector in state.data_sources.iter() {
                let healthy = connector.test_connection().await;
                info!(connector = %connector.name(), healthy, "Connection test finished");
                all_healthy &= healthy;
                report.push(json!({ "name": connector.name(), "healthy": healthy }));
                connector.disconnect().await;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !all_healthy {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
