use std::path::Path;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use runplane_core::AppConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;

use app::Application;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("runplane")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ML pipeline control plane: project following and run scheduling")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config/runplane.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level, overrides the configured one")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = AppConfig::load(Some(Path::new(config_path)))
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.log_level);
    init_logging(log_level)?;

    info!(config = config_path, "starting runplane");

    let app = Application::new(config)
        .await
        .context("failed to initialize application")?;
    app.run().await
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("runplane={level},warn")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("failed to initialize logging")?;
    Ok(())
}
