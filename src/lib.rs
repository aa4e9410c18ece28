pub mod audit;
pub mod config;
pub mod db;
pub mod pipeline;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use config::{RoutingRules, WorkerConfig};
use pipeline::processor::{DocumentProcessor, ProcessingError};

/// Load configuration, start logging, and poll the intake directory forever.
pub fn run() -> Result<(), ProcessingError> {
    let config_path = std::env::var_os(config::CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let config = WorkerConfig::load(&config_path)?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.filter_directive())),
        )
        .init();

    tracing::info!(
        version = config::APP_VERSION,
        config = %config_path.display(),
        found = config_path.exists(),
        "ScanRoute starting"
    );

    let rules = RoutingRules::load(&config.paths.rules_file)?;
    let mut processor = DocumentProcessor::from_config(&config, &rules)?;
    processor.run();
    Ok(())
}
