use std::process::ExitCode;

use prodflow_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use prodflow_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

fn main() -> ExitCode {
    // Commands that need config report their own load errors; logging just
    // falls back to defaults when the file is broken.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }
    prodflow_cli::run()
}
