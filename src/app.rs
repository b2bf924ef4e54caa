use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{error, info};

use crate::{
    config::{AppSettings, LoggerConfig},
    lifecycle::{self, LifecycleError, Phase},
    shutdown::shutdown_signal,
    tracing::{init_sentry, init_tracing},
};

pub const DEFAULT_CONFIG_PATH: &str = "./.env";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub enum Commands {
    /// Start the web server
    Server {
        /// dotenv file, or a TOML file when the name ends in `.toml`
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Show version information
    Version,
}

/// Fatal lifecycle errors are logged where they happen; anything else still
/// needs reporting by the caller.
pub fn already_logged(err: &anyhow::Error) -> bool {
    err.is::<LifecycleError>()
}

/// Loads settings. A failure is logged through a default subscriber since
/// the configured one cannot be built yet.
fn load_settings(path: &Path) -> Result<AppSettings, LifecycleError> {
    AppSettings::new(path).map_err(|err| {
        let err = LifecycleError::Config(err);
        // Already installed is fine, the event goes to that subscriber.
        let _ = init_tracing(&LoggerConfig::default(), false);
        error!(phase = ?Phase::Constructing, "{err}");
        err
    })
}

async fn start(config: &AppSettings) -> Result<(), LifecycleError> {
    lifecycle::run(config, shutdown_signal()).await?;
    info!("Web server has gracefully shutdown");
    Ok(())
}

pub async fn run() -> Result<()> {
    let cli = Commands::parse();
    match cli {
        Commands::Server { config } => {
            let config = load_settings(Path::new(&config))?;

            init_tracing(&config.logger, config.sentry.is_some())?;
            let _sentry_guard = config.sentry.as_ref().map(init_sentry).transpose()?;
            start(&config).await?;
            Ok(())
        }
        Commands::Version => {
            println!(
                "{} ({})",
                env!("CARGO_PKG_VERSION"),
                option_env!("BUILD_SHA")
                    .or(option_env!("GITHUB_SHA"))
                    .unwrap_or("dev")
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn config_failure_is_logged_as_a_lifecycle_error() {
        let err = load_settings(Path::new("/definitely/not/here/.env")).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(ConfigError::ReadError(_))));
        assert!(already_logged(&anyhow::Error::from(err)));
    }

    #[test]
    fn other_errors_are_left_for_the_caller() {
        assert!(!already_logged(&anyhow::anyhow!("logger initialization failed")));
    }
}
