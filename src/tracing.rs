use std::{io::IsTerminal, str::FromStr};

use anyhow::{Context, Result};
use sentry::{integrations::tracing::EventFilter, types::Dsn};
use tracing::{Level, Metadata, level_filters::LevelFilter};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LogLevel, LoggerConfig, SentryConfig};

const MODULE_WHITELIST: &[&str] = &[
    "tower_http",
    "sqlx::query",
    "axum_server",
    "student_service",
];

fn default_directives(level: &LogLevel) -> String {
    MODULE_WHITELIST
        .iter()
        .map(|m| format!("{m}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` wins, then the configured override, then the whitelist.
fn init_env_filter(override_filter: Option<&String>, level: &LogLevel) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = override_filter.map_or_else(|| default_directives(level), Clone::clone);
    EnvFilter::try_new(&directives).with_context(|| format!("invalid log filter {directives:?}"))
}

fn init_layer<W2>(
    make_writer: W2,
    format: &LogFormat,
    ansi: bool,
) -> Box<dyn Layer<Registry> + Sync + Send>
where
    W2: for<'writer> MakeWriter<'writer> + Sync + Send + 'static,
{
    match format {
        LogFormat::Compact => fmt::Layer::default()
            .with_ansi(ansi)
            .with_writer(make_writer)
            .compact()
            .boxed(),
        LogFormat::Pretty => fmt::Layer::default()
            .with_ansi(ansi)
            .with_writer(make_writer)
            .pretty()
            .boxed(),
        LogFormat::Json => fmt::Layer::default()
            .with_ansi(false)
            .with_writer(make_writer)
            .json()
            .boxed(),
    }
}

fn event_filter(metadata: &Metadata<'_>) -> EventFilter {
    match metadata.level() {
        &Level::ERROR | &Level::WARN => EventFilter::Event,
        _ => EventFilter::Ignore,
    }
}

/// Installs the global subscriber. Warn and error events are forwarded to
/// sentry when `with_sentry` is set.
pub fn init_tracing(config: &LoggerConfig, with_sentry: bool) -> Result<()> {
    if !config.enable {
        return Ok(());
    }

    let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();
    layers.push(init_layer(
        std::io::stdout,
        &config.format,
        std::io::stdout().is_terminal(),
    ));

    let env_filter = init_env_filter(config.override_filter.as_ref(), &config.level)?;
    let sentry_layer = with_sentry.then(|| {
        sentry::integrations::tracing::layer()
            .event_filter(event_filter)
            .with_filter(LevelFilter::INFO)
    });

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .with(sentry_layer)
        .try_init()
        .context("logger initialization failed")
}

/// Installs the sentry client. The returned guard flushes pending events on
/// drop and must be held for the lifetime of the process.
pub fn init_sentry(sentry_cfg: &SentryConfig) -> Result<sentry::ClientInitGuard> {
    Ok(sentry::init(sentry::ClientOptions {
        dsn: Some(Dsn::from_str(&sentry_cfg.dsn)?),
        release: sentry::release_name!(),
        traces_sample_rate: sentry_cfg.traces_sample_rate,
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_uses_the_configured_level() {
        let directives = default_directives(&LogLevel::Debug);
        assert!(directives.contains("student_service=debug"));
        assert!(directives.contains("tower_http=debug"));
    }

    #[test]
    fn malformed_override_is_an_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let bad = "student_service=notalevel".to_string();
        assert!(init_env_filter(Some(&bad), &LogLevel::Info).is_err());
    }
}
