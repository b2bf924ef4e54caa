use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::{config::DatabaseConfig, repository::StorageError};

const SUPPORTED_DRIVERS: &[&str] = &["postgres", "postgresql"];

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("unsupported database driver {0:?}, expected one of: postgres, postgresql")]
    UnsupportedDriver(String),
    #[error("failed to connect to the database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("database did not answer the ping: {0}")]
    Ping(#[source] sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(#[source] StorageError),
}

/// Opens a PostgreSQL pool for `config` and checks it answers `SELECT 1`.
pub async fn connect(config: &DatabaseConfig) -> Result<Pool<Postgres>, DatabaseError> {
    let driver = config.driver.to_ascii_lowercase();
    if !SUPPORTED_DRIVERS.contains(&driver.as_str()) {
        return Err(DatabaseError::UnsupportedDriver(config.driver.clone()));
    }

    let mut options = PgPoolOptions::new();
    if let Some(max) = config.max_connections {
        options = options.max_connections(max);
    }
    if let Some(secs) = config.connection_timeout_seconds {
        options = options.acquire_timeout(Duration::from_secs(secs));
    }

    let pool = options
        .connect(&config.dsn)
        .await
        .map_err(DatabaseError::Connect)?;

    if let Err(err) = sqlx::query("SELECT 1").execute(&pool).await {
        pool.close().await;
        return Err(DatabaseError::Ping(err));
    }

    info!(driver = %driver, "database connection established");
    Ok(pool)
}
