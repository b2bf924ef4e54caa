//! Process lifecycle: ordered construction, background serving, signal wait
//! and bounded shutdown.
//!
//! ```text
//! Constructing → Starting → Running → ShuttingDown{deadline} → Stopped
//! ```
//!
//! Any error ends the lifecycle in the state where it happened; the caller
//! treats every [`LifecycleError`] as fatal.

use sqlx::{Pool, Postgres};
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    auth::{TokenError, TokenManager},
    config::{AppSettings, ConfigError},
    database::{self, DatabaseError},
    repository::{PostgresRepository, Repository},
    routes::Handler,
    server::{Server, ServerError},
    service::{Service, ServiceError},
};

/// Default grace period for in-flight requests once shutdown starts.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest grace period honoured, whatever was configured.
pub const MAX_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Constructing,
    Starting,
    Running,
    ShuttingDown { deadline: Instant },
    Stopped,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("can't load config: {0}")]
    Config(#[from] ConfigError),
    #[error("error creating database object: {0}")]
    Database(#[from] DatabaseError),
    #[error("error while creating token manager: {0}")]
    TokenManager(#[from] TokenError),
    #[error("error while creating service: {0}")]
    Service(#[from] ServiceError),
    #[error("HTTP server closed with error: {0}")]
    Server(#[source] ServerError),
    #[error("error stopping HTTP server: {0}")]
    Shutdown(#[source] ServerError),
}

/// Everything built during construction that outlives it.
#[derive(Debug)]
pub struct Application {
    pub server: Server,
    pub pool: Pool<Postgres>,
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Constructing,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, next: Phase) {
        info!(from = ?self.phase, to = ?next, "lifecycle transition");
        self.phase = next;
    }

    /// Builds database → token manager → storage → service → handlers →
    /// server, in that order. The pool is closed again if a later step fails.
    pub async fn construct(&mut self, settings: &AppSettings) -> Result<Application, LifecycleError> {
        let pool = database::connect(&settings.database).await?;

        let token_manager = match TokenManager::new(&settings.jwt.signing_key) {
            Ok(manager) => Arc::new(manager),
            Err(err) => {
                pool.close().await;
                return Err(err.into());
            }
        };

        let repository = PostgresRepository::new(pool.clone());
        if settings.database.auto_migrate {
            if let Err(err) = repository.migrate().await {
                pool.close().await;
                return Err(DatabaseError::Migration(err).into());
            }
        }

        let service = match Service::new(Arc::new(repository), token_manager.clone(), settings) {
            Ok(service) => Arc::new(service),
            Err(err) => {
                pool.close().await;
                return Err(err.into());
            }
        };
        let handler = Handler::new(service, token_manager);
        let server = Server::new(&settings.server, handler.init(settings));

        Ok(Application { server, pool })
    }

    /// Starts `server` in the background and blocks until `signal` resolves,
    /// then stops it within `shutdown_timeout`.
    ///
    /// `signal` is only polled once the server is listening.
    pub async fn serve<F>(
        &mut self,
        server: Server,
        shutdown_timeout: Duration,
        signal: F,
    ) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        self.enter(Phase::Starting);
        let mut running = server.run().await.map_err(LifecycleError::Server)?;
        self.enter(Phase::Running);

        tokio::select! {
            () = signal => info!("termination signal received"),
            closed = running.closed() => {
                return match closed {
                    Ok(()) => {
                        warn!("HTTP server closed before a termination signal");
                        self.enter(Phase::Stopped);
                        Ok(())
                    }
                    Err(err) => Err(LifecycleError::Server(err)),
                };
            }
        }

        let shutdown_timeout = shutdown_timeout.min(MAX_SHUTDOWN_TIMEOUT);
        self.enter(Phase::ShuttingDown {
            deadline: Instant::now() + shutdown_timeout,
        });
        running
            .stop(shutdown_timeout)
            .await
            .map_err(LifecycleError::Shutdown)?;
        self.enter(Phase::Stopped);
        Ok(())
    }

    /// Serves `app` until `signal` and closes its pool whatever the outcome.
    pub async fn run_application<F>(
        &mut self,
        app: Application,
        shutdown_timeout: Duration,
        signal: F,
    ) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let Application { server, pool } = app;
        let served = self.serve(server, shutdown_timeout, signal).await;
        pool.close().await;
        served
    }
}

/// Runs the whole lifecycle for already loaded `settings`, waiting on
/// `signal` for the shutdown request.
pub async fn run<F>(settings: &AppSettings, signal: F) -> Result<(), LifecycleError>
where
    F: Future<Output = ()>,
{
    let mut lifecycle = Lifecycle::new();
    let result = async {
        let app = lifecycle.construct(settings).await?;
        let timeout = Duration::from_secs(settings.server.shutdown_timeout_secs);
        lifecycle.run_application(app, timeout, signal).await
    }
    .await;

    if let Err(err) = &result {
        error!(phase = ?lifecycle.phase(), "{err}");
    }
    result
}
