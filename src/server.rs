//! HTTP server wrapper: listen/serve on a background task and a bounded,
//! graceful stop.

use axum::Router;
use axum_server::Handle;
use std::{io, net::SocketAddr, time::Duration};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::config::ServerConfig;

/// How long the serve task gets to unwind after connections were force-closed.
const FORCE_CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to resolve listen address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("serve loop failed: {0}")]
    Serve(#[source] io::Error),
    #[error("serve task panicked: {0}")]
    Panicked(#[source] JoinError),
    #[error("shutdown did not finish within {timeout:?}, force-closed {open_connections} connection(s)")]
    ShutdownTimeout {
        timeout: Duration,
        open_connections: usize,
    },
}

/// A configured but not yet listening server.
#[derive(Debug)]
pub struct Server {
    address: String,
    router: Router,
}

impl Server {
    pub fn new(config: &ServerConfig, router: Router) -> Self {
        Self {
            address: config.full_url(),
            router,
        }
    }

    /// Binds the listener and spawns the serve loop.
    ///
    /// Returns once the socket is listening, so [`RunningServer::local_addr`]
    /// reflects the real port when `0` was configured.
    pub async fn run(self) -> Result<RunningServer, ServerError> {
        let addr = tokio::net::lookup_host(self.address.as_str())
            .await
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no address resolved")
                })
            })
            .map_err(|source| ServerError::Resolve {
                addr: self.address.clone(),
                source,
            })?;

        let handle = Handle::<SocketAddr>::new();
        let serve = axum_server::bind(addr)
            .handle(handle.clone())
            .serve(self.router.into_make_service());
        let mut task = tokio::spawn(serve);

        match handle.listening().await {
            Some(local_addr) => {
                info!("Server is running on {local_addr}");
                Ok(RunningServer {
                    handle,
                    task,
                    local_addr,
                })
            }
            None => Err(match (&mut task).await {
                Ok(Err(source)) => ServerError::Bind { addr, source },
                Ok(Ok(())) => ServerError::Bind {
                    addr,
                    source: io::Error::other("listener closed before it was ready"),
                },
                Err(join) => ServerError::Panicked(join),
            }),
        }
    }
}

/// A server whose serve loop is running on its own task.
#[derive(Debug)]
pub struct RunningServer {
    handle: Handle<SocketAddr>,
    task: JoinHandle<io::Result<()>>,
    local_addr: SocketAddr,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves when the serve loop exits. `Ok` is the expected "server
    /// closed" outcome; anything else is an error of the serve loop.
    pub async fn closed(&mut self) -> Result<(), ServerError> {
        flatten((&mut self.task).await)
    }

    /// Stops accepting immediately, lets in-flight requests run until
    /// `timeout`, then force-closes whatever is still open.
    pub async fn stop(mut self, timeout: Duration) -> Result<(), ServerError> {
        info!(
            connections = self.handle.connection_count(),
            ?timeout,
            "Stopping HTTP server"
        );
        self.handle.graceful_shutdown(None);

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                let open_connections = self.handle.connection_count();
                warn!(open_connections, "Shutdown deadline reached, forcing connections closed");
                self.handle.shutdown();
                if tokio::time::timeout(FORCE_CLOSE_GRACE, &mut self.task)
                    .await
                    .is_err()
                {
                    self.task.abort();
                }
                Err(ServerError::ShutdownTimeout {
                    timeout,
                    open_connections,
                })
            }
        }
    }
}

fn flatten(joined: Result<io::Result<()>, JoinError>) -> Result<(), ServerError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ServerError::Serve(err)),
        Err(join) => Err(ServerError::Panicked(join)),
    }
}
