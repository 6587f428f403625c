//! HTTP front end
//!
//! One task per accepted connection. Each connection carries exactly one
//! request: it is framed, dispatched, answered and closed.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

pub use crate::server::reply::{ErrorReply, RunReply, SaveReply, Submission, sanitize_output};

mod reply;
mod routes;

use crate::config::{Config, ConfigError};
use crate::pipeline::Pipeline;
use crate::protocol::{FramingError, Request, Response, Status, read_request};
use crate::sandbox::{ProcessSandbox, Sandbox};
use crate::snippets::SnippetStore;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The code runner server
#[derive(Debug)]
pub struct Server<S = ProcessSandbox> {
    inner: Arc<Shared<S>>,
}

#[derive(Debug)]
struct Shared<S> {
    pipeline: Pipeline<S>,
    snippets: SnippetStore,
}

impl<S> Clone for Server<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Server<ProcessSandbox> {
    /// Create a server that runs submissions as real processes
    pub fn new(config: Config) -> Self {
        Self::with_sandbox(config, ProcessSandbox::new())
    }
}

impl<S: Sandbox> Server<S> {
    pub fn with_sandbox(config: Config, sandbox: S) -> Self {
        let snippets = SnippetStore::new(
            config.server.snippets_dir.clone(),
            config.toolchain.extension.clone(),
        );
        Self {
            inner: Arc::new(Shared {
                pipeline: Pipeline::with_sandbox(config, sandbox),
                snippets,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        self.inner.pipeline.config()
    }

    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.inner.pipeline
    }

    pub fn snippets(&self) -> &SnippetStore {
        &self.inner.snippets
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config().server.bind_addr()?;
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already accepted are allowed to finish before this
    /// returns.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(%addr, toolchain = %self.config().toolchain.name, "listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        connections.spawn(async move {
                            server.handle_connection(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_exit(joined);
                }
            }
        }

        info!(in_flight = connections.len(), "shutting down");
        while let Some(joined) = connections.join_next().await {
            log_connection_exit(joined);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(%peer))]
    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let settings = &self.config().server;
        let (mut reader, mut writer) = stream.split();

        let framed = tokio::time::timeout(
            settings.read_timeout(),
            read_request(&mut reader, settings.max_request_bytes),
        )
        .await
        .unwrap_or(Err(FramingError::TimedOut));

        let response = match framed {
            Ok(request) => {
                debug!(method = request.method(), path = request.path(), "request");
                if settings.cancel_on_disconnect && is_cancellable(&request) {
                    tokio::select! {
                        response = self.route(&request) => response,
                        () = wait_for_disconnect(&mut reader) => {
                            info!("client went away, request abandoned");
                            return;
                        }
                    }
                } else {
                    self.route(&request).await
                }
            }
            Err(e) => {
                debug!(error = %e, "rejecting request");
                Response::text(Status::BadRequest, "Bad Request\n")
            }
        };

        debug!(status = response.status().code(), "responding");
        if let Err(e) = response.write_to(&mut writer).await {
            debug!(error = %e, "failed to write response");
            return;
        }
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "failed to shut down connection");
        }
    }
}

/// Surface connection tasks that panicked or were aborted
fn log_connection_exit(joined: Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, panicked = e.is_panic(), "connection task failed");
            false
        }
    }
}

/// Requests whose work is dropped when the client disconnects
fn is_cancellable(request: &Request) -> bool {
    request.method() == "POST" && request.path() == "/run"
}

/// Resolve once the peer closes its side or the connection fails.
///
/// Stray bytes after the request are read and ignored.
async fn wait_for_disconnect<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
