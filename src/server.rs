//! TCP listener and dispatch loop.
//!
//! Accepts connections and hands each one to its own task. The loop never
//! waits on a handler; it only stops when the shutdown future resolves.

use crate::config::Config;
use crate::connection::{Connection, Outcome};
use crate::exec::{Executor, ShellExecutor};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Pending connections the kernel queues before `accept`.
const LISTEN_BACKLOG: i32 = 10;

/// Listener setup errors
#[derive(Debug, thiserror::Error)]
pub enum SocketSetupError {
    #[error("socket: {0}")]
    Socket(#[source] io::Error),

    #[error("bind {0}: {1}")]
    Bind(SocketAddr, #[source] io::Error),

    #[error("listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}

/// Server instance
pub struct Server<E = ShellExecutor> {
    listener: TcpListener,
    config: Arc<Config>,
    executor: Arc<E>,
}

impl<E: Executor> Server<E> {
    /// Bind the listening socket. Must be called within a tokio runtime.
    pub fn bind(config: Config, executor: E) -> Result<Self, SocketSetupError> {
        let addr = SocketAddr::from((config.host, config.port));
        let listener = create_listener(addr)?;

        Ok(Server {
            listener,
            config: Arc::new(config),
            executor: Arc::new(executor),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// The listening socket is closed once, when this returns. Handlers
    /// still running at that point are left to finish on their own.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    break;
                }

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => match joined {
                    Ok(Outcome::Closed(status)) => trace!(%status, "Connection closed"),
                    Ok(Outcome::Rejected(reason)) => trace!(%reason, "Connection rejected"),
                    Err(e) => error!(error = %e, "Connection handler panicked"),
                },

                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "New connection");
                        let config = Arc::clone(&self.config);
                        let executor = Arc::clone(&self.executor);
                        handlers.spawn(handle(stream, peer, config, executor));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(self.listener);
        info!(in_flight = handlers.len(), "Closing...");
        handlers.detach_all();
    }
}

/// Bind `config.host:config.port` and serve until `shutdown` resolves.
pub async fn run<F>(config: Config, shutdown: F) -> Result<(), SocketSetupError>
where
    F: Future<Output = ()>,
{
    let executor = ShellExecutor::from_config(&config);
    info!(shell = %executor.shell().display(), "Running commands with");

    let server = Server::bind(config, executor)?;
    let addr = server.local_addr().map_err(SocketSetupError::Socket)?;
    info!(address = %addr, pid = std::process::id(), "Listening");

    server.run(shutdown).await;
    Ok(())
}

async fn handle<E: Executor>(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    executor: Arc<E>,
) -> Outcome {
    Connection::new(peer, &config, &*executor)
        .handle(stream)
        .await
}

/// Create a close-on-exec IPv4 listener with a fixed backlog.
fn create_listener(addr: SocketAddr) -> Result<TcpListener, SocketSetupError> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(SocketSetupError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(SocketSetupError::Socket)?;
    socket
        .set_nonblocking(true)
        .map_err(SocketSetupError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|e| SocketSetupError::Bind(addr, e))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(SocketSetupError::Listen)?;

    TcpListener::from_std(socket.into()).map_err(SocketSetupError::Socket)
}
