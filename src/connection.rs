//! Per-connection state machine.
//!
//! A connection is read once, checked once and executed at most once:
//!
//! ```text
//! AwaitingLine -> Authenticating -> Executing -> Closed
//!       |               |              |
//!       +---------------+--------------+----> Rejected
//! ```
//!
//! The server never writes to the client. The socket is owned by the
//! handler and released exactly once on every path, either by being
//! dropped or by being handed to the shell.

use crate::config::Config;
use crate::exec::{ExecError, Executor, ShellIo};
use crate::protocol::{authenticate, AuthError, FramingError, LineReader};
use std::net::SocketAddr;
use std::process::ExitStatus;
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the request line.
    AwaitingLine,
    /// Checking the secret prefix.
    Authenticating,
    /// Shell is running.
    Executing,
    /// Shell ran and exited.
    Closed,
    /// Dropped without running anything, or the shell failed to start.
    Rejected,
}

/// Why a connection was rejected.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Final result of handling one connection.
#[derive(Debug)]
pub enum Outcome {
    Closed(ExitStatus),
    Rejected(Rejection),
}

impl Outcome {
    /// Terminal state this outcome corresponds to.
    pub fn state(&self) -> ConnState {
        match self {
            Outcome::Closed(_) => ConnState::Closed,
            Outcome::Rejected(_) => ConnState::Rejected,
        }
    }
}

/// A single client connection.
pub struct Connection<'a, E> {
    peer: SocketAddr,
    config: &'a Config,
    executor: &'a E,
    state: ConnState,
}

impl<'a, E: Executor> Connection<'a, E> {
    pub fn new(peer: SocketAddr, config: &'a Config, executor: &'a E) -> Self {
        Self {
            peer,
            config,
            executor,
            state: ConnState::AwaitingLine,
        }
    }

    fn transition(&mut self, next: ConnState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }

    /// Drive the connection to a terminal state.
    pub async fn handle(mut self, stream: TcpStream) -> Outcome {
        let outcome = match self.run(stream).await {
            Ok(status) => Outcome::Closed(status),
            Err(rejection) => {
                self.log_rejection(&rejection);
                Outcome::Rejected(rejection)
            }
        };
        self.transition(outcome.state());
        outcome
    }

    async fn run(&mut self, mut stream: TcpStream) -> Result<ExitStatus, Rejection> {
        let mut reader = LineReader::new(self.config.max_line);
        if self.config.auth_enabled() {
            reader = reader.with_timeout(self.config.read_timeout);
        }

        let line = reader.read_line(&mut stream).await?;
        trace!(peer = %self.peer, len = line.len(), "Line received");

        self.transition(ConnState::Authenticating);
        let command = authenticate(line, &self.config.secret)?;

        self.transition(ConnState::Executing);
        let io = ShellIo::for_connection(stream, self.config.output)?;
        info!(peer = %self.peer, command = %command, "Running");

        let status = self.executor.execute(command, io).await?;
        debug!(peer = %self.peer, %status, "Command finished");
        Ok(status)
    }

    fn log_rejection(&self, rejection: &Rejection) {
        match rejection {
            Rejection::Framing(e) => debug!(peer = %self.peer, error = %e, "Dropping connection"),
            Rejection::Auth(e) => warn!(peer = %self.peer, error = %e, "Rejected command"),
            Rejection::Exec(e) => error!(peer = %self.peer, error = %e, "Failed to run command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputMode;
    use crate::exec::testing::RecordingExecutor;
    use crate::exec::ShellExecutor;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Connect a client to a fresh loopback listener and return both ends.
    async fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    fn config_with_secret(secret: &'static [u8]) -> Config {
        Config {
            secret: Bytes::from_static(secret),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_authenticated_command_runs() {
        let (mut client, server, peer) = socket_pair().await;
        let config = config_with_secret(b"s3cr3t");
        let (executor, mut rx) = RecordingExecutor::new();

        client.write_all(b"s3cr3techo hi\n").await.unwrap();
        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;

        assert_eq!(outcome.state(), ConnState::Closed);
        let recorded = rx.try_recv().unwrap();
        assert_eq!(recorded.command, b"echo hi");
        assert!(!recorded.attached);
    }

    #[tokio::test]
    async fn test_secret_mismatch_rejected() {
        let (mut client, server, peer) = socket_pair().await;
        let config = config_with_secret(b"s3cr3t");
        let (executor, mut rx) = RecordingExecutor::new();

        client.write_all(b"wrongecho hi\n").await.unwrap();
        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;

        assert!(matches!(
            outcome,
            Outcome::Rejected(Rejection::Auth(AuthError::SecretMismatch))
        ));
        assert!(rx.try_recv().is_err());

        // Closed without a single response byte.
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_client_hangs_up_early() {
        let (mut client, server, peer) = socket_pair().await;
        let config = Config::default();
        let (executor, mut rx) = RecordingExecutor::new();

        client.write_all(b"echo partial").await.unwrap();
        drop(client);
        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;

        assert!(matches!(
            outcome,
            Outcome::Rejected(Rejection::Framing(FramingError::ConnectionError(_)))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_idle_client_times_out_when_authenticating() {
        let (_client, server, peer) = socket_pair().await;
        let config = Config {
            read_timeout: Duration::from_millis(50),
            ..config_with_secret(b"s3cr3t")
        };
        let (executor, mut rx) = RecordingExecutor::new();

        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;

        match outcome {
            Outcome::Rejected(Rejection::Framing(FramingError::ConnectionError(e))) => {
                assert_eq!(e.kind(), std::io::ErrorKind::TimedOut)
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_idle_timeout_without_secret() {
        let (mut client, server, peer) = socket_pair().await;
        let config = Config {
            read_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        let (executor, mut rx) = RecordingExecutor::new();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            client.write_all(b"uptime\n").await.unwrap();
            client
        });

        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;

        assert_eq!(outcome.state(), ConnState::Closed);
        assert_eq!(rx.try_recv().unwrap().command, b"uptime");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_output_mode_hands_over_socket() {
        let (mut client, server, peer) = socket_pair().await;
        let config = Config {
            output: OutputMode::Client,
            ..Config::default()
        };
        let (executor, mut rx) = RecordingExecutor::new();

        client.write_all(b"ls -la\n").await.unwrap();
        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;

        assert_eq!(outcome.state(), ConnState::Closed);
        let recorded = rx.try_recv().unwrap();
        assert_eq!(recorded.command, b"ls -la");
        assert!(recorded.attached);
    }

    #[tokio::test]
    async fn test_shell_output_reaches_client() {
        let (mut client, server, peer) = socket_pair().await;
        let config = Config {
            output: OutputMode::Client,
            shell: "/bin/sh".into(),
            ..config_with_secret(b"key")
        };
        let executor = ShellExecutor::from_config(&config);

        client.write_all(b"keyecho hi; echo oops >&2\n").await.unwrap();
        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;
        assert!(matches!(outcome, Outcome::Closed(status) if status.success()));

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "hi\noops\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_rejects() {
        let (mut client, server, peer) = socket_pair().await;
        let config = Config {
            shell: "/nonexistent/bin/bash".into(),
            ..Config::default()
        };
        let executor = ShellExecutor::from_config(&config);

        client.write_all(b"true\n").await.unwrap();
        let outcome = Connection::new(peer, &config, &executor)
            .handle(server)
            .await;

        assert!(matches!(
            outcome,
            Outcome::Rejected(Rejection::Exec(ExecError::SpawnFailed { .. }))
        ));
    }
}
