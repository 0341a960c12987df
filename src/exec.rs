//! Shell command execution.
//!
//! Every accepted command runs as `<shell> -c <command>` with the server's
//! environment. The executor waits for the shell to exit so no child is
//! left unreaped.

use crate::config::{Config, OutputMode};
use crate::protocol::Command;
use std::future::Future;
use std::io;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::net::TcpStream;

/// Where the shell's standard streams point.
#[derive(Debug)]
pub enum ShellIo {
    /// Inherit the server's stdout and stderr; stdin is `/dev/null`.
    Inherit,
    /// Use this socket (in blocking mode) for all three streams.
    Socket(OwnedFd),
}

impl ShellIo {
    /// Pick the stdio wiring for `mode`, consuming the connection.
    ///
    /// In [`OutputMode::Server`] the connection is closed here, before the
    /// shell starts.
    pub fn for_connection(stream: TcpStream, mode: OutputMode) -> Result<Self, ExecError> {
        match mode {
            OutputMode::Server => {
                drop(stream);
                Ok(ShellIo::Inherit)
            }
            OutputMode::Client => {
                let stream = stream.into_std().map_err(ExecError::HandOff)?;
                stream.set_nonblocking(false).map_err(ExecError::HandOff)?;
                Ok(ShellIo::Socket(OwnedFd::from(stream)))
            }
        }
    }
}

/// Command execution errors
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {}: {}", .shell.display(), .source)]
    SpawnFailed {
        shell: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to hand the connection to the shell: {0}")]
    HandOff(#[source] io::Error),

    #[error("failed to wait for the shell: {0}")]
    Wait(#[source] io::Error),
}

/// Runs authenticated commands.
pub trait Executor: Send + Sync + 'static {
    /// Run `command` to completion and return its exit status.
    fn execute(
        &self,
        command: Command,
        io: ShellIo,
    ) -> impl Future<Output = Result<ExitStatus, ExecError>> + Send;
}

/// Runs commands through a real shell.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: PathBuf,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.shell.clone())
    }

    pub fn shell(&self) -> &std::path::Path {
        &self.shell
    }

    fn spawn(&self, command: &Command, io: ShellIo) -> Result<tokio::process::Child, ExecError> {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command.as_os_str())
            // Keep a terminal Ctrl-C aimed at the server away from running commands.
            .process_group(0);

        match io {
            // The shell runs outside the server's process group, so reading a
            // terminal it does not control would stop it with SIGTTIN.
            ShellIo::Inherit => {
                cmd.stdin(Stdio::null());
            }
            ShellIo::Socket(fd) => {
                let stdout = fd.try_clone().map_err(ExecError::HandOff)?;
                let stderr = fd.try_clone().map_err(ExecError::HandOff)?;
                cmd.stdin(Stdio::from(fd))
                    .stdout(Stdio::from(stdout))
                    .stderr(Stdio::from(stderr));
            }
        }

        // `cmd` owns the socket copies and closes them when this returns.
        cmd.spawn().map_err(|source| ExecError::SpawnFailed {
            shell: self.shell.clone(),
            source,
        })
    }
}

impl Executor for ShellExecutor {
    async fn execute(&self, command: Command, io: ShellIo) -> Result<ExitStatus, ExecError> {
        let mut child = self.spawn(&command, io)?;
        child.wait().await.map_err(ExecError::Wait)
    }
}
