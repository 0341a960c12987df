//! Configuration module for rshd-lite.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use bytes::Bytes;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest secret accepted from a secret file.
pub const MAX_SECRET_LEN: usize = 128;

/// Default line buffer capacity, including the reserved terminator byte.
pub const DEFAULT_MAX_LINE: usize = 4096;

/// Largest configurable line buffer.
pub const MAX_LINE_LIMIT: usize = 1024 * 1024;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "rshd-lite")]
#[command(author = "rshd-lite authors")]
#[command(version = "0.1.0")]
#[command(
    about = "Runs shell commands received over TCP",
    long_about = "Listens on a TCP socket and runs every received line as `<shell> -c <line>`.\n\
                  Anyone able to connect (and knowing the secret, if one is set) can run\n\
                  arbitrary commands as the server's user."
)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IPv4 address to bind to
    #[arg(short = 'H', long)]
    pub host: Option<Ipv4Addr>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// File holding the shared secret every command must start with
    #[arg(short, long)]
    pub secret_file: Option<PathBuf>,

    /// Shell used to run commands
    #[arg(long)]
    pub shell: Option<PathBuf>,

    /// Where the shell's stdin/stdout/stderr go
    #[arg(long, value_enum)]
    pub output: Option<OutputMode>,

    /// Idle read timeout in milliseconds (applied when a secret is set)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Line buffer capacity in bytes; the longest accepted line is one byte less
    #[arg(long)]
    pub max_line: Option<usize>,

    /// Acknowledge that this server executes arbitrary shell text
    #[arg(long)]
    pub allow_remote_exec: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Where a spawned shell's standard streams are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Close the connection first; the shell inherits the server's stdio.
    #[default]
    Server,
    /// Hand the connection to the shell as its stdin, stdout and stderr.
    Client,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub exec: ExecSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// IPv4 address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Deserialize)]
pub struct AuthSection {
    /// Secret file; no file means authentication is disabled
    pub secret_file: Option<PathBuf>,
    /// Idle read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            secret_file: None,
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Command execution configuration
#[derive(Debug, Deserialize)]
pub struct ExecSection {
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
    #[serde(default)]
    pub output: OutputMode,
    #[serde(default)]
    pub allow_remote_exec: bool,
    #[serde(default = "default_max_line")]
    pub max_line: usize,
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            output: OutputMode::default(),
            allow_remote_exec: false,
            max_line: default_max_line(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    Ipv4Addr::LOCALHOST.to_string()
}

fn default_port() -> u16 {
    1337
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/bash")
}

fn default_max_line() -> usize {
    DEFAULT_MAX_LINE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: Ipv4Addr,
    pub port: u16,
    /// Required command prefix; empty disables authentication.
    pub secret: Bytes,
    pub shell: PathBuf,
    pub output: OutputMode,
    pub read_timeout: Duration,
    /// Line buffer capacity, including the reserved terminator byte.
    pub max_line: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            port: default_port(),
            secret: Bytes::new(),
            shell: default_shell(),
            output: OutputMode::default(),
            read_timeout: Duration::from_millis(default_read_timeout_ms()),
            max_line: DEFAULT_MAX_LINE,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        if !(cli.allow_remote_exec || toml_config.exec.allow_remote_exec) {
            return Err(ConfigError::RemoteExecNotAllowed);
        }

        let host = match cli.host {
            Some(host) => host,
            None => toml_config
                .server
                .host
                .parse()
                .map_err(|_| ConfigError::InvalidHost(toml_config.server.host.clone()))?,
        };

        let secret = match cli.secret_file.or(toml_config.auth.secret_file) {
            Some(path) => read_secret_file(&path)?,
            None => Bytes::new(),
        };

        let max_line = cli.max_line.unwrap_or(toml_config.exec.max_line);
        if !(2..=MAX_LINE_LIMIT).contains(&max_line) {
            return Err(ConfigError::InvalidMaxLine(max_line));
        }

        let read_timeout_ms = cli
            .read_timeout_ms
            .unwrap_or(toml_config.auth.read_timeout_ms);
        if read_timeout_ms == 0 {
            return Err(ConfigError::InvalidReadTimeout);
        }

        Ok(Config {
            host,
            port: cli.port.unwrap_or(toml_config.server.port),
            secret,
            shell: cli.shell.unwrap_or(toml_config.exec.shell),
            output: cli.output.unwrap_or(toml_config.exec.output),
            read_timeout: Duration::from_millis(read_timeout_ms),
            max_line,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Whether connections must present the secret prefix.
    pub fn auth_enabled(&self) -> bool {
        !self.secret.is_empty()
    }
}

/// Read a secret file, capped at [`MAX_SECRET_LEN`] bytes.
///
/// A single trailing line ending is dropped: framed lines never contain a
/// newline, so a secret ending in one could never match.
pub fn read_secret_file(path: &Path) -> Result<Bytes, ConfigError> {
    let file =
        std::fs::File::open(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;

    // Room for the cap plus a trailing "\r\n"; anything past that is too long anyway.
    let mut contents = Vec::with_capacity(MAX_SECRET_LEN + 2);
    file.take(MAX_SECRET_LEN as u64 + 3)
        .read_to_end(&mut contents)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;

    if contents.ends_with(b"\n") {
        contents.pop();
        if contents.ends_with(b"\r") {
            contents.pop();
        }
    }

    if contents.len() > MAX_SECRET_LEN {
        return Err(ConfigError::SecretTooLong(path.to_path_buf()));
    }

    Ok(Bytes::from(contents))
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Secret file '{}' exceeds {} bytes", .0.display(), MAX_SECRET_LEN)]
    SecretTooLong(PathBuf),

    #[error("Line buffer must be between 2 and {} bytes, got {}", MAX_LINE_LIMIT, .0)]
    InvalidMaxLine(usize),

    #[error("Read timeout must be at least 1 ms")]
    InvalidReadTimeout,

    #[error(
        "This server runs arbitrary shell commands sent over the network; \
         pass --allow-remote-exec (or set exec.allow_remote_exec) to start it"
    )]
    RemoteExecNotAllowed,
}
