//! Wire protocol for remote commands.
//!
//! A request is a single line: the shared secret immediately followed by
//! the shell command, terminated by `\n`.
//!
//! ```text
//! Request:  <secret><command>\n
//! Response: none (the server never writes to the connection)
//!
//! Example (secret = "s3cr3t"):
//! Request:  s3cr3techo hi\n
//! Runs:     /bin/bash -c "echo hi"
//! ```
//!
//! There is no quoting or escaping layer: every byte after the secret is
//! handed to the shell verbatim, leading and trailing whitespace included.
//! Bytes following the first newline are discarded.

pub mod auth;
pub mod reader;

pub use auth::{authenticate, AuthError};
pub use reader::{FramingError, LineReader};

use bytes::Bytes;
use std::ffi::OsStr;
use std::fmt;
use std::ops::Deref;
use std::os::unix::ffi::OsStrExt;

/// A framed request line, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine(Bytes);

impl RawLine {
    pub(crate) fn new(bytes: Bytes) -> Self {
        debug_assert!(!bytes.contains(&b'\n'), "framed line contains a newline");
        Self(bytes)
    }

}

impl Deref for RawLine {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Untrusted shell text taken from an authenticated line.
#[derive(Clone, PartialEq, Eq)]
pub struct Command(Bytes);

impl Command {
    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The command as a process argument, byte for byte.
    pub fn as_os_str(&self) -> &OsStr {
        OsStr::from_bytes(&self.0)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
