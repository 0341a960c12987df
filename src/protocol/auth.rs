//! Shared-secret prefix check.

use super::{Command, RawLine};

/// Authentication failure. Deliberately carries no detail about how much
/// of the secret matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("secret mismatch")]
    SecretMismatch,
}

/// Check that `line` starts with `secret` and return the rest as a command.
///
/// An empty secret disables authentication and accepts every line. The
/// remainder is returned unmodified, whitespace included.
pub fn authenticate(line: RawLine, secret: &[u8]) -> Result<Command, AuthError> {
    let bytes = line.0;
    if secret.len() > bytes.len() {
        return Err(AuthError::SecretMismatch);
    }

    // Compare every byte so the time taken does not depend on the first mismatch.
    let diff = secret
        .iter()
        .zip(&bytes[..secret.len()])
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff != 0 {
        return Err(AuthError::SecretMismatch);
    }

    Ok(Command(bytes.slice(secret.len()..)))
}
