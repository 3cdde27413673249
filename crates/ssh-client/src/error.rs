//! SSH client errors

use thiserror::Error;

/// Errors raised while connecting to or talking with a remote host
#[derive(Debug, Error)]
pub enum SshError {
    /// Protocol or transport failure
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// The private key could not be loaded
    #[error("Key error: {0}")]
    Key(#[from] russh_keys::Error),

    /// The server refused the public key
    #[error("Authentication rejected for {user}@{host}")]
    AuthRejected { user: String, host: String },

    /// Connecting took longer than the connect timeout
    #[error("Timed out connecting to {0}")]
    Timeout(String),

    /// A remote command exited with a non-zero status
    #[error("Command `{command}` exited with status {status}: {output}")]
    CommandFailed {
        command: String,
        status: u32,
        output: String,
    },

    /// The channel closed without reporting an exit status
    #[error("Command `{0}` ended without an exit status")]
    NoExitStatus(String),
}
