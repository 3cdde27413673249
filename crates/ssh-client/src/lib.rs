//! SSH Client
//!
//! `SshClient::dial_bastion` opens a session to the bastion host and
//! `BastionSession::dial_through` tunnels a direct-tcpip channel to the
//! instance and runs a second SSH session over it. The instance session
//! supports command execution with combined output and file upload.

pub mod error;
pub mod session;

pub use error::SshError;
pub use session::{load_key, BastionSession, ExecOutput, InstanceSession, SshClient, SshTarget};
