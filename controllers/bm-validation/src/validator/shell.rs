//! Remote command execution seam

use crate::error::ControllerError;
use async_trait::async_trait;
use ssh_client::{ExecOutput, InstanceSession};
use std::path::Path;

/// Commands and file transfers on the host under validation.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command`; a non-zero exit status is reported in the output, not as an error.
    async fn exec(&self, command: &str) -> Result<ExecOutput, ControllerError>;

    /// Copy a local file to `remote` and set its mode.
    async fn upload_file(&self, local: &Path, remote: &str, mode: u32) -> Result<(), ControllerError>;

    /// Release the connection(s) behind the shell.
    async fn close(self: Box<Self>);
}

#[async_trait]
impl RemoteShell for InstanceSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, ControllerError> {
        Ok(InstanceSession::exec(self, command).await?)
    }

    async fn upload_file(&self, local: &Path, remote: &str, mode: u32) -> Result<(), ControllerError> {
        let file = tokio::fs::File::open(local).await.map_err(|e| {
            ControllerError::from(e).context(format!("opening {}", local.display()))
        })?;
        Ok(self.upload(file, remote, mode).await?)
    }

    async fn close(self: Box<Self>) {
        InstanceSession::close(*self).await;
    }
}
