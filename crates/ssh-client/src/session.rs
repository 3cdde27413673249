//! Bastion and instance sessions

use crate::error::SshError;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use std::path::Path;
use tokio::io::AsyncRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Load an OpenSSH private key from disk
pub fn load_key(path: impl AsRef<Path>) -> Result<KeyPair, SshError> {
    Ok(russh_keys::load_secret_key(path, None)?)
}

/// A user at a host:port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Instances are ephemeral and reimaged between runs, so their host keys are
/// never pinned.
#[derive(Debug)]
struct AcceptAnyHostKey;

#[async_trait::async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens instance sessions with a single key
#[derive(Clone)]
pub struct SshClient {
    config: Arc<client::Config>,
    key: Arc<KeyPair>,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient").finish_non_exhaustive()
    }
}

impl SshClient {
    pub fn new(key: KeyPair) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            key: Arc::new(key),
        }
    }

    /// Build a client from a private key file
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self, SshError> {
        Ok(Self::new(load_key(path)?))
    }

    /// Open and authenticate a session to the bastion host.
    pub async fn dial_bastion(&self, bastion: &SshTarget) -> Result<BastionSession, SshError> {
        let address = bastion.address();
        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(
                Arc::clone(&self.config),
                (bastion.host.as_str(), bastion.port),
                AcceptAnyHostKey,
            ),
        )
        .await
        .map_err(|_| SshError::Timeout(address.clone()))??;
        self.authenticate(&mut handle, bastion).await?;
        debug!("Connected to bastion {}", address);

        Ok(BastionSession {
            client: self.clone(),
            address,
            handle,
        })
    }

    async fn authenticate(&self, handle: &mut Handle<AcceptAnyHostKey>, target: &SshTarget) -> Result<(), SshError> {
        if handle
            .authenticate_publickey(target.user.as_str(), Arc::clone(&self.key))
            .await?
        {
            Ok(())
        } else {
            Err(SshError::AuthRejected {
                user: target.user.clone(),
                host: target.address(),
            })
        }
    }
}

/// An authenticated session to a bastion host
pub struct BastionSession {
    client: SshClient,
    address: String,
    handle: Handle<AcceptAnyHostKey>,
}

impl std::fmt::Debug for BastionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BastionSession")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl BastionSession {
    /// Tunnel to `instance` through the bastion and open a session over the tunnel.
    ///
    /// The bastion session is closed if the second hop fails.
    pub async fn dial_through(self, instance: &SshTarget) -> Result<InstanceSession, SshError> {
        match self.open_instance(instance).await {
            Ok(handle) => {
                debug!("Connected to instance {} via {}", instance.address(), self.address);
                Ok(InstanceSession {
                    bastion: self.handle,
                    instance: handle,
                })
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn open_instance(&self, instance: &SshTarget) -> Result<Handle<AcceptAnyHostKey>, SshError> {
        let tunnel = self
            .handle
            .channel_open_direct_tcpip(instance.host.as_str(), u32::from(instance.port), "127.0.0.1", 0)
            .await?;
        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect_stream(Arc::clone(&self.client.config), tunnel.into_stream(), AcceptAnyHostKey),
        )
        .await
        .map_err(|_| SshError::Timeout(instance.address()))??;
        self.client.authenticate(&mut handle, instance).await?;
        Ok(handle)
    }

    pub async fn close(self) {
        disconnect(&self.handle, "bastion").await;
    }
}

async fn disconnect(handle: &Handle<AcceptAnyHostKey>, which: &str) {
    if let Err(e) = handle.disconnect(Disconnect::ByApplication, "", "English").await {
        warn!("Failed to close {} session: {}", which, e);
    }
}

/// Output of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// stdout and stderr interleaved, trailing newline removed
    pub output: String,
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// An SSH session to an instance, tunnelled through its bastion
pub struct InstanceSession {
    bastion: Handle<AcceptAnyHostKey>,
    instance: Handle<AcceptAnyHostKey>,
}

impl std::fmt::Debug for InstanceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSession").finish_non_exhaustive()
    }
}

impl InstanceSession {
    /// Run `command` and collect its combined output.
    ///
    /// A non-zero exit status is reported in the result, not as an error.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        let mut channel = self.instance.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                    output.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        let output = String::from_utf8_lossy(&output);
        Ok(ExecOutput {
            output: output.strip_suffix('\n').unwrap_or(&output).to_string(),
            exit_status,
        })
    }

    /// Stream `contents` to `path` on the instance and set its mode.
    pub async fn upload<R>(&self, contents: R, path: &str, mode: u32) -> Result<(), SshError>
    where
        R: AsyncRead + Unpin,
    {
        let command = format!("cat > {path} && chmod {mode:o} {path}");
        let mut channel = self.instance.channel_open_session().await?;
        channel.exec(true, command.as_str()).await?;
        channel.data(contents).await?;
        channel.eof().await?;

        let mut exit_status = None;
        let mut output = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        match exit_status {
            Some(0) => {
                debug!("Uploaded {}", path);
                Ok(())
            }
            Some(status) => Err(SshError::CommandFailed {
                command,
                status,
                output: String::from_utf8_lossy(&output).trim_end().to_string(),
            }),
            None => Err(SshError::NoExitStatus(command)),
        }
    }

    /// Disconnect from the instance, then from the bastion.
    pub async fn close(self) {
        disconnect(&self.instance, "instance").await;
        disconnect(&self.bastion, "bastion").await;
    }
}
