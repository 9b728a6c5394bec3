// ABOUTME: RemoteHost implementation over a russh session plus rsync for tree transfer.
// ABOUTME: Logs every command's exit status and stderr into the run log.

use super::{
    CommandOutput, Connector, RemoteError, RemoteHost, RsyncTransfer, TransferRequest, quote,
};
use crate::config::DeploymentConfig;
use crate::ssh::{Session, SessionConfig};
use async_trait::async_trait;
use std::path::PathBuf;

/// A connected target host.
#[derive(Debug)]
pub struct SshHost {
    address: String,
    session: Session,
    rsync: RsyncTransfer,
}

impl SshHost {
    pub fn new(session: Session, rsync: RsyncTransfer) -> Self {
        Self {
            address: session.config().host.clone(),
            session,
            rsync,
        }
    }

    pub async fn disconnect(self) -> Result<(), RemoteError> {
        self.session.disconnect().await.map_err(RemoteError::from)
    }
}

fn log_output(command: &str, output: &CommandOutput) {
    let stderr = output.stderr.trim();
    if output.success() {
        tracing::debug!(target: "slipway::remote", exit_code = output.exit_code, "{}", command);
    } else {
        tracing::info!(target: "slipway::remote", exit_code = output.exit_code, "{}", command);
    }
    if !stderr.is_empty() {
        tracing::info!(target: "slipway::remote", "stderr: {}", stderr);
    }
}

#[async_trait]
impl RemoteHost for SshHost {
    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = self.session.exec(command).await?;
        log_output(command, &output);
        Ok(output)
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<CommandOutput, RemoteError> {
        let command = format!("cat > {}", quote(path));
        let output = self
            .session
            .exec_with_stdin(&command, contents.as_bytes())
            .await?;
        log_output(&command, &output);
        Ok(output)
    }

    async fn transfer_tree(&self, request: &TransferRequest) -> Result<CommandOutput, RemoteError> {
        let output = self.rsync.run(request).await?;
        log_output(
            &format!("rsync {} -> {}", request.local.display(), request.remote),
            &output,
        );
        Ok(output)
    }
}

/// Opens [`SshHost`]s using the deployment target settings.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    /// Alternate known_hosts file; defaults to ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
}

#[async_trait]
impl Connector for SshConnector {
    type Host = SshHost;

    async fn connect(&self, config: &DeploymentConfig) -> Result<SshHost, RemoteError> {
        let target = &config.target;
        let mut session_config = SessionConfig::new(&target.host, &target.user)
            .port(target.port)
            .connect_timeout(config.connect_timeout);
        if let Some(key) = &target.key_path {
            session_config = session_config.key_path(key);
        }
        if let Some(path) = &self.known_hosts_path {
            session_config = session_config.known_hosts_path(path);
        }

        let session = Session::connect(session_config).await?;

        let mut rsync = RsyncTransfer::new(&target.user, &target.host, target.port);
        rsync.key_path = target.key_path.clone();
        rsync.connect_timeout = config.connect_timeout;

        Ok(SshHost::new(session, rsync))
    }

    async fn disconnect(&self, host: SshHost) -> Result<(), RemoteError> {
        host.disconnect().await
    }
}
