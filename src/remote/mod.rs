// ABOUTME: Capability interface for operating on the target host.
// ABOUTME: Exposes RemoteHost (exec, existence checks, uploads, tree transfer) and its SSH implementation.

mod rsync;
mod script;
pub mod shell;
mod ssh_host;

pub use crate::ssh::CommandOutput;
pub use rsync::{DEFAULT_EXCLUDES, RsyncTransfer, TransferRequest};
pub use script::{OnFailure, RemoteScript, ScriptError, ScriptReport, Step, StepRecord, StepStatus};
pub use shell::{Privilege, quote};
pub use ssh_host::{SshConnector, SshHost};

use crate::config::DeploymentConfig;
use async_trait::async_trait;

/// Transport-level failures. A command that ran and exited non-zero is not an
/// error at this layer; it is a [`CommandOutput`] with a non-zero exit code.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),

    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} was terminated by a signal")]
    Killed { program: String },
}

/// Operations the deployment pipeline needs from the target host.
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// Host name or address the pipeline talks to.
    fn address(&self) -> &str;

    /// Run a shell command and capture its output.
    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Whether `path` exists on the host.
    async fn file_exists(&self, path: &str) -> Result<bool, RemoteError> {
        let output = self.exec(&format!("test -e {}", quote(path))).await?;
        Ok(output.success())
    }

    /// Write `contents` to `path`, replacing any existing file.
    async fn write_file(&self, path: &str, contents: &str) -> Result<CommandOutput, RemoteError>;

    /// Copy a local directory tree onto the host.
    async fn transfer_tree(&self, request: &TransferRequest) -> Result<CommandOutput, RemoteError>;
}

/// Opens a [`RemoteHost`] for a deployment target.
#[async_trait]
pub trait Connector: Send + Sync {
    type Host: RemoteHost + 'static;

    async fn connect(&self, config: &DeploymentConfig) -> Result<Self::Host, RemoteError>;

    /// Close the connection. Hosts without a session to tear down need not override this.
    async fn disconnect(&self, _host: Self::Host) -> Result<(), RemoteError> {
        Ok(())
    }
}
