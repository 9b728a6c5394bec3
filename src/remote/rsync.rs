// ABOUTME: Directory tree transfer to the target host via the local rsync binary.
// ABOUTME: Mirrors exactly when requested (--delete) and skips VCS metadata and dependency caches.

use super::{CommandOutput, RemoteError};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Paths never shipped in a release: version-control metadata and dependency caches.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    "node_modules/",
    "__pycache__/",
    ".venv/",
    ".cache/",
];

/// A single tree transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Local directory whose contents are copied.
    pub local: PathBuf,
    /// Remote directory receiving the contents.
    pub remote: String,
    /// rsync exclude patterns.
    pub excludes: Vec<String>,
    /// Delete remote files that are absent locally.
    pub mirror_delete: bool,
}

impl TransferRequest {
    /// A mirroring transfer with the default exclusions.
    pub fn mirror(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            mirror_delete: true,
        }
    }
}

/// Runs rsync over ssh against one host.
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    pub rsync_bin: String,
    pub ssh_bin: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    pub key_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl RsyncTransfer {
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            rsync_bin: "rsync".to_string(),
            ssh_bin: "ssh".to_string(),
            user: user.into(),
            host: host.into(),
            port,
            key_path: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Remote shell passed to rsync; same host key policy as the SSH session.
    fn remote_shell(&self) -> String {
        let mut shell = format!(
            "{} -p {} -o BatchMode=yes -o StrictHostKeyChecking=accept-new -o ConnectTimeout={}",
            self.ssh_bin,
            self.port,
            self.connect_timeout.as_secs().max(1)
        );
        if let Some(key) = &self.key_path {
            shell.push_str(&format!(" -i {}", super::quote(&key.display().to_string())));
        }
        shell
    }

    pub fn build_args(&self, request: &TransferRequest) -> Vec<OsString> {
        let mut args = vec![OsString::from("-az")];
        if request.mirror_delete {
            args.push(OsString::from("--delete"));
        }
        for pattern in &request.excludes {
            args.push(OsString::from("--exclude"));
            args.push(OsString::from(pattern));
        }
        args.push(OsString::from("-e"));
        args.push(OsString::from(self.remote_shell()));

        // Trailing slashes copy directory contents rather than the directory itself.
        let mut source = request.local.clone().into_os_string();
        if !source.to_string_lossy().ends_with('/') {
            source.push("/");
        }
        args.push(source);
        let remote = request.remote.trim_end_matches('/');
        args.push(OsString::from(format!(
            "{}@{}:{}/",
            self.user, self.host, remote
        )));
        args
    }

    pub async fn run(&self, request: &TransferRequest) -> Result<CommandOutput, RemoteError> {
        let args = self.build_args(request);
        tracing::debug!(?args, "running {}", self.rsync_bin);

        let output = Command::new(&self.rsync_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RemoteError::Spawn {
                program: self.rsync_bin.clone(),
                message: e.to_string(),
            })?;

        let Some(code) = output.status.code() else {
            return Err(RemoteError::Killed {
                program: self.rsync_bin.clone(),
            });
        };

        Ok(CommandOutput {
            exit_code: code as u32,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
