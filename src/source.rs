// ABOUTME: Produces the local working tree that becomes a release.
// ABOUTME: Uses a configured directory as-is, or shallow-clones the branch into a temp dir.

use crate::config::DeploymentConfig;
use crate::types::Secret;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source directory does not exist: {0}")]
    MissingDir(PathBuf),

    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git clone of {repository} ({branch}) failed: {stderr}")]
    CloneFailed {
        repository: String,
        branch: String,
        stderr: String,
    },
}

/// A local tree ready to publish. A cloned tree is deleted on drop.
#[derive(Debug)]
pub enum SourceTree {
    Local(PathBuf),
    Cloned(TempDir),
}

impl SourceTree {
    pub fn path(&self) -> &Path {
        match self {
            SourceTree::Local(path) => path,
            SourceTree::Cloned(dir) => dir.path(),
        }
    }
}

/// Insert the token as userinfo for HTTPS remotes. Other schemes are untouched.
pub fn authenticated_url(repository: &str, token: Option<&Secret>) -> String {
    match (token, repository.strip_prefix("https://")) {
        (Some(token), Some(rest)) if !rest.contains('@') => format!(
            "https://x-access-token:{}@{}",
            urlencoding::encode(token.expose()),
            rest
        ),
        _ => repository.to_string(),
    }
}

/// Resolve the tree to publish for `config`.
pub async fn fetch(config: &DeploymentConfig) -> Result<SourceTree, SourceError> {
    if let Some(dir) = &config.source_dir {
        if !dir.is_dir() {
            return Err(SourceError::MissingDir(dir.clone()));
        }
        tracing::info!("using local source tree {}", dir.display());
        return Ok(SourceTree::Local(dir.clone()));
    }

    let dir = tempfile::Builder::new()
        .prefix(&format!("slipway-{}-", config.site))
        .tempdir()
        .map_err(SourceError::TempDir)?;

    let url = authenticated_url(&config.repository, config.token.as_ref());
    let redact = |text: &str| match &config.token {
        Some(token) => {
            let encoded = urlencoding::encode(token.expose()).into_owned();
            token.redact(text).replace(&encoded, &token.masked())
        }
        None => text.to_string(),
    };

    tracing::info!(
        "git clone --depth 1 --branch {} {}",
        config.branch,
        redact(&url)
    );

    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--branch", config.branch.as_str(), "--"])
        .arg(&url)
        .arg(dir.path())
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(SourceError::Spawn)?;

    if !output.status.success() {
        let stderr = redact(String::from_utf8_lossy(&output.stderr).trim());
        tracing::error!("git clone failed: {}", stderr);
        return Err(SourceError::CloneFailed {
            repository: redact(&config.repository),
            branch: config.branch.to_string(),
            stderr,
        });
    }

    Ok(SourceTree::Cloned(dir))
}
