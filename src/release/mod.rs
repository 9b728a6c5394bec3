// ABOUTME: Immutable release directories and the atomic "current" pointer swap.
// ABOUTME: A release is created, mirrored from the local tree, locked down, then activated by one rename.

use crate::config::DeploymentConfig;
use crate::remote::{
    Privilege, RemoteError, RemoteHost, RemoteScript, ScriptError, Step, TransferRequest, quote,
};
use crate::types::Branch;
use chrono::{DateTime, NaiveDateTime, Utc};
use snafu::{ResultExt, Snafu};
use std::fmt;
use std::path::Path;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Second-resolution release timestamp, fixed once per orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseStamp(String);

impl ReleaseStamp {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self(time.format(STAMP_FORMAT).to_string())
    }

    /// Parse a `YYYYmmddHHMMSS` stamp.
    pub fn parse(value: &str) -> Result<Self, String> {
        NaiveDateTime::parse_from_str(value, STAMP_FORMAT)
            .map_err(|e| format!("invalid release timestamp '{}': {}", value, e))?;
        if value.len() != 14 {
            return Err(format!("release timestamp '{}' must be 14 digits", value));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One deployable snapshot on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// `<branch>-<timestamp>`
    pub name: String,
    /// Absolute directory under the releases root.
    pub path: String,
}

impl Release {
    pub fn new(branch: &Branch, stamp: &ReleaseStamp, releases_root: &str) -> Self {
        let name = format!("{}-{}", branch.slug(), stamp);
        Self {
            path: format!("{}/{}", releases_root, name),
            name,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    #[snafu(display("release {path} already exists; releases are never modified in place"))]
    ReleaseExists { path: String },

    #[snafu(display("failed to create release directory {path}: {source}"))]
    CreateDir { path: String, source: ScriptError },

    #[snafu(display("transfer into {path} failed with exit code {exit_code}: {stderr}"))]
    Transfer {
        path: String,
        exit_code: u32,
        stderr: String,
    },

    #[snafu(display("failed to restrict permissions on {path}: {source}"))]
    Permissions { path: String, source: ScriptError },

    #[snafu(display("failed to activate {path}: {source}"))]
    Activation { path: String, source: ScriptError },

    #[snafu(display("remote error while publishing: {source}"))]
    Remote { source: RemoteError },
}

/// Reads the current pointer.
pub struct CurrentPointer;

impl CurrentPointer {
    /// The release directory `current` points at, if it exists.
    pub async fn read<H: RemoteHost + ?Sized>(
        host: &H,
        config: &DeploymentConfig,
    ) -> Result<Option<String>, RemoteError> {
        let output = host
            .exec(&format!("readlink {}", quote(&config.current_path())))
            .await?;
        let target = output.stdout.trim();
        Ok((output.success() && !target.is_empty()).then(|| target.to_string()))
    }
}

/// Creates, populates and activates releases.
#[derive(Debug)]
pub struct ReleasePublisher<'a> {
    config: &'a DeploymentConfig,
    privilege: Privilege,
}

impl<'a> ReleasePublisher<'a> {
    pub fn new(config: &'a DeploymentConfig) -> Self {
        Self {
            config,
            privilege: config.privilege,
        }
    }

    /// Create and activate a release from `local`. On any failure before the
    /// swap, the previous release stays active and the new directory is left
    /// on disk unreferenced.
    pub async fn publish<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        local: &Path,
        stamp: &ReleaseStamp,
    ) -> Result<Release, PublishError> {
        let release = Release::new(&self.config.branch, stamp, &self.config.releases_root());
        let path = release.path.clone();

        if host.file_exists(&path).await.context(RemoteSnafu)? {
            return ReleaseExistsSnafu { path }.fail();
        }

        self.create_dir(host, &release)
            .await
            .context(CreateDirSnafu { path: path.clone() })?;

        tracing::info!("syncing {} -> {}", local.display(), path);
        let output = host
            .transfer_tree(&TransferRequest::mirror(local, path.clone()))
            .await
            .context(RemoteSnafu)?;
        if !output.success() {
            return TransferSnafu {
                path,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .fail();
        }

        RemoteScript::new()
            .step(Step::fatal(
                "restrict release permissions",
                format!("chmod -R u=rwX,g=rX,o= {}", quote(&path)),
            ))
            .run(host)
            .await
            .context(PermissionsSnafu { path: path.clone() })?;

        self.activate(host, &release)
            .await
            .context(ActivationSnafu { path })?;

        tracing::info!("activated release {}", release.name);
        Ok(release)
    }

    async fn create_dir<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        release: &Release,
    ) -> Result<(), ScriptError> {
        let user = quote(&self.config.target.user);
        // Plain mkdir for the release itself: an existing directory is an error.
        let command = format!(
            "mkdir -p {root} && mkdir {dir} && chown {user}: {dir}",
            root = quote(&self.config.releases_root()),
            dir = quote(&release.path),
        );
        RemoteScript::new()
            .step(Step::fatal(
                "create release directory",
                self.privilege.elevate(&command),
            ))
            .run(host)
            .await
            .map(|_| ())
    }

    /// Repoint `current` with a rename over the existing link, so there is no
    /// instant at which `current` is missing or half-written.
    async fn activate<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        release: &Release,
    ) -> Result<(), ScriptError> {
        RemoteScript::new()
            .step(Step::fatal(
                "activate release",
                self.privilege.elevate(&activation_command(self.config, release)),
            ))
            .run(host)
            .await
            .map(|_| ())
    }
}

/// `ln` into a staging name, then `mv -T` (rename(2)) over `current`.
pub fn activation_command(config: &DeploymentConfig, release: &Release) -> String {
    let staging = format!("{}/.current-{}", config.app_base, release.name);
    format!(
        "ln -sfn {target} {staging} && mv -Tf {staging} {current} && chown -h {user}: {current}",
        target = quote(&release.path),
        staging = quote(&staging),
        current = quote(&config.current_path()),
        user = quote(&config.target.user),
    )
}
