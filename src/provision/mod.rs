// ABOUTME: Idempotent installation of the container runtime, compose tooling, rsync and nginx.
// ABOUTME: Every step is guarded by a check so re-running on a provisioned host changes nothing.

mod facts;

pub use facts::{HostFacts, OsFamily, PackageManager};

use crate::config::DeploymentConfig;
use crate::remote::{
    Privilege, RemoteError, RemoteHost, RemoteScript, ScriptError, ScriptReport, Step, quote,
};
use std::fmt;
use std::time::Duration;

/// How compose is invoked on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeTool {
    /// `docker compose` (CLI plugin).
    Plugin,
    /// `docker-compose` (standalone binary).
    Standalone,
}

impl ComposeTool {
    pub fn command(&self) -> &'static str {
        match self {
            ComposeTool::Plugin => "docker compose",
            ComposeTool::Standalone => "docker-compose",
        }
    }
}

impl fmt::Display for ComposeTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to detect host platform: {0}")]
    Detect(String),

    #[error("no supported package manager (apt-get, dnf, yum, apk) available to install {0}")]
    NoPackageManager(&'static str),

    #[error(transparent)]
    Step(#[from] ScriptError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// What provisioning found and did.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub facts: HostFacts,
    pub compose: ComposeTool,
    pub steps: ScriptReport,
}

const DOCKER_INSTALL: &str = "curl -fsSL https://get.docker.com | sh";
const COMPOSE_BINARY: &str = "/usr/local/bin/docker-compose";

/// Brings a host to the state the rest of the pipeline expects.
#[derive(Debug)]
pub struct DependencyProvisioner<'a> {
    user: &'a str,
    privilege: Privilege,
}

impl<'a> DependencyProvisioner<'a> {
    pub fn new(config: &'a DeploymentConfig) -> Self {
        Self {
            user: &config.target.user,
            privilege: config.privilege,
        }
    }

    pub async fn provision<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
    ) -> Result<ProvisionReport, ProvisionError> {
        let facts = self.detect(host).await?;
        tracing::info!(
            "host platform: {} {} ({}), package manager: {}",
            facts.kernel,
            facts.arch,
            facts.os,
            facts
                .package_manager
                .map(|pm| pm.binary())
                .unwrap_or("none")
        );

        let mut steps = RemoteScript::new()
            .step(
                Step::fatal("install container runtime", self.privilege.elevate(DOCKER_INSTALL))
                    .unless("command -v docker"),
            )
            .run(host)
            .await?;

        let compose = self.ensure_compose(host, &facts, &mut steps).await?;
        tracing::info!("compose tool: {}", compose);

        let mut script = RemoteScript::new();
        for (role, package) in [("file transfer tool", "rsync"), ("reverse proxy", "nginx")] {
            let present = self.privilege.elevate(&format!("command -v {package}"));
            match facts.package_manager {
                Some(pm) => script.push(
                    Step::fatal(
                        format!("install {role}"),
                        self.privilege.elevate(&pm.install(package)),
                    )
                    .unless(present)
                    .retries(2, Duration::from_secs(5)),
                ),
                None if !host.exec(&present).await?.success() => {
                    return Err(ProvisionError::NoPackageManager(package));
                }
                None => {}
            }
        }
        if self.user != "root" {
            let user = quote(self.user);
            script.push(
                Step::fatal(
                    "grant container access",
                    self.privilege.elevate(&format!("usermod -aG docker {user}")),
                )
                .unless(format!("id -nG {user} | grep -qw docker")),
            );
        }
        for service in ["docker", "nginx"] {
            script.push(
                Step::fatal(
                    format!("enable {service}"),
                    self.privilege
                        .elevate(&format!("systemctl enable --now {service}")),
                )
                .unless(format!(
                    "systemctl is-enabled --quiet {service} && systemctl is-active --quiet {service}"
                )),
            );
        }
        steps.extend(script.run(host).await?);

        Ok(ProvisionReport {
            facts,
            compose,
            steps,
        })
    }

    async fn detect<H: RemoteHost + ?Sized>(&self, host: &H) -> Result<HostFacts, ProvisionError> {
        let output = host.exec(facts::DETECT_COMMAND).await?;
        if !output.success() {
            return Err(ProvisionError::Detect(output.stderr.trim().to_string()));
        }
        HostFacts::parse(&output.stdout).map_err(ProvisionError::Detect)
    }

    /// Prefer the compose plugin, then an existing standalone binary, then
    /// install the plugin, and as a last resort download the release binary.
    async fn ensure_compose<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        facts: &HostFacts,
        steps: &mut ScriptReport,
    ) -> Result<ComposeTool, ProvisionError> {
        if host.exec("docker compose version").await?.success() {
            return Ok(ComposeTool::Plugin);
        }
        if host.exec("command -v docker-compose").await?.success() {
            return Ok(ComposeTool::Standalone);
        }

        if let Some(pm) = facts.package_manager {
            let report = RemoteScript::new()
                .step(Step::recoverable(
                    "install compose plugin",
                    self.privilege.elevate(&pm.install(pm.compose_plugin())),
                ))
                .run(host)
                .await?;
            steps.extend(report);
            if host.exec("docker compose version").await?.success() {
                return Ok(ComposeTool::Plugin);
            }
        }

        let url = format!(
            "https://github.com/docker/compose/releases/latest/download/docker-compose-{}-{}",
            facts.kernel.to_lowercase(),
            facts.compose_arch()
        );
        let report = RemoteScript::new()
            .step(Step::fatal(
                "download compose binary",
                self.privilege.elevate(&format!(
                    "curl -fsSL {} -o {COMPOSE_BINARY} && chmod +x {COMPOSE_BINARY}",
                    quote(&url)
                )),
            ))
            .run(host)
            .await?;
        steps.extend(report);
        Ok(ComposeTool::Standalone)
    }
}
