// ABOUTME: Starts the workload for the active release, via compose or a single built image.
// ABOUTME: Strategy is derived from the release contents: a compose manifest always wins.

use crate::config::DeploymentConfig;
use crate::provision::ComposeTool;
use crate::release::Release;
use crate::remote::{
    Privilege, RemoteError, RemoteHost, RemoteScript, ScriptError, ScriptReport, Step, quote,
};
use std::fmt;

/// Recognised compose manifest names, in lookup order.
pub const COMPOSE_MANIFESTS: [&str; 2] = ["docker-compose.yml", "docker-compose.yaml"];

const COMPOSE_DOWN: &str = "stop previous stack";
const COMPOSE_PULL: &str = "pull images";
const COMPOSE_UP: &str = "start stack";
const IMAGE_BUILD: &str = "build image";
const CONTAINER_REMOVE: &str = "remove previous container";
const CONTAINER_RUN: &str = "run container";
// Teardown of the other strategy, in case the previous release used it.
const FOREIGN_CONTAINER_REMOVE: &str = "remove single-image container";
const FOREIGN_STACK_DOWN: &str = "stop compose project";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Multi-service manifest at this path.
    Compose { manifest: String },
    /// Build the release directory's Dockerfile and run one container.
    SingleImage { image: String },
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Compose { manifest } => write!(f, "compose ({})", manifest),
            Strategy::SingleImage { image } => write!(f, "single image ({})", image),
        }
    }
}

/// Derived per deployment; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    pub strategy: Strategy,
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("no compose manifest and no Dockerfile in {0}")]
    NoDockerfile(String),

    #[error("image build failed: {0}")]
    Build(#[source] ScriptError),

    #[error("container run failed: {0}")]
    Run(#[source] ScriptError),

    #[error("compose up failed: {0}")]
    ComposeUp(#[source] ScriptError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub workload: WorkloadDescriptor,
    pub steps: ScriptReport,
}

/// Single-image tag: `<site>:<release-name>`, lowercased for the registry grammar.
pub fn image_tag(config: &DeploymentConfig, release: &Release) -> String {
    format!("{}:{}", config.site, release.name).to_lowercase()
}

#[derive(Debug)]
pub struct WorkloadLauncher<'a> {
    config: &'a DeploymentConfig,
    compose: ComposeTool,
    privilege: Privilege,
}

impl<'a> WorkloadLauncher<'a> {
    pub fn new(config: &'a DeploymentConfig, compose: ComposeTool) -> Self {
        Self {
            config,
            compose,
            privilege: config.privilege,
        }
    }

    /// Inspect the active release and pick a strategy.
    pub async fn detect<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        release: &Release,
    ) -> Result<WorkloadDescriptor, RemoteError> {
        let current = self.config.current_path();
        for name in COMPOSE_MANIFESTS {
            let manifest = format!("{}/{}", current, name);
            if host.file_exists(&manifest).await? {
                return Ok(WorkloadDescriptor {
                    strategy: Strategy::Compose { manifest },
                    port: self.config.port,
                });
            }
        }
        Ok(WorkloadDescriptor {
            strategy: Strategy::SingleImage {
                image: image_tag(self.config, release),
            },
            port: self.config.port,
        })
    }

    pub async fn launch<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        release: &Release,
    ) -> Result<LaunchResult, LaunchError> {
        let workload = self.detect(host, release).await?;
        tracing::info!("launch strategy: {}", workload.strategy);

        let steps = match &workload.strategy {
            Strategy::Compose { manifest } => self.compose(host, manifest).await?,
            Strategy::SingleImage { image } => self.single_image(host, image).await?,
        };
        Ok(LaunchResult { workload, steps })
    }

    fn compose_command(&self, manifest: &str, args: &str) -> String {
        self.privilege.elevate(&format!(
            "cd {dir} && {tool} -p {project} -f {manifest} {args}",
            dir = quote(&self.config.current_path()),
            tool = self.compose.command(),
            project = quote(self.config.site.as_str()),
            manifest = quote(manifest),
        ))
    }

    /// `down` by project name alone, for when the manifest is not in this release.
    fn project_down_command(&self) -> String {
        self.privilege.elevate(&format!(
            "{} -p {} down --remove-orphans",
            self.compose.command(),
            quote(self.config.site.as_str()),
        ))
    }

    fn container_remove_command(&self) -> String {
        self.privilege.elevate(&format!("docker rm -f {}", quote(self.config.site.as_str())))
    }

    async fn compose<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        manifest: &str,
    ) -> Result<ScriptReport, LaunchError> {
        // Locally built images cannot be pulled; that must not stop the run.
        let mut report = RemoteScript::new()
            .step(Step::recoverable(
                COMPOSE_DOWN,
                self.compose_command(manifest, "down --remove-orphans"),
            ))
            .step(Step::recoverable(FOREIGN_CONTAINER_REMOVE, self.container_remove_command()))
            .step(Step::recoverable(
                COMPOSE_PULL,
                self.compose_command(manifest, "pull --ignore-pull-failures"),
            ))
            .run(host)
            .await
            .map_err(LaunchError::ComposeUp)?;

        let up = RemoteScript::new()
            .step(Step::fatal(
                COMPOSE_UP,
                self.compose_command(manifest, "up -d --build --remove-orphans"),
            ))
            .run(host)
            .await
            .map_err(LaunchError::ComposeUp)?;
        report.extend(up);
        Ok(report)
    }

    async fn single_image<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        image: &str,
    ) -> Result<ScriptReport, LaunchError> {
        let current = self.config.current_path();
        let dockerfile = format!("{}/Dockerfile", current);
        if !host.file_exists(&dockerfile).await? {
            return Err(LaunchError::NoDockerfile(current));
        }

        let mut report = RemoteScript::new()
            .step(Step::fatal(
                IMAGE_BUILD,
                self.privilege.elevate(&format!(
                    "docker build -t {} {}",
                    quote(image),
                    quote(&current)
                )),
            ))
            .run(host)
            .await
            .map_err(LaunchError::Build)?;

        let name = quote(self.config.site.as_str());
        let port = self.config.port;
        let run = RemoteScript::new()
            .step(Step::recoverable(FOREIGN_STACK_DOWN, self.project_down_command()))
            .step(Step::recoverable(CONTAINER_REMOVE, self.container_remove_command()))
            .step(Step::fatal(
                CONTAINER_RUN,
                self.privilege.elevate(&format!(
                    "docker run -d --name {name} --restart unless-stopped \
                     -p 127.0.0.1:{port}:{port} {}",
                    quote(image)
                )),
            ))
            .run(host)
            .await
            .map_err(LaunchError::Run)?;
        report.extend(run);
        Ok(report)
    }
}
