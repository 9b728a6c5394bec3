// ABOUTME: Removes a site from the target: workload, proxy site and application base.
// ABOUTME: Everything but the final directory removal is best-effort.

use crate::config::DeploymentConfig;
use crate::error::{Error, Result};
use crate::launch::COMPOSE_MANIFESTS;
use crate::provision::ComposeTool;
use crate::proxy::ProxyConfigurer;
use crate::remote::{RemoteHost, RemoteScript, ScriptReport, Step, quote};

pub async fn teardown<H: RemoteHost + ?Sized>(
    host: &H,
    config: &DeploymentConfig,
) -> Result<ScriptReport> {
    let privilege = config.privilege;
    let current = config.current_path();
    let mut script = RemoteScript::new();

    let mut manifest = None;
    for name in COMPOSE_MANIFESTS {
        let path = format!("{}/{}", current, name);
        if host.file_exists(&path).await.map_err(Error::TeardownRemote)? {
            manifest = Some(path);
            break;
        }
    }
    if let Some(manifest) = manifest {
        let tool = if host
            .exec("docker compose version")
            .await
            .map_err(Error::TeardownRemote)?
            .success()
        {
            ComposeTool::Plugin
        } else {
            ComposeTool::Standalone
        };
        script.push(Step::recoverable(
            "stop stack",
            privilege.elevate(&format!(
                "cd {} && {} -p {} -f {} down --remove-orphans",
                quote(&current),
                tool.command(),
                quote(config.site.as_str()),
                quote(&manifest)
            )),
        ));
    }

    script.push(Step::recoverable(
        "remove container",
        privilege.elevate(&format!("docker rm -f {}", quote(config.site.as_str()))),
    ));
    for step in ProxyConfigurer::new(config).removal_script(&config.site).steps() {
        script.push(step.clone());
    }
    script.push(Step::fatal(
        "remove application directory",
        privilege.elevate(&format!("rm -rf {}", quote(&config.app_base))),
    ));

    let report = script.run(host).await?;
    tracing::info!("removed {} from {}", config.site, host.address());
    Ok(report)
}
