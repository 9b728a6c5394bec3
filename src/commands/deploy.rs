// ABOUTME: Deploy command implementation.
// ABOUTME: Runs the orchestrator over SSH and reports the outcome and collected warnings.

use slipway::config::DeploymentConfig;
use slipway::deploy::{DeploymentOutcome, Orchestrator};
use slipway::diagnostics::Diagnostics;
use slipway::error::Result;
use slipway::output::Output;
use slipway::release::ReleaseStamp;
use slipway::remote::SshConnector;

pub async fn deploy(
    config: &DeploymentConfig,
    stamp: ReleaseStamp,
    force: bool,
    output: &mut Output,
) -> Result<DeploymentOutcome> {
    output.start_timer();
    output.progress(&format!(
        "Deploying {} ({}) to {} as {}",
        config.site, config.branch, config.target, stamp
    ));

    let connector = SshConnector::default();
    let mut diag = Diagnostics::default();
    let result = Orchestrator::new(config, &connector)
        .stamp(stamp)
        .force(force)
        .deploy(&mut diag)
        .await;

    for warning in diag.warnings() {
        output.warning(&warning.message);
    }

    let summary = result?;
    if let Some(previous) = &summary.previous {
        output.progress(&format!("  previous release: {}", previous));
    }
    output.progress(&format!("  release: {}", summary.release.path));
    output.progress(&format!("  proxy site: {}", summary.proxy_path));
    for container in &summary.validation.containers {
        output.progress(&format!("  container {}: {}", container.name, container.status));
    }

    let outcome = DeploymentOutcome::deployed(&summary);
    output.outcome(&outcome);
    Ok(outcome)
}
