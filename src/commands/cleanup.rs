// ABOUTME: Cleanup command implementation.
// ABOUTME: Tears the site down on the target and reports warnings from best-effort steps.

use slipway::config::DeploymentConfig;
use slipway::deploy::{DeploymentOutcome, Orchestrator};
use slipway::diagnostics::Diagnostics;
use slipway::error::Result;
use slipway::output::Output;
use slipway::remote::SshConnector;

pub async fn cleanup(
    config: &DeploymentConfig,
    force: bool,
    output: &mut Output,
) -> Result<DeploymentOutcome> {
    output.start_timer();
    output.progress(&format!("Removing {} from {}", config.site, config.target));

    let connector = SshConnector::default();
    let mut diag = Diagnostics::default();
    let result = Orchestrator::new(config, &connector)
        .force(force)
        .cleanup(&mut diag)
        .await;

    for warning in diag.warnings() {
        output.warning(&warning.message);
    }
    result?;

    let outcome = DeploymentOutcome::torn_down(config.site.as_str());
    output.outcome(&outcome);
    Ok(outcome)
}
