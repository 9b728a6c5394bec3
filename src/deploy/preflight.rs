// ABOUTME: Local checks run before any connection to the target is opened.
// ABOUTME: Config validation and proxy rendering are fatal; ICMP reachability is advisory.

use crate::config::DeploymentConfig;
use crate::error::Result;
use crate::proxy::ProxySite;
use std::process::Stdio;
use tokio::process::Command;

/// Validate `config` and render the proxy site so template problems surface
/// without touching the host.
pub fn check(config: &DeploymentConfig) -> Result<ProxySite> {
    config.validate()?;
    let site = ProxySite::render(config)?;
    tracing::info!("rendered proxy site for {}", site.site);
    Ok(site)
}

/// One ICMP echo. Hosts that drop ICMP are common, so this never gates.
pub async fn ping(host: &str) -> std::result::Result<(), String> {
    let output = Command::new("ping")
        .args(["-c", "1", "-W", "2", host])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| format!("failed to run ping: {}", e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{} did not answer ping: {}",
            host,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
