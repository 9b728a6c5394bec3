// ABOUTME: Post-launch health checks and outcome classification.
// ABOUTME: Every check is diagnostic: failures are logged and classified, never raised.

pub mod probe;

use crate::config::DeploymentConfig;
use crate::remote::{Privilege, RemoteHost, quote};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Public HTTP port the proxy listens on.
pub const PUBLIC_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Backend and proxy both answer.
    Healthy,
    /// The public address answers but the backend does not; the proxy hides a dead workload.
    BackendMasked,
    /// The backend answers but the public address does not.
    ProxyMisconfigured,
    Unreachable,
    /// The container runtime service is not active even after a restart attempt.
    RuntimeInactive,
}

impl Verdict {
    pub fn classify(runtime_active: bool, loopback: bool, public: bool) -> Self {
        match (runtime_active, loopback, public) {
            (false, _, _) => Verdict::RuntimeInactive,
            (true, true, true) => Verdict::Healthy,
            (true, false, true) => Verdict::BackendMasked,
            (true, true, false) => Verdict::ProxyMisconfigured,
            (true, false, false) => Verdict::Unreachable,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Healthy => "healthy",
            Verdict::BackendMasked => "public endpoint responds but backend does not (proxy masking a dead backend)",
            Verdict::ProxyMisconfigured => "backend responds but public endpoint does not (proxy misconfigured)",
            Verdict::Unreachable => "neither backend nor public endpoint responds",
            Verdict::RuntimeInactive => "container runtime is not active",
        };
        f.write_str(s)
    }
}

/// One running container as reported by `docker ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHealth {
    pub name: String,
    pub status: String,
    /// `healthy`, `unhealthy` or `starting`, for containers with a health check.
    pub health: Option<String>,
}

impl ContainerHealth {
    /// Parse `docker ps --format '{{.Names}}\t{{.Status}}'` output.
    pub fn parse_list(stdout: &str) -> Vec<Self> {
        stdout
            .lines()
            .filter_map(|line| {
                let (name, status) = line.split_once('\t')?;
                let health = if status.contains("(healthy)") {
                    Some("healthy")
                } else if status.contains("(unhealthy)") {
                    Some("unhealthy")
                } else if status.contains("(health: starting)") {
                    Some("starting")
                } else {
                    None
                };
                Some(Self {
                    name: name.trim().to_string(),
                    status: status.trim().to_string(),
                    health: health.map(str::to_string),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub runtime_active: bool,
    /// The runtime was inactive and a start was attempted.
    pub runtime_restarted: bool,
    pub containers: Vec<ContainerHealth>,
    pub port_listening: bool,
    pub loopback_responsive: bool,
    pub public_responsive: bool,
    pub verdict: Verdict,
}

impl ValidationReport {
    /// Runtime active and the public endpoint responsive.
    pub fn success(&self) -> bool {
        self.runtime_active && self.public_responsive
    }
}

#[derive(Debug)]
pub struct DeploymentValidator<'a> {
    config: &'a DeploymentConfig,
    privilege: Privilege,
    public_port: u16,
}

impl<'a> DeploymentValidator<'a> {
    pub fn new(config: &'a DeploymentConfig) -> Self {
        Self {
            config,
            privilege: config.privilege,
            public_port: PUBLIC_PORT,
        }
    }

    /// Probe a port other than 80 for the public check.
    pub fn public_port(mut self, port: u16) -> Self {
        self.public_port = port;
        self
    }

    pub async fn validate<H: RemoteHost + ?Sized>(&self, host: &H) -> ValidationReport {
        let (runtime_active, runtime_restarted) = self.check_runtime(host).await;
        let containers = self.check_containers(host).await;
        let port_listening = self.check_listening(host).await;
        let loopback_responsive = self.probe_loopback(host).await;
        let public_responsive = self.probe_public().await;

        let verdict = Verdict::classify(runtime_active, loopback_responsive, public_responsive);
        match verdict {
            Verdict::Healthy => tracing::info!("validation: {}", verdict),
            _ => tracing::warn!("validation: {}", verdict),
        }

        ValidationReport {
            runtime_active,
            runtime_restarted,
            containers,
            port_listening,
            loopback_responsive,
            public_responsive,
            verdict,
        }
    }

    /// Succeeds if `command` ran and exited 0. Transport errors count as failure.
    async fn passes<H: RemoteHost + ?Sized>(&self, host: &H, check: &str, command: &str) -> bool {
        match host.exec(command).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                tracing::warn!(
                    "{}: exit code {} {}",
                    check,
                    output.exit_code,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                tracing::warn!("{}: {}", check, e);
                false
            }
        }
    }

    async fn check_runtime<H: RemoteHost + ?Sized>(&self, host: &H) -> (bool, bool) {
        const IS_ACTIVE: &str = "systemctl is-active --quiet docker";
        if self.passes(host, "container runtime active", IS_ACTIVE).await {
            return (true, false);
        }
        tracing::warn!("container runtime inactive, attempting to start it");
        let started = self
            .passes(
                host,
                "start container runtime",
                &self.privilege.elevate("systemctl enable --now docker"),
            )
            .await;
        let active = started && self.passes(host, "container runtime active", IS_ACTIVE).await;
        (active, true)
    }

    async fn check_containers<H: RemoteHost + ?Sized>(&self, host: &H) -> Vec<ContainerHealth> {
        let command = self
            .privilege
            .elevate("docker ps --format '{{.Names}}\t{{.Status}}'");
        let containers = match host.exec(&command).await {
            Ok(output) if output.success() => ContainerHealth::parse_list(&output.stdout),
            Ok(output) => {
                tracing::warn!("listing containers failed: {}", output.stderr.trim());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("listing containers failed: {}", e);
                Vec::new()
            }
        };
        for c in &containers {
            match c.health.as_deref() {
                Some("unhealthy") => tracing::warn!("container {}: {}", c.name, c.status),
                _ => tracing::info!("container {}: {}", c.name, c.status),
            }
        }
        containers
    }

    async fn check_listening<H: RemoteHost + ?Sized>(&self, host: &H) -> bool {
        let port = self.config.port;
        let command = format!(
            "(ss -ltn 2>/dev/null || netstat -ltn 2>/dev/null) | grep -qE '[:.]{port}[[:space:]]'"
        );
        self.passes(host, &format!("listener on port {port}"), &command)
            .await
    }

    async fn probe_loopback<H: RemoteHost + ?Sized>(&self, host: &H) -> bool {
        let url = format!("http://127.0.0.1:{}/", self.config.port);
        let command = format!(
            "curl -sS -o /dev/null -I --max-time {} {}",
            timeout_secs(self.config.probe_timeout),
            quote(&url)
        );
        self.passes(host, &format!("loopback probe {url}"), &command)
            .await
    }

    async fn probe_public(&self) -> bool {
        let host = &self.config.target.host;
        match probe::head(host, self.public_port, self.config.probe_timeout).await {
            Ok(status) => {
                tracing::info!("public probe http://{}:{}/: {}", host, self.public_port, status);
                true
            }
            Err(e) => {
                tracing::warn!("public probe: {}", e);
                false
            }
        }
    }
}

fn timeout_secs(timeout: Duration) -> u64 {
    timeout.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_distinguishes_proxy_from_backend_faults() {
        assert_eq!(Verdict::classify(true, true, true), Verdict::Healthy);
        assert_eq!(Verdict::classify(true, false, true), Verdict::BackendMasked);
        assert_eq!(Verdict::classify(true, true, false), Verdict::ProxyMisconfigured);
        assert_eq!(Verdict::classify(true, false, false), Verdict::Unreachable);
        assert_eq!(Verdict::classify(false, true, true), Verdict::RuntimeInactive);
    }

    #[test]
    fn success_needs_runtime_and_public_endpoint() {
        let mut report = ValidationReport {
            runtime_active: true,
            runtime_restarted: false,
            containers: vec![],
            port_listening: false,
            loopback_responsive: false,
            public_responsive: true,
            verdict: Verdict::BackendMasked,
        };
        assert!(report.success());
        report.runtime_active = false;
        assert!(!report.success());
    }

    #[test]
    fn parses_container_health() {
        let out = "shop\tUp 3 minutes (healthy)\nshop-db-1\tUp 3 minutes\nworker\tUp 10 seconds (health: starting)\n";
        let list = ContainerHealth::parse_list(out);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].health.as_deref(), Some("healthy"));
        assert_eq!(list[1].health, None);
        assert_eq!(list[2].health.as_deref(), Some("starting"));
    }

    #[test]
    fn sub_second_timeouts_round_up() {
        assert_eq!(timeout_secs(Duration::from_millis(200)), 1);
        assert_eq!(timeout_secs(Duration::from_secs(5)), 5);
    }
}
