// ABOUTME: Pipeline phases and the terminal record of a run.
// ABOUTME: DeploymentOutcome is built from either the success summary or the error; it is never persisted.

use crate::error::Error;
use crate::launch::WorkloadDescriptor;
use crate::release::Release;
use crate::validate::ValidationReport;
use serde::Serialize;
use std::fmt;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Config,
    Preflight,
    Connect,
    Provision,
    Publish,
    Launch,
    Proxy,
    Validate,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Config => "config",
            Phase::Preflight => "preflight",
            Phase::Connect => "connect",
            Phase::Provision => "provision",
            Phase::Publish => "publish",
            Phase::Launch => "launch",
            Phase::Proxy => "proxy",
            Phase::Validate => "validate",
            Phase::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// What a completed deployment produced.
#[derive(Debug, Clone)]
pub struct DeploymentSummary {
    pub release: Release,
    /// Release `current` pointed at before activation.
    pub previous: Option<String>,
    pub workload: WorkloadDescriptor,
    pub proxy_path: String,
    pub validation: ValidationReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentOutcome {
    pub phase: Phase,
    pub success: bool,
    pub detail: String,
}

impl DeploymentOutcome {
    pub fn deployed(summary: &DeploymentSummary) -> Self {
        let validation = &summary.validation;
        Self {
            phase: Phase::Validate,
            success: validation.success(),
            detail: format!(
                "released {} ({}): {}",
                summary.release.name, summary.workload.strategy, validation.verdict
            ),
        }
    }

    pub fn torn_down(site: &str) -> Self {
        Self {
            phase: Phase::Teardown,
            success: true,
            detail: format!("removed {}", site),
        }
    }

    pub fn failed(error: &Error) -> Self {
        Self {
            phase: error.phase(),
            success: false,
            detail: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_order_like_the_pipeline() {
        assert!(Phase::Connect < Phase::Provision);
        assert!(Phase::Publish < Phase::Launch);
        assert!(Phase::Proxy < Phase::Validate);
    }

    #[test]
    fn failure_outcome_carries_phase_and_message() {
        let err = Error::Probe("exit code 127".to_string());
        let outcome = DeploymentOutcome::failed(&err);
        assert_eq!(outcome.phase, Phase::Connect);
        assert!(!outcome.success);
        assert!(outcome.detail.contains("exit code 127"));
    }
}
