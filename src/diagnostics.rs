// ABOUTME: Diagnostics accumulator for non-fatal warnings during a run.
// ABOUTME: Collects warnings that shouldn't fail a deployment but should be shown to users.

use crate::remote::{ScriptReport, StepStatus};

/// Collects non-fatal warnings during deployment operations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    /// Record every recoverable step in `report` that failed.
    pub fn record_steps(&mut self, report: &ScriptReport) {
        for record in report.warnings() {
            if let StepStatus::Warned { exit_code, stderr } = &record.status {
                let detail = if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr)
                };
                self.warn(Warning::step(format!(
                    "{} failed with exit code {}{}",
                    record.name, exit_code, detail
                )));
            }
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning collected during deployment.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn step(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Step, message)
    }

    pub fn ping(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Ping, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(WarningKind::Validation, message)
    }

    pub fn lock_release(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRelease, message)
    }

    pub fn lock_refresh(message: impl Into<String>) -> Self {
        Self::new(WarningKind::LockRefresh, message)
    }

    pub fn ssh_disconnect(message: impl Into<String>) -> Self {
        Self::new(WarningKind::SshDisconnect, message)
    }
}

/// Categories of warnings that can occur during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A recoverable remote step failed.
    Step,
    /// The host did not answer ICMP before connecting.
    Ping,
    /// Post-deploy checks found a problem.
    Validation,
    /// Failed to release deploy lock (lock file may remain).
    LockRelease,
    /// Failed to refresh the deploy lock between stages.
    LockRefresh,
    /// Failed to cleanly disconnect SSH session.
    SshDisconnect,
}
