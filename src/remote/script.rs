// ABOUTME: Ordered, idempotent remote steps with explicit failure policy.
// ABOUTME: Each step may be skipped by a check command, retried, and either aborts or warns on failure.

use super::{RemoteError, RemoteHost};
use std::time::Duration;

/// What a failing step does to the rest of the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop the script and report the failure.
    Abort,
    /// Record a warning and continue with the next step.
    Warn,
}

/// One remote action.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    /// When this check exits 0 the step is already satisfied and is skipped.
    pub unless: Option<String>,
    pub command: String,
    pub on_failure: OnFailure,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Step {
    /// A step whose failure aborts the script.
    pub fn fatal(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(name, command, OnFailure::Abort)
    }

    /// A step whose failure is logged and tolerated.
    pub fn recoverable(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(name, command, OnFailure::Warn)
    }

    fn new(name: impl Into<String>, command: impl Into<String>, on_failure: OnFailure) -> Self {
        Self {
            name: name.into(),
            unless: None,
            command: command.into(),
            on_failure,
            retries: 0,
            retry_delay: Duration::from_secs(3),
        }
    }

    pub fn unless(mut self, check: impl Into<String>) -> Self {
        self.unless = Some(check.into());
        self
    }

    pub fn retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// The check reported the step as already satisfied.
    Skipped,
    /// The command ran and succeeded.
    Applied,
    /// The command failed and the step was recoverable.
    Warned { exit_code: u32, stderr: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
}

/// Per-step results of a script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptReport {
    pub records: Vec<StepRecord>,
}

impl ScriptReport {
    pub fn status(&self, name: &str) -> Option<&StepStatus> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.status)
    }

    pub fn applied(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|r| r.status == StepStatus::Applied)
            .map(|r| r.name.as_str())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StepRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.status, StepStatus::Warned { .. }))
    }

    /// Append another report's records.
    pub fn extend(&mut self, other: ScriptReport) {
        self.records.extend(other.records);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("step '{step}' failed with exit code {exit_code}: {stderr}")]
    StepFailed {
        step: String,
        exit_code: u32,
        stderr: String,
    },

    #[error("step '{step}': {source}")]
    Remote {
        step: String,
        #[source]
        source: RemoteError,
    },
}

impl ScriptError {
    /// Name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            ScriptError::StepFailed { step, .. } | ScriptError::Remote { step, .. } => step,
        }
    }
}

/// An ordered list of steps executed one at a time.
#[derive(Debug, Clone, Default)]
pub struct RemoteScript {
    steps: Vec<Step>,
}

impl RemoteScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step in order, stopping at the first failing `Abort` step.
    pub async fn run<H: RemoteHost + ?Sized>(&self, host: &H) -> Result<ScriptReport, ScriptError> {
        let mut report = ScriptReport::default();
        for step in &self.steps {
            let status = run_step(host, step).await?;
            report.records.push(StepRecord {
                name: step.name.clone(),
                status,
            });
        }
        Ok(report)
    }
}

async fn run_step<H: RemoteHost + ?Sized>(
    host: &H,
    step: &Step,
) -> Result<StepStatus, ScriptError> {
    let remote_err = |source| ScriptError::Remote {
        step: step.name.clone(),
        source,
    };

    if let Some(check) = &step.unless {
        let output = host.exec(check).await.map_err(remote_err)?;
        if output.success() {
            tracing::debug!("{}: already satisfied", step.name);
            return Ok(StepStatus::Skipped);
        }
    }

    let mut attempt = 0;
    let output = loop {
        let output = host.exec(&step.command).await.map_err(remote_err)?;
        if output.success() || attempt >= step.retries {
            break output;
        }
        attempt += 1;
        tracing::warn!(
            "{}: exit code {}, retrying ({}/{})",
            step.name,
            output.exit_code,
            attempt,
            step.retries
        );
        tokio::time::sleep(step.retry_delay).await;
    };

    if output.success() {
        tracing::info!("{}: done", step.name);
        return Ok(StepStatus::Applied);
    }

    let stderr = output.stderr.trim().to_string();
    match step.on_failure {
        OnFailure::Abort => {
            tracing::error!(
                "{}: failed with exit code {}: {}",
                step.name,
                output.exit_code,
                stderr
            );
            Err(ScriptError::StepFailed {
                step: step.name.clone(),
                exit_code: output.exit_code,
                stderr,
            })
        }
        OnFailure::Warn => {
            tracing::warn!(
                "{}: failed with exit code {}, continuing: {}",
                step.name,
                output.exit_code,
                stderr
            );
            Ok(StepStatus::Warned {
                exit_code: output.exit_code,
                stderr,
            })
        }
    }
}
