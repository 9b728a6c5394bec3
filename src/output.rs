// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use crate::deploy::DeploymentOutcome;
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => eprintln!("Warning: {message}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit_err(&JsonEvent {
                event: "warning",
                message,
                duration_secs: None,
                outcome: None,
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.emit_err(&JsonEvent {
                event: "error",
                message,
                duration_secs: self.duration(),
                outcome: None,
            }),
        }
    }

    /// Print the terminal record of a run.
    pub fn outcome(&self, outcome: &DeploymentOutcome) {
        match self.mode {
            OutputMode::Normal => {
                let mark = if outcome.success { "✓" } else { "✗" };
                match self.duration() {
                    Some(secs) => println!(
                        "{mark} {} ({}, {:.1}s)",
                        outcome.detail, outcome.phase, secs
                    ),
                    None => println!("{mark} {} ({})", outcome.detail, outcome.phase),
                }
            }
            // Only the final result.
            OutputMode::Quiet => println!("{}", outcome.detail),
            OutputMode::Json => self.emit(&JsonEvent {
                event: "outcome",
                message: &outcome.detail,
                duration_secs: self.duration(),
                outcome: Some(outcome),
            }),
        }
    }

    /// Print the run log tail after a fatal abort.
    pub fn log_tail(&self, path: &std::path::Path, lines: &[String]) {
        if self.mode == OutputMode::Json || lines.is_empty() {
            return;
        }
        eprintln!("--- last {} lines of {} ---", lines.len(), path.display());
        for line in lines {
            eprintln!("{line}");
        }
    }

    fn emit(&self, event: &JsonEvent<'_>) {
        if let Ok(json) = serde_json::to_string(event) {
            println!("{json}");
        }
    }

    fn emit_err(&self, event: &JsonEvent<'_>) {
        if let Ok(json) = serde_json::to_string(event) {
            eprintln!("{json}");
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<&'a DeploymentOutcome>,
}
