// ABOUTME: Collects required settings that were not supplied by file, flags or environment.
// ABOUTME: NonInteractive fails fast; TerminalPrompter asks on stderr and reads stdin.

use super::ConfigError;
use std::io::{BufRead, Write};

/// Settings the pipeline cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Repository,
    Branch,
    Host,
    User,
    Site,
    Port,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Repository => "repository",
            Field::Branch => "branch",
            Field::Host => "host",
            Field::User => "user",
            Field::Site => "site",
            Field::Port => "port",
        }
    }

    pub fn flag(&self) -> &'static str {
        match self {
            Field::Repository => "--repository",
            Field::Branch => "--branch",
            Field::Host => "--host",
            Field::User => "--user",
            Field::Site => "--site",
            Field::Port => "--port",
        }
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            Field::Repository => "SLIPWAY_REPOSITORY",
            Field::Branch => "SLIPWAY_BRANCH",
            Field::Host => "SLIPWAY_HOST",
            Field::User => "SLIPWAY_USER",
            Field::Site => "SLIPWAY_SITE",
            Field::Port => "SLIPWAY_PORT",
        }
    }

    fn question(&self) -> &'static str {
        match self {
            Field::Repository => "Repository URL",
            Field::Branch => "Branch to deploy",
            Field::Host => "Target host",
            Field::User => "SSH user",
            Field::Site => "Site identifier",
            Field::Port => "Internal service port",
        }
    }
}

/// Source of values for missing required settings.
pub trait Prompter {
    /// Ask for `field`. `Ok(None)` means no answer.
    fn ask(&mut self, field: Field) -> Result<Option<String>, ConfigError>;
}

/// Never asks; every missing setting is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn ask(&mut self, _field: Field) -> Result<Option<String>, ConfigError> {
        Ok(None)
    }
}

/// Asks on the terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, field: Field) -> Result<Option<String>, ConfigError> {
        let mut stderr = std::io::stderr();
        let io_err = |source| ConfigError::Read {
            path: "<stdin>".into(),
            source,
        };
        write!(stderr, "{}: ", field.question()).map_err(io_err)?;
        stderr.flush().map_err(io_err)?;

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line).map_err(io_err)?;
        if read == 0 {
            return Ok(None);
        }
        let answer = line.trim();
        Ok((!answer.is_empty()).then(|| answer.to_string()))
    }
}
