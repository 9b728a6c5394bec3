// ABOUTME: Entry point for the slipway CLI application.
// ABOUTME: Sets up the run log, resolves configuration and dispatches to deploy or cleanup.

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use slipway::config::{
    self, ConfigError, ConfigFile, DEFAULT_LOG_DIR, DEFAULT_LOG_RETENTION, NonInteractive,
    Overrides, Prompter, TerminalPrompter,
};
use slipway::deploy::DeploymentOutcome;
use slipway::error::{Error, Result};
use slipway::logging::{self, RunLog};
use slipway::output::{Output, OutputMode};
use slipway::release::ReleaseStamp;
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);
    let stamp = ReleaseStamp::now();

    let file = match load_file(&cli) {
        Ok(file) => file,
        Err(e) => {
            logging::init(None, cli.verbose);
            let err = Error::from(e);
            output.outcome(&DeploymentOutcome::failed(&err));
            output.error(&err.to_string());
            std::process::exit(err.exit_code());
        }
    };

    let log_dir = file
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    let run_log = match RunLog::create(&log_dir, stamp.as_str()) {
        Ok(log) => Some(log),
        Err(e) => {
            output.warning(&format!(
                "cannot write run log under {}: {}",
                log_dir.display(),
                e
            ));
            None
        }
    };
    logging::init(run_log.as_ref(), cli.verbose);
    if run_log.is_some() {
        let keep = file.log_retention.unwrap_or(DEFAULT_LOG_RETENTION);
        if let Err(e) = logging::prune(&log_dir, keep) {
            tracing::warn!("failed to prune old run logs: {}", e);
        }
    }

    if let Err(err) = run(&cli, file, stamp, &mut output).await {
        tracing::error!("{}", err);
        output.outcome(&DeploymentOutcome::failed(&err));
        output.error(&err.to_string());
        if let Some(log) = &run_log {
            output.log_tail(log.path(), &log.tail());
        }
        std::process::exit(err.exit_code());
    }
}

fn load_file(cli: &Cli) -> std::result::Result<ConfigFile, ConfigError> {
    match &cli.config {
        Some(path) if !path.exists() => Err(ConfigError::NotFound(path.clone())),
        Some(path) => ConfigFile::load(path),
        None => {
            let cwd = env::current_dir().map_err(|source| ConfigError::Read {
                path: PathBuf::from("."),
                source,
            })?;
            ConfigFile::discover(&cwd)
        }
    }
}

async fn run(cli: &Cli, file: ConfigFile, stamp: ReleaseStamp, output: &mut Output) -> Result<()> {
    let overrides = cli.overrides().or(Overrides::from_env());
    let mut prompter: Box<dyn Prompter> = if cli.non_interactive {
        Box::new(NonInteractive)
    } else {
        Box::new(TerminalPrompter)
    };
    let config = config::resolve(file, overrides, prompter.as_mut())?;
    if let Some(token) = &config.token {
        tracing::info!("repository token {}", token);
    }

    if cli.cleanup {
        commands::cleanup(&config, cli.force, output).await?;
    } else {
        commands::deploy(&config, stamp, cli.force, output).await?;
    }
    Ok(())
}
