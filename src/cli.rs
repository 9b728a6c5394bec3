// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Flags select deploy or cleanup and override configuration values.

use clap::Parser;
use slipway::config::Overrides;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "slipway")]
#[command(about = "Ship a source tree to a remote host as an atomically activated release")]
#[command(version)]
pub struct Cli {
    /// Remove the site's containers, proxy site and application directory instead of deploying
    #[arg(long)]
    pub cleanup: bool,

    /// Fail instead of prompting when a required setting is missing
    #[arg(long)]
    pub non_interactive: bool,

    /// Break an existing deploy lock
    #[arg(long)]
    pub force: bool,

    /// Verbose terminal logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, conflicts_with = "json")]
    pub quiet: bool,

    /// Emit JSON lines
    #[arg(long)]
    pub json: bool,

    /// Configuration file (default: discover slipway.yml in the working directory)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Repository URL
    #[arg(long)]
    pub repository: Option<String>,

    /// Branch to deploy
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Target as [user@]host[:port]
    #[arg(long)]
    pub host: Option<String>,

    /// Remote user
    #[arg(short, long)]
    pub user: Option<String>,

    /// SSH port
    #[arg(long, value_name = "PORT")]
    pub ssh_port: Option<String>,

    /// SSH private key
    #[arg(long, value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,

    /// Port the workload listens on
    #[arg(short, long)]
    pub port: Option<String>,

    /// Site identifier (proxy site, container and compose project name)
    #[arg(short, long)]
    pub site: Option<String>,

    /// Remote application base directory (default /opt/<site>)
    #[arg(long, value_name = "PATH")]
    pub app_base: Option<String>,

    /// Deploy this local directory instead of cloning the repository
    #[arg(long, value_name = "PATH")]
    pub source_dir: Option<PathBuf>,
}

impl Cli {
    /// Values given on the command line. The token is deliberately not a flag.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            token: None,
            host: self.host.clone(),
            user: self.user.clone(),
            ssh_port: self.ssh_port.clone(),
            ssh_key: self.ssh_key.clone(),
            port: self.port.clone(),
            site: self.site.clone(),
            app_base: self.app_base.clone(),
            source_dir: self.source_dir.clone(),
        }
    }
}
