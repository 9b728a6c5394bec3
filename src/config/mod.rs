// ABOUTME: Deployment configuration: YAML file, environment and CLI overrides, prompts.
// ABOUTME: Produces one validated, immutable DeploymentConfig consumed by every pipeline stage.

mod env_value;
mod prompt;
mod server;

pub use env_value::EnvValue;
pub use prompt::{Field, NonInteractive, Prompter, TerminalPrompter};
pub use server::{RemoteTarget, ServerConfig, ServerEntry};

use crate::remote::Privilege;
use crate::types::{Branch, Secret, SiteId};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "slipway.yml";
pub const CONFIG_FILENAME_ALT: &str = "slipway.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".slipway/config.yml";

pub const DEFAULT_LOG_DIR: &str = ".slipway/logs";
pub const DEFAULT_LOG_RETENTION: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting '{}' (use {}, ${}, or slipway.yml)", .0.name(), .0.flag(), .0.env_var())]
    Missing(Field),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Everything the pipeline needs to know about one deployment.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    /// Repository URL (or `file://` path when deploying a local tree).
    pub repository: String,
    pub branch: Branch,
    /// Repository access token; only ever printed masked.
    pub token: Option<Secret>,
    pub target: RemoteTarget,
    /// Port the workload listens on, bound to loopback on the target.
    pub port: u16,
    pub site: SiteId,
    /// Remote application base holding `releases/` and `current`.
    pub app_base: String,
    /// Deploy this local tree instead of cloning the repository.
    pub source_dir: Option<PathBuf>,
    /// Custom proxy site template.
    pub proxy_template: Option<PathBuf>,
    pub privilege: Privilege,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub log_dir: PathBuf,
    pub log_retention: usize,
}

impl DeploymentConfig {
    /// A config with defaults for everything but the required settings.
    pub fn new(
        repository: impl Into<String>,
        branch: Branch,
        target: RemoteTarget,
        port: u16,
        site: SiteId,
    ) -> Self {
        let privilege = Privilege::for_user(&target.user, None);
        Self {
            repository: repository.into(),
            branch,
            token: None,
            app_base: default_app_base(&site),
            target,
            port,
            site,
            source_dir: None,
            proxy_template: None,
            privilege,
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_retention: DEFAULT_LOG_RETENTION,
        }
    }

    /// Directory holding one subdirectory per release.
    pub fn releases_root(&self) -> String {
        format!("{}/releases", self.app_base)
    }

    /// Symlink naming the active release.
    pub fn current_path(&self) -> String {
        format!("{}/current", self.app_base)
    }

    /// Deploy lock file guarding the target.
    pub fn lock_path(&self) -> String {
        format!("{}/.slipway.lock", self.app_base)
    }

    /// Check invariants that typed fields cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.trim().is_empty() {
            return Err(ConfigError::Missing(Field::Repository));
        }
        if self.target.host.trim().is_empty() {
            return Err(ConfigError::Missing(Field::Host));
        }
        if self.target.user.trim().is_empty() {
            return Err(ConfigError::Missing(Field::User));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "must be between 1 and 65535"));
        }
        validate_app_base(&self.app_base)?;
        if let Some(token) = &self.token
            && token.is_empty()
        {
            return Err(ConfigError::invalid("token", "cannot be empty when set"));
        }
        Ok(())
    }
}

fn default_app_base(site: &SiteId) -> String {
    format!("/opt/{}", site)
}

fn validate_app_base(path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::invalid("app_base", "must be an absolute path"));
    }
    if path.trim_end_matches('/').is_empty() {
        return Err(ConfigError::invalid("app_base", "cannot be the filesystem root"));
    }
    if path.ends_with('/') {
        return Err(ConfigError::invalid("app_base", "cannot end with '/'"));
    }
    if path.chars().any(|c| c.is_whitespace()) || path.contains("..") {
        return Err(ConfigError::invalid(
            "app_base",
            "cannot contain whitespace or '..'",
        ));
    }
    Ok(())
}

/// Contents of `slipway.yml`. Every field is optional; missing ones come from
/// overrides or prompts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub repository: Option<EnvValue>,
    #[serde(default)]
    pub branch: Option<EnvValue>,
    #[serde(default)]
    pub token: Option<EnvValue>,
    #[serde(default)]
    pub server: Option<ServerEntry>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub app_base: Option<String>,
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub proxy_template: Option<PathBuf>,
    #[serde(default)]
    pub sudo: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub probe_timeout: Option<Duration>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_retention: Option<usize>,
}

impl ConfigFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(ConfigError::from)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Look for a config file in `dir`. No file is not an error: everything can
    /// come from flags and environment.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!("using config file {}", path.display());
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }
}

/// Settings supplied on the command line or through `SLIPWAY_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub token: Option<String>,
    /// `[user@]host[:port]`
    pub host: Option<String>,
    pub user: Option<String>,
    pub ssh_port: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub port: Option<String>,
    pub site: Option<String>,
    pub app_base: Option<String>,
    pub source_dir: Option<PathBuf>,
}

impl Overrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            repository: var("SLIPWAY_REPOSITORY"),
            branch: var("SLIPWAY_BRANCH"),
            token: var("SLIPWAY_TOKEN"),
            host: var("SLIPWAY_HOST"),
            user: var("SLIPWAY_USER"),
            ssh_port: var("SLIPWAY_SSH_PORT"),
            ssh_key: var("SLIPWAY_SSH_KEY").map(PathBuf::from),
            port: var("SLIPWAY_PORT"),
            site: var("SLIPWAY_SITE"),
            app_base: var("SLIPWAY_APP_BASE"),
            source_dir: var("SLIPWAY_SOURCE_DIR").map(PathBuf::from),
        }
    }

    /// Fill gaps in `self` from `lower`.
    pub fn or(self, lower: Overrides) -> Overrides {
        Overrides {
            repository: self.repository.or(lower.repository),
            branch: self.branch.or(lower.branch),
            token: self.token.or(lower.token),
            host: self.host.or(lower.host),
            user: self.user.or(lower.user),
            ssh_port: self.ssh_port.or(lower.ssh_port),
            ssh_key: self.ssh_key.or(lower.ssh_key),
            port: self.port.or(lower.port),
            site: self.site.or(lower.site),
            app_base: self.app_base.or(lower.app_base),
            source_dir: self.source_dir.or(lower.source_dir),
        }
    }
}

fn resolve_file_value(value: Option<&EnvValue>) -> Result<Option<String>, ConfigError> {
    value
        .map(EnvValue::resolve)
        .transpose()
        .map(|v| v.filter(|s| !s.trim().is_empty()))
}

fn required(
    value: Option<String>,
    field: Field,
    prompter: &mut dyn Prompter,
) -> Result<String, ConfigError> {
    match value {
        Some(v) => Ok(v),
        None => prompter
            .ask(field)?
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(field)),
    }
}

/// Merge overrides over the file, ask for anything still missing, and validate.
pub fn resolve(
    file: ConfigFile,
    overrides: Overrides,
    prompter: &mut dyn Prompter,
) -> Result<DeploymentConfig, ConfigError> {
    let server = file
        .server
        .map(ServerEntry::into_server_config)
        .transpose()
        .map_err(|reason| ConfigError::invalid("server", reason))?;

    let from_flag = overrides
        .host
        .as_deref()
        .map(ServerConfig::parse)
        .transpose()
        .map_err(|reason| ConfigError::invalid("host", reason))?;

    let source_dir = overrides.source_dir.or(file.source_dir);

    let repository = match overrides
        .repository
        .or(resolve_file_value(file.repository.as_ref())?)
    {
        Some(r) => r,
        None => match &source_dir {
            Some(dir) => format!("file://{}", dir.display()),
            None => required(None, Field::Repository, prompter)?,
        },
    };

    let branch = required(
        overrides
            .branch
            .or(resolve_file_value(file.branch.as_ref())?),
        Field::Branch,
        prompter,
    )?;
    let branch = Branch::new(branch.trim()).map_err(|e| ConfigError::invalid("branch", e))?;

    let host = required(
        from_flag
            .as_ref()
            .map(|s| s.host.clone())
            .or(server.as_ref().map(|s| s.host.clone())),
        Field::Host,
        prompter,
    )?;

    let user = required(
        overrides
            .user
            .or(from_flag.as_ref().and_then(|s| s.user.clone()))
            .or(server.as_ref().and_then(|s| s.user.clone())),
        Field::User,
        prompter,
    )?;

    let ssh_port = match overrides.ssh_port {
        Some(p) => p
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::invalid("ssh port", format!("'{}' is not a port", p)))?,
        None => from_flag
            .as_ref()
            .map(|s| s.port)
            .filter(|p| *p != 22)
            .or(server.as_ref().map(|s| s.port))
            .unwrap_or(22),
    };

    let site = required(overrides.site.or(file.site), Field::Site, prompter)?;
    let site = SiteId::new(site.trim()).map_err(|e| ConfigError::invalid("site", e))?;

    let port = match overrides.port.or(file.port.map(|p| p.to_string())) {
        Some(p) => p,
        None => required(None, Field::Port, prompter)?,
    };
    let port = port
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| {
            ConfigError::invalid("port", format!("'{}' is not a port between 1 and 65535", port))
        })?;

    let token = match overrides.token {
        Some(t) => Some(t),
        None => resolve_file_value(file.token.as_ref())?,
    }
    .map(Secret::new);

    let target = RemoteTarget {
        host: host.trim().to_string(),
        port: ssh_port,
        user: user.trim().to_string(),
        key_path: overrides
            .ssh_key
            .or(server.as_ref().and_then(|s| s.key.clone())),
    };

    let mut config = DeploymentConfig::new(repository, branch, target, port, site);
    config.token = token;
    config.source_dir = source_dir;
    config.proxy_template = file.proxy_template;
    config.privilege = Privilege::for_user(&config.target.user, file.sudo);
    if let Some(base) = overrides.app_base.or(file.app_base) {
        config.app_base = base;
    }
    if let Some(timeout) = file.connect_timeout {
        config.connect_timeout = timeout;
    }
    if let Some(timeout) = file.probe_timeout {
        config.probe_timeout = timeout;
    }
    if let Some(dir) = file.log_dir {
        config.log_dir = dir;
    }
    if let Some(keep) = file.log_retention {
        config.log_retention = keep;
    }

    config.validate()?;
    Ok(config)
}
