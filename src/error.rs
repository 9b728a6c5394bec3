// ABOUTME: Crate-level error wrapping every stage failure.
// ABOUTME: Maps each failure to the pipeline phase it stopped in and a process exit code.

use crate::config::ConfigError;
use crate::deploy::{LockError, Phase};
use crate::launch::LaunchError;
use crate::provision::ProvisionError;
use crate::proxy::ProxyError;
use crate::release::PublishError;
use crate::remote::{RemoteError, ScriptError};
use crate::source::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect: {0}")]
    Connect(#[source] RemoteError),

    #[error("connected, but the remote shell did not respond: {0}")]
    Probe(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("source retrieval failed: {0}")]
    Source(#[from] SourceError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("proxy configuration failed: {0}")]
    Proxy(#[from] ProxyError),

    #[error("teardown failed: {0}")]
    Teardown(#[from] ScriptError),

    #[error("teardown failed: {0}")]
    TeardownRemote(#[source] RemoteError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Phase the pipeline stopped in.
    pub fn phase(&self) -> Phase {
        match self {
            Error::Config(_) => Phase::Config,
            Error::Connect(_) | Error::Probe(_) | Error::Lock(_) => Phase::Connect,
            Error::Provision(_) => Phase::Provision,
            Error::Source(_) | Error::Publish(_) => Phase::Publish,
            Error::Launch(_) => Phase::Launch,
            Error::Proxy(ProxyError::Template(_) | ProxyError::TemplateRead { .. }) => {
                Phase::Preflight
            }
            Error::Proxy(_) => Phase::Proxy,
            Error::Teardown(_) | Error::TeardownRemote(_) => Phase::Teardown,
        }
    }

    /// Process exit code. Each phase owns a band of ten.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(e) => match e {
                ConfigError::Missing(_) => 10,
                ConfigError::Invalid { .. } | ConfigError::MissingEnvVar(_) => 11,
                ConfigError::NotFound(_) | ConfigError::Read { .. } | ConfigError::Yaml(_) => 12,
            },
            Error::Connect(_) => 20,
            Error::Probe(_) => 21,
            Error::Lock(LockError::Held { .. }) => 22,
            Error::Lock(_) => 20,
            Error::Provision(ProvisionError::NoPackageManager(_)) => 31,
            Error::Provision(_) => 30,
            Error::Source(_) => 44,
            Error::Publish(e) => match e {
                PublishError::CreateDir { .. } | PublishError::Remote { .. } => 40,
                PublishError::Transfer { .. } => 41,
                PublishError::Permissions { .. } => 42,
                PublishError::Activation { .. } => 43,
                PublishError::ReleaseExists { .. } => 45,
            },
            Error::Launch(e) => match e {
                LaunchError::Remote(_) => 50,
                LaunchError::NoDockerfile(_) => 51,
                LaunchError::Build(_) => 52,
                LaunchError::Run(_) => 53,
                LaunchError::ComposeUp(_) => 54,
            },
            // Template failures are caught in preflight but belong to the proxy band.
            Error::Proxy(e) => match e {
                ProxyError::Template(_) | ProxyError::TemplateRead { .. } => 61,
                ProxyError::Upload { .. } | ProxyError::Install(_) | ProxyError::Remote(_) => 62,
                ProxyError::Syntax { .. } => 63,
                ProxyError::Reload(_) => 64,
            },
            Error::Teardown(_) | Error::TeardownRemote(_) => 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Field;
    use crate::template::TemplateError;

    #[test]
    fn config_errors_use_config_band() {
        assert_eq!(Error::from(ConfigError::Missing(Field::Host)).exit_code(), 10);
        let invalid = ConfigError::Invalid {
            field: "port",
            reason: "nope".to_string(),
        };
        assert_eq!(Error::from(invalid).exit_code(), 11);
    }

    #[test]
    fn unresolved_template_is_proxy_band_before_connect() {
        let err = Error::from(ProxyError::Template(TemplateError::Unresolved {
            template: "site".to_string(),
            names: vec!["PORT".to_string()],
        }));
        assert_eq!(err.exit_code(), 61);
        assert_eq!(err.phase(), Phase::Preflight);
    }

    #[test]
    fn held_lock_is_distinct_from_connect_failure() {
        let held = Error::from(LockError::Held {
            holder: "ci".to_string(),
            pid: 1,
            started_at: chrono::Utc::now(),
        });
        assert_eq!(held.exit_code(), 22);
        assert_eq!(held.phase(), Phase::Connect);
        assert_eq!(Error::Probe("x".to_string()).exit_code(), 21);
    }

    #[test]
    fn publish_errors_map_by_step() {
        let err = Error::from(PublishError::Transfer {
            path: "/opt/shop/releases/main-1".to_string(),
            exit_code: 23,
            stderr: String::new(),
        });
        assert_eq!(err.exit_code(), 41);
        let err = Error::from(PublishError::ReleaseExists {
            path: "/opt/shop/releases/main-1".to_string(),
        });
        assert_eq!(err.exit_code(), 45);
    }

    #[test]
    fn every_band_is_nonzero() {
        let errors = [
            Error::Probe(String::new()),
            Error::Provision(ProvisionError::NoPackageManager("nginx")),
            Error::Launch(LaunchError::NoDockerfile("/opt/shop/current".to_string())),
            Error::Proxy(ProxyError::Syntax {
                stderr: String::new(),
            }),
        ];
        let codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        assert_eq!(codes, vec![21, 31, 51, 63]);
    }
}
