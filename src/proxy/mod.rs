// ABOUTME: Reverse proxy site rendering, placement, syntax check and reload.
// ABOUTME: An invalid site file is never reloaded into the running proxy.

use crate::config::DeploymentConfig;
use crate::remote::{
    Privilege, RemoteError, RemoteHost, RemoteScript, ScriptError, ScriptReport, Step, quote,
};
use crate::template::{Template, TemplateError};
use crate::types::SiteId;
use std::path::PathBuf;

/// Built-in site: default server on port 80 to loopback, forwarding client identity headers.
pub const DEFAULT_TEMPLATE: &str = r#"server {
    listen 80 default_server;
    listen [::]:80 default_server;
    server_name _;

    location / {
        proxy_pass http://127.0.0.1:{{PORT}};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_connect_timeout 5s;
        proxy_read_timeout 60s;
    }
}
"#;

const PROXY_ROOT: &str = "/etc/nginx";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to read proxy template {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to upload site configuration to {path}: {stderr}")]
    Upload { path: String, stderr: String },

    #[error("failed to install site configuration: {0}")]
    Install(#[source] ScriptError),

    #[error("proxy configuration check failed, not reloading: {stderr}")]
    Syntax { stderr: String },

    #[error("proxy reload failed: {0}")]
    Reload(#[source] ScriptError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// A rendered site configuration, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySite {
    pub site: SiteId,
    pub contents: String,
}

impl ProxySite {
    /// Render the configured template (or the built-in one) for `config`.
    /// Runs locally; an unresolved placeholder fails here, before any upload.
    pub fn render(config: &DeploymentConfig) -> Result<Self, ProxyError> {
        let (name, source) = match &config.proxy_template {
            Some(path) => (
                path.display().to_string(),
                std::fs::read_to_string(path).map_err(|source| ProxyError::TemplateRead {
                    path: path.clone(),
                    source,
                })?,
            ),
            None => ("built-in site template".to_string(), DEFAULT_TEMPLATE.to_string()),
        };
        Self::from_template(config, &name, &source)
    }

    pub fn from_template(
        config: &DeploymentConfig,
        name: &str,
        source: &str,
    ) -> Result<Self, ProxyError> {
        let contents = Template::new(name, source).set("PORT", config.port).render()?;
        Ok(Self {
            site: config.site.clone(),
            contents,
        })
    }

    fn file_name(&self) -> String {
        format!("{}.conf", self.site)
    }
}

/// Where site files live on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyLayout {
    /// `sites-available/` plus `sites-enabled/` symlinks (Debian family).
    Split,
    /// A single `conf.d/` directory.
    ConfD,
}

impl ProxyLayout {
    pub async fn detect<H: RemoteHost + ?Sized>(host: &H) -> Result<Self, RemoteError> {
        let output = host
            .exec(&format!(
                "test -d {PROXY_ROOT}/sites-available && test -d {PROXY_ROOT}/sites-enabled"
            ))
            .await?;
        Ok(if output.success() {
            ProxyLayout::Split
        } else {
            ProxyLayout::ConfD
        })
    }

    /// Path the site file is written to.
    pub fn site_path(&self, file: &str) -> String {
        match self {
            ProxyLayout::Split => format!("{PROXY_ROOT}/sites-available/{file}"),
            ProxyLayout::ConfD => format!("{PROXY_ROOT}/conf.d/{file}"),
        }
    }

    /// Symlink into the enabled set, split layouts only.
    pub fn enabled_path(&self, file: &str) -> Option<String> {
        match self {
            ProxyLayout::Split => Some(format!("{PROXY_ROOT}/sites-enabled/{file}")),
            ProxyLayout::ConfD => None,
        }
    }

    /// The site the distribution package enables out of the box.
    pub fn default_site_path(&self) -> String {
        match self {
            ProxyLayout::Split => format!("{PROXY_ROOT}/sites-enabled/default"),
            ProxyLayout::ConfD => format!("{PROXY_ROOT}/conf.d/default.conf"),
        }
    }

    /// Drop the packaged default site and any `default_server` flag left in
    /// the main config, so unmatched requests reach the deployed site.
    /// Safe to repeat.
    pub fn disable_default_command(&self) -> String {
        let main = format!("{PROXY_ROOT}/nginx.conf");
        format!(
            "rm -f {default} && if grep -q default_server {main}; then \
             sed -i 's/ default_server//g' {main}; fi",
            default = self.default_site_path(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProxyReport {
    pub layout: ProxyLayout,
    pub path: String,
    pub steps: ScriptReport,
}

#[derive(Debug)]
pub struct ProxyConfigurer {
    privilege: Privilege,
}

impl ProxyConfigurer {
    pub fn new(config: &DeploymentConfig) -> Self {
        Self {
            privilege: config.privilege,
        }
    }

    pub async fn configure<H: RemoteHost + ?Sized>(
        &self,
        host: &H,
        site: &ProxySite,
    ) -> Result<ProxyReport, ProxyError> {
        let layout = ProxyLayout::detect(host).await?;
        let file = site.file_name();
        let path = layout.site_path(&file);
        tracing::info!("proxy layout {:?}, site file {}", layout, path);

        let staging = format!("/tmp/slipway-{}", file);
        let output = host.write_file(&staging, &site.contents).await?;
        if !output.success() {
            return Err(ProxyError::Upload {
                path: staging,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let mut install = RemoteScript::new().step(Step::fatal(
            "install site configuration",
            self.privilege.elevate(&format!(
                "mv -f {staging} {path} && chown root:root {path} && chmod 644 {path}",
                staging = quote(&staging),
                path = quote(&path),
            )),
        ));
        if let Some(enabled) = layout.enabled_path(&file) {
            install.push(Step::fatal(
                "enable site",
                self.privilege
                    .elevate(&format!("ln -sfn {} {}", quote(&path), quote(&enabled))),
            ));
        }
        install.push(Step::fatal(
            "disable default site",
            self.privilege.elevate(&layout.disable_default_command()),
        ));
        let mut steps = install.run(host).await.map_err(ProxyError::Install)?;

        let check = host.exec(&self.privilege.elevate("nginx -t")).await?;
        if !check.success() {
            tracing::error!("nginx -t rejected {}: {}", path, check.stderr.trim());
            return Err(ProxyError::Syntax {
                stderr: check.stderr.trim().to_string(),
            });
        }

        let reload = RemoteScript::new()
            .step(Step::fatal(
                "reload proxy",
                self.privilege.elevate("systemctl reload nginx"),
            ))
            .run(host)
            .await
            .map_err(ProxyError::Reload)?;
        steps.extend(reload);

        Ok(ProxyReport {
            layout,
            path,
            steps,
        })
    }

    /// Remove the site from both layouts, then reload if the remaining
    /// configuration still validates. Used by teardown.
    pub fn removal_script(&self, site: &SiteId) -> RemoteScript {
        let file = format!("{}.conf", site);
        let paths = [
            ProxyLayout::Split.enabled_path(&file),
            Some(ProxyLayout::Split.site_path(&file)),
            Some(ProxyLayout::ConfD.site_path(&file)),
        ];
        let paths: Vec<String> = paths.into_iter().flatten().map(|p| quote(&p)).collect();
        RemoteScript::new()
            .step(Step::recoverable(
                "remove site configuration",
                self.privilege.elevate(&format!("rm -f {}", paths.join(" "))),
            ))
            .step(Step::recoverable(
                "reload proxy",
                self.privilege.elevate("nginx -t && systemctl reload nginx"),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteTarget;
    use crate::types::Branch;

    fn config() -> DeploymentConfig {
        DeploymentConfig::new(
            "https://github.com/acme/shop.git",
            Branch::new("main").unwrap(),
            RemoteTarget::new("host", "deploy"),
            8080,
            SiteId::new("shop").unwrap(),
        )
    }

    #[test]
    fn default_template_forwards_to_loopback_port() {
        let site = ProxySite::render(&config()).unwrap();
        assert!(site.contents.contains("listen 80 default_server;"));
        assert!(site.contents.contains("listen [::]:80 default_server;"));
        assert!(site.contents.contains("proxy_pass http://127.0.0.1:8080;"));
        assert!(site.contents.contains("X-Forwarded-For"));
        assert!(!site.contents.contains("{{"));
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = ProxySite::from_template(&config(), "custom", "proxy_pass {{UPSTREAM}};")
            .unwrap_err();
        match err {
            ProxyError::Template(TemplateError::Unresolved { names, .. }) => {
                assert_eq!(names, vec!["UPSTREAM".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_template_file_is_reported() {
        let mut config = config();
        config.proxy_template = Some(PathBuf::from("/definitely/not/a/template.conf"));
        assert!(matches!(
            ProxySite::render(&config),
            Err(ProxyError::TemplateRead { .. })
        ));
    }

    #[test]
    fn layouts_place_files() {
        assert_eq!(
            ProxyLayout::Split.site_path("shop.conf"),
            "/etc/nginx/sites-available/shop.conf"
        );
        assert_eq!(
            ProxyLayout::Split.enabled_path("shop.conf").as_deref(),
            Some("/etc/nginx/sites-enabled/shop.conf")
        );
        assert_eq!(ProxyLayout::ConfD.site_path("shop.conf"), "/etc/nginx/conf.d/shop.conf");
        assert_eq!(ProxyLayout::ConfD.enabled_path("shop.conf"), None);
    }

    #[test]
    fn default_site_is_removed_per_layout() {
        let split = ProxyLayout::Split.disable_default_command();
        assert!(split.starts_with("rm -f /etc/nginx/sites-enabled/default &&"));
        assert!(split.contains("sed -i 's/ default_server//g' /etc/nginx/nginx.conf"));
        let conf_d = ProxyLayout::ConfD.disable_default_command();
        assert!(conf_d.starts_with("rm -f /etc/nginx/conf.d/default.conf &&"));
    }
}
