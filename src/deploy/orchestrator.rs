// ABOUTME: Sequences the deployment pipeline and owns the target connection and lock.
// ABOUTME: Each stage is a hard gate; the lock and connection are released whatever the outcome.

use super::lock::DeployLock;
use super::outcome::DeploymentSummary;
use super::{preflight, teardown};
use crate::config::DeploymentConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{Error, Result};
use crate::launch::WorkloadLauncher;
use crate::provision::DependencyProvisioner;
use crate::proxy::{ProxyConfigurer, ProxySite};
use crate::release::{CurrentPointer, PublishError, ReleasePublisher, ReleaseStamp};
use crate::remote::{Connector, RemoteHost, ScriptReport};
use crate::source;
use crate::validate::{DeploymentValidator, PUBLIC_PORT, Verdict};

pub struct Orchestrator<'a, C: Connector> {
    config: &'a DeploymentConfig,
    connector: &'a C,
    stamp: ReleaseStamp,
    force: bool,
    ping: bool,
    public_port: u16,
}

impl<'a, C: Connector> Orchestrator<'a, C> {
    pub fn new(config: &'a DeploymentConfig, connector: &'a C) -> Self {
        Self {
            config,
            connector,
            stamp: ReleaseStamp::now(),
            force: false,
            ping: true,
            public_port: PUBLIC_PORT,
        }
    }

    /// Fix the release timestamp instead of reading the clock.
    pub fn stamp(mut self, stamp: ReleaseStamp) -> Self {
        self.stamp = stamp;
        self
    }

    /// Break an existing deploy lock.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Skip the ICMP reachability probe.
    pub fn without_ping(mut self) -> Self {
        self.ping = false;
        self
    }

    /// Port for the public HTTP probe.
    pub fn public_port(mut self, port: u16) -> Self {
        self.public_port = port;
        self
    }

    pub async fn deploy(&self, diagnostics: &mut Diagnostics) -> Result<DeploymentSummary> {
        let site = preflight::check(self.config)?;
        let host = self.open(diagnostics).await?;
        let result = match DeployLock::acquire(&host, self.config, self.force).await {
            Ok(mut lock) => {
                let result = self.run_stages(&host, &site, &mut lock, diagnostics).await;
                self.unlock(lock, &host, diagnostics).await;
                result
            }
            Err(e) => Err(e.into()),
        };
        self.close(host, diagnostics).await;
        result
    }

    /// Remove the site from the target.
    pub async fn cleanup(&self, diagnostics: &mut Diagnostics) -> Result<ScriptReport> {
        self.config.validate()?;
        let host = self.open(diagnostics).await?;
        let result = match DeployLock::acquire(&host, self.config, self.force).await {
            Ok(lock) => {
                let result = teardown::teardown(&host, self.config).await;
                if let Ok(report) = &result {
                    diagnostics.record_steps(report);
                }
                self.unlock(lock, &host, diagnostics).await;
                result
            }
            Err(e) => Err(e.into()),
        };
        self.close(host, diagnostics).await;
        result
    }

    async fn open(&self, diagnostics: &mut Diagnostics) -> Result<C::Host> {
        let address = &self.config.target.host;
        if self.ping
            && let Err(message) = preflight::ping(address).await
        {
            diagnostics.warn(Warning::ping(message));
        }

        tracing::info!("connecting to {}", self.config.target);
        let host = self
            .connector
            .connect(self.config)
            .await
            .map_err(Error::Connect)?;

        match host.exec("true").await {
            Ok(output) if output.success() => Ok(host),
            Ok(output) => {
                let err = Error::Probe(format!(
                    "exit code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ));
                self.close(host, diagnostics).await;
                Err(err)
            }
            Err(e) => {
                self.close(host, diagnostics).await;
                Err(Error::Connect(e))
            }
        }
    }

    async fn close(&self, host: C::Host, diagnostics: &mut Diagnostics) {
        if let Err(e) = self.connector.disconnect(host).await {
            diagnostics.warn(Warning::ssh_disconnect(format!("disconnect failed: {}", e)));
        }
    }

    async fn unlock(&self, lock: DeployLock, host: &C::Host, diagnostics: &mut Diagnostics) {
        let path = lock.path().to_string();
        if let Err(e) = lock.release(host).await {
            diagnostics.warn(Warning::lock_release(format!("{}: {}", path, e)));
        }
    }

    /// A failed refresh only warns; the lock is still held.
    async fn refresh(&self, lock: &mut DeployLock, host: &C::Host, diagnostics: &mut Diagnostics) {
        if let Err(e) = lock.refresh(host).await {
            diagnostics.warn(Warning::lock_refresh(e.to_string()));
        }
    }

    async fn run_stages(
        &self,
        host: &C::Host,
        site: &ProxySite,
        lock: &mut DeployLock,
        diagnostics: &mut Diagnostics,
    ) -> Result<DeploymentSummary> {
        let config = self.config;

        tracing::info!("provisioning {}", host.address());
        let provisioned = DependencyProvisioner::new(config).provision(host).await?;
        diagnostics.record_steps(&provisioned.steps);
        self.refresh(lock, host, diagnostics).await;

        let tree = source::fetch(config).await?;
        let previous = CurrentPointer::read(host, config)
            .await
            .map_err(|source| Error::Publish(PublishError::Remote { source }))?;
        if let Some(previous) = &previous {
            tracing::info!("current release: {}", previous);
        }
        let release = ReleasePublisher::new(config)
            .publish(host, tree.path(), &self.stamp)
            .await?;
        self.refresh(lock, host, diagnostics).await;

        let launched = WorkloadLauncher::new(config, provisioned.compose)
            .launch(host, &release)
            .await?;
        diagnostics.record_steps(&launched.steps);
        self.refresh(lock, host, diagnostics).await;

        let proxy = ProxyConfigurer::new(config).configure(host, site).await?;
        diagnostics.record_steps(&proxy.steps);

        let validation = DeploymentValidator::new(config)
            .public_port(self.public_port)
            .validate(host)
            .await;
        if validation.verdict != Verdict::Healthy {
            diagnostics.warn(Warning::validation(validation.verdict.to_string()));
        }

        Ok(DeploymentSummary {
            release,
            previous,
            workload: launched.workload,
            proxy_path: proxy.path,
            validation,
        })
    }
}
