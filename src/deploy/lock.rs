// ABOUTME: Deploy lock that turns overlapping runs against one target into a clean refusal.
// ABOUTME: Atomic noclobber creation of <app-base>/.slipway.lock holding JSON holder info.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DeploymentConfig;
use crate::remote::{Privilege, RemoteError, RemoteHost, quote};
use crate::types::SiteId;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("deploy lock held by {holder} (pid {pid}) since {started_at}; use --force to break it")]
    Held {
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    #[error("deploy lock error: {0}")]
    Failed(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the operator machine.
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub site: String,
    /// Set by the holder between stages while the run is still alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    pub fn new(site: &SiteId) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            site: site.to_string(),
            refreshed_at: None,
        }
    }

    /// Last sign of life from the holder.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.refreshed_at.unwrap_or(self.started_at)
    }

    /// No sign of life for one hour. A single stage running longer than
    /// that can still have its lock broken.
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.last_seen();
        age.num_hours() >= 1
    }
}

/// A held deploy lock. Release it explicitly with [`DeployLock::release`].
#[derive(Debug)]
pub struct DeployLock {
    path: String,
    info: LockInfo,
    privilege: Privilege,
}

impl DeployLock {
    /// Acquire the lock for `config`'s application base.
    ///
    /// Stale (silent for an hour), unreadable or corrupted locks are broken
    /// with a warning; `force` breaks any lock.
    pub async fn acquire<H: RemoteHost + ?Sized>(
        host: &H,
        config: &DeploymentConfig,
        force: bool,
    ) -> Result<Self, LockError> {
        let lock = Self {
            path: config.lock_path(),
            info: LockInfo::new(&config.site),
            privilege: config.privilege,
        };

        // set -C makes > fail if the file already exists.
        let acquire = lock.privilege.elevate(&format!(
            "mkdir -p {base} && (set -C; echo {json} > {path})",
            base = quote(&config.app_base),
            json = quote(&lock.json()?),
            path = quote(&lock.path),
        ));

        let created = host.exec(&acquire).await?;
        if created.success() {
            tracing::info!("acquired deploy lock {}", lock.path);
            return Ok(lock);
        }

        match lock.read(host).await? {
            Some(existing) if !force && !existing.is_stale() => {
                return Err(LockError::Held {
                    holder: existing.holder,
                    pid: existing.pid,
                    started_at: existing.started_at,
                });
            }
            Some(existing) => tracing::warn!(
                "breaking {} lock held by {} (pid {}) since {}, last seen {}",
                if force { "forced" } else { "stale" },
                existing.holder,
                existing.pid,
                existing.started_at,
                existing.last_seen()
            ),
            // No lock in the way: the create itself failed (sudo, permissions, disk).
            None if !host.file_exists(&lock.path).await? => {
                return Err(LockError::Failed(format!(
                    "cannot create {}: {}",
                    lock.path,
                    created.stderr.trim()
                )));
            }
            None => tracing::warn!("lock info unreadable, breaking lock"),
        }

        host.exec(&lock.remove_command()).await?;
        let retried = host.exec(&acquire).await?;
        if !retried.success() {
            return Err(LockError::Failed(format!(
                "cannot re-create {} after breaking it: {}",
                lock.path,
                retried.stderr.trim()
            )));
        }
        tracing::info!("acquired deploy lock {}", lock.path);
        Ok(lock)
    }

    /// Rewrite the lock with a fresh `refreshed_at` so a long run is not
    /// mistaken for an abandoned one.
    pub async fn refresh<H: RemoteHost + ?Sized>(&mut self, host: &H) -> Result<(), LockError> {
        self.info.refreshed_at = Some(Utc::now());
        let command = self.privilege.elevate(&format!(
            "echo {} > {}",
            quote(&self.json()?),
            quote(&self.path)
        ));
        let output = host.exec(&command).await?;
        if !output.success() {
            return Err(LockError::Failed(format!(
                "failed to refresh {}: {}",
                self.path,
                output.stderr.trim()
            )));
        }
        tracing::debug!("refreshed deploy lock {}", self.path);
        Ok(())
    }

    fn json(&self) -> Result<String, LockError> {
        serde_json::to_string(&self.info)
            .map_err(|e| LockError::Failed(format!("failed to serialize lock: {}", e)))
    }

    async fn read<H: RemoteHost + ?Sized>(&self, host: &H) -> Result<Option<LockInfo>, LockError> {
        let output = host
            .exec(&self.privilege.elevate(&format!("cat {}", quote(&self.path))))
            .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(serde_json::from_str(output.stdout.trim()).ok())
    }

    fn remove_command(&self) -> String {
        self.privilege.elevate(&format!("rm -f {}", quote(&self.path)))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Remove the lock file.
    pub async fn release<H: RemoteHost + ?Sized>(self, host: &H) -> Result<(), LockError> {
        let output = host.exec(&self.remove_command()).await?;
        if !output.success() {
            return Err(LockError::Failed(format!(
                "failed to remove {}: {}",
                self.path,
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_info_records_host_and_pid() {
        let site = SiteId::new("shop").unwrap();
        let info = LockInfo::new(&site);

        assert_eq!(info.site, "shop");
        assert_eq!(info.pid, std::process::id());
        assert!(!info.holder.is_empty());
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        let info = LockInfo::new(&SiteId::new("shop").unwrap());
        assert!(!info.is_stale());
    }

    #[test]
    fn old_lock_is_stale() {
        let mut info = LockInfo::new(&SiteId::new("shop").unwrap());
        info.started_at = Utc::now() - chrono::Duration::hours(2);
        assert!(info.is_stale());
    }

    #[test]
    fn lock_info_roundtrips_as_json() {
        let info = LockInfo::new(&SiteId::new("shop").unwrap());
        let json = serde_json::to_string(&info).unwrap();
        let back: LockInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.site, "shop");
        assert_eq!(back.started_at, info.started_at);
        assert!(!json.contains("refreshed_at"));
    }

    #[test]
    fn recent_refresh_keeps_old_lock_alive() {
        let mut info = LockInfo::new(&SiteId::new("shop").unwrap());
        info.started_at = Utc::now() - chrono::Duration::hours(3);
        info.refreshed_at = Some(Utc::now() - chrono::Duration::minutes(5));
        assert!(!info.is_stale());
        assert_eq!(info.last_seen(), info.refreshed_at.unwrap());
    }
}
