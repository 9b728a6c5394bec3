// ABOUTME: Host platform detection: kernel, architecture, distribution family, package manager.
// ABOUTME: One remote command gathers everything; parsing is pure and unit tested.

use std::fmt;

/// Prints kernel, machine, the first available package manager (or nothing),
/// a separator, then /etc/os-release.
pub(crate) const DETECT_COMMAND: &str = "uname -s; uname -m; \
for pm in apt-get dnf yum apk; do command -v $pm >/dev/null 2>&1 && { echo $pm; break; }; done; \
echo ---; cat /etc/os-release 2>/dev/null || true";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Apk,
}

impl PackageManager {
    fn from_binary(name: &str) -> Option<Self> {
        match name {
            "apt-get" => Some(PackageManager::Apt),
            "dnf" => Some(PackageManager::Dnf),
            "yum" => Some(PackageManager::Yum),
            "apk" => Some(PackageManager::Apk),
            _ => None,
        }
    }

    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Apk => "apk",
        }
    }

    /// Non-interactive install command for `package`.
    pub fn install(&self, package: &str) -> String {
        match self {
            PackageManager::Apt => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get update -qq && \
                 DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {package}"
            ),
            PackageManager::Dnf => format!("dnf install -y {package}"),
            PackageManager::Yum => format!("yum install -y {package}"),
            PackageManager::Apk => format!("apk add --no-cache {package}"),
        }
    }

    /// Package providing `docker compose`.
    pub fn compose_plugin(&self) -> &'static str {
        match self {
            PackageManager::Apk => "docker-cli-compose",
            _ => "docker-compose-plugin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    RedHat,
    Alpine,
    Other(String),
}

impl OsFamily {
    /// Classify from os-release `ID` and `ID_LIKE`.
    fn classify(id: &str, id_like: &str) -> Self {
        let ids: Vec<&str> = std::iter::once(id).chain(id_like.split_whitespace()).collect();
        if ids.iter().any(|i| matches!(*i, "debian" | "ubuntu")) {
            OsFamily::Debian
        } else if ids
            .iter()
            .any(|i| matches!(*i, "rhel" | "fedora" | "centos" | "rocky" | "almalinux"))
        {
            OsFamily::RedHat
        } else if id == "alpine" {
            OsFamily::Alpine
        } else if id.is_empty() {
            OsFamily::Other("unknown".to_string())
        } else {
            OsFamily::Other(id.to_string())
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Debian => f.write_str("debian"),
            OsFamily::RedHat => f.write_str("redhat"),
            OsFamily::Alpine => f.write_str("alpine"),
            OsFamily::Other(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// `uname -s`, e.g. `Linux`.
    pub kernel: String,
    /// `uname -m`, e.g. `x86_64`.
    pub arch: String,
    pub os: OsFamily,
    pub package_manager: Option<PackageManager>,
}

impl HostFacts {
    pub fn parse(stdout: &str) -> Result<Self, String> {
        let mut lines = stdout.lines().map(str::trim);
        let kernel = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or("missing kernel name")?
            .to_string();
        let arch = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or("missing machine architecture")?
            .to_string();

        let mut package_manager = None;
        for line in lines.by_ref() {
            if line == "---" {
                break;
            }
            package_manager = package_manager.or(PackageManager::from_binary(line));
        }

        let mut id = String::new();
        let mut id_like = String::new();
        for line in lines {
            if let Some(v) = line.strip_prefix("ID=") {
                id = v.trim_matches('"').to_string();
            } else if let Some(v) = line.strip_prefix("ID_LIKE=") {
                id_like = v.trim_matches('"').to_string();
            }
        }

        Ok(Self {
            kernel,
            arch,
            os: OsFamily::classify(&id, &id_like),
            package_manager,
        })
    }

    /// Architecture suffix used by compose release assets.
    pub fn compose_arch(&self) -> &str {
        match self.arch.as_str() {
            "amd64" => "x86_64",
            "arm64" => "aarch64",
            "armv7l" => "armv7",
            "armv6l" => "armv6",
            other => other,
        }
    }
}
