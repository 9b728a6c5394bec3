// ABOUTME: Test support utilities.
// ABOUTME: Scripted and local RemoteHost implementations plus tracing setup for integration tests.

// Each test binary only uses some of these items, so allow dead_code.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use slipway::config::{DeploymentConfig, RemoteTarget};
use slipway::remote::{
    CommandOutput, Connector, Privilege, RemoteError, RemoteHost, TransferRequest,
};
use slipway::ssh;
use slipway::types::{Branch, SiteId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("slipway=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Output for a command that succeeded with `stdout`.
pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Output for a command that failed.
pub fn failed(exit_code: u32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Detection output of a stock Ubuntu host.
pub const UBUNTU_FACTS: &str =
    "Linux\nx86_64\napt-get\n---\nNAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";

/// State the fake host simulates: existing paths, symlinks and named flags.
#[derive(Debug, Default)]
pub struct FakeState {
    pub files: BTreeSet<String>,
    pub links: BTreeMap<String, String>,
    pub flags: BTreeSet<String>,
    pub written: BTreeMap<String, String>,
    pub transfers: Vec<TransferRequest>,
    pub commands: Vec<String>,
}

impl FakeState {
    /// Whether `path` exists, following symlinks on any prefix.
    pub fn exists(&self, path: &str) -> bool {
        self.files.contains(path)
            || self.links.contains_key(path)
            || self.resolve(path).is_some_and(|p| self.files.contains(&p))
    }

    fn resolve(&self, path: &str) -> Option<String> {
        self.links.iter().find_map(|(link, target)| {
            path.strip_prefix(link.as_str())
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
                .map(|rest| format!("{}{}", target, rest))
        })
    }

    pub fn set(&mut self, flag: &str) {
        self.flags.insert(flag.to_string());
    }

    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// `ln -sfn <target> <staging> && mv -Tf <staging> <current>`
    fn apply_activation(&mut self, command: &str) {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let target = tokens
            .windows(3)
            .find(|w| w[0] == "ln" && w[1] == "-sfn")
            .map(|w| w[2]);
        let current = tokens
            .windows(4)
            .find(|w| w[0] == "mv" && w[1] == "-Tf")
            .map(|w| w[3]);
        if let (Some(target), Some(current)) = (target, current) {
            self.links.insert(current.to_string(), target.to_string());
        }
    }
}

type Responder = Arc<dyn Fn(&mut FakeState, &str) -> CommandOutput + Send + Sync>;

/// A scripted host. Commands succeed with empty output unless a rule matches.
/// Rules match by substring; the most recently added rule wins.
#[derive(Clone)]
pub struct FakeHost {
    address: String,
    state: Arc<Mutex<FakeState>>,
    rules: Arc<Mutex<Vec<(String, Responder)>>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            address: "203.0.113.7".to_string(),
            state: Arc::new(Mutex::new(FakeState::default())),
            rules: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A host that already answers detection like Ubuntu.
    pub fn ubuntu() -> Self {
        let host = Self::new();
        host.respond("uname -s", ok(UBUNTU_FACTS));
        host
    }

    /// Fixed output for commands containing `pattern`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.when(pattern, move |_, _| output.clone());
    }

    /// Computed output for commands containing `pattern`.
    pub fn when<F>(&self, pattern: &str, f: F)
    where
        F: Fn(&mut FakeState, &str) -> CommandOutput + Send + Sync + 'static,
    {
        self.rules.lock().push((pattern.to_string(), Arc::new(f)));
    }

    pub fn add_file(&self, path: &str) {
        self.state.lock().files.insert(path.to_string());
    }

    pub fn add_link(&self, link: &str, target: &str) {
        self.state.lock().links.insert(link.to_string(), target.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Index of the first command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&FakeState) -> T) -> T {
        f(&self.state.lock())
    }

    fn builtin(state: &mut FakeState, command: &str) -> CommandOutput {
        if let Some(path) = command.strip_prefix("test -e ") {
            return if state.exists(path.trim()) {
                ok("")
            } else {
                failed(1, "")
            };
        }
        if let Some(path) = command.strip_prefix("readlink ") {
            return match state.links.get(path.trim()) {
                Some(target) => ok(&format!("{}\n", target)),
                None => failed(1, ""),
            };
        }
        if command.contains("mv -Tf") {
            state.apply_activation(command);
        }
        ok("")
    }
}

#[async_trait]
impl RemoteHost for FakeHost {
    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let rule = self
            .rules
            .lock()
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, f)| f.clone());
        let mut state = self.state.lock();
        state.commands.push(command.to_string());
        Ok(match rule {
            Some(f) => f(&mut state, command),
            None => Self::builtin(&mut state, command),
        })
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<CommandOutput, RemoteError> {
        let mut state = self.state.lock();
        state.commands.push(format!("cat > {}", path));
        state.files.insert(path.to_string());
        state.written.insert(path.to_string(), contents.to_string());
        Ok(ok(""))
    }

    async fn transfer_tree(&self, request: &TransferRequest) -> Result<CommandOutput, RemoteError> {
        let mut state = self.state.lock();
        state
            .commands
            .push(format!("rsync {} -> {}", request.local.display(), request.remote));
        state.transfers.push(request.clone());
        for rel in walk(&request.local) {
            state.files.insert(format!("{}/{}", request.remote, rel));
        }
        state.files.insert(request.remote.clone());
        Ok(ok(""))
    }
}

/// Relative paths of every file under `root`.
fn walk(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    out
}

/// Hands out clones of one FakeHost, or refuses to connect.
#[derive(Clone)]
pub struct FakeConnector {
    host: FakeHost,
    reachable: bool,
    connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(host: FakeHost) -> Self {
        Self {
            host,
            reachable: true,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new(FakeHost::new())
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Host = FakeHost;

    async fn connect(&self, config: &DeploymentConfig) -> Result<FakeHost, RemoteError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            return Err(RemoteError::Ssh(ssh::Error::ConnectTimeout {
                host: config.target.host.clone(),
                port: config.target.port,
                timeout: config.connect_timeout,
            }));
        }
        Ok(self.host.clone())
    }
}

/// Runs commands with `sh -c` on this machine. Transfers copy with `cp -a`.
pub struct LocalHost;

#[async_trait]
impl RemoteHost for LocalHost {
    fn address(&self) -> &str {
        "localhost"
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| RemoteError::Spawn {
                program: "sh".to_string(),
                message: e.to_string(),
            })?;
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(255) as u32,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<CommandOutput, RemoteError> {
        match tokio::fs::write(path, contents).await {
            Ok(()) => Ok(ok("")),
            Err(e) => Ok(failed(1, &e.to_string())),
        }
    }

    async fn transfer_tree(&self, request: &TransferRequest) -> Result<CommandOutput, RemoteError> {
        self.exec(&format!(
            "cp -a {}/. {}/",
            slipway::remote::quote(&request.local.to_string_lossy()),
            slipway::remote::quote(&request.remote)
        ))
        .await
    }
}

/// Name of the user running the tests.
pub fn current_user() -> String {
    let output = std::process::Command::new("id").arg("-un").output().unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Config for site `shop` on port 8080, deploying `source` with no elevation.
pub fn config(source: &Path) -> DeploymentConfig {
    let mut config = DeploymentConfig::new(
        "https://github.com/acme/shop.git",
        Branch::new("main").unwrap(),
        RemoteTarget::new("127.0.0.1", "deploy"),
        8080,
        SiteId::new("shop").unwrap(),
    );
    config.source_dir = Some(source.to_path_buf());
    config.privilege = Privilege::Direct;
    config.probe_timeout = std::time::Duration::from_millis(500);
    config
}

/// A local tree with the given files.
pub fn source_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
    dir
}

/// Answers every connection with `HTTP/1.1 200 OK`. Returns the port.
pub async fn http_responder() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
            });
        }
    });
    port
}

/// A port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
