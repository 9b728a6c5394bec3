// ABOUTME: Per-run log artifact and tracing subscriber setup.
// ABOUTME: Writes timestamped INFO/WARN/ERROR lines to deploy-<stamp>.log, keeps a tail for failures, prunes old runs.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

/// Lines surfaced on the terminal when a run aborts.
pub const TAIL_LINES: usize = 20;

const LOG_PREFIX: &str = "deploy-";
const LOG_SUFFIX: &str = ".log";

/// The log file for the current run.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    tail: Arc<Mutex<VecDeque<String>>>,
    partial: Arc<Mutex<String>>,
}

impl RunLog {
    /// Create `deploy-<stamp>.log` under `dir`.
    pub fn create(dir: &Path, stamp: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{LOG_PREFIX}{stamp}{LOG_SUFFIX}"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
            tail: Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_LINES))),
            partial: Arc::new(Mutex::new(String::new())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The most recent lines written, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.tail.lock().iter().cloned().collect()
    }

    fn record(&self, buf: &[u8]) {
        let mut partial = self.partial.lock();
        partial.push_str(&String::from_utf8_lossy(buf));
        let mut tail = self.tail.lock();
        while let Some(pos) = partial.find('\n') {
            let line: String = partial.drain(..=pos).collect();
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.trim_end().to_string());
        }
    }
}

impl Write for RunLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.file.lock().write(buf)?;
        self.record(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

/// Install the global subscriber: terminal output filtered by verbosity, plus
/// the run log at INFO and above.
pub fn init(run_log: Option<&RunLog>, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    let terminal = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_filter(filter);

    let file = run_log.map(file_layer);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(terminal)
        .with(file)
        .try_init();
}

/// Plain-text layer writing INFO and above into `log`.
pub fn file_layer<S>(log: &RunLog) -> impl Layer<S> + use<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let writer = log.clone();
    fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(move || writer.clone())
        .with_filter(LevelFilter::INFO)
}

/// Delete all but the newest `keep` run logs in `dir`. Returns the removed paths.
pub fn prune(dir: &Path, keep: usize) -> io::Result<Vec<PathBuf>> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(LOG_SUFFIX))
        })
        .collect();

    // Stamps are fixed-width %Y%m%d%H%M%S, so name order is age order.
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);
    for path in logs.into_iter().take(excess) {
        std::fs::remove_file(&path)?;
        removed.push(path);
    }
    Ok(removed)
}
