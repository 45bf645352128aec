//! Store configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::TimestampSource;

/// Where documents are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexBackend {
    /// process-local maps, gone when the store is dropped
    Memory,
    /// git repository at `StoreConfig::path`
    #[default]
    Git,
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBackend::Memory => write!(f, "memory"),
            IndexBackend::Git => write!(f, "git"),
        }
    }
}

/// Store configuration options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the store directory (git backend only).
    pub path: PathBuf,
    pub backend: IndexBackend,
    /// Create the repository if it doesn't exist.
    pub create_if_missing: bool,
    /// How long commits, merges and rebases may wait for their branch lock
    /// and run before giving up.
    pub commit_timeout: Duration,
    /// Author recorded on merges and rebases that do not name one.
    pub default_author: String,
    /// Timestamp source; defaults to a wall-clock based `MonotonicClock`.
    pub clock: Option<Arc<dyn TimestampSource>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".revstore"),
            backend: IndexBackend::Git,
            create_if_missing: true,
            commit_timeout: Duration::from_secs(60),
            default_author: "revstore".to_string(),
            clock: None,
        }
    }
}

impl StoreConfig {
    /// Git-backed store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// In-memory store.
    pub fn memory() -> Self {
        Self {
            backend: IndexBackend::Memory,
            ..Default::default()
        }
    }

    pub fn backend(mut self, backend: IndexBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn default_author(mut self, author: impl Into<String>) -> Self {
        self.default_author = author.into();
        self
    }

    /// Use `clock` for commit timestamps, e.g. a `SequenceClock` in tests.
    pub fn clock(mut self, clock: impl TimestampSource + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }
}
