//! Durable outputs of a run (summary documents, chart images).
//!
//! Every artifact is a flat, bare file name namespaced by its run id, e.g.
//! `<run_id>_insights.json`. The pipeline only ever sees the
//! [`ArtifactStore`] trait; where bytes end up is the caller's choice.
//!
//! ## Retention
//!
//! Old artifacts are removed by [`ArtifactJanitor`], a collaborator that runs
//! on its own schedule. A sweep does not know which runs are still in flight:
//! if several runs share one store, a sweep can remove outputs of a run that
//! has not yet been served. Callers that need isolation should give each run
//! (or tenant) its own store, or serialize runs with sweeps.

use anyhow::{Context as _, Result, bail};
use crossbeam_channel::{RecvTimeoutError, Sender};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// Where an artifact was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArtifactLocation {
    /// Stored as a file on disk
    File(PathBuf),
    /// Held in process memory under this key
    Memory(String),
}

impl std::fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(p) => write!(f, "{}", p.display()),
            Self::Memory(key) => write!(f, "memory://{key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// Storage for run artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Writes (or overwrites) an artifact.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<ArtifactLocation>;

    fn get(&self, name: &str) -> Result<Vec<u8>>;

    fn list(&self) -> Result<Vec<ArtifactEntry>>;

    /// Returns `false` when there was nothing to remove.
    fn remove(&self, name: &str) -> Result<bool>;

    /// Removes artifacts last modified more than `max_age` ago.
    fn clear_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in self.list()? {
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age > max_age && self.remove(&entry.name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}

/// Rejects names that could escape the store (separators, dot files).
pub fn validate_artifact_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Artifact name must not be empty");
    }
    if name.starts_with('.') || name.contains(['/', '\\']) {
        bail!("Artifact name must be a bare file name: {name}");
    }
    Ok(())
}

/// Directory-backed store. Writes go through a temporary file and a rename so
/// readers never observe a partial artifact.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create artifact directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_artifact_name(name)?;
        Ok(self.root.join(name))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<ArtifactLocation> {
        let dest = self.path_for(name)?;
        let tmp = self
            .root
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let published = fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write artifact: {}", tmp.display()))
            .and_then(|()| {
                fs::rename(&tmp, &dest)
                    .with_context(|| format!("Failed to publish artifact: {}", dest.display()))
            });
        if published.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        published?;
        Ok(ArtifactLocation::File(dest))
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        fs::read(&path).with_context(|| format!("Failed to read artifact: {}", path.display()))
    }

    fn list(&self) -> Result<Vec<ArtifactEntry>> {
        let mut entries = Vec::new();
        let dir = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list artifacts in {}", self.root.display()))?;
        for entry in dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-progress writes are dot files
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            entries.push(ArtifactEntry {
                name,
                size: meta.len(),
                modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove artifact: {}", path.display()))
            }
        }
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    modified: SystemTime,
}

/// In-process store, mostly for embedding the pipeline and for tests.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an artifact with an explicit modification time.
    pub fn put_at(&self, name: &str, bytes: &[u8], modified: SystemTime) -> Result<()> {
        validate_artifact_name(name)?;
        self.lock()?.insert(
            name.to_owned(),
            MemoryEntry {
                bytes: bytes.to_vec(),
                modified,
            },
        );
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>> {
        self.entries
            .lock()
            .map_err(|_poisoned| anyhow::anyhow!("Artifact store lock poisoned"))
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<ArtifactLocation> {
        self.put_at(name, bytes, SystemTime::now())?;
        Ok(ArtifactLocation::Memory(name.to_owned()))
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(name)
            .map(|e| e.bytes.clone())
            .with_context(|| format!("Artifact not found: {name}"))
    }

    fn list(&self) -> Result<Vec<ArtifactEntry>> {
        let mut entries: Vec<ArtifactEntry> = self
            .lock()?
            .iter()
            .map(|(name, e)| ArtifactEntry {
                name: name.clone(),
                size: e.bytes.len() as u64,
                modified: e.modified,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.remove(name).is_some())
    }

    fn describe(&self) -> String {
        "memory".to_owned()
    }
}

/// Age-based cleanup over a set of stores.
#[derive(Clone)]
pub struct ArtifactJanitor {
    stores: Vec<Arc<dyn ArtifactStore>>,
    max_age: Duration,
    interval: Duration,
}

impl ArtifactJanitor {
    pub fn new(stores: Vec<Arc<dyn ArtifactStore>>, max_age: Duration, interval: Duration) -> Self {
        Self {
            stores,
            max_age,
            interval,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// One cleanup pass. A failing store is logged and skipped.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        for store in &self.stores {
            match store.clear_older_than(self.max_age) {
                Ok(n) => {
                    if n > 0 {
                        tracing::info!("Removed {n} expired artifacts from {}", store.describe());
                    }
                    removed += n;
                }
                Err(e) => {
                    tracing::warn!("Artifact sweep failed for {}: {e:#}", store.describe());
                }
            }
        }
        removed
    }

    /// Runs `sweep` every `interval` on a background thread until the
    /// returned handle is stopped or dropped.
    pub fn spawn(self) -> Result<JanitorHandle> {
        let interval = self.interval;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("artifact-janitor".to_owned())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.sweep();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Artifact janitor stopped");
            })
            .context("Failed to spawn artifact janitor thread")?;

        Ok(JanitorHandle {
            stop_tx,
            thread: Some(thread),
        })
    }
}

pub struct JanitorHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl JanitorHandle {
    /// Signals the janitor thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("Artifact janitor thread panicked");
        }
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
