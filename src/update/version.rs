use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};

/// Build number issued by the build server. Larger is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub u64);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A missing local record always counts as stale; otherwise only a strictly
/// newer remote build does.
pub fn is_stale(local: Option<BuildId>, latest: BuildId) -> bool {
    match local {
        None => true,
        Some(local) => local < latest,
    }
}

/// Where the last applied build id lives between runs.
pub trait VersionStore {
    fn read_last_applied(&self) -> Result<Option<BuildId>>;
    fn record_applied(&mut self, id: BuildId) -> Result<()>;
}

const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    last_applied_build: BuildId,
    #[serde(default)]
    recorded_at: Option<String>,
}

/// Contents of the state file as shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub build: BuildId,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// TOML state file on disk, outliving both the agent and the managed app.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_record(&self) -> Result<Option<VersionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            UpdateError::State(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let state: StateFile = toml::from_str(&content).map_err(|e| {
            UpdateError::State(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        if state.version != STATE_VERSION {
            return Err(UpdateError::State(format!(
                "unsupported state file version {} in {}",
                state.version,
                self.path.display()
            )));
        }

        let recorded_at = state
            .recorded_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Some(VersionRecord {
            build: state.last_applied_build,
            recorded_at,
        }))
    }
}

impl VersionStore for FileVersionStore {
    fn read_last_applied(&self) -> Result<Option<BuildId>> {
        Ok(self.read_record()?.map(|r| r.build))
    }

    fn record_applied(&mut self, id: BuildId) -> Result<()> {
        let state = StateFile {
            version: STATE_VERSION,
            last_applied_build: id,
            recorded_at: Some(Utc::now().to_rfc3339()),
        };
        let content = toml::to_string(&state).map_err(|e| UpdateError::State(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    UpdateError::State(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                UpdateError::State(format!("failed to write {}: {}", self.path.display(), e))
            })?;

        tracing::debug!(build = %id, path = %self.path.display(), "recorded applied build");
        Ok(())
    }
}

/// Store that forgets everything when dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryVersionStore {
    current: Option<BuildId>,
    writes: usize,
}

impl MemoryVersionStore {
    pub fn with_build(id: BuildId) -> Self {
        Self {
            current: Some(id),
            writes: 0,
        }
    }

    /// Number of `record_applied` calls so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl VersionStore for MemoryVersionStore {
    fn read_last_applied(&self) -> Result<Option<BuildId>> {
        Ok(self.current)
    }

    fn record_applied(&mut self, id: BuildId) -> Result<()> {
        self.current = Some(id);
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_stale() {
        assert!(is_stale(None, BuildId(1)));
        assert!(is_stale(Some(BuildId(100)), BuildId(105)));
        assert!(!is_stale(Some(BuildId(100)), BuildId(100)));
        // A record ahead of the server is tolerated
        assert!(!is_stale(Some(BuildId(110)), BuildId(105)));
    }

    #[test]
    fn test_is_stale_exhaustive_small_range() {
        for local in 0..20u64 {
            for remote in 0..20u64 {
                assert_eq!(
                    is_stale(Some(BuildId(local)), BuildId(remote)),
                    local < remote,
                    "local={} remote={}",
                    local,
                    remote
                );
            }
        }
    }

    #[test]
    fn test_file_store_first_run_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileVersionStore::new(dir.path().join("state.toml"));
        assert_eq!(store.read_last_applied().unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");

        let mut store = FileVersionStore::new(&path);
        store.record_applied(BuildId(105)).unwrap();

        let reopened = FileVersionStore::new(&path);
        let record = reopened.read_record().unwrap().unwrap();
        assert_eq!(record.build, BuildId(105));
        assert!(record.recorded_at.is_some());
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_unknown_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "version = 7\nlast_applied_build = 3\n").unwrap();

        let store = FileVersionStore::new(&path);
        assert!(matches!(
            store.read_last_applied(),
            Err(UpdateError::State(_))
        ));
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "not toml at all [").unwrap();

        let store = FileVersionStore::new(&path);
        assert!(store.read_last_applied().is_err());
    }

    #[test]
    fn test_memory_store_counts_writes() {
        let mut store = MemoryVersionStore::with_build(BuildId(1));
        store.record_applied(BuildId(2)).unwrap();
        assert_eq!(store.read_last_applied().unwrap(), Some(BuildId(2)));
        assert_eq!(store.writes(), 1);
    }
}
