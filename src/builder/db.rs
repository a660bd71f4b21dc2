//! The per-target build cache database.
//!
//! Next to each target's artifacts lives `db.json`, a mapping from build
//! identity to the artifact it produced. The full description of every
//! build (compiler, flags, upstream identities, timestamp) is kept
//! separately under a directory named by the identity itself, so two
//! builds can never collide on a description file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs_err as fs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const DB_FILE: &str = "db.json";
const DESCRIPTIONS_DIR: &str = "db";

#[derive(Debug, Error)]
pub enum CacheDbError {
    #[error("failed to access the build cache at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the build cache at {} is corrupted: {reason}; `clean` removes it", path.display())]
    Corrupted { path: PathBuf, reason: String },
}

/// One cached build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// The artifact file, relative to the database directory
    pub artifact: String,
    /// Seconds since the epoch when the build finished
    pub built_at: u64,
}

/// The full build description, persisted per identity for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildDescription {
    pub identity: String,
    pub compiler_binary: String,
    pub compiler_version: String,
    pub flags: Vec<String>,
    pub upstream_identities: Vec<String>,
    pub built_at: u64,
}

/// Handle over one target's cache directory.
#[derive(Debug, Clone)]
pub struct CacheDb {
    dir: PathBuf,
}

impl CacheDb {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CacheDb { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn db_file(&self) -> PathBuf {
        self.dir.join(DB_FILE)
    }

    /// The content-hash-named directory holding one build's description.
    pub fn description_dir(&self, identity: &str) -> PathBuf {
        self.dir.join(DESCRIPTIONS_DIR).join(identity)
    }

    fn read_all(&self) -> Result<BTreeMap<String, CacheEntry>, CacheDbError> {
        let path = self.db_file();
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&path).map_err(|source| CacheDbError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|err| CacheDbError::Corrupted {
            path,
            reason: err.to_string(),
        })
    }

    /// Look up a prior build. Returns the absolute artifact path when the
    /// identity is known and its artifact still exists.
    pub fn lookup(&self, identity: &str) -> Result<Option<PathBuf>, CacheDbError> {
        let entries = self.read_all()?;
        let Some(entry) = entries.get(identity) else {
            return Ok(None);
        };
        let artifact = self.dir.join(&entry.artifact);
        if artifact.is_file() {
            Ok(Some(artifact))
        } else {
            warn!(
                "cache database lists {} but the artifact is gone",
                artifact.display()
            );
            Ok(None)
        }
    }

    /// Record a finished build. Called only after the artifact was renamed
    /// into its final place.
    pub fn record(
        &self,
        identity: &str,
        artifact: &Path,
        description: &BuildDescription,
    ) -> Result<(), CacheDbError> {
        let mut entries = self.read_all()?;
        let relative = artifact
            .strip_prefix(&self.dir)
            .unwrap_or(artifact)
            .to_string_lossy()
            .replace('\\', "/");
        entries.insert(
            identity.to_string(),
            CacheEntry {
                artifact: relative,
                built_at: unix_now(),
            },
        );

        fs::create_dir_all(&self.dir).map_err(|source| CacheDbError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.db_file();
        let text = serde_json::to_string_pretty(&entries).expect("cache entries serialize");
        fs::write(&path, text).map_err(|source| CacheDbError::Io { path, source })?;

        let description_dir = self.description_dir(identity);
        fs::create_dir_all(&description_dir).map_err(|source| CacheDbError::Io {
            path: description_dir.clone(),
            source,
        })?;
        let description_file = description_dir.join("description.json");
        let text =
            serde_json::to_string_pretty(description).expect("build description serializes");
        fs::write(&description_file, text).map_err(|source| CacheDbError::Io {
            path: description_file,
            source,
        })?;
        Ok(())
    }

    /// Load a build's description, for `describe` diagnostics.
    pub fn description(&self, identity: &str) -> Result<Option<BuildDescription>, CacheDbError> {
        let path = self.description_dir(identity).join("description.json");
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|source| CacheDbError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| CacheDbError::Corrupted {
                path,
                reason: err.to_string(),
            })
    }

    /// Forget one identity, removing its description directory.
    pub fn forget(&self, identity: &str) -> Result<(), CacheDbError> {
        let mut entries = self.read_all()?;
        if entries.remove(identity).is_some() {
            let path = self.db_file();
            let text = serde_json::to_string_pretty(&entries).expect("cache entries serialize");
            fs::write(&path, text).map_err(|source| CacheDbError::Io { path, source })?;
        }
        let description_dir = self.description_dir(identity);
        if description_dir.is_dir() {
            fs::remove_dir_all(&description_dir).map_err(|source| CacheDbError::Io {
                path: description_dir,
                source,
            })?;
        }
        Ok(())
    }
}

/// Seconds since the epoch, for build timestamps.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
