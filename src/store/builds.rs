use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::validation::is_valid_sha;

/// Maximum number of entries kept in the recent-builds cache.
pub const RECENT_BUILDS: usize = 10;

const BUILD_STARTED: &str = "Build started...";

/// Top-level record fields that are not log slots.
const METADATA_FIELDS: [&str; 4] = ["author", "title", "url", "date"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid commit sha: {0:?}")]
    InvalidSha(String),

    #[error("invalid log slot: {0:?}")]
    InvalidSlot(String),

    #[error("build {0} not found")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed build record {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Pull-request metadata a build record is created with.
#[derive(Debug, Clone, Default)]
pub struct BuildMeta {
    pub author: String,
    pub title: String,
    pub url: String,
}

/// A build as persisted on disk: metadata, the primary `log` and one
/// accumulated log per slot (`update` plus one per step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    #[serde(skip)]
    pub sha: String,
    pub author: String,
    pub title: String,
    pub url: String,
    pub date: String,
    pub log: String,
    #[serde(flatten)]
    pub slots: BTreeMap<String, String>,
}

impl BuildRecord {
    /// Content of a log slot. `log` is the primary log; metadata fields are
    /// not slots.
    pub fn slot(&self, name: &str) -> Option<&str> {
        if name == "log" {
            return Some(&self.log);
        }
        self.slots.get(name).map(String::as_str)
    }

    /// Names of the per-phase log slots, in key order.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    fn append(&mut self, slot: &str, text: &str) {
        let target = if slot == "log" {
            &mut self.log
        } else {
            self.slots.entry(slot.to_owned()).or_default()
        };
        target.push_str(text);
        if !text.ends_with('\n') {
            target.push('\n');
        }
    }
}

/// Entry of the recent-builds list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub sha: String,
    pub date: String,
    pub author: String,
    pub title: String,
    pub url: String,
}

impl From<&BuildRecord> for BuildSummary {
    fn from(record: &BuildRecord) -> Self {
        Self {
            sha: record.sha.clone(),
            date: record.date.clone(),
            author: record.author.clone(),
            title: record.title.clone(),
            url: record.url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Build records on disk, one JSON file per commit, plus an in-memory list
/// of the most recent builds.
///
/// Log updates are read-modify-write cycles on the whole record, so they are
/// serialized per sha. Records of different builds never wait on each other.
#[derive(Debug)]
pub struct BuildStore {
    path: PathBuf,
    recent: Mutex<VecDeque<BuildSummary>>,
    record_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl BuildStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_BUILDS)),
            record_locks: DashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the storage directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Write a fresh record for `sha` and put it at the front of the
    /// recent-builds list.
    #[tracing::instrument(skip(self, meta), err)]
    pub async fn create_build(&self, sha: &str, meta: BuildMeta) -> Result<BuildRecord, StoreError> {
        if !is_valid_sha(sha) {
            return Err(StoreError::InvalidSha(sha.to_owned()));
        }

        let record = BuildRecord {
            sha: sha.to_owned(),
            author: meta.author,
            title: meta.title,
            url: meta.url,
            date: Utc::now().format("%Y-%m-%d").to_string(),
            log: BUILD_STARTED.to_owned(),
            slots: BTreeMap::new(),
        };

        self.locked(sha, self.write_record(&record)).await?;
        self.remember(BuildSummary::from(&record));

        tracing::info!("build record created");
        Ok(record)
    }

    /// Append `text` to the `slot` log of the build identified by `sha`.
    pub async fn update_log(&self, sha: &str, slot: &str, text: &str) -> Result<(), StoreError> {
        if !is_valid_sha(sha) {
            return Err(StoreError::InvalidSha(sha.to_owned()));
        }
        if slot.is_empty() || METADATA_FIELDS.contains(&slot) {
            return Err(StoreError::InvalidSlot(slot.to_owned()));
        }

        self.locked(sha, async {
            let mut record = self.read_record(sha).await?;
            record.append(slot, text);
            self.write_record(&record).await
        })
        .await
    }

    /// Load a build record. Malformed shas, missing files and unparsable
    /// records all yield `None`.
    pub async fn get_build(&self, sha: &str) -> Option<BuildRecord> {
        if !is_valid_sha(sha) {
            return None;
        }

        match self.read_record(sha).await {
            Ok(record) => Some(record),
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(%sha, "build record not found");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, %sha, "failed to load build record");
                None
            }
        }
    }

    /// The most recent builds, newest first. Never touches the disk.
    pub fn latest_builds(&self) -> Vec<BuildSummary> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Seed the recent-builds list from the storage directory, ordered by
    /// file modification time. Builds created while the scan runs stay in
    /// front. Returns the number of cached builds.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()), err)]
    pub async fn load_recent(&self) -> Result<usize, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.path).await.map_err(io_err)?;
        let mut files: Vec<(String, SystemTime)> = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_valid_sha(&name) {
                continue;
            }
            match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => files.push((name, modified)),
                Err(e) => tracing::warn!(error = %e, file = %name, "failed to stat build record"),
            }
        }

        files.sort_by(|lhs, rhs| rhs.1.cmp(&lhs.1));

        let mut scanned = Vec::with_capacity(RECENT_BUILDS);
        for (sha, _) in files.into_iter().take(RECENT_BUILDS) {
            if let Some(record) = self.get_build(&sha).await {
                scanned.push(BuildSummary::from(&record));
            }
        }

        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        for summary in scanned {
            if recent.len() >= RECENT_BUILDS {
                break;
            }
            if !recent.iter().any(|b| b.sha == summary.sha) {
                recent.push_back(summary);
            }
        }
        Ok(recent.len())
    }

    // -- internals --

    fn record_path(&self, sha: &str) -> PathBuf {
        self.path.join(sha)
    }

    fn remember(&self, summary: BuildSummary) {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.iter().any(|b| b.sha == summary.sha) {
            return;
        }
        recent.push_front(summary);
        recent.truncate(RECENT_BUILDS);
    }

    /// Run `op` while holding the per-record lock of `sha`. The lock entry is
    /// dropped from the map once nobody else holds or waits for it.
    async fn locked<T>(&self, sha: &str, op: impl Future<Output = T>) -> T {
        let lock = Arc::clone(self.record_locks.entry(sha.to_owned()).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            op.await
        };
        drop(lock);
        self.record_locks
            .remove_if(sha, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn read_record(&self, sha: &str) -> Result<BuildRecord, StoreError> {
        let path = self.record_path(sha);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(sha.to_owned()));
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let mut record: BuildRecord =
            serde_json::from_slice(&data).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
        record.sha = sha.to_owned();
        Ok(record)
    }

    /// Write via a temporary file and rename so readers never observe a
    /// partially written record.
    async fn write_record(&self, record: &BuildRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.sha);
        let data = serde_json::to_vec(record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let tmp = self.path.join(format!(".{}.tmp", record.sha));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }
}
