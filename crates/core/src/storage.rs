//! Flat-file persistence for session videos, session records, and the
//! rolling per-user summary.
//!
//! Layout under the storage root:
//!
//! ```text
//! videos/{userId}/{YYYY-MM-DD}/session_{sessionId}.mp4
//! videos/{userId}/{YYYY-MM-DD}/session_{sessionId}.json
//! users/{userId}/latest.json
//! ```
//!
//! Summary updates are read-merge-write under a per-user async mutex and
//! land through a temp file + rename, so concurrent uploads for the same user
//! in this process never lose increments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::types::{JsonMap, LatestUserSummary, SessionRecord};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Make an identifier safe to use as a single path segment.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`. Empty identifiers and
/// identifiers made only of dots are rejected.
pub fn storage_key(id: &str) -> Result<String, CoreError> {
    let key: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if key.is_empty() || key.chars().all(|c| c == '.') {
        return Err(CoreError::Validation(format!(
            "Identifier '{id}' cannot be used as a storage key"
        )));
    }
    Ok(key)
}

/// `session_{sessionKey}.mp4`
pub fn video_file_name(session_key: &str) -> String {
    format!("session_{session_key}.mp4")
}

/// Handle to the on-disk store.
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
    summary_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            summary_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `videos/{user}/{date}`
    pub fn video_dir(&self, user_key: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join("videos")
            .join(user_key)
            .join(date.format("%Y-%m-%d").to_string())
    }

    pub fn video_path(&self, user_key: &str, session_key: &str, date: NaiveDate) -> PathBuf {
        self.video_dir(user_key, date)
            .join(video_file_name(session_key))
    }

    pub fn record_path(&self, user_key: &str, session_key: &str, date: NaiveDate) -> PathBuf {
        self.video_dir(user_key, date)
            .join(format!("session_{session_key}.json"))
    }

    pub fn summary_path(&self, user_key: &str) -> PathBuf {
        self.root.join("users").join(user_key).join("latest.json")
    }

    /// Move a finished video into place, creating the partition directory.
    ///
    /// Falls back to copy + delete when a rename crosses filesystems.
    pub async fn place_video(&self, source: &Path, dest: &Path) -> Result<u64, StorageError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        if tokio::fs::rename(source, dest).await.is_err() {
            tokio::fs::copy(source, dest).await.map_err(io_err(dest))?;
            let _ = tokio::fs::remove_file(source).await;
        }

        let meta = tokio::fs::metadata(dest).await.map_err(io_err(dest))?;
        Ok(meta.len())
    }

    /// Write a session record. Re-using a session id overwrites the file.
    pub async fn write_session_record(
        &self,
        record: &SessionRecord,
        user_key: &str,
        session_key: &str,
        date: NaiveDate,
    ) -> Result<PathBuf, StorageError> {
        let path = self.record_path(user_key, session_key, date);
        write_json_atomic(&path, record).await?;
        Ok(path)
    }

    /// Fold a completed session into the user's rolling summary.
    ///
    /// Unknown keys already present in the file are preserved (shallow
    /// merge); `totalSessions` grows by one and `totalFrames` by the
    /// session's extracted frame count.
    pub async fn update_summary(
        &self,
        user_key: &str,
        record: &SessionRecord,
    ) -> Result<LatestUserSummary, StorageError> {
        let lock = self.summary_lock(user_key);
        let result = {
            let _guard = lock.lock().await;
            self.merge_summary(user_key, record).await
        };
        self.release_summary_lock(user_key, lock);
        result
    }

    async fn merge_summary(
        &self,
        user_key: &str,
        record: &SessionRecord,
    ) -> Result<LatestUserSummary, StorageError> {
        let path = self.summary_path(user_key);
        let mut merged = read_json_map(&path).await?;

        let counter = |key: &str| merged.get(key).and_then(Value::as_u64).unwrap_or(0);
        let summary = LatestUserSummary {
            user_id: record.user_id.clone(),
            last_session_id: record.session_id.clone(),
            last_session_time: record.timestamp,
            user_data: record.user_data.clone(),
            geo: record.geo.clone(),
            received_at: record.received_at,
            total_sessions: counter("totalSessions") + 1,
            total_frames: counter("totalFrames") + record.actual_image_count,
            platform: record.platform.clone(),
            app_version: record.app_version.clone(),
        };

        if let Value::Object(fields) = serde_json::to_value(&summary)? {
            merged.extend(fields);
        }
        write_json_atomic(&path, &merged).await?;
        Ok(summary)
    }

    /// Read a user's summary, `None` if the user has no completed session.
    pub async fn read_summary(
        &self,
        user_key: &str,
    ) -> Result<Option<LatestUserSummary>, StorageError> {
        let path = self.summary_path(user_key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    fn summary_lock(&self, user_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .summary_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(user_key.to_string()).or_default())
    }

    /// Forget the user's lock once no other task holds a handle to it.
    fn release_summary_lock(&self, user_key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .summary_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus ours.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_key);
        }
    }
}

/// Read a JSON object, treating a missing or unreadable file as empty.
async fn read_json_map(path: &Path) -> Result<JsonMap, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<JsonMap>(&bytes) {
            Ok(map) => Ok(map),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable summary");
                Ok(JsonMap::new())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JsonMap::new()),
        Err(e) => Err(io_err(path)(e)),
    }
}

/// Pretty-print `value` to `path` via a sibling temp file and rename.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_err(parent))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await.map_err(io_err(&tmp))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(path)(e));
    }
    Ok(())
}
