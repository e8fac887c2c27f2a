//! Snapshot storage, HTTP fetch utilities and job-store writers for jobsift.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::{JobRecord, ScoredJob};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod http;
pub mod postgres;

pub use http::{FetchError, HttpClientConfig, HttpFetcher, RequestSpacer, RetryPolicy};
pub use postgres::PgJobWriter;

pub const CRATE_NAME: &str = "jobsift-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store cannot be reached at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("failed to store {url}: {message}")]
    Record { url: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed, write-once snapshots laid out as `<stamp>/<stage>/<sha256>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn snapshot_relative_path(&self, captured_at: DateTime<Utc>, stage: &str, content_hash: &str) -> PathBuf {
        let stamp = captured_at.format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(stamp).join(stage).join(format!("{content_hash}.json"))
    }

    pub async fn store_json<T: Serialize + ?Sized>(
        &self,
        captured_at: DateTime<Utc>,
        stage: &str,
        value: &T,
    ) -> Result<StoredSnapshot, StorageError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.store_bytes(captured_at, stage, &bytes).await
    }

    /// Writes through a temp file and an atomic rename; identical content is stored once.
    pub async fn store_bytes(
        &self,
        captured_at: DateTime<Utc>,
        stage: &str,
        bytes: &[u8],
    ) -> Result<StoredSnapshot, StorageError> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.snapshot_relative_path(captured_at, stage, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await?;

        let stored = |deduplicated| StoredSnapshot {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path).await? {
            return Ok(stored(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => {
                debug!(path = %relative_path.display(), bytes = bytes.len(), "snapshot stored");
                Ok(stored(false))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(stored(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(StorageError::Io(err))
            }
        }
    }

    /// Most recent snapshot captured for `stage`, by stamp directory name.
    pub async fn latest(&self, stage: &str) -> Result<Option<PathBuf>, StorageError> {
        if !fs::try_exists(&self.root).await? {
            return Ok(None);
        }
        let mut stamps = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                stamps.push(entry.path());
            }
        }
        stamps.sort();
        for stamp in stamps.into_iter().rev() {
            let stage_dir = stamp.join(stage);
            if !fs::try_exists(&stage_dir).await? {
                continue;
            }
            let mut files = Vec::new();
            let mut entries = fs::read_dir(&stage_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
            files.sort();
            if let Some(path) = files.pop() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
        let bytes = fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteStatus {
    Inserted,
    Updated,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub source_url: String,
    #[serde(flatten)]
    pub status: WriteStatus,
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, WriteStatus::Failed { .. })
    }
}

/// Destination for scored records. `Err` means the store is unusable as a whole;
/// per-record problems are reported through [`WriteStatus::Failed`].
#[async_trait]
pub trait StorageWriter: Send + Sync {
    fn name(&self) -> &str;

    async fn write_batch(&self, batch: &[ScoredJob]) -> Result<Vec<WriteOutcome>, StorageError>;

    /// Records persisted by earlier runs, consulted by deduplication.
    async fn load_existing(&self) -> Result<Vec<JobRecord>, StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredLine {
    written_at: DateTime<Utc>,
    #[serde(flatten)]
    scored: ScoredJob,
}

/// Append-only JSON-lines job store.
#[derive(Debug, Clone)]
pub struct JsonlJobWriter {
    path: PathBuf,
}

impl JsonlJobWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StorageWriter for JsonlJobWriter {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write_batch(&self, batch: &[ScoredJob]) -> Result<Vec<WriteOutcome>, StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", self.path.display())))?;

        let written_at = Utc::now();
        let mut buffer = Vec::new();
        let mut outcomes = Vec::with_capacity(batch.len());
        for scored in batch {
            let line = StoredLine {
                written_at,
                scored: scored.clone(),
            };
            let status = match serde_json::to_vec(&line) {
                Ok(mut bytes) => {
                    bytes.push(b'\n');
                    buffer.extend_from_slice(&bytes);
                    WriteStatus::Inserted
                }
                Err(err) => WriteStatus::Failed {
                    message: err.to_string(),
                },
            };
            outcomes.push(WriteOutcome {
                source_url: scored.job.source_url.clone(),
                status,
            });
        }
        file.write_all(&buffer)
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", self.path.display())))?;
        file.flush().await?;
        Ok(outcomes)
    }

    async fn load_existing(&self) -> Result<Vec<JobRecord>, StorageError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path).await?;
        let mut order = Vec::new();
        let mut latest: HashMap<String, JobRecord> = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredLine>(line) {
                Ok(stored) => {
                    let job = stored.scored.job;
                    if !latest.contains_key(&job.source_url) {
                        order.push(job.source_url.clone());
                    }
                    latest.insert(job.source_url.clone(), job);
                }
                Err(err) => warn!(line = idx + 1, error = %err, "skipping malformed stored job"),
            }
        }
        Ok(order.into_iter().filter_map(|url| latest.remove(&url)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobsift_core::{FilterResult, ScoreBreakdown};
    use tempfile::tempdir;

    fn scored(url: &str, title: &str) -> ScoredJob {
        ScoredJob {
            job: JobRecord::new(url, "board", Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap())
                .with_title(title),
            result: FilterResult::scored(72.5, ScoreBreakdown::default(), vec![]),
        }
    }

    #[test]
    fn snapshot_hashing_is_stable() {
        assert_eq!(
            SnapshotStore::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_snapshots_are_written_once() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let at = Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap();
        let first = store.store_json(at, "collected", &vec!["a", "b"]).await.expect("first");
        let second = store.store_json(at, "collected", &vec!["a", "b"]).await.expect("second");
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("20260224_120000/collected"));
    }

    #[tokio::test]
    async fn latest_picks_newest_stamp_for_stage() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let older = Utc.with_ymd_and_hms(2026, 2, 24, 9, 0, 0).single().unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 2, 25, 9, 0, 0).single().unwrap();
        store.store_json(older, "collected", &vec![1]).await.expect("older");
        let wanted = store.store_json(newer, "collected", &vec![2]).await.expect("newer");
        store
            .store_json(Utc.with_ymd_and_hms(2026, 2, 26, 9, 0, 0).single().unwrap(), "final", &vec![3])
            .await
            .expect("other stage");

        let latest = store.latest("collected").await.expect("latest").expect("some");
        assert_eq!(latest, wanted.absolute_path);
        let loaded: Vec<i32> = SnapshotStore::load_json(&latest).await.expect("load");
        assert_eq!(loaded, vec![2]);
        assert!(store.latest("missing").await.expect("latest").is_none());
    }

    #[tokio::test]
    async fn jsonl_writer_round_trips_latest_version() {
        let dir = tempdir().expect("tempdir");
        let writer = JsonlJobWriter::new(dir.path().join("store/jobs.jsonl"));
        let outcomes = writer
            .write_batch(&[scored("https://a/1", "old"), scored("https://a/2", "two")])
            .await
            .expect("write");
        assert!(outcomes.iter().all(WriteOutcome::is_success));
        writer.write_batch(&[scored("https://a/1", "new")]).await.expect("rewrite");

        let existing = writer.load_existing().await.expect("load");
        assert_eq!(existing.len(), 2);
        assert_eq!(existing[0].source_url, "https://a/1");
        assert_eq!(existing[0].title.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn unwritable_store_is_unavailable() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").expect("blocker");
        let writer = JsonlJobWriter::new(blocker.join("jobs.jsonl"));
        let err = writer.write_batch(&[scored("https://a/1", "t")]).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
