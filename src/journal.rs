//! Run journal.
//!
//! Every task run is recorded as a pretty-printed JSON document under
//! `<generated assets dir>/runs/`, named `<timestamp>-<task>-<run id>.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{JournalError, Result};
use crate::executor::TaskResult;

/// Directory holding run records, relative to the generated assets dir.
pub const RUNS_DIR: &str = "runs";

/// Record file extension.
const RECORD_EXTENSION: &str = "json";

/// A run record as written to disk.
#[derive(Debug, Serialize)]
struct JournalRecord<'a> {
    /// Machine the run was started from.
    operator_host: String,
    #[serde(flatten)]
    result: &'a TaskResult,
}

/// Summary of a stored run record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JournalEntry {
    /// Record file.
    #[serde(skip)]
    pub path: PathBuf,
    /// Run identifier.
    pub run_id: Uuid,
    /// Task name.
    pub task: String,
    /// Cluster name.
    pub cluster_name: String,
    /// Terminal state (`succeeded` or `failed`).
    pub state: String,
    /// Machine the run was started from.
    pub operator_host: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

/// File-backed store of run records.
#[derive(Debug, Clone)]
pub struct JournalStore {
    /// Directory holding the records.
    dir: PathBuf,
}

impl JournalStore {
    /// Creates a store under `generated_assets_dir`.
    #[must_use]
    pub fn new(generated_assets_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: generated_assets_dir.as_ref().join(RUNS_DIR),
        }
    }

    /// Returns the records directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file name a result is recorded under.
    #[must_use]
    pub fn file_name(result: &TaskResult) -> String {
        format!(
            "{}-{}-{}.{RECORD_EXTENSION}",
            result.started_at.format("%Y%m%dT%H%M%SZ"),
            result.task,
            result.run_id
        )
    }

    /// Writes a run record and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::WriteFailed`] if the directory or file cannot
    /// be written.
    pub async fn record(&self, result: &TaskResult) -> Result<PathBuf> {
        let path = self.dir.join(Self::file_name(result));
        let write_failed = |message: String| JournalError::WriteFailed {
            path: path.clone(),
            message,
        };

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_failed(format!("cannot create {}: {e}", self.dir.display())))?;

        let record = JournalRecord {
            operator_host: operator_host(),
            result,
        };
        let content = serde_json::to_string_pretty(&record)
            .map_err(|e| write_failed(format!("cannot serialize: {e}")))?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        file.sync_all().await.map_err(|e| write_failed(e.to_string()))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| write_failed(e.to_string()))?;

        info!("Run {} recorded at {}", result.run_id, path.display());
        Ok(path)
    }

    /// Lists stored records, newest first.
    ///
    /// A missing directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Corrupted`] if a record cannot be read or
    /// parsed.
    pub async fn list(&self) -> Result<Vec<JournalEntry>> {
        if !self.dir.exists() {
            debug!("No run journal at {}", self.dir.display());
            return Ok(Vec::new());
        }

        let corrupted = |path: &Path, message: String| JournalError::Corrupted {
            path: path.to_path_buf(),
            message,
        };

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| corrupted(&self.dir, e.to_string()))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| corrupted(&self.dir, e.to_string()))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| corrupted(&path, e.to_string()))?;
            let mut entry: JournalEntry =
                serde_json::from_str(&content).map_err(|e| corrupted(&path, e.to_string()))?;
            entry.path = path;
            entries.push(entry);
        }

        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(entries)
    }
}

fn operator_host() -> String {
    hostname::get().map_or_else(
        |e| {
            warn!("Cannot determine hostname: {e}");
            String::from("unknown")
        },
        |h| h.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{NodeResult, TaskState};
    use chrono::Duration;
    use tempfile::TempDir;

    fn sample_result(task: &str, started_at: DateTime<Utc>) -> TaskResult {
        TaskResult {
            run_id: Uuid::new_v4(),
            task: task.to_string(),
            cluster_name: String::from("test-cluster"),
            plan_fingerprint: String::from("abc"),
            state: TaskState::Succeeded,
            started_at,
            finished_at: started_at,
            nodes: vec![NodeResult::success("node2", "10.0.0.2")],
        }
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = JournalStore::new(temp.path());

        let now = Utc::now();
        let older = sample_result("storage", now - Duration::minutes(5));
        let newer = sample_result("volume-add", now);

        let path = store.record(&older).await.expect("Failed to record run");
        assert!(path.starts_with(temp.path().join(RUNS_DIR)));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("-storage-") && n.ends_with(".json")));
        store.record(&newer).await.expect("Failed to record run");

        let entries = store.list().await.expect("Failed to list runs");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].run_id, newer.run_id);
        assert_eq!(entries[0].task, "volume-add");
        assert_eq!(entries[1].state, "succeeded");
        assert!(!entries[0].operator_host.is_empty());
    }

    #[tokio::test]
    async fn test_list_missing_dir() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = JournalStore::new(temp.path().join("nowhere"));
        assert!(store.list().await.expect("list should not fail").is_empty());
    }

    #[tokio::test]
    async fn test_list_rejects_corrupted_record() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = JournalStore::new(temp.path());
        std::fs::create_dir_all(store.dir()).expect("Failed to create dir");
        std::fs::write(store.dir().join("broken.json"), "{").expect("Failed to write");

        let err = store.list().await.expect_err("corrupted record");
        assert!(err.to_string().contains("broken.json"));
    }
}
