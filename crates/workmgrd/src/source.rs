//! Job file ingestion.
//!
//! A job file is read once and removed straight away, before any of its jobs
//! reach the broker. A cycle that fails after this point loses the batch.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use workmgr_lib::JobBatch;

/// Errors raised while consuming a job file.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The file exists but could not be read.
    #[error("failed to read job file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file was read but could not be removed.
    #[error("failed to remove job file {path}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file content is not a valid UTF-8 job document. The file is already
    /// gone.
    #[error("malformed job file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

async fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}

/// Load and consume the job file at `path`.
///
/// Returns an empty batch when `path` is `None` or does not name a regular
/// file. Otherwise the whole file is read, the file is deleted, and the
/// content is parsed into a [`JobBatch`] preserving file order.
///
/// # Errors
///
/// Returns [`SourceError`] when reading, deleting or parsing fails. A parse
/// failure is reported after the file has been deleted.
pub async fn load(path: Option<&Path>) -> Result<JobBatch, SourceError> {
    let Some(path) = path else {
        return Ok(JobBatch::default());
    };
    if !is_regular_file(path).await {
        tracing::debug!(path = %path.display(), "No job file present");
        return Ok(JobBatch::default());
    }

    let bytes = fs::read(path)
        .await
        .map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    fs::remove_file(path)
        .await
        .map_err(|source| SourceError::Remove {
            path: path.to_path_buf(),
            source,
        })?;

    let batch = JobBatch::from_document(&bytes).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), jobs = batch.len(), "Consumed job file");
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    #[fixture]
    fn dir() -> TempDir {
        tempdir().expect("tempdir")
    }

    #[rstest]
    #[tokio::test]
    async fn loads_jobs_in_order_and_removes_file(dir: TempDir) {
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"jobs":[{"id":1},{"id":2},{"id":3}]}"#).expect("write");

        let batch = load(Some(&path)).await.expect("load");

        let ids: Vec<_> = batch.iter().filter_map(|job| job.get("id")).collect();
        assert_eq!(ids, [&json!(1), &json!(2), &json!(3)]);
        assert!(!path.exists(), "job file should be consumed");
    }

    #[rstest]
    #[tokio::test]
    async fn missing_file_yields_empty_batch(dir: TempDir) {
        let path = dir.path().join("absent.json");
        let batch = load(Some(&path)).await.expect("load");
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn unset_path_yields_empty_batch() {
        let batch = load(None).await.expect("load");
        assert!(batch.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn directory_is_not_a_job_file(dir: TempDir) {
        let batch = load(Some(dir.path())).await.expect("load");
        assert!(batch.is_empty());
        assert!(dir.path().is_dir());
    }

    #[rstest]
    #[case::invalid_json(b"{ invalid json }")]
    #[case::missing_jobs(br#"{"work":[]}"#)]
    #[case::jobs_not_an_array(br#"{"jobs":{"id":1}}"#)]
    #[case::invalid_utf8(b"{\"jobs\":[{\"id\":\"\xff\"}]}")]
    #[tokio::test]
    async fn malformed_file_fails_after_removal(dir: TempDir, #[case] content: &[u8]) {
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, content).expect("write");

        let err = load(Some(&path)).await.expect_err("malformed job file");

        assert!(matches!(err, SourceError::Parse { .. }), "got {err:?}");
        assert!(!path.exists(), "job file is removed before parsing");
    }

    #[rstest]
    #[tokio::test]
    async fn keeps_jobs_that_are_not_objects(dir: TempDir) {
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"jobs":[{"id":1},"rebuild",42]}"#).expect("write");

        let batch = load(Some(&path)).await.expect("load");

        let values: Vec<_> = batch.iter().map(|job| job.as_value().clone()).collect();
        assert_eq!(values, [json!({"id": 1}), json!("rebuild"), json!(42)]);
        assert!(!path.exists());
    }

    #[rstest]
    #[tokio::test]
    async fn invalid_utf8_is_consumed_once(dir: TempDir) {
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, b"{\"jobs\":[{\"id\":\"\xff\"}]}").expect("write");

        let first = load(Some(&path)).await;
        let second = load(Some(&path)).await.expect("second load");

        assert!(matches!(first, Err(SourceError::Parse { .. })));
        assert!(second.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn second_load_sees_nothing(dir: TempDir) {
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"jobs":[{"id":1}]}"#).expect("write");

        assert_eq!(load(Some(&path)).await.expect("first load").len(), 1);
        assert!(load(Some(&path)).await.expect("second load").is_empty());
    }
}
