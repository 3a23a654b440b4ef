//! File-backed queue persistence.
//!
//! One bincode-encoded file per job, named `<job-id>.job`. Writes go to a
//! `.tmp` sibling first and are renamed into place so a crash never leaves
//! a half-written record under the final name. Filenames are validated as
//! ULIDs on load, which also rejects any path-traversal shaped junk that
//! finds its way into the directory.

use std::path::PathBuf;

use async_trait::async_trait;
use herald_common::JobId;
use tracing::warn;

use crate::{QueueError, job::Job, store::QueueStore};

const JOB_EXTENSION: &str = "job";

/// Durable queue backend writing one file per job record.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    dir: PathBuf,
}

impl FileQueueStore {
    /// Create a backend rooted at `dir`. The directory is created on
    /// [`QueueStore::connect`].
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.{JOB_EXTENSION}"))
    }

    /// Parse a directory entry name like `01ARYZ....job` into a job id.
    ///
    /// Returns `None` for temp files, foreign files, and anything that is
    /// not a plain ULID stem.
    fn id_from_filename(filename: &str) -> Option<JobId> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }
        let stem = filename.strip_suffix(&format!(".{JOB_EXTENSION}"))?;
        JobId::parse(stem).ok()
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn connect(&self) -> Result<(), QueueError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let metadata = tokio::fs::metadata(&self.dir).await?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(QueueError::Unavailable(format!(
                "queue path is not a directory: {}",
                self.dir.display()
            )))
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn put(&self, job: &Job) -> Result<(), QueueError> {
        let encoded = bincode::serde::encode_to_vec(job, bincode::config::standard())?;

        let path = self.job_path(job.id);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<(), QueueError> {
        match tokio::fs::remove_file(self.job_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<Job>, QueueError> {
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = Self::id_from_filename(&name.to_string_lossy()) else {
                continue;
            };

            let bytes = tokio::fs::read(entry.path()).await?;
            match bincode::serde::decode_from_slice::<Job, _>(&bytes, bincode::config::standard())
            {
                Ok((job, _)) => jobs.push(job),
                Err(e) => {
                    // One corrupt record must not prevent the rest of the
                    // queue from restoring.
                    warn!(job_id = %id, error = %e, "Skipping corrupt job record");
                }
            }
        }

        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        tokio::fs::metadata(&self.dir).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_common::{CampaignId, JobPriority, RecipientId};

    use super::*;

    fn job() -> Job {
        Job::new(
            CampaignId::generate(),
            RecipientId::generate(),
            "primary".into(),
            "Welcome {{name}}",
            "Hello {{email}}",
            JobPriority::High,
            42,
        )
    }

    #[tokio::test]
    async fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileQueueStore::new(dir.path());
        store.connect().await.unwrap();

        let original = job();
        store.put(&original).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, original.id);
        assert_eq!(loaded[0].subject, original.subject);
        assert_eq!(loaded[0].priority, JobPriority::High);
        assert_eq!(loaded[0].not_before, 42);

        store.delete(original.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        // Idempotent delete.
        store.delete(original.id).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileQueueStore::new(dir.path());
        store.connect().await.unwrap();

        let good = job();
        store.put(&good).await.unwrap();

        // A garbage record under a valid-looking name.
        let bad_name = format!("{}.job", JobId::generate());
        std::fs::write(dir.path().join(bad_name), b"not bincode").unwrap();
        // Foreign files are ignored outright.
        std::fs::write(dir.path().join("README.txt"), b"hello").unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.id);
    }

    #[test]
    fn filename_validation() {
        let id = JobId::generate();
        assert_eq!(
            FileQueueStore::id_from_filename(&format!("{id}.job")),
            Some(id)
        );
        assert!(FileQueueStore::id_from_filename("../etc/passwd.job").is_none());
        assert!(FileQueueStore::id_from_filename("not-a-ulid.job").is_none());
        assert!(FileQueueStore::id_from_filename(&format!("{id}.tmp")).is_none());
    }
}
