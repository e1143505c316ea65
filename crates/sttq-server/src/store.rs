use chrono::{DateTime, Duration, Utc};
use log::warn;
use std::path::{Path, PathBuf};
use sttq_common::{Result, TaskError};
use sttq_protocol::ResultDescriptor;

/// On-disk layout for inbound bundles, per-task scratch directories, and
/// completed subtitle artifacts. Renames provide crash-safe visibility:
/// nothing is observable under `results_dir` until it is whole.
#[derive(Clone)]
pub struct ArtifactStore {
    uploads_dir: PathBuf,
    work_dir: PathBuf,
    results_dir: PathBuf,
    retention: Duration,
}

impl ArtifactStore {
    pub fn new(
        uploads_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
        retention_hours: u64,
    ) -> Result<Self> {
        let store = Self {
            uploads_dir: uploads_dir.into(),
            work_dir: work_dir.into(),
            results_dir: results_dir.into(),
            retention: Duration::hours(retention_hours as i64),
        };
        for dir in [&store.uploads_dir, &store.work_dir, &store.results_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    fn bundle_path(&self, task_id: &str) -> PathBuf {
        self.uploads_dir.join(format!("{task_id}.bundle"))
    }

    fn workdir_path(&self, task_id: &str) -> PathBuf {
        self.work_dir.join(task_id)
    }

    fn result_path(&self, task_id: &str) -> PathBuf {
        self.results_dir.join(format!("{task_id}.srt"))
    }

    /// Write `bytes` under the uploads root via write-to-temp + rename so a
    /// concurrent reader never observes a partial bundle.
    pub fn put_bundle(&self, task_id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let final_path = self.bundle_path(task_id);
        let tmp_path = self.uploads_dir.join(format!("{task_id}.bundle.tmp"));
        std::fs::write(&tmp_path, bytes).map_err(|e| store_err(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| store_err(&final_path, e))?;
        Ok(final_path)
    }

    pub fn remove_bundle(&self, task_id: &str) {
        let path = self.bundle_path(task_id);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove bundle {path:?}: {e}");
            }
        }
    }

    /// Allocate a fresh, exclusive working directory for `task_id`. Refuses
    /// to reuse a directory left behind by a previous run.
    pub fn open_workdir(&self, task_id: &str) -> Result<PathBuf> {
        let dir = self.workdir_path(task_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| store_err(&dir, e))?;
        }
        std::fs::create_dir_all(&dir).map_err(|e| store_err(&dir, e))?;
        Ok(dir)
    }

    /// Recursively remove a task's working directory. Idempotent.
    pub fn drop_workdir(&self, task_id: &str) {
        let dir = self.workdir_path(task_id);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to drop workdir {dir:?}: {e}");
            }
        }
    }

    /// Move the produced SRT into the results root under a stable,
    /// task-keyed filename and compute its descriptor.
    pub fn publish_result(&self, task_id: &str, srt_path: &Path) -> Result<ResultDescriptor> {
        let final_path = self.result_path(task_id);
        let tmp_path = self.results_dir.join(format!("{task_id}.srt.tmp"));

        std::fs::copy(srt_path, &tmp_path).map_err(|e| store_err(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| store_err(&final_path, e))?;

        let metadata = std::fs::metadata(&final_path).map_err(|e| store_err(&final_path, e))?;
        let created_at = Utc::now();
        Ok(ResultDescriptor {
            task_id: task_id.to_string(),
            srt_size: metadata.len(),
            created_at,
            expires_at: created_at + self.retention,
        })
    }

    pub fn result_file_path(&self, task_id: &str) -> PathBuf {
        self.result_path(task_id)
    }

    pub fn remove_result(&self, task_id: &str) {
        let path = self.result_path(task_id);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove result {path:?}: {e}");
            }
        }
    }

    /// Delete every result file whose descriptor's `expires_at` has passed.
    /// Never fails the caller; individual I/O errors are logged and skipped.
    pub fn sweep(&self, now: DateTime<Utc>, expired_task_ids: &[String]) {
        for task_id in expired_task_ids {
            let path = self.result_path(task_id);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("retention sweep failed to remove {path:?} at {now}: {e}"),
            }
        }
    }
}

fn store_err(path: &Path, e: std::io::Error) -> TaskError {
    TaskError::Storage {
        path: path.display().to_string(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (ArtifactStore, tempfile::TempDir) {
        let root = tempdir().unwrap();
        let store = ArtifactStore::new(
            root.path().join("uploads"),
            root.path().join("work"),
            root.path().join("results"),
            24,
        )
        .unwrap();
        (store, root)
    }

    #[test]
    fn put_bundle_is_atomic_and_readable() {
        let (store, _root) = store();
        let path = store.put_bundle("T1", b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(!path.to_string_lossy().ends_with(".tmp"));
    }

    #[test]
    fn open_workdir_refuses_stale_reuse() {
        let (store, _root) = store();
        let dir = store.open_workdir("T1").unwrap();
        std::fs::write(dir.join("stale.txt"), b"leftover").unwrap();
        let reopened = store.open_workdir("T1").unwrap();
        assert!(!reopened.join("stale.txt").exists());
    }

    #[test]
    fn publish_result_is_visible_only_after_rename() {
        let (store, root) = store();
        let srt_src = root.path().join("out.srt");
        std::fs::write(&srt_src, b"1\n00:00:00,000 --> 00:00:01,000\nhi\n\n").unwrap();

        let descriptor = store.publish_result("T1", &srt_src).unwrap();
        assert_eq!(descriptor.task_id, "T1");
        assert!(store.result_file_path("T1").exists());
        assert!(!store.results_dir.join("T1.srt.tmp").exists());
    }

    #[test]
    fn drop_workdir_is_idempotent() {
        let (store, _root) = store();
        store.drop_workdir("never-existed");
        let dir = store.open_workdir("T1").unwrap();
        assert!(dir.exists());
        store.drop_workdir("T1");
        store.drop_workdir("T1");
        assert!(!dir.exists());
    }
}
