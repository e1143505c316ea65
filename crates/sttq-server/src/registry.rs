use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use sttq_common::{Result, TaskError};
use sttq_protocol::{ErrorDescriptor, PoolStatus, ResultDescriptor, StatusResponse, TaskState};
use tokio_util::sync::CancellationToken;

/// Server-internal task record. The wire-facing `StatusResponse` is derived
/// from this, never serialized directly.
#[derive(Clone)]
pub struct Task {
    pub task_id: String,
    pub model: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorDescriptor>,
    pub bundle_path: PathBuf,
    pub result: Option<ResultDescriptor>,
    pub cancel: CancellationToken,
}

impl Task {
    fn to_status(&self) -> StatusResponse {
        StatusResponse {
            task_id: self.task_id.clone(),
            state: self.state,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
        }
    }
}

struct RegistryState {
    tasks: HashMap<String, Task>,
    queue: VecDeque<String>,
    processing: Option<String>,
}

/// Single authoritative table of task state, guarded by one mutex. Mirrors
/// the worker pool's shared-state pattern: mutations are O(1) and never
/// block on I/O while the lock is held.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    capacity: usize,
    notify: tokio::sync::Notify,
}

#[derive(Debug)]
pub enum AdmitOutcome {
    /// `true` if a prior terminal record for this id was evicted and that
    /// record still had a published result file the caller must delete.
    Accepted { evicted_result: bool },
}

impl TaskRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                tasks: HashMap::new(),
                queue: VecDeque::new(),
                processing: None,
            }),
            capacity,
            notify: tokio::sync::Notify::new(),
        }
    }

    /// Admit a new submission. Evicts a prior terminal record with the same
    /// id; rejects a non-terminal duplicate with `ConflictError`; rejects
    /// when the pool is at capacity with `CapacityError`.
    pub fn admit(&self, task_id: &str, model: &str, bundle_path: PathBuf) -> Result<AdmitOutcome> {
        let mut state = self.state.lock().unwrap();

        let mut evicted_result = false;
        if let Some(existing) = state.tasks.get(task_id) {
            if !existing.state.is_terminal() {
                return Err(TaskError::Conflict(task_id.to_string()));
            }
            evicted_result = existing.state == TaskState::Completed && existing.result.is_some();
        }

        let depth = state.queue.len() + state.processing.iter().count();
        if depth + 1 > self.capacity {
            return Err(TaskError::Capacity);
        }

        state.tasks.remove(task_id);
        state.queue.retain(|id| id != task_id);

        let task = Task {
            task_id: task_id.to_string(),
            model: model.to_string(),
            state: TaskState::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            bundle_path,
            result: None,
            cancel: CancellationToken::new(),
        };
        state.tasks.insert(task_id.to_string(), task);
        state.queue.push_back(task_id.to_string());
        drop(state);

        self.notify.notify_one();
        Ok(AdmitOutcome::Accepted { evicted_result })
    }

    /// Block until a task is queued, then atomically pop the head and mark
    /// it `PROCESSING`. Returns `None` only if the registry is shutting
    /// down (never happens in the current single-process lifetime).
    pub async fn claim_next(&self) -> Task {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                while let Some(task_id) = state.queue.pop_front() {
                    let Some(task) = state.tasks.get_mut(&task_id) else {
                        continue;
                    };
                    if task.state != TaskState::Queued {
                        continue;
                    }
                    task.state = TaskState::Processing;
                    task.started_at = Some(Utc::now());
                    let result = task.clone();
                    state.processing = Some(task_id.clone());
                    return result;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn complete(&self, task_id: &str, descriptor: ResultDescriptor) -> Result<()> {
        self.finish(task_id, TaskState::Completed, None, Some(descriptor))
    }

    pub fn fail(&self, task_id: &str, error: &TaskError) -> Result<()> {
        self.finish(task_id, TaskState::Failed, Some(ErrorDescriptor::from(error)), None)
    }

    /// Cancel a `QUEUED` task. Idempotent: cancelling an already-cancelled
    /// task is a no-op; cancelling any other terminal state is an error.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        match task.state {
            TaskState::Cancelled => Ok(()),
            TaskState::Queued => {
                task.state = TaskState::Cancelled;
                task.finished_at = Some(Utc::now());
                state.queue.retain(|id| id != task_id);
                Ok(())
            }
            TaskState::Processing => {
                task.cancel.cancel();
                Ok(())
            }
            TaskState::Completed | TaskState::Failed => {
                Err(TaskError::State(format!("task '{task_id}' is already terminal")))
            }
        }
    }

    fn finish(
        &self,
        task_id: &str,
        new_state: TaskState,
        error: Option<ErrorDescriptor>,
        result: Option<ResultDescriptor>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if task.state == new_state {
            return Ok(());
        }
        if task.state.is_terminal() {
            return Err(TaskError::State(format!(
                "task '{task_id}' already terminal as {:?}",
                task.state
            )));
        }

        task.state = new_state;
        task.finished_at = Some(Utc::now());
        task.error = error;
        task.result = result;

        if state.processing.as_deref() == Some(task_id) {
            state.processing = None;
        }
        Ok(())
    }

    pub fn status(&self, task_id: &str) -> Result<StatusResponse> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .get(task_id)
            .map(Task::to_status)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub fn result_descriptor(&self, task_id: &str) -> Result<ResultDescriptor> {
        let state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        match &task.result {
            Some(descriptor) if task.state == TaskState::Completed => Ok(descriptor.clone()),
            _ if task.state.is_terminal() => {
                Err(TaskError::State(format!("task '{task_id}' did not complete")))
            }
            _ => Err(TaskError::State(format!("task '{task_id}' not yet completed"))),
        }
    }

    pub fn remove_result(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        task.result = None;
        Ok(())
    }

    /// Evict a terminal task's record entirely, or request cancellation if
    /// it is still active. Idempotent on an unknown id.
    pub fn evict_or_cancel(&self, task_id: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(task) = state.tasks.get(task_id) else {
            return;
        };
        if task.state.is_terminal() {
            state.tasks.remove(task_id);
        } else {
            drop(state);
            let _ = self.cancel(task_id);
        }
    }

    pub fn pool_view(&self) -> PoolStatus {
        let state = self.state.lock().unwrap();
        PoolStatus::new(state.queue.len(), state.processing.iter().count(), self.capacity)
    }

    /// Task ids whose completed result has expired as of `now`, for the
    /// retention sweeper.
    pub fn expired_result_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .values()
            .filter(|t| matches!(&t.result, Some(r) if now >= r.expires_at))
            .map(|t| t.task_id.clone())
            .collect()
    }

    pub fn clear_expired_results(&self, task_ids: &[String]) {
        let mut state = self.state.lock().unwrap();
        for task_id in task_ids {
            if let Some(task) = state.tasks.get_mut(task_id) {
                task.result = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(task_id: &str, expires_at: DateTime<Utc>) -> ResultDescriptor {
        ResultDescriptor {
            task_id: task_id.to_string(),
            srt_size: 10,
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn admit_rejects_nonterminal_duplicate() {
        let registry = TaskRegistry::new(4);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        let err = registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap_err();
        assert!(matches!(err, TaskError::Conflict(_)));
    }

    #[test]
    fn admit_rejects_over_capacity() {
        let registry = TaskRegistry::new(1);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        let err = registry.admit("T2", "small", PathBuf::from("/tmp/t2")).unwrap_err();
        assert!(matches!(err, TaskError::Capacity));
    }

    #[test]
    fn admit_replaces_terminal_duplicate() {
        let registry = TaskRegistry::new(1);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        registry.fail("T1", &TaskError::NoOutput).unwrap();
        let outcome = registry.admit("T1", "small", PathBuf::from("/tmp/t1b")).unwrap();
        assert!(matches!(outcome, AdmitOutcome::Accepted { evicted_result: false }));
        let status = registry.status("T1").unwrap();
        assert_eq!(status.state, TaskState::Queued);
    }

    #[test]
    fn admit_reports_evicted_result_for_completed_duplicate() {
        let registry = TaskRegistry::new(1);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        let desc = descriptor("T1", Utc::now() + chrono::Duration::hours(1));
        registry.complete("T1", desc).unwrap();

        let outcome = registry.admit("T1", "small", PathBuf::from("/tmp/t1b")).unwrap();
        assert!(matches!(outcome, AdmitOutcome::Accepted { evicted_result: true }));
    }

    #[tokio::test]
    async fn claim_next_marks_processing_and_is_fifo() {
        let registry = TaskRegistry::new(4);
        registry.admit("A", "small", PathBuf::from("/tmp/a")).unwrap();
        registry.admit("B", "small", PathBuf::from("/tmp/b")).unwrap();

        let first = registry.claim_next().await;
        assert_eq!(first.task_id, "A");
        assert_eq!(registry.status("A").unwrap().state, TaskState::Processing);
        assert_eq!(registry.status("B").unwrap().state, TaskState::Queued);
    }

    #[test]
    fn terminal_transitions_are_idempotent() {
        let registry = TaskRegistry::new(1);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        let desc = descriptor("T1", Utc::now() + chrono::Duration::hours(1));
        registry.complete("T1", desc.clone()).unwrap();
        registry.complete("T1", desc).unwrap();
        assert_eq!(registry.status("T1").unwrap().state, TaskState::Completed);
    }

    #[test]
    fn cancel_from_queued_succeeds_but_not_from_completed() {
        let registry = TaskRegistry::new(1);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        registry.cancel("T1").unwrap();
        assert_eq!(registry.status("T1").unwrap().state, TaskState::Cancelled);

        registry.admit("T2", "small", PathBuf::from("/tmp/t2")).unwrap();
        let desc = descriptor("T2", Utc::now() + chrono::Duration::hours(1));
        registry.complete("T2", desc).unwrap();
        let err = registry.cancel("T2").unwrap_err();
        assert!(matches!(err, TaskError::State(_)));
    }

    #[test]
    fn pool_view_reports_fullness() {
        let registry = TaskRegistry::new(1);
        assert!(!registry.pool_view().is_full);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        assert!(registry.pool_view().is_full);
    }

    #[test]
    fn expired_result_ids_respects_expiry() {
        let registry = TaskRegistry::new(2);
        registry.admit("T1", "small", PathBuf::from("/tmp/t1")).unwrap();
        let past = descriptor("T1", Utc::now() - chrono::Duration::hours(1));
        registry.complete("T1", past).unwrap();

        let expired = registry.expired_result_ids(Utc::now());
        assert_eq!(expired, vec!["T1".to_string()]);
    }
}
