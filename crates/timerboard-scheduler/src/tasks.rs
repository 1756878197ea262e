//! Deferred task runner.
//!
//! A submitted job sleeps on the tokio timer until its `run_at` and is then
//! invoked with its own task id, so it can compare itself against the id
//! stored for the job it serves. Each task is registered under a key (the
//! scheduled notification id); submitting again under the same key aborts the
//! previous task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

/// Handle to a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: String,
    run_at: DateTime<Utc>,
    abort: AbortHandle,
}

impl TaskHandle {
    /// Task id, as passed to the job when it runs.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    /// Cancel the task. No effect once the job has finished.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Spawns delayed jobs on the current tokio runtime.
#[derive(Clone, Default)]
pub struct TaskRunner {
    inflight: Arc<Mutex<HashMap<i64, TaskHandle>>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` at or after `run_at`. A `run_at` in the past runs right away.
    pub fn submit<F, Fut>(&self, key: i64, run_at: DateTime<Utc>, job: F) -> TaskHandle
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.submit_as(key, new_task_id(), run_at, job)
    }

    /// Like [`submit`](Self::submit), with an id from [`new_task_id`] that
    /// the caller has already stored.
    pub fn submit_as<F, Fut>(&self, key: i64, id: String, run_at: DateTime<Utc>, job: F) -> TaskHandle
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_id = id.clone();
        let inflight = self.inflight.clone();

        // Held across spawn + insert so a job finishing instantly cannot
        // deregister before it is registered.
        let mut guard = lock(&self.inflight);
        let join = tokio::spawn(async move {
            let delay = (run_at - Utc::now()).to_std().unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            job(task_id.clone()).await;
            let mut map = lock(&inflight);
            if map.get(&key).is_some_and(|h| h.id == task_id) {
                map.remove(&key);
            }
        });
        let handle = TaskHandle {
            id,
            run_at,
            abort: join.abort_handle(),
        };
        if let Some(previous) = guard.insert(key, handle.clone()) {
            previous.abort();
        }
        tracing::debug!("⏲️ Task {} for job #{key} due {run_at}", handle.id);
        handle
    }

    /// Abort the task registered under `key`. Returns true if one was pending.
    pub fn cancel(&self, key: i64) -> bool {
        match lock(&self.inflight).remove(&key) {
            Some(handle) => {
                handle.abort();
                !handle.is_finished()
            }
            None => false,
        }
    }

    /// Id of the task currently registered under `key`.
    pub fn current(&self, key: i64) -> Option<String> {
        lock(&self.inflight).get(&key).map(|h| h.id.clone())
    }

    /// True if task `task_id` is registered under `key` and still running.
    pub fn is_live(&self, key: i64, task_id: &str) -> bool {
        lock(&self.inflight)
            .get(&key)
            .is_some_and(|h| h.id == task_id && !h.is_finished())
    }

    /// Number of registered tasks that have not finished.
    pub fn pending(&self) -> usize {
        lock(&self.inflight).values().filter(|h| !h.is_finished()).count()
    }
}

/// Fresh task id.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn lock(map: &Mutex<HashMap<i64, TaskHandle>>) -> std::sync::MutexGuard<'_, HashMap<i64, TaskHandle>> {
    // The map only holds handles; a panic elsewhere cannot leave it torn.
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
