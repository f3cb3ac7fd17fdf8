//! Task store — in-memory map of conversion tasks behind a single lock.
//!
//! Every read hands out a clone, so a caller's snapshot is never invalidated by a
//! concurrent writer. No guard ever escapes this module.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::model::{Task, TaskId, TaskUpdate};

/// Concurrency-safe mapping from task id to task record.
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a processing task for `filename` and return its id.
    pub async fn create(&self, filename: impl Into<String>) -> TaskId {
        let task = Task::new(filename);
        let id = task.id;

        info!(task_id = %id, filename = %task.filename, "Task created");

        let mut tasks = self.tasks.write().await;
        tasks.insert(id, task);
        id
    }

    /// Snapshot of a single task.
    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Merge `update` into the task. Returns false if the task is gone or already terminal.
    pub async fn update(&self, id: TaskId, update: TaskUpdate) -> bool {
        let mut tasks = self.tasks.write().await;

        let Some(task) = tasks.get_mut(&id) else {
            debug!(task_id = %id, "Update for unknown task ignored");
            return false;
        };

        if task.status.is_terminal() {
            warn!(task_id = %id, status = %task.status, "Update for terminal task ignored");
            return false;
        }

        task.apply(update);
        true
    }

    /// Remove a task, returning its final record.
    pub async fn remove(&self, id: TaskId) -> Option<Task> {
        self.tasks.write().await.remove(&id)
    }

    /// Ids of every task currently held.
    pub async fn list_ids(&self) -> Vec<TaskId> {
        self.tasks.read().await.keys().copied().collect()
    }

    /// Clones of every task currently held.
    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Number of tasks held (all statuses).
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
