//! Expiry sweeper — periodically reclaims completed tasks whose download window closed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::model::Task;
use super::store::TaskStore;

/// Removes expired task records together with their on-disk directories.
#[derive(Clone)]
pub struct Sweeper {
    store: Arc<TaskStore>,
    temp_root: PathBuf,
}

impl Sweeper {
    pub fn new(store: Arc<TaskStore>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            temp_root: temp_root.into(),
        }
    }

    /// Run one sweep cycle as of `now`. Returns the number of tasks reclaimed.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Task> = self
            .store
            .snapshot()
            .await
            .into_iter()
            .filter(|t| t.is_expired_at(now))
            .collect();

        let mut reclaimed = 0;
        for task in expired {
            // Filesystem first, outside any store lock; a failure here never
            // keeps the record alive.
            let dir = self.task_dir(&task);
            remove_task_dir(&dir).await;

            if self.store.remove(task.id).await.is_some() {
                debug!(task_id = %task.id, "Expired task reclaimed");
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            info!(count = reclaimed, "Swept expired tasks");
        }

        reclaimed
    }

    /// Directory owned by `task`: the parent of its input file, or `<root>/<id>`.
    fn task_dir(&self, task: &Task) -> PathBuf {
        task.input_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.temp_root.join(task.id.to_string()))
    }

    /// Spawn the periodic sweep loop. It stops when `shutdown` flips or its sender is dropped.
    pub fn spawn(self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep_at(Utc::now()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Best-effort recursive delete. Missing directories are fine; other errors are logged only.
async fn remove_task_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove task directory"),
    }
}
