//! Conversion runner — drives the external converter for one task in the background.
//!
//! Progress is an estimate, not a measurement: every line the converter prints on
//! stdout or stderr bumps the task by one point, capped at [`PROGRESS_CEILING`].
//! A silent converter therefore sits at [`PROGRESS_STARTED`] until it exits.
//!
//! Whatever happens inside, the task ends in `complete` or `error`. Failures are
//! recorded on the task, never returned to the original request.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::model::{MSG_CONVERTING, TaskId, TaskUpdate};
use super::store::TaskStore;
use crate::converter::Converter;
use crate::error::RunnerError;

/// Progress once the converter has been launched.
pub const PROGRESS_STARTED: u8 = 15;

/// Progress never exceeds this before the converter exits.
pub const PROGRESS_CEILING: u8 = 90;

pub const MSG_NOT_INSTALLED: &str = "Calibre not installed.";
pub const MSG_FAILED: &str = "Conversion failed (ebook-convert).";

/// Runs conversions and records their progress in the task store.
#[derive(Clone)]
pub struct ConversionRunner {
    store: Arc<TaskStore>,
    converter: Converter,
    ttl: Duration,
    timeout: Option<Duration>,
}

impl ConversionRunner {
    pub fn new(store: Arc<TaskStore>, converter: Converter, ttl: Duration) -> Self {
        Self {
            store,
            converter,
            ttl,
            timeout: None,
        }
    }

    /// Kill the converter and fail the task after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Start the conversion in the background and return immediately.
    ///
    /// The work runs in its own spawned task; if it panics, the supervising task
    /// still writes an `error` state so the task never stays `processing`.
    pub fn dispatch(&self, id: TaskId, input: PathBuf, output: PathBuf) -> JoinHandle<()> {
        let worker = self.clone();
        supervise(Arc::clone(&self.store), id, async move {
            worker.run(id, &input, &output).await
        })
    }

    /// Run one conversion to a terminal state.
    pub async fn run(&self, id: TaskId, input: &Path, output: &Path) {
        if !self.converter.is_available() {
            warn!(task_id = %id, path = %self.converter.path().display(), "Converter binary missing");
            self.store
                .update(id, TaskUpdate::failed(MSG_NOT_INSTALLED, Some(0)))
                .await;
            return;
        }

        self.store
            .update(id, TaskUpdate::progress(PROGRESS_STARTED, MSG_CONVERTING))
            .await;
        info!(task_id = %id, input = %input.display(), "Conversion started");

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.drive(id, input, output))
                .await
                .unwrap_or(Err(RunnerError::Timeout(limit))),
            None => self.drive(id, input, output).await,
        };

        let update = match outcome {
            Ok(status) if status.success() && output.exists() => {
                info!(task_id = %id, output = %output.display(), "Conversion complete");
                let expires_at = chrono::Duration::from_std(self.ttl)
                    .ok()
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                TaskUpdate::completed(expires_at)
            }
            Ok(status) => {
                warn!(task_id = %id, status = %status, output_exists = output.exists(), "Conversion failed");
                TaskUpdate::failed(MSG_FAILED, None)
            }
            Err(RunnerError::Timeout(limit)) => {
                warn!(task_id = %id, timeout_secs = limit.as_secs(), "Conversion timed out");
                TaskUpdate::failed(
                    format!("Conversion timed out after {}s.", limit.as_secs()),
                    None,
                )
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "Conversion errored");
                TaskUpdate::failed(format!("Exception: {e}"), None)
            }
        };

        self.store.update(id, update).await;
    }

    /// Spawn the converter, tick progress per output line, and wait for exit.
    ///
    /// Dropping this future (timeout) kills the child.
    async fn drive(&self, id: TaskId, input: &Path, output: &Path) -> Result<ExitStatus, RunnerError> {
        let mut child = self
            .converter
            .command(input, output)
            .spawn()
            .map_err(RunnerError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("converter stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("converter stderr not captured"))?;

        // Both streams feed the same progress counter.
        let mut out_lines = BufReader::new(stdout).split(b'\n');
        let mut err_lines = BufReader::new(stderr).split(b'\n');
        let (mut out_open, mut err_open) = (true, true);
        let mut progress = PROGRESS_STARTED;

        while out_open || err_open {
            let line = tokio::select! {
                line = out_lines.next_segment(), if out_open => {
                    let line = line?;
                    out_open = line.is_some();
                    line
                }
                line = err_lines.next_segment(), if err_open => {
                    let line = line?;
                    err_open = line.is_some();
                    line
                }
            };

            if let Some(line) = line {
                debug!(task_id = %id, line = %String::from_utf8_lossy(&line).trim_end(), "converter");
                progress = (progress + 1).min(PROGRESS_CEILING);
                self.store
                    .update(id, TaskUpdate::progress(progress, MSG_CONVERTING))
                    .await;
            }
        }

        Ok(child.wait().await?)
    }
}

/// Spawn `work` for task `id`. A panic inside it is recorded as an `error` state.
pub(crate) fn supervise<F>(store: Arc<TaskStore>, id: TaskId, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = tokio::spawn(work).await {
            let err = RunnerError::Panicked(e.to_string());
            error!(task_id = %id, error = %err, "Conversion runner died");
            store
                .update(id, TaskUpdate::failed(format!("Exception: {err}"), None))
                .await;
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tasks::model::{MSG_COMPLETE, TaskStatus};
    use crate::testing::{SUCCESS_SCRIPT, fake_converter};

    const TTL: Duration = Duration::from_secs(1800);

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: Arc<TaskStore>,
        id: TaskId,
        input: PathBuf,
        output: PathBuf,
        converter: Converter,
    }

    async fn fixture(script: &str) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let converter = fake_converter(tmp.path(), script);
        let store = TaskStore::new();
        let id = store.create("book.epub").await;
        let input = tmp.path().join("input.epub");
        let output = tmp.path().join("book.pdf");
        tokio::fs::write(&input, b"fake epub").await.unwrap();
        store
            .update(id, TaskUpdate::queued(input.clone(), output.clone()))
            .await;
        Fixture {
            _tmp: tmp,
            store,
            id,
            input,
            output,
            converter,
        }
    }

    impl Fixture {
        fn runner(&self) -> ConversionRunner {
            ConversionRunner::new(Arc::clone(&self.store), self.converter.clone(), TTL)
        }

        async fn run(&self) {
            self.runner().run(self.id, &self.input, &self.output).await;
        }
    }

    #[tokio::test]
    async fn successful_conversion_completes_with_ttl() {
        let fx = fixture(SUCCESS_SCRIPT).await;
        let before = Utc::now();
        fx.run().await;

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.progress, 100);
        assert_eq!(task.message, MSG_COMPLETE);
        let expires_at = task.expires_at.unwrap();
        assert!(expires_at >= before + chrono::Duration::seconds(1799));
        assert_eq!(tokio::fs::read(&fx.output).await.unwrap(), b"fake epub");
    }

    #[tokio::test]
    async fn nonzero_exit_fails_and_keeps_progress() {
        let fx = fixture("echo one\necho two\necho three >&2\nexit 1\n").await;
        fx.run().await;

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.message, MSG_FAILED);
        assert_eq!(task.progress, PROGRESS_STARTED + 3);
        assert!(task.expires_at.is_none());
    }

    #[tokio::test]
    async fn clean_exit_without_output_fails() {
        let fx = fixture("echo pretending\nexit 0\n").await;
        fx.run().await;

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.message, MSG_FAILED);
    }

    #[tokio::test]
    async fn silent_converter_stays_at_start_progress() {
        let fx = fixture("exit 2\n").await;
        fx.run().await;

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.progress, PROGRESS_STARTED);
    }

    #[tokio::test]
    async fn chatty_converter_is_capped_below_completion() {
        let fx = fixture("i=0\nwhile [ $i -lt 200 ]; do echo \"line $i\"; i=$((i+1)); done\nexit 1\n").await;
        fx.run().await;

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.progress, PROGRESS_CEILING);
    }

    #[tokio::test]
    async fn missing_binary_fails_with_zero_progress() {
        let fx = fixture(SUCCESS_SCRIPT).await;
        let runner = ConversionRunner::new(
            Arc::clone(&fx.store),
            Converter::at(fx.input.with_file_name("no-such-converter")),
            TTL,
        );
        runner.run(fx.id, &fx.input, &fx.output).await;

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.message, MSG_NOT_INSTALLED);
        assert_eq!(task.progress, 0);
    }

    #[tokio::test]
    async fn spawn_failure_is_recorded_as_exception() {
        let fx = fixture(SUCCESS_SCRIPT).await;
        // Exists, but is not executable.
        let not_exec = fx.input.with_file_name("not-executable");
        tokio::fs::write(&not_exec, b"#!/bin/sh\n").await.unwrap();
        let runner = ConversionRunner::new(Arc::clone(&fx.store), Converter::at(not_exec), TTL);
        runner.run(fx.id, &fx.input, &fx.output).await;

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.message.starts_with("Exception: "), "{}", task.message);
    }

    #[tokio::test]
    async fn timeout_kills_converter_and_fails() {
        let fx = fixture("echo starting\nsleep 30\ncp \"$1\" \"$2\"\n").await;
        let runner = fx.runner().with_timeout(Some(Duration::from_millis(200)));

        tokio::time::timeout(
            Duration::from_secs(10),
            runner.run(fx.id, &fx.input, &fx.output),
        )
        .await
        .expect("timeout was not enforced");

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.message.contains("timed out"), "{}", task.message);
        assert!(!fx.output.exists());
    }

    #[tokio::test]
    async fn dispatch_runs_in_background() {
        let fx = fixture(SUCCESS_SCRIPT).await;
        let handle = fx
            .runner()
            .dispatch(fx.id, fx.input.clone(), fx.output.clone());

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("runner hung")
            .unwrap();

        let task = fx.store.get(fx.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn panicking_work_still_ends_in_error() {
        let store = TaskStore::new();
        let id = store.create("book.epub").await;
        store
            .update(id, TaskUpdate::progress(PROGRESS_STARTED, MSG_CONVERTING))
            .await;

        let handle = supervise(Arc::clone(&store), id, async {
            panic!("converter wrapper blew up");
        });
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor hung")
            .unwrap();

        let task = store.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.message.starts_with("Exception: runner panicked"), "{}", task.message);
        assert_eq!(task.progress, PROGRESS_STARTED);
        assert!(task.expires_at.is_none());
    }

    #[tokio::test]
    async fn supervised_work_that_finishes_is_left_alone() {
        let store = TaskStore::new();
        let id = store.create("book.epub").await;

        let handle = supervise(Arc::clone(&store), id, async {});
        handle.await.unwrap();

        let task = store.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn progress_never_decreases_while_running() {
        let fx = fixture("i=0\nwhile [ $i -lt 40 ]; do echo tick; i=$((i+1)); done\ncp \"$1\" \"$2\"\n").await;
        let handle = fx
            .runner()
            .dispatch(fx.id, fx.input.clone(), fx.output.clone());

        let mut last = 0;
        loop {
            let task = fx.store.get(fx.id).await.unwrap();
            assert!(task.progress >= last, "progress went from {last} to {}", task.progress);
            last = task.progress;
            if task.status.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }
        handle.await.unwrap();
        assert_eq!(last, 100);
    }
}
