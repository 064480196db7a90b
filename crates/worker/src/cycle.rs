use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;

use taskgrid_common::config::WorkerConfig;
use taskgrid_common::{JobInfo, Result, Task};

use crate::runner;
use crate::session::{TaskFetch, WorkerSession};

/// A bootstrapped job: the coordinator's JobInfo plus the local directory
/// the shared files were downloaded into.
pub struct JobContext {
    pub info: JobInfo,
    pub job_dir: PathBuf,
}

/// How a task cycle ended.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Received the JOB_END sentinel; everything is done.
    JobComplete,
    /// The heartbeat gave up on the coordinator.
    HeartbeatLost,
    /// SIGINT.
    Cancelled,
}

/// The job handshake: fetch JobInfo, recreate `<base>/job/<job_id>/`, and
/// download every shared file into it. `None` when the coordinator has no
/// job for us.
pub async fn bootstrap(session: &WorkerSession, base_dir: &Path) -> Result<Option<JobContext>> {
    let Some(info) = session.fetch_job().await? else {
        return Ok(None);
    };
    tracing::info!(job_id = info.job_id, files = info.file_names.len(), "Job received");

    let job_dir = base_dir.join("job").join(info.job_id.to_string());
    if job_dir.exists() {
        tokio::fs::remove_dir_all(&job_dir).await?;
    }
    tokio::fs::create_dir_all(&job_dir).await?;

    for file_name in &info.file_names {
        let bytes = session.download_file(info.job_id, file_name).await?;
        tokio::fs::write(job_dir.join(file_name), &bytes).await?;
        tracing::info!(file = %file_name, size = bytes.len(), "Job file saved");
    }

    Ok(Some(JobContext { info, job_dir }))
}

/// The fetch → execute → report loop. Runs until the JOB_END sentinel, a
/// dead heartbeat, cancellation, or too many consecutive fetch failures.
pub async fn run(
    session: &WorkerSession,
    ctx: &JobContext,
    config: &WorkerConfig,
    heartbeat_dead: watch::Receiver<bool>,
    mut cancel: watch::Receiver<bool>,
    log_path: &Path,
) -> Result<CycleOutcome> {
    let job_id = ctx.info.job_id;
    let backoff = Duration::from_secs_f64(config.fetch_backoff_secs);
    let mut fetch_failures = 0u32;

    loop {
        if *cancel.borrow() {
            return Ok(CycleOutcome::Cancelled);
        }
        if *heartbeat_dead.borrow() {
            return Ok(CycleOutcome::HeartbeatLost);
        }

        match session.fetch_tasks(job_id, config.max_concurrent_tasks).await {
            Ok(TaskFetch::JobEnd) => {
                tracing::info!(job_id, "Job complete");
                return Ok(CycleOutcome::JobComplete);
            }
            Ok(TaskFetch::Backoff) => {
                tracing::debug!(job_id, "No tasks free, backing off");
                pause(backoff, &mut cancel).await;
            }
            Ok(TaskFetch::Tasks(tasks)) => {
                fetch_failures = 0;
                let results = execute_batch(ctx, tasks, log_path).await?;
                report(session, job_id, &results, config, &heartbeat_dead, &mut cancel).await?;
            }
            Err(e) if e.is_retriable() => {
                fetch_failures += 1;
                tracing::warn!(error = %e, attempt = fetch_failures, "Task fetch failed");
                if fetch_failures >= config.fetch_retry_attempts {
                    return Err(e);
                }
                pause(backoff, &mut cancel).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a batch one task at a time, each to completion.
async fn execute_batch(ctx: &JobContext, tasks: Vec<Task>, log_path: &Path) -> Result<Vec<Task>> {
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        tracing::info!(task_id = task.task_id, program = %task.program, "Running task");
        let done = runner::run_task(&ctx.job_dir, log_path, &task).await?;
        tracing::info!(
            task_id = done.task_id,
            outcome = done.message_type.as_str(),
            "Task executed"
        );
        results.push(done);
    }
    Ok(results)
}

/// Report results, retrying transport hiccups. Results are only dropped if
/// the coordinator stays unreachable past the retry budget, at which point
/// its timeout sweep will re-queue our tasks anyway.
async fn report(
    session: &WorkerSession,
    job_id: i64,
    results: &[Task],
    config: &WorkerConfig,
    heartbeat_dead: &watch::Receiver<bool>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<()> {
    let backoff = Duration::from_secs_f64(config.fetch_backoff_secs);
    let mut attempt = 0u32;
    loop {
        match session.report_finished(job_id, results).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retriable() => {
                attempt += 1;
                tracing::warn!(error = %e, attempt, "Finished report failed");
                if attempt >= config.fetch_retry_attempts {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
        if *cancel.borrow() || *heartbeat_dead.borrow() {
            return Err(taskgrid_common::TaskGridError::Transport(
                "gave up reporting results".into(),
            ));
        }
        pause(backoff, cancel).await;
    }
}

/// Sleep, but wake early on cancellation.
async fn pause(duration: Duration, cancel: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.changed() => {}
    }
}
