use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use taskgrid_common::{Result, Task, TaskMessageType};

/// Process-wide log collecting the stdout/stderr of every task subprocess.
pub const RESULT_LOG: &str = "ApplicationResultLog.txt";

/// Execute one task to completion.
///
/// Writes the payload under the job directory, runs
/// `[program, <job_dir>/<arg>…]` with both output streams appended to the
/// result log, and turns the exit status into a PROCESSED task carrying the
/// result-file bytes or a FAILED task with an empty payload. A program that
/// cannot be spawned at all is reported FAILED too; only worker-side I/O
/// trouble is an error here.
pub async fn run_task(job_dir: &Path, log_path: &Path, task: &Task) -> Result<Task> {
    tokio::fs::write(job_dir.join(&task.payload_filename), &task.payload).await?;

    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let log_err = log.try_clone()?;

    let status = Command::new(&task.program)
        .args(task.arg_file_names.iter().map(|name| job_dir.join(name)))
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()
        .await;

    let mut done = task.clone();
    match status {
        Ok(status) if status.success() => {
            match tokio::fs::read(job_dir.join(&task.result_filename)).await {
                Ok(bytes) => {
                    done.message_type = TaskMessageType::Processed;
                    done.payload = bytes;
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = task.task_id,
                        result_file = %task.result_filename,
                        error = %e,
                        "Program exited cleanly but left no result file"
                    );
                    done.message_type = TaskMessageType::Failed;
                    done.payload = Vec::new();
                }
            }
        }
        Ok(status) => {
            tracing::warn!(
                task_id = task.task_id,
                code = status.code(),
                "Task program exited non-zero"
            );
            done.message_type = TaskMessageType::Failed;
            done.payload = Vec::new();
        }
        Err(e) => {
            tracing::warn!(
                task_id = task.task_id,
                program = %task.program,
                error = %e,
                "Failed to spawn task program"
            );
            done.message_type = TaskMessageType::Failed;
            done.payload = Vec::new();
        }
    }
    Ok(done)
}
