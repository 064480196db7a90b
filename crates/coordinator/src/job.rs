use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use taskgrid_common::config::CoordinatorConfig;
use taskgrid_common::{JobInfo, Result, Task, TaskGridError};

use crate::connections::ConnectionManager;
use crate::status::StatusManager;
use crate::tasks::TaskManager;

/// The coordinator aggregate: one Status, Task, and Connection manager per
/// process, wired together at construction.
pub struct Coordinator {
    pub status: Arc<StatusManager>,
    pub tasks: Arc<TaskManager>,
    pub connections: Arc<ConnectionManager>,
    job: RwLock<Option<JobInfo>>,
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig) -> Arc<Self> {
        let status = Arc::new(StatusManager::new());
        let tasks = Arc::new(TaskManager::new(
            Arc::clone(&status),
            config.max_task_attempts,
        ));
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&tasks),
            Arc::clone(&status),
            Duration::from_secs_f64(config.connection_timeout_secs),
            Duration::from_secs_f64(config.cleanup_interval_secs),
        ));
        Arc::new(Self {
            status,
            tasks,
            connections,
            job: RwLock::new(None),
        })
    }

    /// Install the job. Exactly one per coordinator process.
    pub async fn init_job(&self, info: JobInfo) -> Result<()> {
        if info.job_id <= 0 {
            return Err(TaskGridError::Validation(format!(
                "job_id must be positive, got {}",
                info.job_id
            )));
        }
        let mut job = self.job.write().await;
        if job.is_some() {
            return Err(TaskGridError::Validation(
                "a job is already loaded".into(),
            ));
        }
        tracing::info!(job_id = info.job_id, job_path = %info.job_path, "Job initialized");
        *job = Some(info);
        Ok(())
    }

    /// Enqueue the application's task list and set the total count.
    pub async fn load_tasks(&self, tasks: Vec<Task>) -> Result<()> {
        let job_id = self
            .current_job_id()
            .await
            .ok_or(TaskGridError::NoJob)?;
        let count = tasks.len();
        for task in tasks {
            self.tasks.add_available(task, job_id).await;
        }
        self.status
            .tasks_loaded(count)
            .await
            .map_err(|e| TaskGridError::Validation(e.to_string()))?;
        tracing::info!(count, job_id, "Tasks loaded");
        Ok(())
    }

    pub async fn job_info(&self) -> Option<JobInfo> {
        self.job.read().await.clone()
    }

    pub async fn current_job_id(&self) -> Option<i64> {
        self.job.read().await.as_ref().map(|info| info.job_id)
    }
}

/// On-disk job manifest: what the end-user application hands the
/// coordinator binary. JSON, path from `TASKGRID_JOBFILE`.
#[derive(Debug, Deserialize)]
pub struct JobManifest {
    /// Directory holding the shared job files and task payloads.
    pub job_path: String,
    #[serde(default)]
    pub file_names: Vec<String>,
    #[serde(default)]
    pub user_opts: Value,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
pub struct TaskSpec {
    pub task_id: i64,
    pub program: String,
    #[serde(default)]
    pub arg_file_names: Vec<String>,
    /// Inline input payload. Mutually exclusive with `payload_file`.
    #[serde(default)]
    pub payload: Option<String>,
    /// Input payload read from `<job_path>/<payload_file>`.
    #[serde(default)]
    pub payload_file: Option<String>,
    pub payload_filename: String,
    pub result_filename: String,
}

/// Parse a manifest and assign the job id. Fails loudly on anything
/// malformed; the coordinator refuses to start without a valid job.
pub fn load_manifest(path: &Path) -> Result<(JobInfo, Vec<Task>)> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TaskGridError::Config(format!("failed to read jobfile {}: {}", path.display(), e))
    })?;
    let manifest: JobManifest = serde_json::from_str(&content)?;

    if manifest.tasks.is_empty() {
        return Err(TaskGridError::Validation("jobfile contains no tasks".into()));
    }
    let job_path = Path::new(&manifest.job_path);
    if !job_path.is_dir() {
        return Err(TaskGridError::Validation(format!(
            "job_path {} is not a directory",
            manifest.job_path
        )));
    }
    for name in &manifest.file_names {
        if !job_path.join(name).is_file() {
            return Err(TaskGridError::Validation(format!(
                "job file {name} missing under {}",
                manifest.job_path
            )));
        }
    }

    // Positive and unique enough for one coordinator per subnet.
    let job_id = chrono::Utc::now().timestamp();

    let mut tasks = Vec::with_capacity(manifest.tasks.len());
    for spec in manifest.tasks {
        let payload = match (&spec.payload, &spec.payload_file) {
            (Some(inline), None) => inline.clone().into_bytes(),
            (None, Some(file)) => std::fs::read(job_path.join(file))?,
            (None, None) => Vec::new(),
            (Some(_), Some(_)) => {
                return Err(TaskGridError::Validation(format!(
                    "task {} sets both payload and payload_file",
                    spec.task_id
                )))
            }
        };
        tasks.push(Task::new(
            spec.task_id,
            spec.program,
            spec.arg_file_names,
            payload,
            spec.payload_filename,
            spec.result_filename,
        ));
    }

    let info = JobInfo {
        job_id,
        job_path: manifest.job_path,
        file_names: manifest.file_names,
        user_opts: manifest.user_opts,
    };
    Ok((info, tasks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn job_info(job_id: i64) -> JobInfo {
        JobInfo {
            job_id,
            job_path: "/tmp".into(),
            file_names: vec![],
            user_opts: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_init_job_once() {
        let coordinator = Coordinator::new(&CoordinatorConfig::default());
        coordinator.init_job(job_info(7)).await.unwrap();
        assert_eq!(coordinator.current_job_id().await, Some(7));
        assert!(coordinator.init_job(job_info(8)).await.is_err());
    }

    #[tokio::test]
    async fn test_init_job_rejects_nonpositive_id() {
        let coordinator = Coordinator::new(&CoordinatorConfig::default());
        assert!(coordinator.init_job(job_info(0)).await.is_err());
        assert!(coordinator.init_job(job_info(-3)).await.is_err());
    }

    #[tokio::test]
    async fn test_load_tasks_tags_job_id() {
        let coordinator = Coordinator::new(&CoordinatorConfig::default());
        coordinator.init_job(job_info(7)).await.unwrap();
        coordinator
            .load_tasks(vec![Task::new(1, "/bin/true", vec![], vec![], "in", "out")])
            .await
            .unwrap();

        let handed = coordinator
            .tasks
            .connect_available(1, taskgrid_common::ConnectionId::new())
            .await
            .unwrap();
        assert_eq!(handed[0].job_id, 7);
        assert_eq!(coordinator.status.snapshot().await.num_tasks, 1);
    }

    #[tokio::test]
    async fn test_load_tasks_without_job_fails() {
        let coordinator = Coordinator::new(&CoordinatorConfig::default());
        let result = coordinator
            .load_tasks(vec![Task::new(1, "/bin/true", vec![], vec![], "in", "out")])
            .await;
        assert!(matches!(result, Err(TaskGridError::NoJob)));
    }

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shared.txt"), b"shared").unwrap();
        std::fs::write(dir.path().join("input.bin"), b"\x01\x02\x03").unwrap();

        let mut jobfile = tempfile::NamedTempFile::new().unwrap();
        write!(
            jobfile,
            r#"{{
                "job_path": {job_path:?},
                "file_names": ["shared.txt"],
                "user_opts": {{"mode": "fast"}},
                "tasks": [
                    {{"task_id": 1, "program": "/bin/cat",
                      "arg_file_names": ["in1.txt"],
                      "payload": "hello",
                      "payload_filename": "in1.txt",
                      "result_filename": "out1.txt"}},
                    {{"task_id": 2, "program": "/bin/cat",
                      "arg_file_names": ["in2.txt"],
                      "payload_file": "input.bin",
                      "payload_filename": "in2.txt",
                      "result_filename": "out2.txt"}}
                ]
            }}"#,
            job_path = dir.path().to_str().unwrap()
        )
        .unwrap();

        let (info, tasks) = load_manifest(jobfile.path()).unwrap();
        assert!(info.job_id > 0);
        assert_eq!(info.file_names, vec!["shared.txt".to_string()]);
        assert_eq!(info.user_opts["mode"], "fast");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].payload, b"hello");
        assert_eq!(tasks[1].payload, b"\x01\x02\x03");
    }

    #[test]
    fn test_load_manifest_missing_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut jobfile = tempfile::NamedTempFile::new().unwrap();
        write!(
            jobfile,
            r#"{{"job_path": {job_path:?}, "file_names": ["absent.txt"],
                "tasks": [{{"task_id": 1, "program": "x",
                            "payload_filename": "in", "result_filename": "out"}}]}}"#,
            job_path = dir.path().to_str().unwrap()
        )
        .unwrap();
        assert!(load_manifest(jobfile.path()).is_err());
    }
}
