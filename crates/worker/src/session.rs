use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE};

use taskgrid_common::api::{url, SESSION_COOKIE};
use taskgrid_common::{codec, ConnectionId, JobInfo, Result, Task, TaskGridError};

/// Outcome of a task fetch, from the worker's point of view.
#[derive(Debug)]
pub enum TaskFetch {
    /// Work to do.
    Tasks(Vec<Task>),
    /// Nothing free right now; back off and ask again.
    Backoff,
    /// The job is over.
    JobEnd,
}

/// One worker's HTTP session with the coordinator: a shared client that
/// sends the session identity as the `id` cookie on every request.
pub struct WorkerSession {
    client: reqwest::Client,
    host: String,
    port: u16,
    pub connection_id: ConnectionId,
}

impl WorkerSession {
    pub fn connect(host: impl Into<String>, port: u16) -> Result<Self> {
        let connection_id = ConnectionId::new();

        let mut headers = HeaderMap::new();
        let cookie = format!("{SESSION_COOKIE}={connection_id}");
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookie)
                .map_err(|e| TaskGridError::Internal(e.to_string()))?,
        );

        let client = reqwest::Client::builder()
            .user_agent("taskgrid-worker/0.1")
            .default_headers(headers)
            .build()
            .map_err(|e| TaskGridError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            host: host.into(),
            port,
            connection_id,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn heartbeat_url(&self) -> String {
        url::heartbeat(&self.host, self.port)
    }

    /// The job handshake. `None` when the coordinator has no job to hand
    /// out (nothing loaded, or the job is already finished).
    pub async fn fetch_job(&self) -> Result<Option<JobInfo>> {
        let resp = self
            .client
            .get(url::job(&self.host, self.port))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(transport)?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(TaskGridError::Transport(format!(
                "job handshake returned {}",
                resp.status()
            )));
        }
        let info = resp.json::<JobInfo>().await.map_err(transport)?;
        Ok(Some(info))
    }

    /// Download and decompress one shared job file.
    pub async fn download_file(&self, job_id: i64, file_name: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url::file(&self.host, self.port, job_id, file_name))
            .send()
            .await
            .map_err(transport)?;

        if resp.status().as_u16() == 404 {
            return Err(TaskGridError::NotFound(file_name.to_string()));
        }
        if !resp.status().is_success() {
            return Err(TaskGridError::Transport(format!(
                "file fetch returned {}",
                resp.status()
            )));
        }
        let body = resp.bytes().await.map_err(transport)?;
        Ok(codec::decompress(&body)?)
    }

    /// Ask for up to `num_tasks` tasks.
    pub async fn fetch_tasks(&self, job_id: i64, num_tasks: usize) -> Result<TaskFetch> {
        let resp = self
            .client
            .get(url::get_tasks(&self.host, self.port, job_id, num_tasks))
            .send()
            .await
            .map_err(transport)?;

        if resp.status().as_u16() == 503 {
            return Ok(TaskFetch::Backoff);
        }
        if !resp.status().is_success() {
            return Err(TaskGridError::Transport(format!(
                "task fetch returned {}",
                resp.status()
            )));
        }

        let body = resp.bytes().await.map_err(transport)?;
        let tasks = codec::decode_tasks(&body)?;
        if tasks.iter().any(|task| task.is_end_sentinel()) {
            return Ok(TaskFetch::JobEnd);
        }
        Ok(TaskFetch::Tasks(tasks))
    }

    /// Report a batch of executed tasks.
    pub async fn report_finished(&self, job_id: i64, finished: &[Task]) -> Result<()> {
        let body = codec::encode_tasks(finished)?;
        let resp = self
            .client
            .post(url::tasks_done(&self.host, self.port, job_id))
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            return Err(TaskGridError::Transport(format!(
                "finished report returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> TaskGridError {
    if e.is_timeout() {
        TaskGridError::Timeout(e.to_string())
    } else {
        TaskGridError::Transport(e.to_string())
    }
}
