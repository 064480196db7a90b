use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("count must be positive, got {0}")]
    InvalidCount(usize),
}

/// Snapshot of the job's progress counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct Status {
    pub num_slaves: u64,
    pub num_tasks: u64,
    pub num_tasks_done: u64,
    pub job_done: bool,
}

/// Single authority for the job's progress and terminal condition.
///
/// Keeping the counters in one place prevents drift between what the Task
/// Manager tracks internally and what the operator sees.
pub struct StatusManager {
    inner: Mutex<Status>,
}

impl StatusManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Status::default()),
        }
    }

    /// Set the total task count for the job. n = 0 is a caller bug.
    pub async fn tasks_loaded(&self, n: usize) -> Result<(), StatusError> {
        if n == 0 {
            return Err(StatusError::InvalidCount(n));
        }
        let mut status = self.inner.lock().await;
        status.num_tasks = n as u64;
        tracing::debug!(num_tasks = n, "Tasks loaded");
        Ok(())
    }

    pub async fn new_slave_connected(&self) {
        let mut status = self.inner.lock().await;
        status.num_slaves += 1;
        tracing::debug!(num_slaves = status.num_slaves, "Slave connected");
    }

    pub async fn slave_disconnected(&self) {
        let mut status = self.inner.lock().await;
        status.num_slaves = status.num_slaves.saturating_sub(1);
        tracing::debug!(num_slaves = status.num_slaves, "Slave disconnected");
    }

    pub async fn tasks_completed(&self, n: usize) -> Result<(), StatusError> {
        if n == 0 {
            return Err(StatusError::InvalidCount(n));
        }
        let mut status = self.inner.lock().await;
        status.num_tasks_done += n as u64;
        Ok(())
    }

    /// Latch the job as done. One-way; never cleared.
    pub async fn job_completed(&self) {
        let mut status = self.inner.lock().await;
        if !status.job_done {
            status.job_done = true;
            tracing::info!("Job completed");
        }
    }

    pub async fn is_job_done(&self) -> bool {
        self.inner.lock().await.job_done
    }

    pub async fn snapshot(&self) -> Status {
        *self.inner.lock().await
    }

    /// One-line progress summary for the operator log.
    pub async fn render(&self) -> String {
        let status = self.inner.lock().await;
        let progress = if status.num_tasks > 0 {
            status.num_tasks_done as f64 / status.num_tasks as f64 * 100.0
        } else {
            0.0
        };
        format!(
            "Connected Slaves: {} / Tasks Done: {} / Total Tasks: {} / Progress: {:.2}% / Job Completed: {}",
            status.num_slaves, status.num_tasks_done, status.num_tasks, progress, status.job_done
        )
    }
}

impl Default for StatusManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters() {
        let manager = StatusManager::new();
        manager.tasks_loaded(4).await.unwrap();
        manager.new_slave_connected().await;
        manager.new_slave_connected().await;
        manager.slave_disconnected().await;
        manager.tasks_completed(3).await.unwrap();

        let status = manager.snapshot().await;
        assert_eq!(status.num_slaves, 1);
        assert_eq!(status.num_tasks, 4);
        assert_eq!(status.num_tasks_done, 3);
        assert!(!status.job_done);
    }

    #[tokio::test]
    async fn test_zero_counts_rejected() {
        let manager = StatusManager::new();
        assert!(manager.tasks_loaded(0).await.is_err());
        assert!(manager.tasks_completed(0).await.is_err());
    }

    #[tokio::test]
    async fn test_job_done_latch() {
        let manager = StatusManager::new();
        assert!(!manager.is_job_done().await);
        manager.job_completed().await;
        assert!(manager.is_job_done().await);
        // latching twice is a no-op, never a clear
        manager.job_completed().await;
        assert!(manager.is_job_done().await);
    }

    #[tokio::test]
    async fn test_render_format() {
        let manager = StatusManager::new();
        manager.tasks_loaded(8).await.unwrap();
        manager.new_slave_connected().await;
        manager.tasks_completed(2).await.unwrap();

        assert_eq!(
            manager.render().await,
            "Connected Slaves: 1 / Tasks Done: 2 / Total Tasks: 8 / Progress: 25.00% / Job Completed: false"
        );
    }

    #[tokio::test]
    async fn test_render_with_no_tasks() {
        let manager = StatusManager::new();
        assert_eq!(
            manager.render().await,
            "Connected Slaves: 0 / Tasks Done: 0 / Total Tasks: 0 / Progress: 0.00% / Job Completed: false"
        );
    }
}
