use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use taskgrid_common::{ConnectionId, Task, TaskMessageType};

use crate::status::{StatusError, StatusManager};

#[derive(Debug, thiserror::Error)]
pub enum TaskPoolError {
    /// Nothing free right now, but tasks are still outstanding on other
    /// connections. Worth retrying after a pause.
    #[error("no tasks available, {in_progress} still in progress")]
    NoMoreAvailable { in_progress: usize },

    /// Nothing free and nothing outstanding. The job is over.
    #[error("no more tasks")]
    NoMoreTasks,

    /// A worker reported a task with a type that cannot be a result.
    #[error("unexpected message type {0:?} in a finished report")]
    UnexpectedMessageType(TaskMessageType),

    #[error(transparent)]
    Status(#[from] StatusError),
}

/// A dispatched task paired with the connection that owns it.
#[derive(Clone, Debug)]
pub struct ConnectedTask {
    pub task: Task,
    pub connection_id: ConnectionId,
}

#[derive(Default)]
struct Partitions {
    available: VecDeque<Task>,
    in_progress: HashMap<i64, ConnectedTask>,
    finished: VecDeque<Task>,
    /// FAILED/RAW returns per task id, only tracked when a cap is set.
    attempts: HashMap<i64, u32>,
    /// Total tasks ever loaded through `add_available`.
    loaded: usize,
}

/// Owns the three task partitions. Every task is in exactly one of
/// available, in-progress, or finished; all mutation happens under one lock.
pub struct TaskManager {
    partitions: Mutex<Partitions>,
    status: Arc<StatusManager>,
    max_attempts: Option<u32>,
}

impl TaskManager {
    pub fn new(status: Arc<StatusManager>, max_attempts: Option<u32>) -> Self {
        Self {
            partitions: Mutex::new(Partitions::default()),
            status,
            max_attempts,
        }
    }

    /// Tag a task with the job and enqueue it at the tail of available.
    pub async fn add_available(&self, mut task: Task, job_id: i64) {
        task.job_id = job_id;
        task.message_type = TaskMessageType::Raw;
        let mut partitions = self.partitions.lock().await;
        partitions.loaded += 1;
        partitions.available.push_back(task);
    }

    /// Pop up to `num_tasks` available tasks and hand them to `connection_id`.
    ///
    /// A partial batch is success. Zero obtainable is an error that tells the
    /// caller whether to back off (`NoMoreAvailable`) or stop (`NoMoreTasks`).
    /// `num_tasks` = 0 returns an empty vec without touching state.
    pub async fn connect_available(
        &self,
        num_tasks: usize,
        connection_id: ConnectionId,
    ) -> Result<Vec<Task>, TaskPoolError> {
        if num_tasks == 0 {
            return Ok(Vec::new());
        }

        let mut partitions = self.partitions.lock().await;
        let mut handed_out = Vec::new();
        while handed_out.len() < num_tasks {
            let Some(task) = partitions.available.pop_front() else {
                break;
            };
            partitions.in_progress.insert(
                task.task_id,
                ConnectedTask {
                    task: task.clone(),
                    connection_id,
                },
            );
            handed_out.push(task);
        }

        if handed_out.is_empty() {
            let in_progress = partitions.in_progress.len();
            if in_progress == 0 {
                return Err(TaskPoolError::NoMoreTasks);
            }
            return Err(TaskPoolError::NoMoreAvailable { in_progress });
        }

        metrics::counter!("taskgrid.tasks.dispatched").increment(handed_out.len() as u64);
        Ok(handed_out)
    }

    /// Re-queue every in-progress task owned by a dead connection.
    /// Returns how many were orphaned.
    pub async fn connection_dropped(&self, connection_id: ConnectionId) -> usize {
        let mut partitions = self.partitions.lock().await;
        let orphaned: Vec<i64> = partitions
            .in_progress
            .iter()
            .filter(|(_, connected)| connected.connection_id == connection_id)
            .map(|(&task_id, _)| task_id)
            .collect();

        for task_id in &orphaned {
            if let Some(connected) = partitions.in_progress.remove(task_id) {
                let mut task = connected.task;
                task.message_type = TaskMessageType::Raw;
                partitions.available.push_back(task);
            }
        }

        if !orphaned.is_empty() {
            metrics::counter!("taskgrid.tasks.requeued").increment(orphaned.len() as u64);
            tracing::warn!(
                connection_id = %connection_id,
                count = orphaned.len(),
                "Re-queued tasks from dropped connection"
            );
        }
        orphaned.len()
    }

    /// Apply a worker's finished report.
    ///
    /// Reports for tasks no longer in progress (orphaned by a timeout and
    /// re-issued elsewhere) are dropped with a warning. Afterwards, if both
    /// available and in-progress are empty the job is latched done.
    pub async fn tasks_finished(&self, finished: Vec<Task>) -> Result<(), TaskPoolError> {
        let mut completed = 0usize;
        {
            let mut partitions = self.partitions.lock().await;
            for task in finished {
                let Some(connected) = partitions.in_progress.remove(&task.task_id) else {
                    tracing::warn!(
                        task_id = task.task_id,
                        "Report for a task not in progress, dropping"
                    );
                    continue;
                };

                match task.message_type {
                    TaskMessageType::Processed => {
                        partitions.attempts.remove(&task.task_id);
                        partitions.finished.push_back(task);
                        completed += 1;
                    }
                    TaskMessageType::Failed | TaskMessageType::Raw => {
                        self.requeue_returned(&mut partitions, connected.task);
                    }
                    other => {
                        // Put the task back so the report cannot lose it.
                        partitions.in_progress.insert(task.task_id, connected);
                        return Err(TaskPoolError::UnexpectedMessageType(other));
                    }
                }
            }
        }

        if completed > 0 {
            metrics::counter!("taskgrid.tasks.completed").increment(completed as u64);
            self.status.tasks_completed(completed).await?;
        }
        self.check_job_done().await;
        Ok(())
    }

    /// Drain and return the finished queue.
    pub async fn flush_finished(&self) -> Vec<Task> {
        let mut partitions = self.partitions.lock().await;
        partitions.finished.drain(..).collect()
    }

    /// (available, in_progress, finished) lengths.
    pub async fn counts(&self) -> (usize, usize, usize) {
        let partitions = self.partitions.lock().await;
        (
            partitions.available.len(),
            partitions.in_progress.len(),
            partitions.finished.len(),
        )
    }

    /// Put a FAILED/RAW return back on the queue, or abandon it once it has
    /// burned through the attempt cap. The re-queued copy is the one handed
    /// out, so the original input payload survives the round trip.
    fn requeue_returned(&self, partitions: &mut Partitions, mut task: Task) {
        if let Some(cap) = self.max_attempts {
            let attempts = partitions.attempts.entry(task.task_id).or_insert(0);
            *attempts += 1;
            if *attempts >= cap {
                tracing::warn!(
                    task_id = task.task_id,
                    attempts = *attempts,
                    "Task exceeded attempt cap, abandoning as failed"
                );
                task.message_type = TaskMessageType::Failed;
                task.payload = Vec::new();
                partitions.finished.push_back(task);
                return;
            }
        }
        metrics::counter!("taskgrid.tasks.requeued").increment(1);
        task.message_type = TaskMessageType::Raw;
        partitions.available.push_back(task);
    }

    async fn check_job_done(&self) {
        let (empty, loaded) = {
            let partitions = self.partitions.lock().await;
            (
                partitions.available.is_empty() && partitions.in_progress.is_empty(),
                partitions.loaded,
            )
        };
        if empty && loaded > 0 {
            self.status.job_completed().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_id: i64) -> Task {
        Task::new(
            task_id,
            "/bin/cat",
            vec![format!("in{task_id}.txt")],
            format!("payload {task_id}").into_bytes(),
            format!("in{task_id}.txt"),
            format!("out{task_id}.txt"),
        )
    }

    fn manager() -> (Arc<StatusManager>, TaskManager) {
        let status = Arc::new(StatusManager::new());
        let tasks = TaskManager::new(Arc::clone(&status), None);
        (status, tasks)
    }

    async fn load(tasks: &TaskManager, status: &StatusManager, n: i64) {
        for id in 1..=n {
            tasks.add_available(task(id), 7).await;
        }
        status.tasks_loaded(n as usize).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_tags_and_moves_to_in_progress() {
        let (status, tasks) = manager();
        load(&tasks, &status, 2).await;

        let handed = tasks.connect_available(1, ConnectionId::new()).await.unwrap();
        assert_eq!(handed.len(), 1);
        assert_eq!(handed[0].task_id, 1);
        assert_eq!(handed[0].job_id, 7);
        assert_eq!(handed[0].message_type, TaskMessageType::Raw);
        assert_eq!(tasks.counts().await, (1, 1, 0));
    }

    #[tokio::test]
    async fn test_partial_batch_is_success() {
        let (status, tasks) = manager();
        load(&tasks, &status, 2).await;

        let handed = tasks.connect_available(5, ConnectionId::new()).await.unwrap();
        assert_eq!(handed.len(), 2);
        assert_eq!(tasks.counts().await, (0, 2, 0));
    }

    #[tokio::test]
    async fn test_zero_request_is_a_noop() {
        let (status, tasks) = manager();
        load(&tasks, &status, 1).await;

        let handed = tasks.connect_available(0, ConnectionId::new()).await.unwrap();
        assert!(handed.is_empty());
        assert_eq!(tasks.counts().await, (1, 0, 0));
    }

    #[tokio::test]
    async fn test_exhaustion_errors() {
        let (_, tasks) = manager();
        // nothing loaded at all
        assert!(matches!(
            tasks.connect_available(1, ConnectionId::new()).await,
            Err(TaskPoolError::NoMoreTasks)
        ));

        tasks.add_available(task(1), 7).await;
        let conn = ConnectionId::new();
        tasks.connect_available(1, conn).await.unwrap();
        // queue empty but one task outstanding
        assert!(matches!(
            tasks.connect_available(1, ConnectionId::new()).await,
            Err(TaskPoolError::NoMoreAvailable { in_progress: 1 })
        ));
    }

    #[tokio::test]
    async fn test_connection_dropped_requeues_to_tail() {
        let (status, tasks) = manager();
        load(&tasks, &status, 3).await;

        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();
        tasks.connect_available(2, conn_a).await.unwrap();
        tasks.connect_available(1, conn_b).await.unwrap();

        let orphaned = tasks.connection_dropped(conn_a).await;
        assert_eq!(orphaned, 2);
        // conn_b's task untouched; tasks 1 and 2 back in available
        assert_eq!(tasks.counts().await, (2, 1, 0));

        // the re-queued tasks keep their original payload
        let handed = tasks.connect_available(2, conn_b).await.unwrap();
        let mut ids: Vec<i64> = handed.iter().map(|t| t.task_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
        assert!(handed.iter().all(|t| !t.payload.is_empty()));
    }

    #[tokio::test]
    async fn test_dropping_unknown_connection_is_harmless() {
        let (status, tasks) = manager();
        load(&tasks, &status, 1).await;
        assert_eq!(tasks.connection_dropped(ConnectionId::new()).await, 0);
        assert_eq!(tasks.counts().await, (1, 0, 0));
    }

    #[tokio::test]
    async fn test_processed_report_completes_the_job() {
        let (status, tasks) = manager();
        load(&tasks, &status, 2).await;
        let conn = ConnectionId::new();
        let mut handed = tasks.connect_available(2, conn).await.unwrap();

        for task in &mut handed {
            task.message_type = TaskMessageType::Processed;
            task.payload = b"result".to_vec();
        }
        tasks.tasks_finished(handed).await.unwrap();

        assert_eq!(tasks.counts().await, (0, 0, 2));
        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.num_tasks_done, 2);
        assert!(snapshot.job_done);
    }

    #[tokio::test]
    async fn test_failed_report_requeues_with_original_payload() {
        let (status, tasks) = manager();
        load(&tasks, &status, 1).await;
        let conn = ConnectionId::new();
        let mut handed = tasks.connect_available(1, conn).await.unwrap();

        handed[0].message_type = TaskMessageType::Failed;
        handed[0].payload = Vec::new();
        tasks.tasks_finished(handed).await.unwrap();

        assert_eq!(tasks.counts().await, (1, 0, 0));
        assert!(!status.is_job_done().await);

        // another worker picks it up with the input restored
        let retried = tasks.connect_available(1, ConnectionId::new()).await.unwrap();
        assert_eq!(retried[0].message_type, TaskMessageType::Raw);
        assert_eq!(retried[0].payload, b"payload 1");
    }

    #[tokio::test]
    async fn test_unknown_report_dropped_with_warning() {
        let (status, tasks) = manager();
        load(&tasks, &status, 1).await;

        let mut stray = task(99);
        stray.job_id = 7;
        stray.message_type = TaskMessageType::Processed;
        tasks.tasks_finished(vec![stray]).await.unwrap();

        assert_eq!(tasks.counts().await, (1, 0, 0));
        assert_eq!(status.snapshot().await.num_tasks_done, 0);
    }

    #[tokio::test]
    async fn test_job_end_report_is_an_error_and_loses_nothing() {
        let (status, tasks) = manager();
        load(&tasks, &status, 1).await;
        let conn = ConnectionId::new();
        let mut handed = tasks.connect_available(1, conn).await.unwrap();

        handed[0].message_type = TaskMessageType::JobEnd;
        assert!(matches!(
            tasks.tasks_finished(handed).await,
            Err(TaskPoolError::UnexpectedMessageType(TaskMessageType::JobEnd))
        ));
        // still tracked in progress
        assert_eq!(tasks.counts().await, (0, 1, 0));
    }

    #[tokio::test]
    async fn test_attempt_cap_abandons_task() {
        let status = Arc::new(StatusManager::new());
        let tasks = TaskManager::new(Arc::clone(&status), Some(2));
        tasks.add_available(task(1), 7).await;
        status.tasks_loaded(1).await.unwrap();

        for _ in 0..2 {
            let conn = ConnectionId::new();
            let mut handed = tasks.connect_available(1, conn).await.unwrap();
            handed[0].message_type = TaskMessageType::Failed;
            tasks.tasks_finished(handed).await.unwrap();
        }

        // second failure hit the cap: abandoned into finished as FAILED
        assert_eq!(tasks.counts().await, (0, 0, 1));
        let flushed = tasks.flush_finished().await;
        assert_eq!(flushed[0].message_type, TaskMessageType::Failed);
        // abandoned tasks never count as done, but the job still terminates
        assert_eq!(status.snapshot().await.num_tasks_done, 0);
        assert!(status.is_job_done().await);
    }

    #[tokio::test]
    async fn test_partition_sum_is_invariant() {
        let (status, tasks) = manager();
        load(&tasks, &status, 5).await;
        let conn = ConnectionId::new();

        let sum = |c: (usize, usize, usize)| c.0 + c.1 + c.2;
        assert_eq!(sum(tasks.counts().await), 5);

        let mut handed = tasks.connect_available(3, conn).await.unwrap();
        assert_eq!(sum(tasks.counts().await), 5);

        handed[0].message_type = TaskMessageType::Processed;
        handed[1].message_type = TaskMessageType::Failed;
        handed[2].message_type = TaskMessageType::Processed;
        tasks.tasks_finished(handed).await.unwrap();
        assert_eq!(sum(tasks.counts().await), 5);

        tasks.connection_dropped(conn).await;
        assert_eq!(sum(tasks.counts().await), 5);
    }

    #[tokio::test]
    async fn test_flush_finished_drains() {
        let (status, tasks) = manager();
        load(&tasks, &status, 1).await;
        let mut handed = tasks
            .connect_available(1, ConnectionId::new())
            .await
            .unwrap();
        handed[0].message_type = TaskMessageType::Processed;
        tasks.tasks_finished(handed).await.unwrap();

        let flushed = tasks.flush_finished().await;
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].task_id, 1);
        assert!(tasks.flush_finished().await.is_empty());
    }
}
