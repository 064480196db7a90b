use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Task id reserved for the end-of-job sentinel.
pub const SENTINEL_TASK_ID: i64 = -1;

/// Lifecycle tag carried by every task on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMessageType {
    /// Unprocessed input, waiting in the available queue.
    Raw,
    /// Executed successfully; payload holds the result bytes.
    Processed,
    /// Subprocess exited non-zero; payload is empty.
    Failed,
    /// Sentinel telling a worker the job is finished.
    JobEnd,
}

impl TaskMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::JobEnd => "job_end",
        }
    }
}

/// A unit of work: an external program, its input payload, and the names of
/// the files it reads and writes under the worker's job directory.
///
/// Field order is part of the wire format (see `codec`); do not reorder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub job_id: i64,
    pub message_type: TaskMessageType,
    /// Executable the worker invokes.
    pub program: String,
    /// Passed as CLI arguments, in order, after being materialized under the
    /// worker's job directory.
    pub arg_file_names: Vec<String>,
    /// Input bytes on dispatch; result bytes once processed.
    pub payload: Vec<u8>,
    /// Where the worker writes `payload` before running `program`.
    pub payload_filename: String,
    /// Where `program` leaves its output.
    pub result_filename: String,
}

impl Task {
    pub fn new(
        task_id: i64,
        program: impl Into<String>,
        arg_file_names: Vec<String>,
        payload: Vec<u8>,
        payload_filename: impl Into<String>,
        result_filename: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            job_id: 0,
            message_type: TaskMessageType::Raw,
            program: program.into(),
            arg_file_names,
            payload,
            payload_filename: payload_filename.into(),
            result_filename: result_filename.into(),
        }
    }

    /// The JOB_END sentinel handed out once a job has fully completed.
    pub fn end_sentinel(job_id: i64) -> Self {
        Self {
            task_id: SENTINEL_TASK_ID,
            job_id,
            message_type: TaskMessageType::JobEnd,
            program: String::new(),
            arg_file_names: Vec::new(),
            payload: Vec::new(),
            payload_filename: String::new(),
            result_filename: String::new(),
        }
    }

    pub fn is_end_sentinel(&self) -> bool {
        self.message_type == TaskMessageType::JobEnd
    }
}

// Task identity is (task_id, job_id); payload and tags may differ between
// the dispatched and the reported copy of the same task.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id && self.job_id == other.job_id
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.task_id.hash(state);
        self.job_id.hash(state);
    }
}

/// What the coordinator hands a worker on the job handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobInfo {
    /// Assigned by the coordinator at init; always positive.
    pub job_id: i64,
    /// Coordinator-side directory containing the referenced files.
    pub job_path: String,
    /// Files the worker downloads before asking for tasks.
    pub file_names: Vec<String>,
    /// Opaque application options, passed through verbatim.
    #[serde(default)]
    pub user_opts: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_task_and_job_id() {
        let mut a = Task::new(1, "/bin/cat", vec!["in.txt".into()], b"x".to_vec(), "in.txt", "out.txt");
        let mut b = Task::new(1, "/bin/echo", vec![], b"y".to_vec(), "other.txt", "other.out");
        a.job_id = 7;
        b.job_id = 7;
        assert_eq!(a, b);

        b.job_id = 8;
        assert_ne!(a, b);
    }

    #[test]
    fn test_end_sentinel_shape() {
        let sentinel = Task::end_sentinel(42);
        assert_eq!(sentinel.task_id, SENTINEL_TASK_ID);
        assert_eq!(sentinel.job_id, 42);
        assert!(sentinel.is_end_sentinel());
        assert!(sentinel.payload.is_empty());
    }

    #[test]
    fn test_job_info_json_round_trip() {
        let info = JobInfo {
            job_id: 7,
            job_path: "/tmp/job7".into(),
            file_names: vec!["a.txt".into()],
            user_opts: serde_json::json!({"quality": "high"}),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: JobInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, 7);
        assert_eq!(back.file_names, vec!["a.txt".to_string()]);
        assert_eq!(back.user_opts["quality"], "high");
    }
}
