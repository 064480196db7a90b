use serde::{Deserialize, Serialize};

/// Fixed endpoint paths served by the coordinator.
pub const DISCOVERY: &str = "/discovery";
pub const HEARTBEAT: &str = "/heartbeat";
pub const JOB: &str = "/job";
pub const FILE: &str = "/file";
pub const GET_TASKS: &str = "/get_tasks";
pub const TASKS_DONE: &str = "/tasks_done";
pub const HEALTH: &str = "/health";
pub const METRICS: &str = "/metrics";

/// Cookie carrying the worker's session identity.
pub const SESSION_COOKIE: &str = "id";

/// Default coordinator port.
pub const DEFAULT_PORT: u16 = 5678;

/// Seconds a worker backs off when tasks are outstanding but none are free.
/// Also sent as the `Retry-After` header on the 503 response.
pub const RETRY_AFTER_SECS: u64 = 20;

/// Body of `GET /discovery`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    /// Coordinator LAN address, dotted quad.
    pub ip: String,
}

/// Worker-side URL builders for the coordinator endpoints.
pub mod url {
    use super::*;

    pub fn discovery(host: &str, port: u16) -> String {
        format!("http://{host}:{port}{DISCOVERY}")
    }

    pub fn heartbeat(host: &str, port: u16) -> String {
        format!("http://{host}:{port}{HEARTBEAT}")
    }

    pub fn job(host: &str, port: u16) -> String {
        format!("http://{host}:{port}{JOB}")
    }

    pub fn file(host: &str, port: u16, job_id: i64, file_name: &str) -> String {
        format!("http://{host}:{port}{FILE}/{job_id}/{file_name}")
    }

    pub fn get_tasks(host: &str, port: u16, job_id: i64, num_tasks: usize) -> String {
        format!("http://{host}:{port}{GET_TASKS}/{job_id}/{num_tasks}")
    }

    pub fn tasks_done(host: &str, port: u16, job_id: i64) -> String {
        format!("http://{host}:{port}{TASKS_DONE}/{job_id}")
    }
}
