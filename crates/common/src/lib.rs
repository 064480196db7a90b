pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod net;
pub mod task;

pub use error::{Result, TaskGridError};
pub use ids::ConnectionId;
pub use task::{JobInfo, Task, TaskMessageType};
