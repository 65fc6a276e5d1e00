//! Process-level orchestration: the control loop, its status view and the
//! daemon supervisor.

pub mod control_loop;
pub mod status;
pub mod supervisor;

pub use control_loop::ControlLoop;
pub use status::{StatusHandle, StatusSnapshot};
pub use supervisor::{restart_backoff, supervise};
