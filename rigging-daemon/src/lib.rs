//! Product daemon supervision: the control command, readiness polling and
//! the on-disk artifacts (logs, pid files, databases) the daemons leave.

mod error;
pub mod control;
pub mod databases;
pub mod logs;
pub mod poll;
pub mod probe;

pub use control::{ControlOutput, DaemonController, ServiceControl};
pub use error::DaemonError;
pub use poll::PollPolicy;
