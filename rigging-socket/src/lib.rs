//! Socket plumbing for the harness: client controllers, interception
//! listeners and the queues test code reads intercepted traffic from.

mod error;
pub mod framing;
pub mod controller;
pub mod listener;
pub mod observer;

pub use controller::SocketController;
pub use error::SocketError;
pub use framing::{Framing, MAX_DATAGRAM_BYTES, MAX_FRAME_BYTES};
pub use listener::{InterceptListener, InterceptSpec};
pub use observer::{QueueItem, QueueObserver, Wait};
