//! Two-phase harness sessions: [`Orchestrator::setup`] returns a
//! [`Session`] that test code reads intercepted traffic from, and
//! [`Orchestrator::teardown`] consumes it.

mod error;
pub mod handler;
pub mod orchestrator;
pub mod plan;
pub mod session;

pub use error::HarnessError;
pub use handler::{DaemonsHandler, DaemonsHandlerConfig};
pub use orchestrator::{Orchestrator, ProductLayout, DEFAULT_FLUSH_TIMEOUT};
pub use plan::{
    load_plan, ConfigChange, InterceptEntry, ReceiverSpec, SetupPlan, StartOrder, Topology,
};
pub use session::{OrchestratorState, Session};
