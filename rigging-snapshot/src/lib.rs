//! # rigging-snapshot
//!
//! Capture / apply / restore for file-backed configuration resources.
//!
//! Call [`ConfigSnapshot::capture`] before mutating a resource, then
//! [`ConfigSnapshot::apply`] the test content and, on every teardown path,
//! [`ConfigSnapshot::restore`]. The flat internal options store lives in
//! [`options`].

pub mod digest;
pub mod error;
pub mod options;
pub mod snapshot;

pub use error::SnapshotError;
pub use options::LocalOptions;
pub use snapshot::{apply, ConfigSnapshot, RestoreOutcome};
