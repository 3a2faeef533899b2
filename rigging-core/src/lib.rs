//! Rigging core library: domain types, harness configuration, test selection.
//!
//! Public API surface:
//! - [`types`]: newtypes, socket addresses, daemon lifecycle enums
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save / validate the harness configuration file
//! - [`selection`]: tier / platform / host-type test selection

pub mod config;
pub mod error;
pub mod selection;
pub mod types;

pub use config::{ControlConfig, DaemonSpec, HarnessConfig, PollSettings, ProbeSpec};
pub use error::ConfigError;
pub use selection::{DeselectionHook, HostType, Platform, SelectionContext, TestItem, TierFilter};
pub use types::{Action, DaemonName, DaemonState, Family, Protocol, SocketAddress, Target};
