//! Restart a fixed set of daemons around a test and stop them afterwards.

use rigging_core::{Action, DaemonName, Target};
use rigging_daemon::{DaemonError, ServiceControl};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonsHandlerConfig {
    #[serde(default)]
    pub daemons: Vec<DaemonName>,
    /// Restart the whole product through the control command instead.
    #[serde(default)]
    pub all_daemons: bool,
    /// Log control failures instead of returning them (tests of invalid
    /// configurations expect daemons to refuse to start).
    #[serde(default)]
    pub ignore_errors: bool,
}

impl DaemonsHandlerConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if !self.all_daemons && self.daemons.is_empty() {
            return Err(HarnessError::ConfigurationMissing(
                "daemons handler needs a daemon list or all_daemons".to_string(),
            ));
        }
        Ok(())
    }

    fn targets(&self) -> Vec<Target> {
        if self.all_daemons {
            vec![Target::All]
        } else {
            self.daemons.iter().cloned().map(Target::Daemon).collect()
        }
    }
}

pub struct DaemonsHandler<'a, C> {
    control: &'a C,
    config: DaemonsHandlerConfig,
}

impl<'a, C: ServiceControl> DaemonsHandler<'a, C> {
    /// Validate once; a handler that exists is always runnable.
    pub fn new(control: &'a C, config: DaemonsHandlerConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self { control, config })
    }

    pub fn config(&self) -> &DaemonsHandlerConfig {
        &self.config
    }

    /// Restart every target in order.
    pub async fn setup(&self) -> Result<(), HarnessError> {
        self.run(Action::Restart).await
    }

    /// Stop every target in order.
    pub async fn teardown(&self) -> Result<(), HarnessError> {
        self.run(Action::Stop).await
    }

    async fn run(&self, action: Action) -> Result<(), HarnessError> {
        for target in self.config.targets() {
            tracing::debug!(daemon = %target, action = %action, "daemons handler");
            match self.control.control(&target, action, false).await {
                Ok(_) => {}
                Err(err) if self.config.ignore_errors && tolerable(&err) => {
                    tracing::warn!(daemon = %target, action = %action, error = %err, "ignoring control failure");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// Failures the product itself reports; harness misuse is never ignored.
fn tolerable(err: &DaemonError) -> bool {
    matches!(err, DaemonError::ControlCommandFailed { .. })
}
