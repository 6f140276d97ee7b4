mod preflight;
mod runner;
mod steps;
mod types;

use tokio_util::sync::CancellationToken;

use crate::config::UpgradeConfig;
use crate::remote::ShellConnector;

pub use types::{RunMode, RunOptions, RunReport, RunStatus, Verification};

/// Drives a staged upgrade or rollback over every group, node and software in a
/// configuration.
///
/// Work runs strictly in sequence on the calling thread. `cancel` is polled before each
/// group, node and software; an in-flight remote operation is never interrupted.
pub struct Orchestrator<C: ShellConnector> {
    config: UpgradeConfig,
    connector: C,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<C: ShellConnector> Orchestrator<C> {
    pub fn new(
        config: UpgradeConfig,
        connector: C,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            options,
            cancel,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
