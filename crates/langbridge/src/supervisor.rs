use crate::catch::Catch;
use langbridge_core::config::BridgeConfig;
use langbridge_core::error::BridgeError;
use langbridge_core::process::{CompanionLauncher, LaunchSpec, ProcessHandle, TerminationOutcome};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Supervises the companion runtime process for one bridge connection.
///
/// The supervisor does not own the pipe. It launches the companion with the
/// pipe address to attach to, and coordinates exit timing after the poison
/// protocol has run.
pub struct CompanionSupervisor {
    launcher: Box<dyn CompanionLauncher>,
    handle: Mutex<Option<Box<dyn ProcessHandle>>>,
    config: BridgeConfig,
}

impl CompanionSupervisor {
    pub fn new(config: &BridgeConfig, launcher: Box<dyn CompanionLauncher>) -> Self {
        Self {
            launcher,
            handle: Mutex::new(None),
            config: config.clone(),
        }
    }

    /// Launch the companion, handing it the pipe address to connect back to.
    pub async fn start(&self, pipe_address: &str) -> Result<(), BridgeError> {
        let command = self
            .config
            .command
            .clone()
            .ok_or_else(|| BridgeError::Configuration("no companion command configured".into()))?;

        let spec = LaunchSpec {
            runtime_id: self.config.runtime_id.clone(),
            command,
            args: self.config.args.clone(),
            env: self.config.env.clone(),
            working_directory: self.config.working_directory.clone(),
            pipe_address: pipe_address.to_string(),
            capture_output: self.config.capture_output,
        };

        let handle = self
            .launcher
            .launch(&spec)
            .await
            .map_err(|e| BridgeError::process(format!("{e:#}")))?;

        info!(
            runtime = %self.config.runtime_id,
            pid = ?handle.pid(),
            "companion launched"
        );
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    /// Wait out the grace period for the companion to honor the poison
    /// message, then escalate to forced termination.
    pub async fn stop(&self, grace: Duration) {
        let mut slot = self.handle.lock().await;
        let Some(mut handle) = slot.take() else {
            return;
        };

        match self.launcher.stop(&mut handle, grace).await {
            TerminationOutcome::Success | TerminationOutcome::ProcessNotFound => {
                info!(runtime = %self.config.runtime_id, "companion stopped");
            }
            outcome => {
                warn!(runtime = %self.config.runtime_id, ?outcome, "companion termination incomplete");
            }
        }
    }

    /// Drop the tracked handle and force-terminate anything still alive.
    /// Used on the error path, where no grace is owed.
    pub async fn cleanup(&self) -> Result<(), BridgeError> {
        self.handle.lock().await.take();
        self.launcher.cleanup().await.catch()
    }

    pub async fn is_running(&self) -> bool {
        let slot = self.handle.lock().await;
        match slot.as_ref() {
            Some(handle) => handle.is_running().await,
            None => false,
        }
    }
}
