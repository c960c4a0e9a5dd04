use crate::process_manager::WindowsProcessManager;
use anyhow::{Context, Result};
use async_trait::async_trait;
use langbridge_core::process::{
    CompanionLauncher, LaunchSpec, ProcessHandle, ProcessId, ProcessLifecycle, ProcessTermination,
    TerminationOutcome,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Windows companion launcher.
///
/// Composes the low-level process manager for the actual operations and
/// tracks the live companion pid for cleanup.
pub struct WindowsCompanionManager {
    platform_manager: Arc<WindowsProcessManager>,
    active_pid: Arc<Mutex<Option<ProcessId>>>,
}

impl WindowsCompanionManager {
    pub fn new() -> Self {
        Self {
            platform_manager: Arc::new(WindowsProcessManager::new()),
            active_pid: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for WindowsCompanionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompanionLauncher for WindowsCompanionManager {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let handle = self
            .platform_manager
            .spawn_process(spec)
            .await
            .with_context(|| {
                format!("Failed to launch companion with command: {}", spec.command)
            })?;

        *self.active_pid.lock().unwrap() = handle.pid();
        Ok(handle)
    }

    async fn stop(
        &self,
        handle: &mut Box<dyn ProcessHandle>,
        grace: Duration,
    ) -> TerminationOutcome {
        let outcome = match self
            .platform_manager
            .wait_for_exit(handle.as_mut(), Some(grace))
            .await
        {
            Ok(status) => {
                info!(?status, "companion exited within the grace period");
                TerminationOutcome::Success
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "companion did not exit in time, escalating");
                self.platform_manager
                    .terminate_completely(handle.as_mut())
                    .await
            }
        };

        *self.active_pid.lock().unwrap() = None;
        outcome
    }

    async fn cleanup(&self) -> Result<()> {
        let pid = self.active_pid.lock().unwrap().take();
        if let Some(pid) = pid {
            match self.platform_manager.terminate_process_tree(pid).await {
                TerminationOutcome::Success | TerminationOutcome::ProcessNotFound => {
                    info!(pid, "companion process tree terminated");
                }
                outcome => {
                    warn!(pid, ?outcome, "failed to terminate companion process tree");
                }
            }
        }
        Ok(())
    }
}
