use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Unique identifier for a process
pub type ProcessId = u32;

/// Status of a supervised process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Terminated,
    /// Process status is unknown
    Unknown,
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationOutcome {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// Everything the platform needs to launch one companion runtime process.
///
/// Built by the supervisor from the bridge configuration plus the pipe
/// address the companion must attach to.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub runtime_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_directory: Option<PathBuf>,
    /// Pipe address handed to the companion (argv tail and environment).
    pub pipe_address: String,
    /// Pipe the companion's stdout/stderr into tracing.
    pub capture_output: bool,
}

/// Trait representing a handle to a running companion process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if the process has exited)
    fn pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn command(&self) -> &str;

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Try to get the exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process (platform-specific implementation)
    async fn kill(&mut self) -> Result<()>;
}

/// Low-level process lifecycle operations
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Spawn the companion process described by `spec`
    async fn spawn_process(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>>;

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus>;
}

/// Process termination including process groups and trees
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Terminate a single process gracefully (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationOutcome;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationOutcome;

    /// Find all child processes of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Terminate an entire process tree (parent and all descendants)
    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationOutcome;

    /// Terminate a process group (Unix only; `ProcessNotFound` elsewhere)
    async fn terminate_process_group(&self, pid: ProcessId) -> TerminationOutcome;

    /// Complete termination strategy: process group, then process tree, then
    /// the individual process with graceful-to-forced escalation.
    async fn terminate_completely(&self, handle: &mut dyn ProcessHandle) -> TerminationOutcome {
        if let Some(pid) = handle.pid() {
            match self.terminate_process_group(pid).await {
                TerminationOutcome::Success => return TerminationOutcome::Success,
                _ => {
                    // Fall through to process tree termination
                }
            }

            match self.terminate_process_tree(pid).await {
                TerminationOutcome::Success => return TerminationOutcome::Success,
                _ => {
                    // Fall through to individual termination
                }
            }
        }

        match self.terminate_gracefully(handle).await {
            TerminationOutcome::Success => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                if handle.is_running().await {
                    self.force_kill(handle).await
                } else {
                    TerminationOutcome::Success
                }
            }
            TerminationOutcome::ProcessNotFound => TerminationOutcome::Success,
            _ => self.force_kill(handle).await,
        }
    }
}

/// High-level launcher the supervisor talks to.
///
/// Platform crates implement this by composing their low-level
/// `ProcessLifecycle`/`ProcessTermination` manager, tracking the live
/// companion for emergency cleanup.
#[async_trait]
pub trait CompanionLauncher: Send + Sync {
    /// Launch the companion runtime described by `spec`
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>>;

    /// Wait out the grace period, then escalate to complete termination if
    /// the companion is still alive. Used after the poison protocol has run.
    async fn stop(
        &self,
        handle: &mut Box<dyn ProcessHandle>,
        grace: Duration,
    ) -> TerminationOutcome;

    /// Terminate anything still tracked and release resources
    async fn cleanup(&self) -> Result<()>;
}
