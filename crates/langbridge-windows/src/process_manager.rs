use anyhow::Result;
use async_trait::async_trait;
use langbridge_core::output::forward_lines;
use langbridge_core::process::{
    LaunchSpec, ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus, ProcessTermination,
    TerminationOutcome,
};
use std::time::Duration;
use sysinfo::System;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Windows-specific handle to a launched companion process
pub struct WindowsProcessHandle {
    child: Child,
    command: String,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: String) -> Self {
        Self { child, command }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn is_running(&self) -> bool {
        let Some(pid) = self.pid() else {
            return false;
        };
        let mut system = System::new();
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::default(),
        );
        system.processes().keys().any(|p| p.as_u32() == pid)
    }

    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
        match self.child.try_wait()? {
            Some(status) => Ok(Some(ProcessStatus::Exited(status))),
            None => Ok(None),
        }
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        let status = self.child.wait().await?;
        Ok(ProcessStatus::Exited(status))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
    }
}

/// Windows process manager with process-tree termination
pub struct WindowsProcessManager {
    system: std::sync::Mutex<System>,
}

impl WindowsProcessManager {
    pub fn new() -> Self {
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }

    /// Terminate one process by PID via taskkill, escalating to /F
    async fn terminate_single_process(&self, pid: ProcessId) -> TerminationOutcome {
        let graceful = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()
            .await;

        if matches!(&graceful, Ok(out) if out.status.success()) {
            return TerminationOutcome::Success;
        }

        match Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output()
            .await
        {
            Ok(out) if out.status.success() => TerminationOutcome::Success,
            Ok(out) => TerminationOutcome::Failed(format!(
                "taskkill /F exited with {}",
                out.status
            )),
            Err(e) => TerminationOutcome::Failed(format!("taskkill failed: {e}")),
        }
    }

    /// Recursively collect descendants, deepest first
    fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
        for (pid, process) in system.processes() {
            if let Some(ppid) = process.parent()
                && ppid.as_u32() == parent_pid
            {
                let child_pid = pid.as_u32();
                Self::find_children_recursive(system, child_pid, result);
                result.push(child_pid);
            }
        }
    }
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    async fn spawn_process(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);
        cmd.arg(&spec.pipe_address);
        cmd.env("LANGBRIDGE_PIPE", &spec.pipe_address);
        cmd.env("LANGBRIDGE_RUNTIME", &spec.runtime_id);

        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        if spec.capture_output {
            cmd.stdout(std::process::Stdio::piped());
            cmd.stderr(std::process::Stdio::piped());
        }

        let mut child = cmd.spawn()?;

        if spec.capture_output {
            if let Some(stdout) = child.stdout.take() {
                forward_lines(stdout, &spec.runtime_id, "stdout");
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(stderr, &spec.runtime_id, "stderr");
            }
        }

        if let Some(pid) = child.id() {
            info!(command = %spec.command, pid, runtime = %spec.runtime_id, "companion process spawned");
        }

        Ok(Box::new(WindowsProcessHandle::new(
            child,
            spec.command.clone(),
        )))
    }

    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus> {
        match timeout {
            Some(duration) => tokio::time::timeout(duration, handle.wait())
                .await
                .map_err(|_| anyhow::anyhow!("Timeout waiting for process exit"))?,
            None => handle.wait().await,
        }
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationOutcome {
        let Some(pid) = handle.pid() else {
            return TerminationOutcome::ProcessNotFound;
        };
        match Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .output()
            .await
        {
            Ok(out) if out.status.success() => {
                info!(pid, "requested companion termination");
                TerminationOutcome::Success
            }
            Ok(out) => TerminationOutcome::Failed(format!("taskkill exited with {}", out.status)),
            Err(e) => TerminationOutcome::Failed(format!("taskkill failed: {e}")),
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationOutcome {
        let Some(pid) = handle.pid() else {
            return TerminationOutcome::ProcessNotFound;
        };
        match handle.kill().await {
            Ok(()) => {
                info!(pid, "companion force killed");
                TerminationOutcome::Success
            }
            Err(e) => TerminationOutcome::Failed(format!("kill failed: {e}")),
        }
    }

    async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
        let mut system = self.system.lock().unwrap();
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::default(),
        );

        let mut children = Vec::new();
        Self::find_children_recursive(&system, parent_pid, &mut children);
        Ok(children)
    }

    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationOutcome {
        let children = match self.find_child_processes(root_pid).await {
            Ok(children) => children,
            Err(e) => {
                return TerminationOutcome::Failed(format!("Failed to enumerate children: {e}"));
            }
        };

        // Children first so the root cannot respawn them mid-teardown.
        for child_pid in children.iter().rev() {
            match self.terminate_single_process(*child_pid).await {
                TerminationOutcome::Success | TerminationOutcome::ProcessNotFound => {}
                outcome => {
                    warn!(pid = *child_pid, ?outcome, "failed to terminate child process");
                }
            }
        }

        self.terminate_single_process(root_pid).await
    }

    async fn terminate_process_group(&self, _pid: ProcessId) -> TerminationOutcome {
        // No process groups on Windows; the tree walk covers descendants.
        TerminationOutcome::ProcessNotFound
    }
}
