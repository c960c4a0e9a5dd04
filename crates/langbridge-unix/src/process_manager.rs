#[cfg(unix)]
mod unix_impl {
    use anyhow::Result;
    use async_trait::async_trait;
    use langbridge_core::output::forward_lines;
    use langbridge_core::process::{
        LaunchSpec, ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus, ProcessTermination,
        TerminationOutcome,
    };
    use std::time::Duration;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use sysinfo::System;
    use tokio::process::{Child, Command};
    use tracing::{info, warn};

    /// Unix-specific handle to a launched companion process
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String) -> Self {
            Self { child, command }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn pid(&self) -> Option<ProcessId> {
            self.child.id()
        }

        fn command(&self) -> &str {
            &self.command
        }

        async fn is_running(&self) -> bool {
            if let Some(pid) = self.pid() {
                // Signal 0 probes for existence without delivering anything.
                signal::kill(NixPid::from_raw(pid as i32), None).is_ok()
            } else {
                false
            }
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

    /// Unix process manager with process-group and process-tree termination
    pub struct UnixProcessManager {
        system: std::sync::Mutex<System>,
    }

    impl UnixProcessManager {
        pub fn new() -> Self {
            Self {
                system: std::sync::Mutex::new(System::new()),
            }
        }

        /// Terminate a single process by PID with SIGTERM→SIGKILL escalation
        async fn terminate_single_process(&self, pid: ProcessId) -> TerminationOutcome {
            let nix_pid = NixPid::from_raw(pid as i32);

            match signal::kill(nix_pid, Signal::SIGTERM) {
                Ok(()) => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    match signal::kill(nix_pid, Signal::SIGKILL) {
                        Ok(()) | Err(nix::errno::Errno::ESRCH) => TerminationOutcome::Success,
                        Err(e) => TerminationOutcome::Failed(format!("SIGKILL failed: {e}")),
                    }
                }
                Err(nix::errno::Errno::ESRCH) => TerminationOutcome::Success,
                Err(nix::errno::Errno::EPERM) => TerminationOutcome::AccessDenied,
                Err(e) => TerminationOutcome::Failed(format!("SIGTERM failed: {e}")),
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

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
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

            // Fresh process group so tree termination can address descendants.
            cmd.process_group(0);

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

            Ok(Box::new(UnixProcessHandle::new(
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
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationOutcome {
            let Some(pid) = handle.pid() else {
                return TerminationOutcome::ProcessNotFound;
            };
            let nix_pid = NixPid::from_raw(pid as i32);

            match signal::kill(nix_pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(pid, "sent SIGTERM to companion");
                    TerminationOutcome::Success
                }
                Err(nix::errno::Errno::ESRCH) => TerminationOutcome::ProcessNotFound,
                Err(nix::errno::Errno::EPERM) => {
                    warn!(pid, "permission denied sending SIGTERM");
                    TerminationOutcome::AccessDenied
                }
                Err(e) => TerminationOutcome::Failed(format!("SIGTERM failed: {e}")),
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationOutcome {
            let Some(pid) = handle.pid() else {
                return TerminationOutcome::ProcessNotFound;
            };
            let nix_pid = NixPid::from_raw(pid as i32);

            match signal::kill(nix_pid, Signal::SIGKILL) {
                Ok(()) => {
                    info!(pid, "sent SIGKILL to companion");
                    // Reap through the handle as well so no zombie lingers.
                    if let Err(e) = handle.kill().await {
                        warn!(pid, error = %e, "handle kill cleanup failed");
                    }
                    TerminationOutcome::Success
                }
                Err(nix::errno::Errno::ESRCH) => TerminationOutcome::ProcessNotFound,
                Err(nix::errno::Errno::EPERM) => TerminationOutcome::AccessDenied,
                Err(e) => TerminationOutcome::Failed(format!("SIGKILL failed: {e}")),
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
                    return TerminationOutcome::Failed(format!(
                        "Failed to enumerate children: {e}"
                    ));
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

        async fn terminate_process_group(&self, pid: ProcessId) -> TerminationOutcome {
            let pgid = NixPid::from_raw(pid as i32);

            match signal::killpg(pgid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(pid, "sent SIGTERM to companion process group");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    match signal::killpg(pgid, Signal::SIGKILL) {
                        Ok(()) | Err(nix::errno::Errno::ESRCH) => TerminationOutcome::Success,
                        Err(e) => TerminationOutcome::Failed(format!(
                            "SIGKILL to process group failed: {e}"
                        )),
                    }
                }
                Err(nix::errno::Errno::ESRCH) => TerminationOutcome::Success,
                Err(nix::errno::Errno::EPERM) => TerminationOutcome::AccessDenied,
                Err(e) => {
                    TerminationOutcome::Failed(format!("SIGTERM to process group failed: {e}"))
                }
            }
        }
    }

}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Stubs so dependents compile on non-Unix hosts.
#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
