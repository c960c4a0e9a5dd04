use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Timeout knobs for a bridge connection.
///
/// `connect_timeout_ms` governs the first connection only: pipe attachment
/// and the initial handshake exchange. Once the handshake succeeds the
/// steady-state `send_timeout_ms` applies to every send and to the receive
/// poll interval (which doubles as the heartbeat period).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// First-connection window: pipe attach plus handshake (in milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Steady-state send timeout and receive poll interval (in milliseconds).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// How long `stop` waits for the runner to acknowledge termination.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Grace period for the companion to exit after the poison message,
    /// before termination is escalated.
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            exit_grace_ms: default_exit_grace_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("connect_timeout_ms must be non-zero"));
        }
        if self.send_timeout_ms == 0 {
            return Err(anyhow::anyhow!("send_timeout_ms must be non-zero"));
        }
        if self.stop_timeout_ms < self.send_timeout_ms {
            return Err(anyhow::anyhow!(
                "stop_timeout_ms must cover at least one send_timeout_ms so the \
                 runner can finish a blocked receive before the stop wait elapses"
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

/// Whether this service publishes the pipe and launches the companion, or
/// attaches to a transport something else already published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchMode {
    /// Publish the pipe, then spawn the companion and wait for it to attach.
    #[default]
    Spawn,
    /// Connect to a pipe the companion (or a test harness) already published.
    Attach,
}

/// Configuration for one bridge connection.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct BridgeConfig {
    /// Identifier of the companion runtime session, e.g. "PY" or "R".
    pub runtime_id: String,

    /// Pipe name; derived from the runtime id and process id when unset.
    #[builder(default)]
    pub pipe_name: Option<String>,

    /// Executable that hosts the companion runtime. Required in spawn mode.
    #[builder(default)]
    pub command: Option<String>,

    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,

    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,

    #[builder(default)]
    pub working_directory: Option<PathBuf>,

    #[builder(default)]
    pub launch_mode: LaunchMode,

    #[builder(default)]
    pub timeouts: TimeoutConfig,

    /// Forward the companion's stdout/stderr into tracing.
    #[builder(default = "true")]
    pub capture_output: bool,
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runtime_id.is_empty() {
            return Err(anyhow::anyhow!("runtime_id must not be empty"));
        }
        if self.launch_mode == LaunchMode::Spawn
            && self.command.as_deref().unwrap_or("").is_empty()
        {
            return Err(anyhow::anyhow!(
                "spawn mode requires a companion command"
            ));
        }
        self.timeouts.validate()
    }

    /// Pipe name for this connection, unique per process by default so two
    /// bridges to the same runtime never collide.
    pub fn pipe_name(&self) -> String {
        match &self.pipe_name {
            Some(name) => name.clone(),
            None => format!(
                "langbridge-{}-{}",
                self.runtime_id.to_lowercase(),
                std::process::id()
            ),
        }
    }
}

impl BridgeConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }
}

// Default value functions for serde
fn default_connect_timeout_ms() -> u64 {
    3_000
}
fn default_send_timeout_ms() -> u64 {
    3_000
}
fn default_stop_timeout_ms() -> u64 {
    10_000
}
fn default_exit_grace_ms() -> u64 {
    2_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_spawn_config_builds_and_validates() {
        let config = BridgeConfig::builder()
            .runtime_id("PY")
            .command("python3")
            .args(["-m", "bridge_host"])
            .env("PYTHONUNBUFFERED", "1")
            .build()
            .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.launch_mode, LaunchMode::Spawn);
        assert!(config.capture_output);
        assert!(config.pipe_name().starts_with("langbridge-py-"));
    }

    #[test]
    fn spawn_mode_requires_a_command() {
        let config = BridgeConfig::builder()
            .runtime_id("PY")
            .build()
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn attach_mode_needs_no_command() {
        let config = BridgeConfig::builder()
            .runtime_id("R")
            .launch_mode(LaunchMode::Attach)
            .pipe_name("bridge-under-test")
            .build()
            .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipe_name(), "bridge-under-test");
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let timeouts = TimeoutConfig {
            send_timeout_ms: 0,
            ..Default::default()
        };
        assert!(timeouts.validate().is_err());
    }

    #[test]
    fn stop_wait_must_cover_a_receive_poll() {
        let timeouts = TimeoutConfig {
            send_timeout_ms: 5_000,
            stop_timeout_ms: 1_000,
            ..Default::default()
        };
        assert!(timeouts.validate().is_err());
    }

    #[test]
    fn timeout_config_serializes_with_defaults() {
        let timeouts: TimeoutConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(timeouts, TimeoutConfig::default());

        let json = serde_json::to_string(&timeouts).unwrap();
        let back: TimeoutConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, timeouts);
    }
}
