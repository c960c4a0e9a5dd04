use serde::{Deserialize, Serialize};

/// Lifecycle state of a bridge connection.
///
/// The happy path runs `Stopped` (pre-start) → `Starting` → `Running` →
/// `Stopping` → `Poisoned` → `Stopped`. `Errored` is reached from any live
/// state on an unrecoverable transport or supervision failure. `Errored` and
/// a post-run `Stopped` are terminal for that connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Runner is connecting the pipe and performing the handshake.
    Starting,
    /// Channel is live; `send` and message dispatch are active.
    Running,
    /// Shutdown requested; the runner is unwinding.
    Stopping,
    /// The companion has been told to exit; no further sends are permitted.
    Poisoned,
    /// Unrecoverable transport, handshake, or supervision failure.
    Errored,
    /// Not started yet, or shutdown complete.
    Stopped,
}

impl ConnectionState {
    /// Whether this state ends the connection attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Errored | ConnectionState::Stopped)
    }

    /// Whether the application-level `send` surface is open.
    pub fn allows_send(self) -> bool {
        matches!(self, ConnectionState::Running)
    }

    /// Legal state-machine edges. Everything else is rejected so a late
    /// runner transition cannot overwrite a concurrently requested shutdown.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Stopped, Starting) => true,
            (Starting, Running) | (Starting, Stopping) | (Starting, Errored) => true,
            (Running, Stopping) | (Running, Errored) => true,
            (Stopping, Poisoned) | (Stopping, Stopped) | (Stopping, Errored) => true,
            (Poisoned, Stopped) | (Poisoned, Errored) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Starting => "starting",
            ConnectionState::Running => "running",
            ConnectionState::Stopping => "stopping",
            ConnectionState::Poisoned => "poisoned",
            ConnectionState::Errored => "errored",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
