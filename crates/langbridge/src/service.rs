use crate::channel::PipeChannel;
use crate::factory;
use crate::supervisor::CompanionSupervisor;
use langbridge_core::callback::{CallbackSlot, MessageHandler, StateChangeHandler};
use langbridge_core::config::{BridgeConfig, LaunchMode};
use langbridge_core::envelope::Envelope;
use langbridge_core::error::BridgeError;
use langbridge_core::state::ConnectionState;
use langbridge_core::task::TaskHandle;
use langbridge_core::transport::PipeEndpoint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{debug, info};

/// The client connection service: one supervised companion runtime, one pipe
/// channel, one background runner task.
///
/// The service is shared between the embedding application and its own runner
/// task through `Arc`: the runner clones the handle for its whole run, so
/// the service cannot be destroyed while the runner is still executing; the
/// last clone dropped destroys it.
///
/// Lock domains, kept deliberately separate: the state lock (transition
/// ordering), the stop lock (serializing concurrent `stop` calls), each
/// callback slot's lock, and the channel's write gate. None of them is ever
/// held while another is acquired on the same call path, except that a state
/// transition invokes the state callback after releasing the state lock.
pub struct BridgeService {
    pub(crate) config: BridgeConfig,
    pub(crate) send_timeout: Duration,
    state: StdMutex<ConnectionState>,
    started: AtomicBool,
    stop_lock: tokio::sync::Mutex<()>,
    state_handler: CallbackSlot<dyn StateChangeHandler>,
    message_handler: CallbackSlot<dyn MessageHandler>,
    runner: StdMutex<Option<Arc<TaskHandle>>>,
    pub(crate) channel: StdMutex<Option<Arc<PipeChannel>>>,
    pub(crate) supervisor: Option<CompanionSupervisor>,
    pub(crate) endpoint: Box<dyn PipeEndpoint>,
    /// One-shot window for the initial pipe attach + handshake. Consumed on
    /// handshake success and never re-armed: a failed connection attempt is
    /// terminal, a new session means a new service.
    first_connect: StdMutex<Option<Duration>>,
}

impl BridgeService {
    /// Build a service for the given runtime session. No transport or
    /// process activity happens until [`BridgeService::start`].
    pub fn create(config: BridgeConfig) -> Result<Arc<Self>, BridgeError> {
        config
            .validate()
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;

        #[cfg(unix)]
        langbridge_unix::signals::install();

        let supervisor = match config.launch_mode {
            LaunchMode::Spawn => Some(CompanionSupervisor::new(
                &config,
                factory::platform_launcher(),
            )),
            LaunchMode::Attach => None,
        };

        Ok(Arc::new(Self {
            send_timeout: config.timeouts.send_timeout(),
            first_connect: StdMutex::new(Some(config.timeouts.connect_timeout())),
            state: StdMutex::new(ConnectionState::Stopped),
            started: AtomicBool::new(false),
            stop_lock: tokio::sync::Mutex::new(()),
            state_handler: CallbackSlot::new(),
            message_handler: CallbackSlot::new(),
            runner: StdMutex::new(None),
            channel: StdMutex::new(None),
            supervisor,
            endpoint: factory::platform_endpoint(),
            config,
        }))
    }

    /// Launch the runner task and begin connecting. One-shot: a service that
    /// has started once rejects further starts, even one that has since
    /// stopped or errored.
    pub fn start(self: &Arc<Self>) -> Result<(), BridgeError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BridgeError::Configuration(
                "start requires a running tokio runtime".into(),
            ));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::InvalidState {
                op: "start",
                state: self.state(),
            });
        }
        self.set_state(ConnectionState::Starting);

        let handle = TaskHandle::spawn(self.clone());
        info!(
            runtime = %self.config.runtime_id,
            task_id = handle.id(),
            "runner task launched"
        );
        *self.runner.lock().expect("runner lock poisoned") = Some(Arc::new(handle));
        Ok(())
    }

    /// Request shutdown and wait for the runner to acknowledge.
    ///
    /// Idempotent: concurrent and repeated calls serialize on the stop lock
    /// and converge on a single shutdown sequence. Returns once a terminal
    /// state is observed, or `StopTimeout` when the bounded wait elapses.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        let _guard = self.stop_lock.lock().await;

        if self.state().is_terminal() {
            return Ok(());
        }

        self.set_state(ConnectionState::Stopping);

        let runner = self.runner.lock().expect("runner lock poisoned").clone();
        let Some(runner) = runner else {
            return Ok(());
        };
        runner.interrupt();

        if runner
            .wait_terminated(self.config.timeouts.stop_timeout())
            .await
        {
            debug!(runtime = %self.config.runtime_id, "runner acknowledged stop");
            Ok(())
        } else {
            Err(BridgeError::StopTimeout)
        }
    }

    /// Send one envelope to the companion. Permitted only while `Running`;
    /// an ineligible state is reported without side effects, distinct from a
    /// transport failure.
    pub async fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        let state = self.state();
        if !state.allows_send() {
            return Err(BridgeError::InvalidState { op: "send", state });
        }
        let channel = self
            .channel
            .lock()
            .expect("channel lock poisoned")
            .clone()
            .ok_or(BridgeError::ChannelClosed)?;
        channel.send(&envelope, self.send_timeout).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn runtime_id(&self) -> &str {
        &self.config.runtime_id
    }

    /// Swap the state-change callback; `None` detaches. Safe to call
    /// concurrently with dispatch.
    pub fn set_state_handler(&self, handler: Option<&Arc<dyn StateChangeHandler>>) {
        self.state_handler.set(handler);
    }

    /// Swap the message callback; `None` detaches. Safe to call concurrently
    /// with dispatch.
    pub fn set_message_handler(&self, handler: Option<&Arc<dyn MessageHandler>>) {
        self.message_handler.set(handler);
    }

    /// Apply a transition if it is legal, then notify the state callback.
    ///
    /// The transition itself happens under the state lock; the callback runs
    /// after release, against the handler captured at that moment. Returns
    /// whether the transition was applied; a rejected edge (for example
    /// `Running` after a concurrently requested shutdown) leaves the state
    /// untouched.
    pub(crate) fn set_state(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = self.state.lock().expect("state lock poisoned");
            if !state.can_transition_to(next) {
                debug!(from = %*state, to = %next, "state transition rejected");
                return false;
            }
            std::mem::replace(&mut *state, next)
        };

        info!(runtime = %self.config.runtime_id, from = %previous, to = %next, "state changed");
        if let Some(handler) = self.state_handler.get() {
            handler.on_state_change(previous, next);
        }
        true
    }

    pub(crate) fn dispatch(&self, envelope: Envelope) {
        if let Some(handler) = self.message_handler.get() {
            handler.on_message(envelope);
        } else {
            debug!(runtime = %self.config.runtime_id, "message dropped: no handler attached");
        }
    }

    /// Whether the initial handshake has not completed yet.
    pub(crate) fn is_first_connection(&self) -> bool {
        self.first_connect
            .lock()
            .expect("first-connect lock poisoned")
            .is_some()
    }

    /// Window for the next connection attempt: the one-shot first-connection
    /// timeout while armed, the steady-state send timeout afterwards.
    pub(crate) fn connect_window(&self) -> Duration {
        self.first_connect
            .lock()
            .expect("first-connect lock poisoned")
            .unwrap_or(self.send_timeout)
    }

    /// Consume the one-shot first-connection timeout.
    pub(crate) fn first_connection_ok(&self) {
        self.first_connect
            .lock()
            .expect("first-connect lock poisoned")
            .take();
    }

    pub(crate) fn clear_channel(&self) {
        self.channel
            .lock()
            .expect("channel lock poisoned")
            .take();
    }
}
