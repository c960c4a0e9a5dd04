//! The loop executed by the service's background runner task: connect,
//! handshake, receive/dispatch/heartbeat, poison-and-drain on shutdown.
//!
//! The runner is the sole authority for transitions into `Errored`,
//! `Poisoned`, and `Stopped`, so no two tasks ever race to finalize the
//! state machine.

use crate::channel::PipeChannel;
use crate::service::BridgeService;
use async_trait::async_trait;
use langbridge_core::config::LaunchMode;
use langbridge_core::envelope::{Envelope, FrameKind};
use langbridge_core::error::BridgeError;
use langbridge_core::state::ConnectionState;
use langbridge_core::task::Runnable;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum LoopExit {
    /// Orderly shutdown: stop requested locally or by the companion.
    Stop,
    /// Transport failure; the connection attempt is over.
    Error,
}

#[async_trait]
impl Runnable for BridgeService {
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let channel = match self.establish(&shutdown).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                // Stop was requested before the connection came up.
                self.finish_stopped(None).await;
                return;
            }
            Err(error) => {
                warn!(runtime = %self.config.runtime_id, %error, "connection failed");
                self.fail().await;
                return;
            }
        };

        match self.receive_loop(&channel, &shutdown).await {
            LoopExit::Stop => self.finish_stopped(Some(channel)).await,
            LoopExit::Error => self.fail().await,
        }
    }
}

impl BridgeService {
    /// Bring the pipe up and complete the handshake. `Ok(None)` means a stop
    /// request preempted the attempt.
    async fn establish(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Arc<PipeChannel>>, BridgeError> {
        let pipe_name = self.config.pipe_name();
        let window = self.connect_window();

        let pipe = match self.config.launch_mode {
            LaunchMode::Spawn => {
                // The transport must exist before the companion starts
                // looking for it.
                let acceptor = self.endpoint.publish(&pipe_name).await?;
                let supervisor = self.supervisor.as_ref().ok_or_else(|| {
                    BridgeError::Configuration("spawn mode without a supervisor".into())
                })?;
                supervisor.start(acceptor.address()).await?;

                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(None),
                    accepted = acceptor.accept(window) => accepted?,
                }
            }
            LaunchMode::Attach => {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(None),
                    connected = self.endpoint.connect(&pipe_name, window) => connected?,
                }
            }
        };

        let channel = Arc::new(PipeChannel::new(pipe));
        *self.channel.lock().expect("channel lock poisoned") = Some(channel.clone());

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            handshake = self.handshake(&channel) => handshake?,
        }
        self.first_connection_ok();

        if !self.set_state(ConnectionState::Running) {
            // A shutdown request won the race against the handshake.
            return Ok(None);
        }
        Ok(Some(channel))
    }

    /// Initial query/response exchange confirming the companion is ready,
    /// bounded by the first-connection window.
    async fn handshake(&self, channel: &PipeChannel) -> Result<(), BridgeError> {
        let window = self.connect_window();
        channel
            .send(&Envelope::hello(&self.config.runtime_id), window)
            .await
            .map_err(|e| BridgeError::Handshake(format!("hello send failed: {e}")))?;

        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BridgeError::Handshake(
                    "no acknowledgement within the first-connection window".into(),
                ));
            }
            match channel.recv(remaining).await? {
                Some(envelope) if envelope.kind == FrameKind::HelloAck => {
                    info!(runtime = %self.config.runtime_id, "handshake acknowledged");
                    return Ok(());
                }
                Some(envelope) => {
                    debug!(kind = ?envelope.kind, "frame ignored before handshake completion");
                }
                None => {
                    return Err(BridgeError::Handshake(
                        "no acknowledgement within the first-connection window".into(),
                    ));
                }
            }
        }
    }

    /// Steady-state cycle: receive with timeout, dispatch envelopes, emit
    /// heartbeats over idle periods.
    async fn receive_loop(
        &self,
        channel: &Arc<PipeChannel>,
        shutdown: &CancellationToken,
    ) -> LoopExit {
        loop {
            if shutdown.is_cancelled() || self.state() != ConnectionState::Running {
                return LoopExit::Stop;
            }

            let received = tokio::select! {
                _ = shutdown.cancelled() => return LoopExit::Stop,
                received = channel.recv(self.send_timeout) => received,
            };

            match received {
                Ok(Some(envelope)) => match envelope.kind {
                    FrameKind::Data => self.dispatch(envelope),
                    FrameKind::Poison => {
                        info!(runtime = %self.config.runtime_id, "companion requested shutdown");
                        self.set_state(ConnectionState::Stopping);
                        return LoopExit::Stop;
                    }
                    kind => {
                        debug!(?kind, "control frame absorbed");
                    }
                },
                Ok(None) => {
                    if channel.heartbeat_due(self.send_timeout) {
                        if let Err(error) =
                            channel.send(&Envelope::heartbeat(), self.send_timeout).await
                        {
                            warn!(runtime = %self.config.runtime_id, %error, "heartbeat failed");
                            return LoopExit::Error;
                        }
                        debug!(runtime = %self.config.runtime_id, "heartbeat sent");
                    }
                }
                Err(error) => {
                    warn!(runtime = %self.config.runtime_id, %error, "receive failed");
                    return LoopExit::Error;
                }
            }
        }
    }

    /// Orderly drain: tell the companion to exit, close the transport, walk
    /// the state machine to `Stopped`.
    async fn finish_stopped(&self, channel: Option<Arc<PipeChannel>>) {
        self.set_state(ConnectionState::Stopping);

        // A stop that preempted the handshake leaves the channel only in the
        // service slot.
        let channel =
            channel.or_else(|| self.channel.lock().expect("channel lock poisoned").take());

        if let Some(channel) = channel {
            if let Err(error) = channel.send(&Envelope::poison(), self.send_timeout).await {
                debug!(runtime = %self.config.runtime_id, %error, "poison send failed");
            }
            channel.close().await;
            self.set_state(ConnectionState::Poisoned);
        }
        self.clear_channel();

        if let Some(supervisor) = &self.supervisor {
            supervisor.stop(self.config.timeouts.exit_grace()).await;
        }

        self.set_state(ConnectionState::Stopped);
    }

    /// Terminal failure path. No poison and no grace period; close what is
    /// open and mark
    /// the attempt `Errored`.
    async fn fail(&self) {
        self.set_state(ConnectionState::Errored);

        let channel = self
            .channel
            .lock()
            .expect("channel lock poisoned")
            .take();
        if let Some(channel) = channel {
            channel.close().await;
        }

        if let Some(supervisor) = &self.supervisor {
            if let Err(error) = supervisor.cleanup().await {
                warn!(runtime = %self.config.runtime_id, %error, "companion cleanup failed");
            }
        }
    }
}
