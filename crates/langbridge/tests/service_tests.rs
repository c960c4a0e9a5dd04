//! End-to-end tests for the bridge service against an in-process companion
//! speaking the envelope codec over the platform pipe.

#![cfg(unix)]

use langbridge::{
    BridgeConfig, BridgeError, BridgeService, ConnectionState, Envelope, FrameKind, LaunchMode,
    MessageHandler, PipeChannel, StateChangeHandler, TimeoutConfig,
};
use langbridge_core::transport::PipeEndpoint;
use langbridge_unix::UnixPipeEndpoint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

static PIPE_SEQ: AtomicU32 = AtomicU32::new(0);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("langbridge=debug")
        .with_test_writer()
        .try_init();
}

fn unique_pipe_name(tag: &str) -> String {
    format!(
        "langbridge-test-{tag}-{}-{}",
        std::process::id(),
        PIPE_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn attach_config(pipe_name: &str, timeouts: TimeoutConfig) -> BridgeConfig {
    BridgeConfig::builder()
        .runtime_id("PY")
        .launch_mode(LaunchMode::Attach)
        .pipe_name(pipe_name)
        .timeouts(timeouts)
        .build()
        .unwrap()
}

fn quick_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        connect_timeout_ms: 1_000,
        send_timeout_ms: 500,
        stop_timeout_ms: 3_000,
        exit_grace_ms: 200,
    }
}

#[derive(Clone, Copy)]
struct CompanionBehavior {
    ack_handshake: bool,
    echo_data: bool,
}

impl CompanionBehavior {
    fn cooperative() -> Self {
        Self {
            ack_handshake: true,
            echo_data: true,
        }
    }

    fn silent() -> Self {
        Self {
            ack_handshake: false,
            echo_data: false,
        }
    }
}

/// Publish the pipe and run a companion loop on it, reporting every frame it
/// observes. Must be called before the service starts connecting.
async fn spawn_companion(
    pipe_name: &str,
    behavior: CompanionBehavior,
) -> mpsc::UnboundedReceiver<FrameKind> {
    let endpoint = UnixPipeEndpoint::new();
    let acceptor = endpoint.publish(pipe_name).await.unwrap();
    let (seen, observed) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok(pipe) = acceptor.accept(Duration::from_secs(5)).await else {
            return;
        };
        let channel = PipeChannel::new(pipe);
        loop {
            match channel.recv(Duration::from_secs(5)).await {
                Ok(Some(envelope)) => {
                    let _ = seen.send(envelope.kind);
                    match envelope.kind {
                        FrameKind::Hello if behavior.ack_handshake => {
                            let _ = channel
                                .send(&Envelope::hello_ack("PY"), Duration::from_secs(1))
                                .await;
                        }
                        FrameKind::Data if behavior.echo_data => {
                            let _ = channel.send(&envelope, Duration::from_secs(1)).await;
                        }
                        FrameKind::Poison => break,
                        _ => {}
                    }
                }
                Ok(None) => continue,
                Err(_) => break,
            }
        }
    });

    observed
}

async fn wait_for_state(
    service: &Arc<BridgeService>,
    target: ConnectionState,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if service.state() == target {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    service.state() == target
}

async fn wait_for_frame(
    observed: &mut mpsc::UnboundedReceiver<FrameKind>,
    target: FrameKind,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match tokio::time::timeout(remaining, observed.recv()).await {
            Ok(Some(kind)) if kind == target => return true,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return false,
        }
    }
}

#[derive(Default)]
struct RecordingStateHandler {
    transitions: Mutex<Vec<(ConnectionState, ConnectionState)>>,
}

impl StateChangeHandler for RecordingStateHandler {
    fn on_state_change(&self, previous: ConnectionState, next: ConnectionState) {
        self.transitions.lock().unwrap().push((previous, next));
    }
}

#[derive(Default)]
struct RecordingMessageHandler {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl MessageHandler for RecordingMessageHandler {
    fn on_message(&self, envelope: Envelope) {
        self.payloads.lock().unwrap().push(envelope.payload);
    }
}

#[tokio::test]
async fn reaches_running_against_a_responsive_companion() {
    init_tracing();
    let pipe_name = unique_pipe_name("running");
    let _observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let service = BridgeService::create(attach_config(&pipe_name, quick_timeouts())).unwrap();
    service.start().unwrap();
    assert!(matches!(
        service.state(),
        ConnectionState::Starting | ConnectionState::Running
    ));

    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn data_envelopes_round_trip_through_the_message_callback() {
    init_tracing();
    let pipe_name = unique_pipe_name("echo");
    let _observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let service = BridgeService::create(attach_config(&pipe_name, quick_timeouts())).unwrap();
    let messages = Arc::new(RecordingMessageHandler::default());
    let as_handler: Arc<dyn MessageHandler> = messages.clone();
    service.set_message_handler(Some(&as_handler));

    service.start().unwrap();
    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);

    service.send(Envelope::data(b"ping".to_vec())).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if !messages.payloads.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(messages.payloads.lock().unwrap().as_slice(), &[b"ping".to_vec()]);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn errors_when_the_companion_never_acknowledges() {
    init_tracing();
    let pipe_name = unique_pipe_name("silent");
    let _observed = spawn_companion(&pipe_name, CompanionBehavior::silent()).await;

    let timeouts = TimeoutConfig {
        connect_timeout_ms: 300,
        ..quick_timeouts()
    };
    let service = BridgeService::create(attach_config(&pipe_name, timeouts)).unwrap();
    service.start().unwrap();

    assert!(wait_for_state(&service, ConnectionState::Errored, Duration::from_secs(3)).await);

    // Errored is terminal: no send ever succeeds again.
    let result = service.send(Envelope::data(b"late".to_vec())).await;
    assert!(matches!(
        result,
        Err(BridgeError::InvalidState {
            op: "send",
            state: ConnectionState::Errored,
        })
    ));
}

#[tokio::test]
async fn an_idle_channel_gets_a_heartbeat() {
    init_tracing();
    let pipe_name = unique_pipe_name("heartbeat");
    let mut observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let timeouts = TimeoutConfig {
        send_timeout_ms: 150,
        ..quick_timeouts()
    };
    let service = BridgeService::create(attach_config(&pipe_name, timeouts)).unwrap();
    service.start().unwrap();
    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);

    // No application traffic: the runner must keep the channel alive itself.
    assert!(wait_for_frame(&mut observed, FrameKind::Heartbeat, Duration::from_secs(2)).await);
    assert_eq!(service.state(), ConnectionState::Running);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn stop_poisons_the_companion_and_walks_the_full_sequence() {
    init_tracing();
    let pipe_name = unique_pipe_name("poison");
    let mut observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let service = BridgeService::create(attach_config(&pipe_name, quick_timeouts())).unwrap();
    let states = Arc::new(RecordingStateHandler::default());
    let as_handler: Arc<dyn StateChangeHandler> = states.clone();
    service.set_state_handler(Some(&as_handler));

    service.start().unwrap();
    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);

    service.stop().await.unwrap();
    assert_eq!(service.state(), ConnectionState::Stopped);

    assert!(wait_for_frame(&mut observed, FrameKind::Poison, Duration::from_secs(2)).await);

    use ConnectionState::*;
    assert_eq!(
        states.transitions.lock().unwrap().as_slice(),
        &[
            (Stopped, Starting),
            (Starting, Running),
            (Running, Stopping),
            (Stopping, Poisoned),
            (Poisoned, Stopped),
        ]
    );

    // Stopped is terminal for sends.
    let result = service.send(Envelope::data(b"late".to_vec())).await;
    assert!(matches!(
        result,
        Err(BridgeError::InvalidState {
            op: "send",
            state: ConnectionState::Stopped,
        })
    ));
}

#[tokio::test]
async fn concurrent_stops_converge_on_one_shutdown() {
    init_tracing();
    let pipe_name = unique_pipe_name("double-stop");
    let _observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let service = BridgeService::create(attach_config(&pipe_name, quick_timeouts())).unwrap();
    let states = Arc::new(RecordingStateHandler::default());
    let as_handler: Arc<dyn StateChangeHandler> = states.clone();
    service.set_state_handler(Some(&as_handler));

    service.start().unwrap();
    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.stop().await })
    };
    let second = {
        let service = service.clone();
        tokio::spawn(async move { service.stop().await })
    };

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(service.state(), ConnectionState::Stopped);

    let transitions = states.transitions.lock().unwrap();
    let stops = transitions
        .iter()
        .filter(|(_, next)| *next == ConnectionState::Stopping)
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn repeated_stop_after_completion_is_a_no_op() {
    init_tracing();
    let pipe_name = unique_pipe_name("restop");
    let _observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let service = BridgeService::create(attach_config(&pipe_name, quick_timeouts())).unwrap();
    service.start().unwrap();
    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);

    service.stop().await.unwrap();
    service.stop().await.unwrap();
    assert_eq!(service.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn start_is_one_shot() {
    init_tracing();
    let pipe_name = unique_pipe_name("one-shot");
    let _observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let service = BridgeService::create(attach_config(&pipe_name, quick_timeouts())).unwrap();
    service.start().unwrap();
    assert!(matches!(
        service.start(),
        Err(BridgeError::InvalidState { op: "start", .. })
    ));

    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn spawn_mode_launch_failure_ends_in_errored() {
    init_tracing();
    let pipe_name = unique_pipe_name("bad-spawn");

    let config = BridgeConfig::builder()
        .runtime_id("PY")
        .pipe_name(pipe_name)
        .command("/nonexistent/langbridge-companion-host")
        .timeouts(quick_timeouts())
        .build()
        .unwrap();
    let service = BridgeService::create(config).unwrap();
    service.start().unwrap();

    assert!(wait_for_state(&service, ConnectionState::Errored, Duration::from_secs(3)).await);
}

#[tokio::test]
async fn last_release_destroys_the_service_even_with_a_runner_clone() {
    init_tracing();
    let pipe_name = unique_pipe_name("release");
    let _observed = spawn_companion(&pipe_name, CompanionBehavior::cooperative()).await;

    let service = BridgeService::create(attach_config(&pipe_name, quick_timeouts())).unwrap();
    let weak = Arc::downgrade(&service);

    service.start().unwrap();
    assert!(wait_for_state(&service, ConnectionState::Running, Duration::from_secs(2)).await);

    // The runner holds its own clone while executing.
    assert!(weak.upgrade().is_some());

    service.stop().await.unwrap();
    drop(service);
    assert!(weak.upgrade().is_none());
}
