//! langbridge core - platform-independent abstractions and configuration
//!
//! This crate provides the configuration, error, envelope, state, callback,
//! process-supervision, and task types shared by the platform crates and the
//! bridge facade.

pub mod callback;
pub mod config;
pub mod envelope;
pub mod error;
pub mod output;
pub mod process;
pub mod state;
pub mod task;
pub mod transport;

pub use callback::{CallbackSlot, MessageHandler, StateChangeHandler};
pub use config::{BridgeConfig, BridgeConfigBuilder, LaunchMode, TimeoutConfig};
pub use envelope::{Directives, Envelope, EnvelopeCodec, FrameKind, MAX_PAYLOAD_LEN};
pub use error::BridgeError;
pub use process::{
    CompanionLauncher, LaunchSpec, ProcessHandle, ProcessId, ProcessLifecycle, ProcessStatus,
    ProcessTermination, TerminationOutcome,
};
pub use state::ConnectionState;
pub use task::{Runnable, TaskHandle};
pub use transport::{PipeAcceptor, PipeEndpoint, PipeReader, PipeStream, PipeWriter};
