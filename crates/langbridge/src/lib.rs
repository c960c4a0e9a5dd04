//! langbridge, the native half of a cross-runtime bridge.
//!
//! A [`BridgeService`] supervises a companion runtime process, connects a
//! bidirectional envelope channel to it over an OS pipe, and exposes a
//! thread-safe send/receive surface with lifecycle callbacks:
//!
//! ```rust,no_run
//! use langbridge::{BridgeConfig, BridgeService};
//!
//! # async fn example() -> Result<(), langbridge::BridgeError> {
//! let config = BridgeConfig::builder()
//!     .runtime_id("PY")
//!     .command("python3")
//!     .args(["-m", "bridge_host"])
//!     .build()
//!     .map_err(|e| langbridge::BridgeError::Configuration(e.to_string()))?;
//!
//! let service = BridgeService::create(config)?;
//! service.start()?;
//! // ... register handlers, send envelopes ...
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

mod catch;
mod channel;
mod factory;
mod runner;
mod service;
mod supervisor;

pub use catch::Catch;
pub use channel::PipeChannel;
pub use factory::platform_name;
pub use service::BridgeService;
pub use supervisor::CompanionSupervisor;

pub use langbridge_core::callback::{MessageHandler, StateChangeHandler};
pub use langbridge_core::config::{BridgeConfig, BridgeConfigBuilder, LaunchMode, TimeoutConfig};
pub use langbridge_core::envelope::{Directives, Envelope, EnvelopeCodec, FrameKind};
pub use langbridge_core::error::BridgeError;
pub use langbridge_core::state::ConnectionState;
