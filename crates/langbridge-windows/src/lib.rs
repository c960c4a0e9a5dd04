//! Windows platform support for langbridge: the named pipe endpoint and the
//! companion process managers.

pub mod companion;
pub mod pipe;
pub mod process_manager;

pub use companion::WindowsCompanionManager;
pub use pipe::WindowsPipeEndpoint;
pub use process_manager::{WindowsProcessHandle, WindowsProcessManager};
