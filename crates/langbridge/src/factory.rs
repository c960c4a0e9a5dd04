//! Compile-time selection of the platform pipe endpoint and companion
//! launcher.

use langbridge_core::process::CompanionLauncher;
use langbridge_core::transport::PipeEndpoint;

pub(crate) fn platform_endpoint() -> Box<dyn PipeEndpoint> {
    #[cfg(unix)]
    return Box::new(langbridge_unix::UnixPipeEndpoint::new());

    #[cfg(windows)]
    return Box::new(langbridge_windows::WindowsPipeEndpoint::new());
}

pub(crate) fn platform_launcher() -> Box<dyn CompanionLauncher> {
    #[cfg(unix)]
    return Box::new(langbridge_unix::UnixCompanionManager::new());

    #[cfg(windows)]
    return Box::new(langbridge_windows::WindowsCompanionManager::new());
}

/// Platform name for logging and diagnostics.
pub fn platform_name() -> &'static str {
    #[cfg(unix)]
    return "unix";

    #[cfg(windows)]
    return "windows";
}
