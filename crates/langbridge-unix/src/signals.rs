#[cfg(unix)]
mod unix_impl {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
    use std::sync::Once;
    use tracing::debug;

    static INSTALL: Once = Once::new();

    /// Process-wide, one-shot signal setup for pipe transports.
    ///
    /// A peer closing its end of the pipe raises SIGPIPE on the next write;
    /// the default disposition kills the process. Ignoring it turns the
    /// condition into an ordinary EPIPE write error, which the transport
    /// layer already handles. Idempotent; later calls are no-ops.
    pub fn install() {
        INSTALL.call_once(|| {
            let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
            // Safety: installing SIG_IGN for SIGPIPE does not interact with
            // any signal handler state the runtime relies on.
            match unsafe { sigaction(Signal::SIGPIPE, &ignore) } {
                Ok(_) => debug!("SIGPIPE suppressed for pipe transport"),
                Err(error) => debug!(%error, "failed to suppress SIGPIPE"),
            }
        });
    }

}

#[cfg(unix)]
pub use unix_impl::install;

#[cfg(not(unix))]
pub fn install() {}
