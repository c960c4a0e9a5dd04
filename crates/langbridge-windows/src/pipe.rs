#[cfg(windows)]
mod windows_impl {
    use async_trait::async_trait;
    use backon::{ExponentialBuilder, Retryable};
    use langbridge_core::error::BridgeError;
    use langbridge_core::transport::{PipeAcceptor, PipeEndpoint, PipeStream};
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
    use tracing::{debug, info};

    /// All pipe instances are busy; retry shortly.
    const ERROR_PIPE_BUSY: i32 = 231;

    pub struct WindowsPipeEndpoint;

    impl WindowsPipeEndpoint {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for WindowsPipeEndpoint {
        fn default() -> Self {
            Self::new()
        }
    }

    fn pipe_address(name: &str) -> String {
        format!(r"\\.\pipe\{name}")
    }

    pub struct WindowsPipeAcceptor {
        server: NamedPipeServer,
        address: String,
    }

    #[async_trait]
    impl PipeAcceptor for WindowsPipeAcceptor {
        fn address(&self) -> &str {
            &self.address
        }

        async fn accept(self: Box<Self>, timeout: Duration) -> Result<PipeStream, BridgeError> {
            tokio::time::timeout(timeout, self.server.connect())
                .await
                .map_err(|_| {
                    BridgeError::endpoint(format!(
                        "companion did not attach to {} within {timeout:?}",
                        self.address
                    ))
                })??;

            info!(address = %self.address, "companion attached to pipe");
            Ok(PipeStream::from_io(self.server))
        }
    }

    #[async_trait]
    impl PipeEndpoint for WindowsPipeEndpoint {
        async fn publish(&self, name: &str) -> Result<Box<dyn PipeAcceptor>, BridgeError> {
            let address = pipe_address(name);
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&address)?;
            debug!(address = %address, "pipe published");

            Ok(Box::new(WindowsPipeAcceptor { server, address }))
        }

        async fn connect(&self, name: &str, timeout: Duration) -> Result<PipeStream, BridgeError> {
            let address = pipe_address(name);

            let open = || async {
                ClientOptions::new()
                    .open(&address)
                    .map_err(BridgeError::from)
            };
            let client = tokio::time::timeout(
                timeout,
                open.retry(
                    ExponentialBuilder::new()
                        .with_min_delay(Duration::from_millis(25))
                        .with_max_delay(Duration::from_millis(500))
                        .with_max_times(usize::MAX),
                )
                .when(|error: &BridgeError| match error {
                    // Not created yet, or all instances busy: keep polling.
                    BridgeError::Io(io) => {
                        io.kind() == std::io::ErrorKind::NotFound
                            || io.raw_os_error() == Some(ERROR_PIPE_BUSY)
                    }
                    _ => false,
                }),
            )
            .await
            .map_err(|_| {
                BridgeError::endpoint(format!("no pipe at {address} within {timeout:?}"))
            })??;

            info!(address = %address, "attached to published pipe");
            Ok(PipeStream::from_io(client))
        }
    }
}

#[cfg(windows)]
pub use windows_impl::{WindowsPipeAcceptor, WindowsPipeEndpoint};

// Inert stub so dependents compile on non-Windows hosts.
#[cfg(not(windows))]
pub struct WindowsPipeEndpoint;

#[cfg(not(windows))]
impl WindowsPipeEndpoint {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(windows))]
impl Default for WindowsPipeEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
