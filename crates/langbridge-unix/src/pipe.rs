#[cfg(unix)]
mod unix_impl {
    use async_trait::async_trait;
    use backon::{ExponentialBuilder, Retryable};
    use langbridge_core::error::BridgeError;
    use langbridge_core::transport::{PipeAcceptor, PipeEndpoint, PipeStream};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::net::{UnixListener, UnixStream};
    use tracing::{debug, info};

    /// Named pipe rendition for Unix: a Unix domain socket in the system
    /// temporary directory, addressed by its filesystem path.
    pub struct UnixPipeEndpoint;

    impl UnixPipeEndpoint {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for UnixPipeEndpoint {
        fn default() -> Self {
            Self::new()
        }
    }

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}.sock"))
    }

    pub struct UnixPipeAcceptor {
        listener: UnixListener,
        path: PathBuf,
        address: String,
    }

    impl Drop for UnixPipeAcceptor {
        fn drop(&mut self) {
            // The rendezvous point has served its purpose; an accepted
            // connection stays alive without it.
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[async_trait]
    impl PipeAcceptor for UnixPipeAcceptor {
        fn address(&self) -> &str {
            &self.address
        }

        async fn accept(self: Box<Self>, timeout: Duration) -> Result<PipeStream, BridgeError> {
            let accepted = tokio::time::timeout(timeout, self.listener.accept())
                .await
                .map_err(|_| {
                    BridgeError::endpoint(format!(
                        "companion did not attach to {} within {timeout:?}",
                        self.address
                    ))
                })?;
            let (stream, _addr) = accepted?;

            info!(address = %self.address, "companion attached to pipe");
            Ok(PipeStream::from_io(stream))
        }
    }

    #[async_trait]
    impl PipeEndpoint for UnixPipeEndpoint {
        async fn publish(&self, name: &str) -> Result<Box<dyn PipeAcceptor>, BridgeError> {
            let path = socket_path(name);
            // A stale socket from a crashed predecessor would make bind fail.
            let _ = std::fs::remove_file(&path);

            let listener = UnixListener::bind(&path)?;
            let address = path.to_string_lossy().into_owned();
            debug!(address = %address, "pipe published");

            Ok(Box::new(UnixPipeAcceptor {
                listener,
                path,
                address,
            }))
        }

        async fn connect(&self, name: &str, timeout: Duration) -> Result<PipeStream, BridgeError> {
            let path = socket_path(name);
            let address = path.to_string_lossy().into_owned();

            let connect = || async {
                UnixStream::connect(&path)
                    .await
                    .map_err(BridgeError::from)
            };
            let stream = tokio::time::timeout(
                timeout,
                connect.retry(
                    ExponentialBuilder::new()
                        .with_min_delay(Duration::from_millis(25))
                        .with_max_delay(Duration::from_millis(500))
                        .with_max_times(usize::MAX),
                ),
            )
            .await
            .map_err(|_| {
                BridgeError::endpoint(format!("no pipe at {address} within {timeout:?}"))
            })??;

            info!(address = %address, "attached to published pipe");
            Ok(PipeStream::from_io(stream))
        }
    }

}

#[cfg(unix)]
pub use unix_impl::{UnixPipeAcceptor, UnixPipeEndpoint};

// Inert stub so dependents compile on non-Unix hosts.
#[cfg(not(unix))]
pub struct UnixPipeEndpoint;

#[cfg(not(unix))]
impl UnixPipeEndpoint {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixPipeEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
