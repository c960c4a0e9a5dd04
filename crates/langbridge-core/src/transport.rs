use crate::error::BridgeError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected, bidirectional byte stream to the companion process, already
/// split so the receive and send sides can live on different tasks.
pub struct PipeStream {
    pub reader: PipeReader,
    pub writer: PipeWriter,
}

impl PipeStream {
    pub fn from_io<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// A published transport waiting for the companion to attach.
#[async_trait]
pub trait PipeAcceptor: Send {
    /// Address the companion must be given to connect back.
    fn address(&self) -> &str;

    /// Wait up to `timeout` for the companion to attach.
    async fn accept(self: Box<Self>, timeout: Duration) -> Result<PipeStream, BridgeError>;
}

/// Platform pipe endpoint.
///
/// `publish` + `accept` form the create side (used when this service
/// launches the companion: the transport must exist before the companion
/// starts looking for it). `connect` is the attach side, polling until the
/// endpoint appears or the timeout elapses.
#[async_trait]
pub trait PipeEndpoint: Send + Sync {
    async fn publish(&self, name: &str) -> Result<Box<dyn PipeAcceptor>, BridgeError>;

    async fn connect(&self, name: &str, timeout: Duration) -> Result<PipeStream, BridgeError>;
}
