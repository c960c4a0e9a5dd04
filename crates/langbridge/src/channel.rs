use langbridge_core::envelope::{Envelope, EnvelopeCodec};
use langbridge_core::error::BridgeError;
use langbridge_core::transport::{PipeReader, PipeStream, PipeWriter};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::debug;

/// The live transport to the companion process.
///
/// The read side is consumed by the runner task alone; the write side is
/// guarded by its own gate so any task may send without blocking on an
/// in-progress long-poll read, while two writers can never interleave one
/// frame with another. The last successful write is timestamped for
/// heartbeat scheduling.
pub struct PipeChannel {
    reader: Mutex<FramedRead<PipeReader, EnvelopeCodec>>,
    write_gate: Mutex<WriteGate>,
    last_write: StdMutex<Instant>,
    closed: AtomicBool,
}

struct WriteGate {
    io: PipeWriter,
    codec: EnvelopeCodec,
    buf: BytesMut,
}

impl WriteGate {
    async fn write(&mut self, envelope: &Envelope) -> Result<(), BridgeError> {
        self.buf.clear();
        self.codec.encode(envelope, &mut self.buf)?;
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }
}

impl PipeChannel {
    pub fn new(pipe: PipeStream) -> Self {
        Self {
            reader: Mutex::new(FramedRead::new(pipe.reader, EnvelopeCodec)),
            write_gate: Mutex::new(WriteGate {
                io: pipe.writer,
                codec: EnvelopeCodec,
                buf: BytesMut::new(),
            }),
            last_write: StdMutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }
    }

    /// Receive one envelope, blocking up to `timeout`.
    ///
    /// Expiry yields `Ok(None)`; the caller decides whether to poll again.
    /// EOF and read errors are transport failures, reported as `Err`.
    pub async fn recv(&self, timeout: Duration) -> Result<Option<Envelope>, BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::ChannelClosed);
        }
        let mut reader = self.reader.lock().await;
        match tokio::time::timeout(timeout, reader.next()).await {
            Err(_elapsed) => Ok(None),
            Ok(None) => Err(BridgeError::ChannelClosed),
            Ok(Some(Ok(envelope))) => Ok(Some(envelope)),
            Ok(Some(Err(error))) => Err(error),
        }
    }

    /// Write one envelope atomically, failing if the gate cannot be acquired
    /// and the frame written within `timeout`.
    pub async fn send(&self, envelope: &Envelope, timeout: Duration) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::ChannelClosed);
        }
        let write = async {
            let mut gate = self.write_gate.lock().await;
            gate.write(envelope).await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| BridgeError::SendTimeout(timeout))??;

        *self.last_write.lock().expect("last-write lock poisoned") = Instant::now();
        Ok(())
    }

    /// Instant of the most recent successful write.
    pub fn last_write(&self) -> Instant {
        *self.last_write.lock().expect("last-write lock poisoned")
    }

    /// Whether the idle period since the last write has reached `timeout`.
    pub fn heartbeat_due(&self, timeout: Duration) -> bool {
        self.last_write().elapsed() >= timeout
    }

    /// Idempotent: the first call shuts the write half down; later calls and
    /// in-flight operations observe the closed flag.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut gate = self.write_gate.lock().await;
        if let Err(error) = gate.io.shutdown().await {
            debug!(%error, "pipe shutdown failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use langbridge_core::envelope::FrameKind;

    fn duplex_pair() -> (PipeChannel, PipeChannel) {
        let (a, b) = tokio::io::duplex(4096);
        (
            PipeChannel::new(PipeStream::from_io(a)),
            PipeChannel::new(PipeStream::from_io(b)),
        )
    }

    #[tokio::test]
    async fn send_and_recv_one_envelope() {
        let (near, far) = duplex_pair();
        near.send(&Envelope::data(b"payload".to_vec()), Duration::from_secs(1))
            .await
            .unwrap();

        let received = far.recv(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(received.kind, FrameKind::Data);
        assert_eq!(received.payload, b"payload");
    }

    #[tokio::test]
    async fn recv_timeout_is_not_an_error() {
        let (near, _far) = duplex_pair();
        let received = near.recv(Duration::from_millis(50)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn recv_reports_eof_as_channel_closed() {
        let (near, far) = duplex_pair();
        far.close().await;
        drop(far);
        let result = near.recv(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BridgeError::ChannelClosed)));
    }

    #[tokio::test]
    async fn send_updates_the_last_write_timestamp() {
        let (near, _far) = duplex_pair();
        let before = near.last_write();
        tokio::time::sleep(Duration::from_millis(20)).await;
        near.send(&Envelope::heartbeat(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(near.last_write() > before);
        assert!(!near.heartbeat_due(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_later_sends() {
        let (near, _far) = duplex_pair();
        near.close().await;
        near.close().await;
        let result = near
            .send(&Envelope::data(vec![1]), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(BridgeError::ChannelClosed)));
    }

    #[tokio::test]
    async fn a_blocked_read_does_not_hold_up_a_write() {
        let (near, far) = duplex_pair();
        let near = std::sync::Arc::new(near);

        let reader = near.clone();
        let blocked_read =
            tokio::spawn(async move { reader.recv(Duration::from_millis(500)).await });

        // The write must complete while the read is still parked.
        near.send(&Envelope::data(b"overlap".to_vec()), Duration::from_millis(100))
            .await
            .unwrap();

        let echoed = far.recv(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(echoed.payload, b"overlap");
        let read_result = blocked_read.await.unwrap().unwrap();
        assert!(read_result.is_none());
    }
}
