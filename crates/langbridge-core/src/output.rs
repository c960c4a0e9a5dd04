use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

/// Forward a companion output stream into tracing, line by line.
///
/// The forwarding task ends when the stream closes (companion exit) or a read
/// fails; either way it winds down quietly, since companion teardown is
/// expected during shutdown.
pub fn forward_lines<R>(stream: R, runtime_id: &str, channel: &'static str)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let runtime_id = runtime_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    info!(target: "langbridge::companion", runtime = %runtime_id, channel, "{line}");
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(runtime = %runtime_id, channel, %error, "companion output stream closed");
                    break;
                }
            }
        }
    });
}
