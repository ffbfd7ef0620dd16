use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::time::Instant;

use crate::error::{VmTestError, VmTestResult};

/// Vsock port the guest echo server listens on.
pub(crate) const ECHO_PORT: u32 = 8000;

#[derive(Debug, Deserialize)]
struct PingReply {
    #[serde(default)]
    result: Option<PingResult>,
}

#[derive(Debug, Deserialize)]
struct PingResult {
    #[serde(default)]
    message: String,
}

/// Round-trip latency summary over a persistent connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingStats {
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
}

impl PingStats {
    pub(crate) fn from_samples(samples: &[Duration]) -> Option<Self> {
        let min = samples.iter().min()?;
        let max = samples.iter().max()?;
        let total: Duration = samples.iter().sum();
        Some(Self {
            min: *min,
            avg: total / samples.len() as u32,
            max: *max,
        })
    }
}

/// A persistent vsock connection through Firecracker's host-side UDS.
///
/// Host-initiated vsock goes through a `CONNECT <port>` handshake on the UDS;
/// Firecracker answers `OK <assigned port>` once the guest accepts, after
/// which the stream is a raw pipe to the guest listener.
pub struct PingClient {
    writer: OwnedWriteHalf,
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    next_id: u64,
}

impl PingClient {
    pub async fn connect(uds: &Path, port: u32, timeout: Duration) -> VmTestResult<Self> {
        let deadline = Instant::now() + timeout;
        let stream = tokio::time::timeout_at(deadline, UnixStream::connect(uds))
            .await
            .map_err(|_| VmTestError::Probe(format!("connect timeout on {}", uds.display())))??;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer
            .write_all(format!("CONNECT {port}\n").as_bytes())
            .await?;

        let mut banner = String::new();
        tokio::time::timeout_at(deadline, reader.read_line(&mut banner))
            .await
            .map_err(|_| VmTestError::Probe("handshake timeout".to_string()))??;
        if !banner.starts_with("OK ") {
            return Err(VmTestError::Probe(format!(
                "unexpected vsock handshake reply: {}",
                banner.trim_end()
            )));
        }

        Ok(Self {
            writer,
            reader,
            next_id: 1,
        })
    }

    /// One JSON-RPC `ping` round trip; the reply must echo the message back.
    /// Returns the measured round-trip time.
    pub async fn ping(&mut self, message: &str, timeout: Duration) -> VmTestResult<Duration> {
        let id = self.next_id;
        self.next_id += 1;

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "ping",
            "params": {"message": message},
        });
        let mut line = request.to_string();
        line.push('\n');

        let started = Instant::now();
        self.writer.write_all(line.as_bytes()).await?;

        let mut reply = String::new();
        let n = tokio::time::timeout(timeout, self.reader.read_line(&mut reply))
            .await
            .map_err(|_| VmTestError::Probe(format!("no reply within {timeout:?}")))??;
        let rtt = started.elapsed();

        if n == 0 {
            return Err(VmTestError::Probe("connection closed by guest".to_string()));
        }
        let parsed: PingReply = serde_json::from_str(&reply)
            .map_err(|e| VmTestError::Probe(format!("malformed reply {}: {e}", reply.trim())))?;
        match parsed.result {
            Some(result) if result.message == message => Ok(rtt),
            _ => Err(VmTestError::Probe(format!(
                "reply does not echo the message: {}",
                reply.trim()
            ))),
        }
    }
}

/// Single-shot probe: connect, ping once, drop the connection.
pub async fn probe_once(
    uds: &Path,
    port: u32,
    message: &str,
    timeout: Duration,
) -> VmTestResult<Duration> {
    let mut client = PingClient::connect(uds, port, timeout).await?;
    client.ping(message, timeout).await
}
