//! Test relay client.
//!
//! Speaks newline-delimited JSON to a test server and offers assertions on
//! received messages. Blank lines (server pings) are skipped by `recv`;
//! `recv_line` exposes them when a test needs to observe pings directly.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A test client speaking the relay protocol over plain TCP.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect to a test server.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Send one JSON object, newline-terminated.
    pub async fn send(&mut self, msg: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send raw bytes verbatim.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive the next JSON message, skipping blank keep-alive lines.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        self.recv_timeout(RECV_TIMEOUT).await
    }

    /// Receive the next JSON message with an explicit timeout.
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<Value> {
        let deadline = tokio::time::Instant::now() + dur;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow::anyhow!("timed out waiting for a message"))?;
            match timeout(remaining, self.read_line()).await {
                Ok(Ok(Some(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Ok(serde_json::from_str(&line)?);
                }
                Ok(Ok(None)) => anyhow::bail!("connection closed while waiting for a message"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => anyhow::bail!("timed out waiting for a message"),
            }
        }
    }

    /// Receive the next raw line, blank keep-alives included. `None` on EOF.
    pub async fn recv_line(&mut self, dur: Duration) -> anyhow::Result<Option<String>> {
        match timeout(dur, self.read_line()).await {
            Ok(result) => Ok(result?),
            Err(_) => anyhow::bail!("timed out waiting for a line"),
        }
    }

    /// Receive a message and assert on its `type`.
    pub async fn recv_expect(&mut self, expected_type: &str) -> anyhow::Result<Value> {
        let msg = self.recv().await?;
        let got = msg["type"].as_str().unwrap_or_default().to_string();
        anyhow::ensure!(
            got == expected_type,
            "expected message type {expected_type:?}, got {msg}"
        );
        Ok(msg)
    }

    /// Assert the server closes the connection within `dur`, discarding
    /// anything still in flight.
    pub async fn expect_close(&mut self, dur: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + dur;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| anyhow::anyhow!("connection was not closed in time"))?;
            match timeout(remaining, self.read_line()).await {
                Ok(Ok(None)) => return Ok(()),
                // A reset also counts as the server hanging up.
                Ok(Err(_)) => return Ok(()),
                Ok(Ok(Some(_))) => continue,
                Err(_) => anyhow::bail!("connection was not closed in time"),
            }
        }
    }

    /// Complete the version handshake and join a channel, asserting on the
    /// `channel_joined` response. Returns the roster.
    pub async fn join(&mut self, channel: &str, connection_type: &str) -> anyhow::Result<Value> {
        self.send(&json!({
            "type": "join",
            "channel": channel,
            "connection_type": connection_type,
        }))
        .await?;
        let joined = self.recv_expect("channel_joined").await?;
        anyhow::ensure!(joined["channel"] == json!(channel), "wrong channel: {joined}");
        Ok(joined["clients"].clone())
    }

    async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }
}
