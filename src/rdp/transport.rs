//! Framed transport for the remote debugging protocol.
//!
//! Packets travel as `<decimal-length>:<json-bytes>` over a byte stream. The
//! reader buffers partial frames and yields packets in arrival order; the
//! writer serializes one packet per call.

use crate::error::{Error, Result};
use crate::rdp::packet::Packet;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest accepted decimal length prefix. Anything longer is a framing error,
/// not a packet.
const MAX_LENGTH_DIGITS: usize = 10;

pub struct RdpReader<R> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> RdpReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(4096),
            eof: false,
        }
    }

    /// Read the next packet. `Ok(None)` signals a clean end of stream; an end
    /// of stream inside a frame is a `Truncated` error.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.try_decode()? {
                return Ok(Some(packet));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Truncated);
            }

            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    fn try_decode(&mut self) -> Result<Option<Packet>> {
        let Some(colon) = self.buf.iter().position(|b| *b == b':') else {
            if self.buf.len() > MAX_LENGTH_DIGITS {
                return Err(Error::Truncated);
            }
            return Ok(None);
        };

        let prefix = std::str::from_utf8(&self.buf[..colon]).map_err(|_| Error::Truncated)?;
        let length: usize = prefix.parse().map_err(|_| Error::Truncated)?;

        let frame_end = colon + 1 + length;
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        let packet = Packet::parse(&self.buf[colon + 1..frame_end])?;
        self.buf.drain(..frame_end);
        Ok(Some(packet))
    }
}

pub struct RdpWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> RdpWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_packet(&mut self, packet: &Value) -> Result<()> {
        let payload = serde_json::to_vec(packet)?;
        let mut frame = format!("{}:", payload.len()).into_bytes();
        frame.extend_from_slice(&payload);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reads_packets_across_chunk_boundaries() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = RdpReader::new(client);

        let frame = br#"30:{"from":"root","type":"init1"}24:{"from":"a","type":"ev"}"#;
        // Feed in awkward slices to exercise buffering.
        tokio::spawn(async move {
            for chunk in frame.chunks(7) {
                server.write_all(chunk).await.unwrap();
            }
            drop(server);
        });

        let first = reader.read_packet().await.unwrap().unwrap();
        assert_eq!(first.from, "root");
        assert_eq!(first.kind(), Some("init1"));

        let second = reader.read_packet().await.unwrap().unwrap();
        assert_eq!(second.from, "a");

        assert!(reader.read_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = RdpReader::new(client);

        tokio::spawn(async move {
            server.write_all(b"100:{\"from\":\"root\"").await.unwrap();
            drop(server);
        });

        assert!(matches!(
            reader.read_packet().await,
            Err(Error::Truncated)
        ));
    }

    #[tokio::test]
    async fn garbage_prefix_is_an_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = RdpReader::new(client);

        tokio::spawn(async move {
            server.write_all(b"not-a-frame-at-all").await.unwrap();
            drop(server);
        });

        assert!(reader.read_packet().await.is_err());
    }

    #[tokio::test]
    async fn round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = RdpWriter::new(server);
        let mut reader = RdpReader::new(client);

        writer
            .write_packet(&json!({"from": "server1.conn0", "type": "hello", "n": 7}))
            .await
            .unwrap();
        drop(writer);

        let packet = reader.read_packet().await.unwrap().unwrap();
        assert_eq!(packet.from, "server1.conn0");
        assert_eq!(packet.get("n").and_then(serde_json::Value::as_u64), Some(7));
        assert!(reader.read_packet().await.unwrap().is_none());
    }
}
