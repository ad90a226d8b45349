//! DAP transport: Content-Length framed JSON over any byte stream.
//!
//! Works over stdio (embedded mode) and TCP (server mode).

use crate::dap::protocol::{DapEvent, DapRequest, DapResponse, Outbound};
use crate::error::{Error, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

pub struct DapReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> DapReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read one DAP message. `Ok(None)` on a clean end of input.
    pub async fn read_request(&mut self) -> Result<Option<DapRequest>> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line).await?;
            if read_n == 0 {
                return Ok(None);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse().map_err(|_| Error::Truncated)?);
            }
        }

        let len = content_length.ok_or(Error::Truncated)?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;

        let request: DapRequest = serde_json::from_slice(&buf)?;
        log::debug!(target: "dap", "{}: {}", request.seq, request.command);
        Ok(Some(request))
    }
}

pub struct DapWriter<W> {
    inner: W,
    seq: i64,
}

impl<W: AsyncWrite + Unpin> DapWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, seq: 0 }
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(&payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_outbound(&mut self, outbound: Outbound) -> Result<()> {
        match outbound {
            Outbound::Response {
                request_seq,
                command,
                success,
                message,
                body,
            } => {
                let response = DapResponse {
                    seq: self.next_seq(),
                    r#type: "response",
                    request_seq,
                    success,
                    command,
                    message,
                    body,
                };
                self.write_message(&response).await
            }
            Outbound::Event { event, body } => {
                let event = DapEvent {
                    seq: self.next_seq(),
                    r#type: "event",
                    event,
                    body,
                };
                self.write_message(&event).await
            }
        }
    }

    /// Drain the emitter channel until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(outbound) = rx.recv().await {
            if let Err(e) = self.write_outbound(outbound).await {
                log::warn!(target: "dap", "write failed: {e:#}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn framed_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let (emitter, rx) = crate::dap::protocol::DapEmitter::new();

        let writer = DapWriter::new(server);
        tokio::spawn(writer.run(rx));

        emitter.send_event("initialized", None);
        emitter.send_event(
            "stopped",
            Some(json!({"reason": "breakpoint", "threadId": 1})),
        );
        drop(emitter);

        // Events come back as well-formed framed JSON in emission order with
        // increasing seq.
        let mut reader = BufReader::new(client);
        let mut seen = Vec::new();
        for _ in 0..2 {
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let line = line.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    break;
                }
                if let Some(v) = line.strip_prefix("Content-Length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }
            let mut buf = vec![0u8; content_length];
            reader.read_exact(&mut buf).await.unwrap();
            seen.push(serde_json::from_slice::<Value>(&buf).unwrap());
        }

        assert_eq!(seen[0]["event"], "initialized");
        assert_eq!(seen[0]["seq"], 1);
        assert_eq!(seen[1]["event"], "stopped");
        assert_eq!(seen[1]["seq"], 2);
        assert_eq!(seen[1]["body"]["threadId"], 1);
    }

    #[tokio::test]
    async fn reads_requests() {
        let (client, mut server) = tokio::io::duplex(4096);
        let payload = br#"{"seq":1,"type":"request","command":"initialize","arguments":{}}"#;
        let framed = format!("Content-Length: {}\r\n\r\n", payload.len());
        server.write_all(framed.as_bytes()).await.unwrap();
        server.write_all(payload).await.unwrap();
        drop(server);

        let mut reader = DapReader::new(client);
        let request = reader.read_request().await.unwrap().unwrap();
        assert_eq!(request.command, "initialize");
        assert_eq!(request.seq, 1);
        assert!(reader.read_request().await.unwrap().is_none());
    }
}
