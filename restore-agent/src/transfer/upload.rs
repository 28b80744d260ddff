//! Retrying request/response primitive shared by metastore and shard uploads.
//!
//! Each attempt dials a new connection, writes the request, streams the whole
//! payload and, for acknowledged kinds, reads the response to end-of-stream.
//! A failed attempt is discarded entirely; nothing resumes mid-frame.

use super::connector::Connector;
use super::progress::MeteredWriter;
use super::retry::{with_retry_when, RetryPolicy};
use crate::protocol::RestoreRequest;
use crate::{RestoreError, Result};
use bytes::Bytes;
use std::future::Future;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// A payload that can be produced again from scratch for every attempt.
pub trait Payload {
    /// Write the complete payload and hand the writer back.
    fn send<W>(&self, writer: W) -> impl Future<Output = Result<W>>
    where
        W: AsyncWrite + Unpin + Send + 'static;
}

impl Payload for Bytes {
    async fn send<W>(&self, mut writer: W) -> Result<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        writer
            .write_all(self)
            .await
            .map_err(transport_error("write payload"))?;
        Ok(writer)
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Acknowledgement returned by the server; empty for unacknowledged kinds
    pub ack: Bytes,

    /// Attempts made, including the successful one
    pub attempts: u32,

    /// Payload bytes written on the successful attempt
    pub bytes_sent: u64,
}

pub struct UploadTransport<C> {
    connector: C,
    policy: RetryPolicy,
}

impl<C: Connector> UploadTransport<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `payload` under `request`, retrying transport failures per the
    /// transport's policy. Any other error ends the upload on the spot.
    pub async fn upload<P: Payload>(&self, request: &RestoreRequest, payload: &P) -> Result<UploadReceipt> {
        let label = format!("{:?} upload", request.kind);

        let ((ack, bytes_sent), attempts) = with_retry_when(
            &self.policy,
            &label,
            RestoreError::is_transient,
            |attempt| self.attempt(request, payload, attempt),
        )
        .await?;

        info!(
            "{} complete: {} payload bytes, {} byte acknowledgement, {} attempt(s)",
            label,
            bytes_sent,
            ack.len(),
            attempts
        );

        Ok(UploadReceipt {
            ack,
            attempts,
            bytes_sent,
        })
    }

    async fn attempt<P: Payload>(&self, request: &RestoreRequest, payload: &P, attempt: u32) -> Result<(Bytes, u64)> {
        let mut conn = self
            .connector
            .connect()
            .await
            .map_err(transport_error("connect"))?;

        let header = request.header_bytes()?;
        conn.write_all(&header)
            .await
            .map_err(transport_error("write request header"))?;

        let writer = payload.send(MeteredWriter::new(conn)).await?;
        let sent = writer.bytes_written();
        let mut conn = writer.into_inner();

        if let Some(expected) = request.expected_payload_len() {
            if sent != expected {
                return Err(RestoreError::Transport(format!(
                    "wrote {} of {} payload bytes",
                    sent, expected
                )));
            }
        }

        conn.flush().await.map_err(transport_error("flush payload"))?;
        debug!("Wrote {} payload bytes (attempt {})", sent, attempt);

        if !request.kind.expects_ack() {
            conn.shutdown()
                .await
                .map_err(transport_error("close connection"))?;
            return Ok((Bytes::new(), sent));
        }

        let mut ack = Vec::new();
        let n = conn
            .read_to_end(&mut ack)
            .await
            .map_err(transport_error("read acknowledgement"))?;
        if n == 0 {
            return Err(RestoreError::Transport(
                "server closed the connection without an acknowledgement".to_string(),
            ));
        }

        Ok((Bytes::from(ack), sent))
    }
}

pub(crate) fn transport_error(context: &'static str) -> impl Fn(io::Error) -> RestoreError {
    move |e| RestoreError::Transport(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    /// In-memory snapshotter: refuses the first `refused_dials` dials, then
    /// closes `silent_sessions` sessions without acknowledging, then acks.
    struct ScriptedConnector {
        refused_dials: u32,
        silent_sessions: u32,
        ack: Bytes,
        dials: AtomicU32,
        received: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ScriptedConnector {
        fn new(ack: &'static [u8]) -> Self {
            Self {
                refused_dials: 0,
                silent_sessions: 0,
                ack: Bytes::from_static(ack),
                dials: AtomicU32::new(0),
                received: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn dials(&self) -> u32 {
            self.dials.load(Ordering::Relaxed)
        }

        fn received(&self) -> Vec<Vec<u8>> {
            self.received.lock().unwrap().clone()
        }
    }

    impl Connector for ScriptedConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            let dial = self.dials.fetch_add(1, Ordering::Relaxed) + 1;
            if dial <= self.refused_dials {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
            }

            let session = dial - self.refused_dials;
            let ack = if session <= self.silent_sessions {
                Bytes::new()
            } else {
                self.ack.clone()
            };

            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(serve(server, ack, Arc::clone(&self.received)));
            Ok(client)
        }
    }

    async fn serve(stream: DuplexStream, ack: Bytes, received: Arc<Mutex<Vec<Vec<u8>>>>) {
        let mut reader = BufReader::new(stream);
        let mut kind = [0u8; 1];
        if reader.read_exact(&mut kind).await.is_err() {
            return;
        }

        let mut payload = Vec::new();
        if kind[0] == RequestKind::ShardUpdate.tag() {
            let mut shard_id = [0u8; 8];
            if reader.read_exact(&mut shard_id).await.is_err() {
                return;
            }
            payload.extend_from_slice(&shard_id);
            if reader.read_to_end(&mut payload).await.is_err() {
                return;
            }
        } else {
            let mut line = String::new();
            if reader.read_line(&mut line).await.is_err() {
                return;
            }
            let Ok(request) = serde_json::from_str::<serde_json::Value>(&line) else {
                return;
            };
            let size = request["UploadSize"].as_u64().unwrap_or(0) as usize;
            payload.resize(size, 0);
            if reader.read_exact(&mut payload).await.is_err() {
                return;
            }
        }

        received.lock().unwrap().push(payload);
        let _ = reader.get_mut().write_all(&ack).await;
    }

    fn transport(connector: ScriptedConnector, max_attempts: u32) -> UploadTransport<ScriptedConnector> {
        UploadTransport::new(connector, RetryPolicy::new(max_attempts, Duration::ZERO))
    }

    fn meta_request(payload: &Bytes) -> RestoreRequest {
        RestoreRequest::meta_store_update("restoreddb", None, payload.len())
    }

    #[tokio::test]
    async fn test_upload_returns_ack() {
        let transport = transport(ScriptedConnector::new(b"ack-bytes"), 10);
        let payload = Bytes::from_static(b"metastore");

        let receipt = transport.upload(&meta_request(&payload), &payload).await.unwrap();

        assert_eq!(&receipt.ack[..], b"ack-bytes");
        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.bytes_sent, 9);
        assert_eq!(transport.connector.received(), vec![b"metastore".to_vec()]);
    }

    #[tokio::test]
    async fn test_upload_succeeds_on_fourth_attempt() {
        let mut connector = ScriptedConnector::new(b"ok");
        connector.refused_dials = 3;
        let transport = transport(connector, 10);
        let payload = Bytes::from_static(b"metastore");

        let receipt = transport.upload(&meta_request(&payload), &payload).await.unwrap();

        assert_eq!(receipt.attempts, 4);
        assert_eq!(transport.connector.dials(), 4);
    }

    #[tokio::test]
    async fn test_upload_gives_up_after_ten_attempts() {
        let mut connector = ScriptedConnector::new(b"ok");
        connector.refused_dials = u32::MAX;
        let transport = transport(connector, 10);
        let payload = Bytes::from_static(b"metastore");

        let err = transport.upload(&meta_request(&payload), &payload).await.unwrap_err();

        assert_eq!(transport.connector.dials(), 10);
        assert!(matches!(err, RestoreError::Transport(ref msg) if msg.contains("connect")));
    }

    #[tokio::test]
    async fn test_empty_ack_is_retried_with_identical_bytes() {
        let mut connector = ScriptedConnector::new(b"ok");
        connector.silent_sessions = 2;
        let transport = transport(connector, 10);
        let payload = Bytes::from_static(b"the same metastore every time");

        let receipt = transport.upload(&meta_request(&payload), &payload).await.unwrap();

        assert_eq!(receipt.attempts, 3);
        let received = transport.connector.received();
        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|p| p == &payload.to_vec()));
    }

    #[tokio::test]
    async fn test_short_payload_fails_attempt() {
        let transport = transport(ScriptedConnector::new(b"ok"), 2);
        let payload = Bytes::from_static(b"short");
        let request = RestoreRequest::meta_store_update("restoreddb", None, 64);

        let err = transport.upload(&request, &payload).await.unwrap_err();

        assert!(matches!(err, RestoreError::Transport(ref msg) if msg.contains("5 of 64")));
        assert_eq!(transport.connector.dials(), 2);
    }

    /// Writes a prefix, then fails the way a corrupt archive does.
    struct TruncatedArchive;

    impl Payload for TruncatedArchive {
        async fn send<W>(&self, mut writer: W) -> Result<W>
        where
            W: AsyncWrite + Unpin + Send + 'static,
        {
            writer
                .write_all(b"first entry")
                .await
                .map_err(transport_error("write payload"))?;
            Err(RestoreError::ArchiveFormat("unexpected end of archive".to_string()))
        }
    }

    #[tokio::test]
    async fn test_payload_error_is_not_retried() {
        let transport = transport(ScriptedConnector::new(b""), 10);
        let request = RestoreRequest::shard_update("restoreddb", 105);

        let err = transport.upload(&request, &TruncatedArchive).await.unwrap_err();

        assert!(matches!(err, RestoreError::ArchiveFormat(_)));
        assert_eq!(transport.connector.dials(), 1);
    }

    #[tokio::test]
    async fn test_shard_update_is_not_acknowledged() {
        let transport = transport(ScriptedConnector::new(b""), 10);
        let payload = Bytes::from_static(b"tar bytes");
        let request = RestoreRequest::shard_update("restoreddb", 105);

        let receipt = transport.upload(&request, &payload).await.unwrap();

        assert!(receipt.ack.is_empty());
        assert_eq!(receipt.attempts, 1);

        let mut expected = 105u64.to_be_bytes().to_vec();
        expected.extend_from_slice(b"tar bytes");
        // Nothing is acknowledged, so the server may still be draining.
        for _ in 0..100 {
            if !transport.connector.received().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.connector.received(), vec![expected]);
    }
}
