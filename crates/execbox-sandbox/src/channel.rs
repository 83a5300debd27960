//! One-shot result channel between a worker and its supervisor.
//!
//! The worker writes exactly one frame to its stdout: a line made of a per-run
//! marker followed by a JSON object. Everything else on the stream is
//! ignored. A reader task parses the frame and delivers it over a oneshot,
//! then keeps draining the pipe so the worker never blocks on a full buffer.

use crate::record::{FailureKind, Outcome};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Payload of a worker frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerOutcome {
    /// Whether the source ran to completion.
    pub ok: bool,
    /// Captured stdout (empty on failure).
    #[serde(default)]
    pub stdout: String,
    /// Formatted traceback on failure.
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkerOutcome {
    /// Convert the frame into a terminal outcome.
    ///
    /// A `MemoryError` raised under the address-space cap counts as a
    /// resource-limit failure rather than an ordinary exception.
    pub fn into_outcome(self) -> Outcome {
        if self.ok {
            return Outcome::Success {
                output: self.stdout,
            };
        }

        let message = self
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "Execution failed with unknown error".to_string());
        let kind = match message.trim_end().lines().last() {
            Some(last) if last.starts_with("MemoryError") => FailureKind::ResourceLimit,
            _ => FailureKind::Runtime,
        };
        Outcome::failure(kind, message)
    }
}

/// Why no frame could be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The stream ended without a frame.
    #[error("worker closed its output without a result")]
    Closed,

    /// Reading the stream failed.
    #[error("failed to read worker output: {0}")]
    Io(String),

    /// A marker line did not hold a valid frame.
    #[error("malformed result frame: {0}")]
    Malformed(String),

    /// The frame exceeded the size cap.
    #[error("result frame exceeds {0} bytes")]
    Oversized(usize),
}

type Delivery = Result<WorkerOutcome, ChannelError>;

/// Receiving half of the channel.
#[derive(Debug)]
pub struct ResultReceiver {
    rx: oneshot::Receiver<Delivery>,
    done: bool,
}

impl ResultReceiver {
    /// Wait for the frame (or the reason there is none).
    ///
    /// Cancel-safe. After a value has been returned, further calls report
    /// [`ChannelError::Closed`] immediately.
    pub async fn recv(&mut self) -> Delivery {
        if self.done {
            return Err(ChannelError::Closed);
        }
        let delivery = (&mut self.rx).await;
        self.done = true;
        delivery.unwrap_or(Err(ChannelError::Closed))
    }

    /// Check whether a value has already been taken.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Start the reader task over a worker's stdout.
///
/// `limit` caps the size of a single line held in memory.
pub fn spawn_reader<R>(stream: R, marker: String, limit: usize) -> (ResultReceiver, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(read_frames(stream, marker, limit, tx));
    (ResultReceiver { rx, done: false }, handle)
}

async fn read_frames<R>(stream: R, marker: String, limit: usize, tx: oneshot::Sender<Delivery>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut tx = Some(tx);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(limit as u64 + 1)
            .read_until(b'\n', &mut line)
            .await;

        match read {
            Ok(0) => break,
            Ok(_) => {
                if tx.is_none() || !line.starts_with(marker.as_bytes()) {
                    trace!(bytes = line.len(), "Ignoring worker output line");
                    continue;
                }
                let Some(sender) = tx.take() else {
                    continue;
                };
                let oversized = line.len() > limit && line.last() != Some(&b'\n');
                let delivery = if oversized {
                    Err(ChannelError::Oversized(limit))
                } else {
                    parse_frame(&line[marker.len()..])
                };
                let _ = sender.send(delivery);
            }
            Err(e) => {
                if let Some(sender) = tx.take() {
                    let _ = sender.send(Err(ChannelError::Io(e.to_string())));
                }
                return;
            }
        }
    }

    if let Some(sender) = tx.take() {
        debug!("Worker output closed before a result frame");
        let _ = sender.send(Err(ChannelError::Closed));
    }
}

fn parse_frame(payload: &[u8]) -> Delivery {
    let payload = payload
        .strip_suffix(b"\n")
        .map(|p| p.strip_suffix(b"\r").unwrap_or(p))
        .unwrap_or(payload);
    serde_json::from_slice(payload).map_err(|e| ChannelError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "@@frame-test@@";

    async fn deliver(input: &'static [u8], limit: usize) -> Delivery {
        let (mut rx, handle) = spawn_reader(input, MARKER.to_string(), limit);
        let delivery = rx.recv().await;
        handle.await.unwrap();
        delivery
    }

    #[tokio::test]
    async fn test_success_frame() {
        let input = b"noise\n\n@@frame-test@@{\"ok\":true,\"stdout\":\"hi\\n\",\"error\":null}\n";
        let outcome = deliver(input, 1024).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.stdout, "hi\n");
        assert_eq!(
            outcome.into_outcome(),
            Outcome::Success {
                output: "hi\n".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failure_frame() {
        let input = b"@@frame-test@@{\"ok\":false,\"stdout\":\"\",\"error\":\"Traceback...\\nValueError: boom\\n\"}\n";
        match deliver(input, 1024).await.unwrap().into_outcome() {
            Outcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::Runtime);
                assert!(message.contains("ValueError: boom"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_error_is_resource_limit() {
        let outcome = WorkerOutcome {
            ok: false,
            stdout: String::new(),
            error: Some("Traceback (most recent call last):\nMemoryError\n".to_string()),
        };
        assert!(matches!(
            outcome.into_outcome(),
            Outcome::Failure {
                kind: FailureKind::ResourceLimit,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_error_text() {
        let outcome = WorkerOutcome {
            ok: false,
            stdout: String::new(),
            error: None,
        };
        match outcome.into_outcome() {
            Outcome::Failure { message, .. } => {
                assert_eq!(message, "Execution failed with unknown error")
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_without_frame_is_closed() {
        let delivery = deliver(b"partial output without frame", 1024).await;
        assert_eq!(delivery, Err(ChannelError::Closed));
    }

    #[tokio::test]
    async fn test_malformed_frame() {
        let delivery = deliver(b"@@frame-test@@{not json}\n", 1024).await;
        assert!(matches!(delivery, Err(ChannelError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame() {
        let delivery = deliver(
            b"@@frame-test@@{\"ok\":true,\"stdout\":\"0123456789012345678901234567890123456789\"}\n",
            32,
        )
        .await;
        assert_eq!(delivery, Err(ChannelError::Oversized(32)));
    }

    #[tokio::test]
    async fn test_only_first_frame_counts() {
        let input = b"@@frame-test@@{\"ok\":true,\"stdout\":\"first\"}\n@@frame-test@@{\"ok\":true,\"stdout\":\"second\"}\n";
        let outcome = deliver(input, 1024).await.unwrap();
        assert_eq!(outcome.stdout, "first");
    }

    #[tokio::test]
    async fn test_recv_after_delivery_is_closed() {
        let (mut rx, handle) = spawn_reader(
            &b"@@frame-test@@{\"ok\":true,\"stdout\":\"\"}\n"[..],
            MARKER.to_string(),
            1024,
        );
        assert!(rx.recv().await.is_ok());
        assert!(rx.is_done());
        assert_eq!(rx.recv().await, Err(ChannelError::Closed));
        handle.await.unwrap();
    }
}
