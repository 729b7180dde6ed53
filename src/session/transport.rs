use std::sync::Arc;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Notify;

use crate::error::NetconfError;

const READ_BUF_SIZE: usize = 4096;
const FRAME_QUEUE_DEPTH: usize = 64;

/// A bidirectional byte stream to a NETCONF peer.
///
/// Wraps an already-established secure stream (an SSH `netconf`
/// subsystem channel, a TLS socket, or an in-memory pipe in tests) in a
/// spawned I/O task. Outgoing frames are queued whole through an mpsc
/// channel, which gives every sender single-writer discipline without a
/// lock: frames can never interleave because the task writes one at a
/// time. Incoming bytes are forwarded as they arrive; closing the
/// inbound side signals end-of-stream to the session's dispatch loop.
pub struct Transport {
    outbound: Sender<Vec<u8>>,
    inbound: Receiver<Vec<u8>>,
    shutdown: Arc<Notify>,
}

impl Transport {
    /// Runs a transport on any async byte stream.
    ///
    /// The stream is moved into the I/O task and dropped when the task
    /// ends, which closes the underlying connection on every exit path.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_stream_with_guard(stream, None)
    }

    /// Like [`Transport::from_stream`], keeping `guard` alive for the
    /// lifetime of the connection.
    ///
    /// SSH channel streams only stay usable while their client handle
    /// exists; the handle rides along here and is dropped when the I/O
    /// task ends.
    pub(crate) fn from_stream_with_guard<S>(
        stream: S,
        guard: Option<Box<dyn std::any::Any + Send>>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(FRAME_QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(FRAME_QUEUE_DEPTH);
        let shutdown = Arc::new(Notify::new());
        let shutdown_task = shutdown.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let (mut reader, mut writer) = tokio::io::split(stream);
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            trace!("writing frame of {} bytes", frame.len());
                            if let Err(err) = writer.write_all(&frame).await {
                                debug!("transport write failed: {err}");
                                break;
                            }
                            if let Err(err) = writer.flush().await {
                                debug!("transport flush failed: {err}");
                                break;
                            }
                        }
                        // All senders dropped: the session is gone.
                        None => break,
                    },
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            debug!("transport reached end of stream");
                            break;
                        }
                        Ok(n) => {
                            if inbound_tx.send(buf[..n].to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            debug!("transport read failed: {err}");
                            break;
                        }
                    },
                    _ = shutdown_task.notified() => {
                        debug!("transport shut down by session close");
                        break;
                    }
                }
            }
            // Dropping reader/writer here closes the stream; dropping
            // inbound_tx wakes the dispatch loop with end-of-stream.
        });

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            shutdown,
        }
    }

    /// Queues one complete frame for writing.
    pub(crate) async fn send(&self, frame: Vec<u8>) -> Result<(), NetconfError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| NetconfError::Transport("connection task stopped".to_string()))
    }

    /// Receives the next chunk of raw bytes, `None` at end of stream.
    pub(crate) async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    /// Splits the transport into its send and receive halves plus the
    /// shutdown handle, for the session to distribute between its send
    /// path and its dispatch loop.
    pub(crate) fn into_parts(self) -> (Sender<Vec<u8>>, Receiver<Vec<u8>>, Arc<Notify>) {
        (self.outbound, self.inbound, self.shutdown)
    }
}
