//! Per-connection I/O tasks.
//!
//! Each TCP stream is split into a reader task, which forwards received bytes
//! to the event loop as [`NetEvent::Data`], and a writer task, which drains an
//! mpsc queue onto the socket. Neither task knows about sessions or crypto.
//!
//! The queue is unbounded: every connection carries one continuous CBC
//! stream, so buffers must reach the socket in exactly the order they were
//! sealed, and the event loop must never wait on a slow peer.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::NetEvent;
use crate::application::SessionId;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Owner-side handle to one connection's tasks.
#[derive(Debug)]
pub struct ConnectionHandle {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Queues bytes behind everything queued before them. Returns `false`
    /// once the writer is gone.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.outgoing.send(bytes).is_ok()
    }

    /// Stops reading immediately and lets the writer flush what is queued.
    pub fn close(self) {
        self.reader.abort();
        drop(self.outgoing);
        // The writer exits once its queue drains and shuts the socket down.
        drop(self.writer);
    }
}

/// Splits `stream` and spawns its reader and writer.
pub fn spawn_connection(
    id: SessionId,
    stream: TcpStream,
    events: mpsc::Sender<NetEvent>,
) -> ConnectionHandle {
    let (mut read_half, mut write_half) = stream.into_split();
    let (outgoing, mut queue) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer_events = events.clone();
    let writer = tokio::spawn(async move {
        while let Some(bytes) = queue.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                debug!(%id, "write failed: {e}");
                let _ = writer_events
                    .send(NetEvent::Closed {
                        id,
                        error: Some(e.to_string()),
                    })
                    .await;
                return;
            }
            trace!(%id, bytes = bytes.len(), "written");
        }
        let _ = write_half.shutdown().await;
    });

    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let error = loop {
            match read_half.read(&mut buf).await {
                Ok(0) => break None,
                Ok(n) => {
                    let event = NetEvent::Data {
                        id,
                        bytes: buf[..n].to_vec(),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => break Some(e.to_string()),
            }
        };
        debug!(%id, ?error, "reader finished");
        let _ = events.send(NetEvent::Closed { id, error }).await;
    });

    ConnectionHandle {
        outgoing,
        reader,
        writer,
    }
}
