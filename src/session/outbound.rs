//! Single-writer outbound path for one session.
//!
//! Command responses and routed notifications are produced by different
//! tasks. Both go through an [`Outbound`] handle into one queue, and one
//! writer task owns the WebSocket sink, so frames never interleave.

// ============================================================================
// Imports
// ============================================================================

use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{Event, codec};

// ============================================================================
// Outbound
// ============================================================================

/// Cloneable handle for queueing events to one client.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Event>,
}

impl Outbound {
    /// Creates a handle and the queue it feeds, with no writer attached.
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Creates a handle whose queue is drained into `sink` by a new writer
    /// task.
    pub(crate) fn spawn<S>(
        session_id: SessionId,
        sink: SplitSink<WebSocketStream<S>, Message>,
    ) -> (Self, JoinHandle<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = Self::detached();
        let writer = tokio::spawn(run_writer(session_id, sink, rx));
        (outbound, writer)
    }

    /// Queues an event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the writer has stopped.
    #[inline]
    pub fn send(&self, event: Event) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::ConnectionClosed)
    }

    /// Returns `true` once the writer has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Writer Task
// ============================================================================

/// Drains the queue into the socket until the queue closes or a send fails.
async fn run_writer<S>(
    session_id: SessionId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<Event>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    while let Some(event) = rx.recv().await {
        let text = match codec::encode(&event) {
            Ok(text) => text,
            Err(e) => {
                error!(session_id = %session_id, event = event.tag(), error = %e, "Failed to encode event");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!(session_id = %session_id, error = %e, "Failed to send event, closing session");
            return;
        }

        trace!(session_id = %session_id, event = event.tag(), "Event sent");
    }

    let _ = sink.close().await;
    debug!(session_id = %session_id, "Writer terminated");
}

// ============================================================================
// Tests
// ============================================================================
