//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track per-connection request state (Idle → AccumulatingBody → Processing)
//! - Generate unique connection IDs for tracing
//! - Coordinate graceful shutdown per-connection
//! - Count active connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::http::request::{CompletedRequest, RequestAccumulator, RequestHead};
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Relaxed: ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors raised while driving a connection.
///
/// All of these end the connection; RPC-level failures never show up here.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A request head arrived while another request was in flight.
    #[error("request head received while {state}; pipelining is not supported")]
    Pipelined { state: &'static str },

    /// Body or end event outside of a request.
    #[error("unexpected {event} event while {state}")]
    OutOfOrder {
        event: &'static str,
        state: &'static str,
    },

    /// The request body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Reading the request body from the socket failed.
    #[error("failed to read request body: {0}")]
    Body(#[from] hyper::Error),

    /// The connection closed before the response could be written.
    #[error("connection closed")]
    Closed,
}

/// Request-level state of one connection.
#[derive(Debug)]
pub enum HandlerState {
    /// No request in flight.
    Idle,
    /// Head seen, collecting body chunks.
    AccumulatingBody(RequestAccumulator),
    /// Body complete, waiting for the processor.
    Processing(RequestHead),
    /// Connection is gone or about to close.
    Closed,
}

impl HandlerState {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerState::Idle => "idle",
            HandlerState::AccumulatingBody(_) => "accumulating body",
            HandlerState::Processing(_) => "processing",
            HandlerState::Closed => "closed",
        }
    }
}

/// Per-connection request state machine.
///
/// Receives head/body/end events for one request at a time. The owner runs the
/// bridge between [`on_end`](Self::on_end) and [`on_response`](Self::on_response).
#[derive(Debug)]
pub struct ConnectionHandler {
    id: ConnectionId,
    state: HandlerState,
    max_body_size: usize,
    requests: u64,
}

impl ConnectionHandler {
    pub fn new(id: ConnectionId, max_body_size: usize) -> Self {
        Self {
            id,
            state: HandlerState::Idle,
            max_body_size,
            requests: 0,
        }
    }

    pub fn state(&self) -> &HandlerState {
        &self.state
    }

    /// Requests answered on this connection so far.
    pub fn requests_served(&self) -> u64 {
        self.requests
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, HandlerState::Closed)
    }

    /// Start a new request.
    pub fn on_head(&mut self, head: RequestHead) -> Result<(), HandlerError> {
        match self.state {
            HandlerState::Idle => {
                tracing::trace!(
                    connection_id = %self.id,
                    method = %head.method,
                    uri = %head.uri,
                    keep_alive = head.keep_alive,
                    "Request head"
                );
                self.state = HandlerState::AccumulatingBody(RequestAccumulator::new(
                    head,
                    self.max_body_size,
                ));
                Ok(())
            }
            ref other => Err(HandlerError::Pipelined {
                state: other.name(),
            }),
        }
    }

    /// Append a body chunk. Exceeding the body limit closes the connection.
    pub fn on_body(&mut self, chunk: &[u8]) -> Result<(), HandlerError> {
        match &mut self.state {
            HandlerState::AccumulatingBody(acc) => {
                if let Err(err) = acc.append(chunk) {
                    self.state = HandlerState::Closed;
                    return Err(err);
                }
                Ok(())
            }
            other => Err(HandlerError::OutOfOrder {
                event: "body",
                state: other.name(),
            }),
        }
    }

    /// Finish the request and hand its body to the caller.
    pub fn on_end(&mut self) -> Result<CompletedRequest, HandlerError> {
        match std::mem::replace(&mut self.state, HandlerState::Closed) {
            HandlerState::AccumulatingBody(acc) => {
                let request = acc.finish();
                self.state = HandlerState::Processing(request.head.clone());
                Ok(request)
            }
            other => {
                let state = other.name();
                self.state = other;
                Err(HandlerError::OutOfOrder {
                    event: "end",
                    state,
                })
            }
        }
    }

    /// Record that a response is about to be written.
    ///
    /// Returns to `Idle` when the connection stays open. Fails with
    /// [`HandlerError::Closed`] when the connection went away while processing,
    /// in which case the response must be dropped.
    pub fn on_response(&mut self, keep_alive: bool) -> Result<(), HandlerError> {
        match self.state {
            HandlerState::Processing(_) => {
                self.requests += 1;
                self.state = if keep_alive {
                    HandlerState::Idle
                } else {
                    HandlerState::Closed
                };
                Ok(())
            }
            HandlerState::Closed => Err(HandlerError::Closed),
            ref other => Err(HandlerError::OutOfOrder {
                event: "response",
                state: other.name(),
            }),
        }
    }

    /// The connection is gone; any in-flight result will be discarded.
    pub fn on_close(&mut self) {
        if !self.is_closed() {
            tracing::trace!(connection_id = %self.id, state = self.state.name(), "Handler closed");
        }
        self.state = HandlerState::Closed;
    }
}

/// Tracks active connections for graceful shutdown.
///
/// Uses a watch channel to tell connections to drain.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
    /// Sender flipped to `true` when connections should drain.
    drain_tx: Arc<watch::Sender<bool>>,
    /// Receiver cloned into every connection task.
    drain_rx: watch::Receiver<bool>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            drain_tx: Arc::new(tx),
            drain_rx: rx,
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Ask every connection to finish its in-flight request and close.
    pub fn drain(&self) {
        let _ = self.drain_tx.send(true);
    }

    /// Wait until all connections are closed.
    pub async fn wait_for_shutdown(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
    }

    /// Clone the drain receiver for use in tasks.
    pub fn drain_receiver(&self) -> watch::Receiver<bool> {
        self.drain_rx.clone()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
