//! HTTP server: accept loop and per-connection request driving.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Serve each connection with hyper's HTTP/1 connection driver
//! - Feed head/body/end events into the connection's `ConnectionHandler`
//! - Run the processing bridge and write the response
//! - Drain connections on shutdown

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

use crate::bridge::{ProcessingBridge, SharedProcessor};
use crate::config::AdapterConfig;
use crate::http::request::RequestHead;
use crate::http::response::ResponseWriter;
use crate::net::connection::{ConnectionHandler, ConnectionTracker, HandlerError};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;

/// HTTP front end for a Thrift processor.
pub struct HttpServer {
    config: AdapterConfig,
    bridge: ProcessingBridge,
    writer: ResponseWriter,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: AdapterConfig, processor: SharedProcessor) -> Self {
        let bridge = ProcessingBridge::new(
            processor,
            config.protocol.input,
            config.protocol.output,
            config.timeouts.processing(),
        );
        let writer = ResponseWriter::new(config.protocol.output);

        Self {
            config,
            bridge,
            writer,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Run the server until `shutdown` fires, then drain open connections.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            input_protocol = %self.config.protocol.input,
            output_protocol = %self.config.protocol.output,
            "HTTP server starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Closed) => return Err(ListenerError::Closed),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                },
            }
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Stopped accepting, draining connections"
        );
        self.tracker.drain();

        let deadline = self.config.timeouts.shutdown();
        if tokio::time::timeout(deadline, self.tracker.wait_for_shutdown())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Shutdown deadline reached with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let guard = self.tracker.track();
        let id = guard.id();
        let ctx = ConnectionContext {
            handler: Arc::new(Mutex::new(ConnectionHandler::new(
                id,
                self.config.limits.max_body_size,
            ))),
            bridge: self.bridge.clone(),
            writer: self.writer,
        };
        let drain = self.tracker.drain_receiver();
        let span = tracing::info_span!("connection", connection_id = %id, peer = %peer);

        tokio::spawn(
            async move {
                serve_connection(stream, ctx, drain).await;
                drop(permit);
                drop(guard);
            }
            .instrument(span),
        );
    }
}

async fn serve_connection(
    stream: TcpStream,
    ctx: ConnectionContext,
    mut drain: watch::Receiver<bool>,
) {
    let service_ctx = ctx.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = service_ctx.clone();
        async move { ctx.serve_request(req).await }
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    let result = loop {
        tokio::select! {
            res = conn.as_mut() => break res,
            _ = drain.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    let served = ctx.close();
    match result {
        Ok(()) => tracing::debug!(requests = served, "Connection finished"),
        Err(e) if e.is_incomplete_message() => {
            tracing::debug!(requests = served, "Client disconnected mid-request")
        }
        Err(e) => tracing::warn!(error = %e, requests = served, "Connection error"),
    }
}

/// State shared by every request future of one connection.
#[derive(Clone)]
struct ConnectionContext {
    handler: Arc<Mutex<ConnectionHandler>>,
    bridge: ProcessingBridge,
    writer: ResponseWriter,
}

impl ConnectionContext {
    /// Run `f` with the handler locked. Never held across an await.
    fn with_handler<R>(&self, f: impl FnOnce(&mut ConnectionHandler) -> R) -> R {
        let mut handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut handler)
    }

    /// Mark the connection closed; returns the number of requests it served.
    fn close(&self) -> u64 {
        self.with_handler(|h| {
            h.on_close();
            h.requests_served()
        })
    }

    async fn serve_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, HandlerError> {
        let start = Instant::now();
        let (parts, mut body) = req.into_parts();
        let head = RequestHead::from_parts(&parts);
        let version = head.version;
        self.with_handler(|h| h.on_head(head))?;

        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    self.close();
                    return Err(e.into());
                }
            };
            // Trailers carry nothing the processor needs.
            let Ok(chunk) = frame.into_data() else {
                continue;
            };
            match self.with_handler(|h| h.on_body(&chunk)) {
                Ok(()) => {}
                Err(HandlerError::BodyTooLarge { limit }) => {
                    tracing::warn!(limit, "Request body too large");
                    metrics::record_request("body_too_large", start);
                    return Ok(self.writer.payload_too_large(limit, version));
                }
                Err(e) => return Err(e),
            }
        }

        let request = self.with_handler(|h| h.on_end())?;
        let body_len = request.body.len();
        let outcome = self.bridge.process(request.body).await;
        let keep_alive = request.head.keep_alive && !outcome.closes_connection();

        if let Err(e) = self.with_handler(|h| h.on_response(keep_alive)) {
            tracing::debug!(error = %e, "Dropping result for a closed connection");
            return Err(e);
        }

        let label = outcome.label();
        metrics::record_request(label, start);
        tracing::debug!(
            method = %request.head.method,
            uri = %request.head.uri,
            request_bytes = body_len,
            outcome = label,
            keep_alive,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request processed"
        );

        Ok(self.writer.emit(outcome, keep_alive, version))
    }
}
