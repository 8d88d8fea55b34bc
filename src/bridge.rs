//! Bridge between async HTTP handling and the synchronous Thrift processor.
//!
//! # Data Flow
//! ```text
//! request bytes
//!     → MemoryTransport (input) → input protocol ─┐
//!                                                 ├→ TProcessor::process (blocking pool)
//!     MemoryTransport (output) ← output protocol ─┘
//!         → on flush: oneshot gate
//!     → ProcessingOutcome
//! ```
//!
//! # Design Decisions
//! - The processor always runs under `spawn_blocking`, never on a runtime worker
//! - Completion is observed through the output transport's flush, not the return
//!   of `process`, because protocols may buffer until flushed
//! - A missing flush or an exceeded deadline becomes a `Failure`

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use thrift::server::TProcessor;
use thrift::TransportErrorKind;
use tokio::sync::oneshot;

use crate::codec::ProtocolKind;
use crate::transport::MemoryTransport;

/// Shared handle to the processor serving every connection.
pub type SharedProcessor = Arc<dyn TProcessor + Send + Sync>;

/// Why a request produced no response message.
#[derive(Debug, Error)]
pub enum ProcessingFailure {
    /// Request bytes are not a well-formed message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The processor or the application handler failed.
    #[error("application error: {0}")]
    Application(String),

    /// Writing the response message failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The processor returned but the output was never flushed.
    #[error("processor finished without flushing a response")]
    Incomplete,

    /// Processing exceeded the configured deadline.
    #[error("processing timed out after {0:?}")]
    TimedOut(Duration),
}

impl ProcessingFailure {
    /// Whether the connection must be closed after reporting this failure.
    pub fn closes_connection(&self) -> bool {
        matches!(self, ProcessingFailure::Transport(_))
    }

    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingFailure::Decode(_) => "decode_error",
            ProcessingFailure::Application(_) => "application_error",
            ProcessingFailure::Transport(_) => "transport_error",
            ProcessingFailure::Incomplete => "incomplete",
            ProcessingFailure::TimedOut(_) => "timeout",
        }
    }
}

impl From<thrift::Error> for ProcessingFailure {
    fn from(err: thrift::Error) -> Self {
        match err {
            thrift::Error::Protocol(e) => ProcessingFailure::Decode(e.message),
            // Running out of request bytes means the message was truncated.
            thrift::Error::Transport(e) if e.kind == TransportErrorKind::EndOfFile => {
                ProcessingFailure::Decode(format!("unexpected end of message: {}", e.message))
            }
            thrift::Error::Transport(e) => ProcessingFailure::Transport(e.message),
            thrift::Error::Application(e) => ProcessingFailure::Application(e.message),
            thrift::Error::User(e) => ProcessingFailure::Application(e.to_string()),
        }
    }
}

/// Result of processing one request.
#[derive(Debug)]
pub enum ProcessingOutcome {
    /// Encoded response message.
    Success(Bytes),
    /// No response message was produced.
    Failure(ProcessingFailure),
}

impl ProcessingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Success(_) => "success",
            ProcessingOutcome::Failure(f) => f.label(),
        }
    }

    pub fn closes_connection(&self) -> bool {
        match self {
            ProcessingOutcome::Success(_) => false,
            ProcessingOutcome::Failure(f) => f.closes_connection(),
        }
    }
}

/// Runs a Thrift processor against in-memory request/response buffers.
#[derive(Clone)]
pub struct ProcessingBridge {
    processor: SharedProcessor,
    input: ProtocolKind,
    output: ProtocolKind,
    timeout: Duration,
}

impl ProcessingBridge {
    pub fn new(
        processor: SharedProcessor,
        input: ProtocolKind,
        output: ProtocolKind,
        timeout: Duration,
    ) -> Self {
        Self {
            processor,
            input,
            output,
            timeout,
        }
    }

    /// Process one request message.
    ///
    /// Never blocks the calling task: the processor runs on the blocking pool
    /// and its output is delivered through a oneshot channel. If the deadline
    /// passes the worker is left to finish on its own and its output dropped.
    pub async fn process(&self, request: Bytes) -> ProcessingOutcome {
        let (gate_tx, gate_rx) = oneshot::channel();
        let processor = Arc::clone(&self.processor);
        let (input, output) = (self.input, self.output);

        let worker = tokio::task::spawn_blocking(move || {
            invoke(processor.as_ref(), input, output, request, gate_tx)
        });

        match tokio::time::timeout(self.timeout, worker).await {
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Processor exceeded deadline");
                return ProcessingOutcome::Failure(ProcessingFailure::TimedOut(self.timeout));
            }
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "Processor worker failed");
                return ProcessingOutcome::Failure(ProcessingFailure::Application(format!(
                    "processor panicked: {join_err}"
                )));
            }
            Ok(Ok(Err(err))) => {
                let failure = ProcessingFailure::from(err);
                tracing::debug!(error = %failure, "Processor returned an error");
                return ProcessingOutcome::Failure(failure);
            }
            Ok(Ok(Ok(()))) => {}
        }

        // The worker has returned, so the sender was either used or dropped.
        match gate_rx.await {
            Ok(bytes) => ProcessingOutcome::Success(Bytes::from(bytes)),
            Err(_) => {
                tracing::error!("Output transport dropped without flushing");
                ProcessingOutcome::Failure(ProcessingFailure::Incomplete)
            }
        }
    }
}

/// Synchronous half of the bridge, executed on a blocking thread.
fn invoke(
    processor: &(dyn TProcessor + Send + Sync),
    input: ProtocolKind,
    output: ProtocolKind,
    request: Bytes,
    gate: oneshot::Sender<Vec<u8>>,
) -> thrift::Result<()> {
    let mut i_prot = input.bounded_input_protocol(request);
    let mut o_prot = output.output_protocol(MemoryTransport::with_flush_callback(move |bytes| {
        // The receiver is gone only if the request was abandoned.
        let _ = gate.send(bytes);
    }));

    processor.process(&mut i_prot, o_prot.as_mut())?;
    o_prot.flush()
}
