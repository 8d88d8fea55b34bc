//! HTTP transport for Apache Thrift processors.
//!
//! Each HTTP request body is one Thrift message. The body is decoded with the
//! configured input protocol, handed to a synchronous [`thrift::server::TProcessor`]
//! on Tokio's blocking pool, and the encoded reply is sent back as the
//! response body.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod ping;
pub mod transport;

pub use bridge::{ProcessingBridge, ProcessingFailure, ProcessingOutcome, SharedProcessor};
pub use codec::ProtocolKind;
pub use config::AdapterConfig;
pub use crate::http::HttpServer;
pub use lifecycle::Shutdown;
pub use transport::MemoryTransport;
