//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1 connection, accept loop)
//!     → request.rs (keep-alive intent, body accumulation)
//!     → [bridge runs the Thrift processor]
//!     → response.rs (status, framing headers, body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{CompletedRequest, RequestAccumulator, RequestHead};
pub use response::ResponseWriter;
pub use server::HttpServer;
