//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, request state machine)
//!     → Hand off to HTTP layer
//!
//! Request States:
//!     Idle → AccumulatingBody → Processing → Idle | Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - One request in flight per connection; pipelining is rejected

pub mod connection;
pub mod listener;

pub use connection::{ConnectionHandler, ConnectionId, ConnectionTracker, HandlerError};
pub use listener::Listener;
