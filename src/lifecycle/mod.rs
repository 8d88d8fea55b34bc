//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting → connections drain → exit
//! ```
//!
//! # Design Decisions
//! - Shutdown has timeout: connections still open after the deadline are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
