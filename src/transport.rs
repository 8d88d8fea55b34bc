//! In-memory Thrift transport.
//!
//! # Responsibilities
//! - Hold the request bytes the input protocol reads from
//! - Accumulate the bytes the output protocol writes
//! - Hand the finished output to a consumer on the first flush
//!
//! # Design Decisions
//! - One instance per direction per request, dropped with the request
//! - The flush callback is `FnOnce`, so it cannot fire twice
//! - Content is frozen once the callback has fired

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Callback receiving the final output buffer.
pub type FlushCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Read position of a [`MemoryTransport`], observable after the transport
/// has been moved into a protocol.
#[derive(Debug, Clone, Default)]
pub struct ReadProgress(Arc<AtomicUsize>);

impl ReadProgress {
    /// Bytes consumed by `read` so far.
    pub fn position(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn advance(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
}

/// A byte buffer usable as both a Thrift read and write transport.
#[derive(Default)]
pub struct MemoryTransport {
    content: Vec<u8>,
    position: ReadProgress,
    on_flush: Option<FlushCallback>,
    flushed: bool,
}

impl MemoryTransport {
    /// Create an input transport preloaded with `content`.
    pub fn with_content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Create an output transport that hands its content to `callback` on flush.
    pub fn with_flush_callback<F>(callback: F) -> Self
    where
        F: FnOnce(Vec<u8>) + Send + 'static,
    {
        Self {
            on_flush: Some(Box::new(callback)),
            ..Self::default()
        }
    }

    /// All bytes written or preloaded so far.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Shared handle on the read position.
    pub fn progress(&self) -> ReadProgress {
        self.position.clone()
    }

    /// Whether the flush callback has fired.
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("len", &self.content.len())
            .field("position", &self.position.position())
            .field("has_callback", &self.on_flush.is_some())
            .field("flushed", &self.flushed)
            .finish()
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let unread = &self.content[self.position.position()..];
        let n = unread.len().min(buf.len());
        buf[..n].copy_from_slice(&unread[..n]);
        self.position.advance(n);
        Ok(n)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.flushed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to a memory transport after it was flushed",
            ));
        }
        self.content.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(callback) = self.on_flush.take() {
            self.flushed = true;
            callback(self.content.clone());
        }
        Ok(())
    }
}
