//! Request head inspection and body accumulation.
//!
//! # Responsibilities
//! - Derive keep-alive intent from the HTTP version and `Connection` header
//! - Collect body chunks of one request into a single buffer
//! - Enforce the configured body size limit while chunks arrive

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, CONNECTION};
use http::request::Parts;
use http::{Method, Uri, Version};

use crate::net::connection::HandlerError;

/// The parts of a request head the adapter keeps around.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub keep_alive: bool,
}

impl RequestHead {
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            keep_alive: is_keep_alive(parts.version, &parts.headers),
        }
    }
}

/// HTTP/1.1 stays open unless the client sent `close`; HTTP/1.0 closes unless
/// the client asked for `keep-alive`.
pub fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let has_token = |token: &str| {
        headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    };

    match version {
        Version::HTTP_09 => false,
        Version::HTTP_10 => has_token("keep-alive"),
        _ => !has_token("close"),
    }
}

/// Body buffer for the request currently being received.
#[derive(Debug)]
pub struct RequestAccumulator {
    head: RequestHead,
    body: BytesMut,
    max_body_size: usize,
}

impl RequestAccumulator {
    pub fn new(head: RequestHead, max_body_size: usize) -> Self {
        Self {
            head,
            body: BytesMut::new(),
            max_body_size,
        }
    }

    /// Append a chunk, rejecting it if the body would exceed the limit.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), HandlerError> {
        let len = self.body.len() + chunk.len();
        if len > self.max_body_size {
            return Err(HandlerError::BodyTooLarge {
                limit: self.max_body_size,
            });
        }
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    /// Freeze the collected body.
    pub fn finish(self) -> CompletedRequest {
        CompletedRequest {
            head: self.head,
            body: self.body.freeze(),
        }
    }
}

/// A fully received request ready for processing.
#[derive(Debug)]
pub struct CompletedRequest {
    pub head: RequestHead,
    pub body: Bytes,
}
