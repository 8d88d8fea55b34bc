//! Response construction.
//!
//! # Responsibilities
//! - Map a processing outcome to an HTTP response
//! - Set framing headers (`content-type`, `content-length`, `connection`)
//! - Decide whether the connection survives the response
//!
//! # Design Decisions
//! - RPC failures are reported with status 200; the RPC layer owns error semantics
//! - Bodies are fully buffered, so `content-length` is always exact
//! - hyper closes the connection after writing a response marked `connection: close`

use bytes::Bytes;
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Response, StatusCode, Version};
use http_body_util::Full;

use crate::bridge::ProcessingOutcome;
use crate::codec::ProtocolKind;

/// Content type of diagnostic bodies.
pub const DIAGNOSTIC_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Longest diagnostic body sent to clients, in bytes.
const MAX_DIAGNOSTIC_LEN: usize = 256;

/// Builds HTTP responses for processing outcomes.
#[derive(Debug, Clone, Copy)]
pub struct ResponseWriter {
    content_type: &'static str,
}

impl ResponseWriter {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            content_type: protocol.content_type(),
        }
    }

    /// Build the response for `outcome`.
    pub fn emit(
        &self,
        outcome: ProcessingOutcome,
        keep_alive: bool,
        version: Version,
    ) -> Response<Full<Bytes>> {
        match outcome {
            ProcessingOutcome::Success(body) => {
                build(StatusCode::OK, self.content_type, body, keep_alive, version)
            }
            ProcessingOutcome::Failure(failure) => {
                let keep_alive = keep_alive && !failure.closes_connection();
                build(
                    StatusCode::OK,
                    DIAGNOSTIC_CONTENT_TYPE,
                    diagnostic(&failure.to_string()),
                    keep_alive,
                    version,
                )
            }
        }
    }

    /// Response for a body over the configured limit. Always closes.
    pub fn payload_too_large(&self, limit: usize, version: Version) -> Response<Full<Bytes>> {
        build(
            StatusCode::PAYLOAD_TOO_LARGE,
            DIAGNOSTIC_CONTENT_TYPE,
            diagnostic(&format!("request body exceeds {limit} bytes")),
            false,
            version,
        )
    }
}

fn build(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
    keep_alive: bool,
    version: Version,
) -> Response<Full<Bytes>> {
    let len = body.len();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if version == Version::HTTP_10 {
        *response.version_mut() = version;
    }

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    if !keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    } else if version == Version::HTTP_10 {
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }
    response
}

fn diagnostic(message: &str) -> Bytes {
    let mut end = message.len().min(MAX_DIAGNOSTIC_LEN);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    if end == 0 {
        return Bytes::from_static(b"thrift processing failed");
    }
    Bytes::copy_from_slice(message[..end].as_bytes())
}
