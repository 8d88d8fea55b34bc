//! Thrift protocol selection.
//!
//! Request bytes come from the network, so the input side is wrapped in
//! [`BoundedInputProtocol`]: every declared length or element count is checked
//! against the bytes actually left in the request before the underlying
//! protocol gets to allocate for it.

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thrift::protocol::{
    TBinaryInputProtocol, TBinaryOutputProtocol, TCompactInputProtocol, TCompactOutputProtocol,
    TFieldIdentifier, TInputProtocol, TListIdentifier, TMapIdentifier, TMessageIdentifier,
    TOutputProtocol, TSetIdentifier, TStructIdentifier,
};
use thrift::{ProtocolError, ProtocolErrorKind};

use crate::transport::{MemoryTransport, ReadProgress};

/// Content type announced for Thrift payloads.
pub const THRIFT_CONTENT_TYPE: &str = "application/x-thrift";

/// Wire encoding used on one side of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Strict binary protocol (versioned message header).
    #[default]
    Binary,
    /// Compact protocol.
    Compact,
}

impl ProtocolKind {
    /// Bind a decoder of this kind to `transport`.
    pub fn input_protocol<'a, T>(self, transport: T) -> Box<dyn TInputProtocol + 'a>
    where
        T: Read + 'a,
    {
        match self {
            ProtocolKind::Binary => Box::new(TBinaryInputProtocol::new(transport, true)),
            ProtocolKind::Compact => Box::new(TCompactInputProtocol::new(transport)),
        }
    }

    /// Bind an encoder of this kind to `transport`.
    pub fn output_protocol<'a, T>(self, transport: T) -> Box<dyn TOutputProtocol + 'a>
    where
        T: Write + 'a,
    {
        match self {
            ProtocolKind::Binary => Box::new(TBinaryOutputProtocol::new(transport, true)),
            ProtocolKind::Compact => Box::new(TCompactOutputProtocol::new(transport)),
        }
    }

    /// Decoder of this kind over an in-memory copy of `request`, with length
    /// checks.
    pub fn bounded_input_protocol(self, request: Bytes) -> BoundedInputProtocol {
        let transport = MemoryTransport::with_content(request.to_vec());
        let progress = transport.progress();
        BoundedInputProtocol {
            inner: self.input_protocol(transport),
            kind: self,
            request,
            progress,
        }
    }

    /// Content type for responses encoded with this kind.
    pub fn content_type(self) -> &'static str {
        THRIFT_CONTENT_TYPE
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Binary => f.write_str("binary"),
            ProtocolKind::Compact => f.write_str("compact"),
        }
    }
}

/// Input protocol that refuses lengths the request cannot hold.
///
/// The plain protocols trust length prefixes: a negative binary length turns
/// into a huge allocation and panics. Strings and binaries are checked before
/// delegating; list, set and map counts are checked right after the header is
/// read, since every element takes at least one byte.
pub struct BoundedInputProtocol {
    inner: Box<dyn TInputProtocol>,
    kind: ProtocolKind,
    request: Bytes,
    progress: ReadProgress,
}

impl BoundedInputProtocol {
    fn unread(&self) -> &[u8] {
        self.request.get(self.progress.position()..).unwrap_or_default()
    }

    /// Check the length prefix found `offset` bytes past the read position.
    ///
    /// A prefix cut short by the end of the request is left to the inner
    /// protocol, which reports it as end of file.
    fn check_length_at(&self, offset: usize) -> thrift::Result<()> {
        let Some(unread) = self.unread().get(offset..) else {
            return Ok(());
        };
        let (len, header) = match self.kind {
            ProtocolKind::Binary => match unread.first_chunk::<4>() {
                Some(prefix) => (i64::from(i32::from_be_bytes(*prefix)), 4),
                None => return Ok(()),
            },
            ProtocolKind::Compact => match read_varint(unread) {
                Some((len, used)) => (len as i64, used),
                None => return Ok(()),
            },
        };
        check_size(len, unread.len() - header)
    }

    /// Offset of the method name's length prefix inside a message header.
    fn name_offset(&self) -> Option<usize> {
        let unread = self.unread();
        match self.kind {
            ProtocolKind::Binary => unread.starts_with(&[0x80, 0x01]).then_some(4),
            ProtocolKind::Compact => {
                if unread.first() != Some(&0x82) {
                    return None;
                }
                let (_, used) = read_varint(unread.get(2..)?)?;
                Some(2 + used)
            }
        }
    }

    fn check_count(&self, count: i32) -> thrift::Result<()> {
        check_size(i64::from(count), self.unread().len())
    }
}

/// Decode an unsigned LEB128 varint of at most five bytes.
fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().take(5).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn check_size(declared: i64, available: usize) -> thrift::Result<()> {
    if declared < 0 {
        return Err(ProtocolError::new(
            ProtocolErrorKind::NegativeSize,
            format!("negative size {declared}"),
        )
        .into());
    }
    if declared as u64 > available as u64 {
        return Err(ProtocolError::new(
            ProtocolErrorKind::SizeLimit,
            format!("declared size {declared} exceeds the {available} bytes left"),
        )
        .into());
    }
    Ok(())
}

impl TInputProtocol for BoundedInputProtocol {
    fn read_message_begin(&mut self) -> thrift::Result<TMessageIdentifier> {
        if let Some(offset) = self.name_offset() {
            self.check_length_at(offset)?;
        }
        self.inner.read_message_begin()
    }

    fn read_message_end(&mut self) -> thrift::Result<()> {
        self.inner.read_message_end()
    }

    fn read_struct_begin(&mut self) -> thrift::Result<Option<TStructIdentifier>> {
        self.inner.read_struct_begin()
    }

    fn read_struct_end(&mut self) -> thrift::Result<()> {
        self.inner.read_struct_end()
    }

    fn read_field_begin(&mut self) -> thrift::Result<TFieldIdentifier> {
        self.inner.read_field_begin()
    }

    fn read_field_end(&mut self) -> thrift::Result<()> {
        self.inner.read_field_end()
    }

    fn read_bool(&mut self) -> thrift::Result<bool> {
        self.inner.read_bool()
    }

    fn read_bytes(&mut self) -> thrift::Result<Vec<u8>> {
        self.check_length_at(0)?;
        self.inner.read_bytes()
    }

    fn read_i8(&mut self) -> thrift::Result<i8> {
        self.inner.read_i8()
    }

    fn read_i16(&mut self) -> thrift::Result<i16> {
        self.inner.read_i16()
    }

    fn read_i32(&mut self) -> thrift::Result<i32> {
        self.inner.read_i32()
    }

    fn read_i64(&mut self) -> thrift::Result<i64> {
        self.inner.read_i64()
    }

    fn read_double(&mut self) -> thrift::Result<f64> {
        self.inner.read_double()
    }

    fn read_string(&mut self) -> thrift::Result<String> {
        self.check_length_at(0)?;
        self.inner.read_string()
    }

    fn read_list_begin(&mut self) -> thrift::Result<TListIdentifier> {
        let ident = self.inner.read_list_begin()?;
        self.check_count(ident.size)?;
        Ok(ident)
    }

    fn read_list_end(&mut self) -> thrift::Result<()> {
        self.inner.read_list_end()
    }

    fn read_set_begin(&mut self) -> thrift::Result<TSetIdentifier> {
        let ident = self.inner.read_set_begin()?;
        self.check_count(ident.size)?;
        Ok(ident)
    }

    fn read_set_end(&mut self) -> thrift::Result<()> {
        self.inner.read_set_end()
    }

    fn read_map_begin(&mut self) -> thrift::Result<TMapIdentifier> {
        let ident = self.inner.read_map_begin()?;
        self.check_count(ident.size)?;
        Ok(ident)
    }

    fn read_map_end(&mut self) -> thrift::Result<()> {
        self.inner.read_map_end()
    }

    fn read_byte(&mut self) -> thrift::Result<u8> {
        self.inner.read_byte()
    }
}

impl fmt::Debug for BoundedInputProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedInputProtocol")
            .field("kind", &self.kind)
            .field("len", &self.request.len())
            .field("position", &self.progress.position())
            .finish()
    }
}
