//! Bundled `PingService` used by the binary and the integration tests.
//!
//! ```thrift
//! service PingService {
//!     string ping(),
//!     binary echo(1: binary payload),
//! }
//! ```

use thrift::protocol::{
    TFieldIdentifier, TInputProtocol, TMessageIdentifier, TMessageType, TOutputProtocol,
    TStructIdentifier, TType,
};
use thrift::server::{handle_process_result, TProcessor};
use thrift::{ApplicationError, ApplicationErrorKind, ProtocolError, ProtocolErrorKind};

use crate::codec::ProtocolKind;

/// Processor for `PingService`.
#[derive(Debug, Default)]
pub struct PingProcessor;

impl PingProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl TProcessor for PingProcessor {
    fn process(
        &self,
        i: &mut dyn TInputProtocol,
        o: &mut dyn TOutputProtocol,
    ) -> thrift::Result<()> {
        let ident = i.read_message_begin()?;
        if ident.message_type != TMessageType::Call {
            return Err(ApplicationError::new(
                ApplicationErrorKind::InvalidMessageType,
                format!("expected a call, got {:?}", ident.message_type),
            )
            .into());
        }

        match ident.name.as_str() {
            "ping" => {
                read_args(i, |_, _| Ok(false))?;
                i.read_message_end()?;
                write_reply(o, &ident, b"pong")
            }
            "echo" => {
                let mut payload = Vec::new();
                read_args(i, |i, field| {
                    if field.id == Some(1) && field.field_type == TType::String {
                        payload = i.read_bytes()?;
                        return Ok(true);
                    }
                    Ok(false)
                })?;
                i.read_message_end()?;
                write_reply(o, &ident, &payload)
            }
            other => {
                i.skip(TType::Struct)?;
                i.read_message_end()?;
                let unknown = Err(ApplicationError::new(
                    ApplicationErrorKind::UnknownMethod,
                    format!("unknown method {other}"),
                )
                .into());
                // Sent back to the caller as an exception message.
                handle_process_result(&ident, unknown, o)
            }
        }
    }
}

/// Read an argument struct; `field` returns `true` when it consumed the value.
fn read_args<F>(i: &mut dyn TInputProtocol, mut field: F) -> thrift::Result<()>
where
    F: FnMut(&mut dyn TInputProtocol, &TFieldIdentifier) -> thrift::Result<bool>,
{
    i.read_struct_begin()?;
    loop {
        let ident = i.read_field_begin()?;
        if ident.field_type == TType::Stop {
            break;
        }
        if !field(&mut *i, &ident)? {
            i.skip(ident.field_type)?;
        }
        i.read_field_end()?;
    }
    i.read_struct_end()
}

/// Write a reply whose `success` field (id 0) carries `value`.
fn write_reply(
    o: &mut dyn TOutputProtocol,
    call: &TMessageIdentifier,
    value: &[u8],
) -> thrift::Result<()> {
    o.write_message_begin(&TMessageIdentifier::new(
        call.name.clone(),
        TMessageType::Reply,
        call.sequence_number,
    ))?;
    o.write_struct_begin(&TStructIdentifier::new(format!("{}_result", call.name)))?;
    o.write_field_begin(&TFieldIdentifier::new("success", TType::String, 0))?;
    o.write_bytes(value)?;
    o.write_field_end()?;
    o.write_field_stop()?;
    o.write_struct_end()?;
    o.write_message_end()?;
    o.flush()
}

/// Decoded reply of a `PingService` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub method: String,
    pub sequence_number: i32,
    pub value: Vec<u8>,
}

/// Encode a `ping()` call.
pub fn encode_ping_call(protocol: ProtocolKind, sequence_number: i32) -> thrift::Result<Vec<u8>> {
    encode_call(protocol, "ping", sequence_number, None)
}

/// Encode an `echo(payload)` call.
pub fn encode_echo_call(
    protocol: ProtocolKind,
    sequence_number: i32,
    payload: &[u8],
) -> thrift::Result<Vec<u8>> {
    encode_call(protocol, "echo", sequence_number, Some(payload))
}

fn encode_call(
    protocol: ProtocolKind,
    method: &str,
    sequence_number: i32,
    payload: Option<&[u8]>,
) -> thrift::Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut o = protocol.output_protocol(&mut buf);
        o.write_message_begin(&TMessageIdentifier::new(
            method,
            TMessageType::Call,
            sequence_number,
        ))?;
        o.write_struct_begin(&TStructIdentifier::new(format!("{method}_args")))?;
        if let Some(payload) = payload {
            o.write_field_begin(&TFieldIdentifier::new("payload", TType::String, 1))?;
            o.write_bytes(payload)?;
            o.write_field_end()?;
        }
        o.write_field_stop()?;
        o.write_struct_end()?;
        o.write_message_end()?;
        o.flush()?;
    }
    Ok(buf)
}

/// Decode a reply produced by [`PingProcessor`].
///
/// An exception message comes back as `Err(thrift::Error::Application(..))`.
pub fn decode_reply(protocol: ProtocolKind, bytes: &[u8]) -> thrift::Result<Reply> {
    let mut i = protocol.input_protocol(bytes);
    let ident = i.read_message_begin()?;
    if ident.message_type == TMessageType::Exception {
        let e = thrift::Error::read_application_error_from_in_protocol(i.as_mut())?;
        i.read_message_end()?;
        return Err(e.into());
    }
    if ident.message_type != TMessageType::Reply {
        return Err(ProtocolError::new(
            ProtocolErrorKind::InvalidData,
            format!("expected a reply, got {:?}", ident.message_type),
        )
        .into());
    }

    let mut value = None;
    read_args(i.as_mut(), |i, field| {
        if field.id == Some(0) && field.field_type == TType::String {
            value = Some(i.read_bytes()?);
            return Ok(true);
        }
        Ok(false)
    })?;
    i.read_message_end()?;

    let value = value.ok_or_else(|| {
        ProtocolError::new(ProtocolErrorKind::InvalidData, "reply has no success field")
    })?;
    Ok(Reply {
        method: ident.name,
        sequence_number: ident.sequence_number,
        value,
    })
}
