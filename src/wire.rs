//! Wire codec: streaming JSON objects over a byte stream.
//!
//! The protocol has no envelope and no length prefix. Inbound traffic is a
//! sequence of UTF-8 JSON objects separated by arbitrary JSON-insignificant
//! whitespace; the decoder consumes one object at a time and tolerates
//! partial input by waiting for more bytes. Outbound objects are encoded
//! with a single trailing newline so line-oriented peers can frame them.
//!
//! The on-wire ping is a bare `\n` byte rather than a JSON object; legacy
//! clients parse an empty line as a harmless no-op where an unexpected
//! object would trip their decoders. The encoder special-cases it, and the
//! decoder's whitespace skipping makes inbound blank lines invisible.

use crate::message::{Fields, Outbound};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Errors surfaced by the codec.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Codec for newline-terminated JSON objects with a raw-`\n` ping.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl Decoder for JsonCodec {
    type Item = Fields;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Fields>, WireError> {
        let leading_ws = src
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .count();
        if leading_ws > 0 {
            src.advance(leading_ws);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let mut objects = serde_json::Deserializer::from_slice(src).into_iter::<Fields>();
        match objects.next() {
            Some(Ok(fields)) => {
                let consumed = objects.byte_offset();
                src.advance(consumed);
                Ok(Some(fields))
            }
            // Object not complete yet; wait for more bytes.
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(WireError::Json(e)),
            None => Ok(None),
        }
    }
}

impl Encoder<Outbound> for JsonCodec {
    type Error = WireError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), WireError> {
        match item {
            Outbound::Ping => dst.put_u8(b'\n'),
            Outbound::Reply(reply) => {
                serde_json::to_writer((&mut *dst).writer(), &reply)?;
                dst.put_u8(b'\n');
            }
            Outbound::Relay(fields) => {
                serde_json::to_writer((&mut *dst).writer(), &fields)?;
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}
