//! Pluggable event payload serializers.

use crate::config::SerializerKind;
use crate::error::{ThlError, ThlResult};
use crate::event::ReplEvent;
use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;

/// Converts event payloads to and from bytes.
///
/// Implementations must be `Send + Sync` because one serializer instance is
/// shared by every connection of a log.
pub trait EventSerializer: Send + Sync + std::fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Serializes an event payload.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Serialization`] if the payload cannot be encoded.
    fn serialize(&self, event: &ReplEvent) -> ThlResult<Vec<u8>>;

    /// Deserializes an event payload.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Serialization`] if the bytes are not a payload
    /// this serializer produced.
    fn deserialize(&self, bytes: &[u8]) -> ThlResult<ReplEvent>;
}

/// Returns the built-in serializer for `kind`.
#[must_use]
pub fn serializer_for(kind: SerializerKind) -> Arc<dyn EventSerializer> {
    match kind {
        SerializerKind::Binary => Arc::new(BinarySerializer),
        SerializerKind::Json => Arc::new(JsonSerializer),
    }
}

const TAG_CHANGE: u8 = 0;
const TAG_FILTERED: u8 = 1;

/// Compact binary serializer: one tag byte followed by the variant body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerializer;

impl EventSerializer for BinarySerializer {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn serialize(&self, event: &ReplEvent) -> ThlResult<Vec<u8>> {
        let mut buf = BytesMut::new();
        match event {
            ReplEvent::Change(data) => {
                buf.put_u8(TAG_CHANGE);
                buf.put_slice(data);
            }
            ReplEvent::FilteredRange {
                to_seqno,
                to_fragno,
            } => {
                buf.put_u8(TAG_FILTERED);
                buf.put_i64(*to_seqno);
                buf.put_i16(*to_fragno);
            }
        }
        Ok(buf.to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> ThlResult<ReplEvent> {
        let mut buf = bytes;
        if !buf.has_remaining() {
            return Err(ThlError::serialization("empty event payload"));
        }

        match buf.get_u8() {
            TAG_CHANGE => Ok(ReplEvent::Change(buf.to_vec())),
            TAG_FILTERED => {
                if buf.remaining() != 10 {
                    return Err(ThlError::serialization(format!(
                        "filtered range payload has {} bytes, expected 10",
                        buf.remaining()
                    )));
                }
                let to_seqno = buf.get_i64();
                let to_fragno = buf.get_i16();
                Ok(ReplEvent::FilteredRange {
                    to_seqno,
                    to_fragno,
                })
            }
            tag => Err(ThlError::serialization(format!(
                "unknown event payload tag {tag}"
            ))),
        }
    }
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl EventSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, event: &ReplEvent) -> ThlResult<Vec<u8>> {
        serde_json::to_vec(event).map_err(|e| ThlError::serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> ThlResult<ReplEvent> {
        serde_json::from_slice(bytes).map_err(|e| ThlError::serialization(e.to_string()))
    }
}
