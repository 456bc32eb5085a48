//! Translation between log records and logical events.
//!
//! ## Event Record Payload
//!
//! ```text
//! | seqno (8) | fragno (2) | last_frag (1) | source_id (str) | epoch (8) |
//! | source_tstamp (8) | shard_id (str) | event_id (str) | len (4) | payload (N) |
//! ```
//!
//! Strings are a `u16` byte length followed by UTF-8. The payload bytes come
//! from the configured [`EventSerializer`]; a filtered-range placeholder is an
//! ordinary EVENT record whose payload decodes to
//! [`ReplEvent::FilteredRange`](crate::ReplEvent::FilteredRange).
//!
//! ## Rotate Record Payload
//!
//! ```text
//! | next_segment_index (8) |
//! ```

use crate::error::{ThlError, ThlResult};
use crate::event::{EventHeader, LogEvent};
use crate::record::{LogRecord, RecordType};
use crate::serializer::EventSerializer;
use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// A replication event.
    Event(LogEvent),
    /// A rotate marker carrying the next segment index.
    Rotate(u64),
}

/// Encodes and decodes event and rotate records.
#[derive(Debug, Clone)]
pub struct EventCodec {
    serializer: Arc<dyn EventSerializer>,
}

impl EventCodec {
    /// Creates a codec around a payload serializer.
    #[must_use]
    pub fn new(serializer: Arc<dyn EventSerializer>) -> Self {
        Self { serializer }
    }

    /// Returns the payload serializer.
    #[must_use]
    pub fn serializer(&self) -> &Arc<dyn EventSerializer> {
        &self.serializer
    }

    /// Builds the EVENT record for `event`.
    ///
    /// # Errors
    ///
    /// Returns an error if a string field is too long or the payload cannot
    /// be serialized.
    pub fn encode_event(&self, event: &LogEvent) -> ThlResult<LogRecord> {
        let payload = self.serializer.serialize(&event.event)?;
        let header = &event.header;

        let mut buf = BytesMut::with_capacity(64 + payload.len());
        buf.put_i64(header.seqno);
        buf.put_i16(header.fragno);
        buf.put_u8(u8::from(header.last_frag));
        put_string(&mut buf, &header.source_id)?;
        buf.put_i64(header.epoch_number);
        buf.put_i64(header.source_tstamp);
        put_string(&mut buf, &header.shard_id)?;
        put_string(&mut buf, &header.event_id)?;

        let len = u32::try_from(payload.len())
            .map_err(|_| ThlError::invalid_operation("event payload exceeds u32 length"))?;
        buf.put_u32(len);
        buf.put_slice(&payload);

        Ok(LogRecord::new(RecordType::Event, buf.to_vec()))
    }

    /// Builds the ROTATE record pointing at `next_index`.
    #[must_use]
    pub fn encode_rotate(&self, next_index: u64) -> LogRecord {
        LogRecord::new(
            RecordType::Rotate,
            (next_index as i64).to_be_bytes().to_vec(),
        )
    }

    /// Decodes only the header of an EVENT record.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Corruption`] if the record is not a well-formed
    /// event record.
    pub fn decode_header(&self, record: &LogRecord) -> ThlResult<EventHeader> {
        let mut buf = event_payload(record)?;
        read_header(&mut buf)
    }

    /// Decodes a full EVENT record.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Corruption`] on malformed framing and
    /// [`ThlError::Serialization`] if the payload cannot be deserialized.
    pub fn decode_event(&self, record: &LogRecord) -> ThlResult<LogEvent> {
        let mut buf = event_payload(record)?;
        let header = read_header(&mut buf)?;

        need(&buf, 4, "payload length")?;
        let len = buf.get_u32() as usize;
        if buf.remaining() != len {
            return Err(ThlError::corruption(format!(
                "event {} payload length {} does not match remaining {} bytes",
                header.seqno,
                len,
                buf.remaining()
            )));
        }
        let event = self.serializer.deserialize(buf)?;

        Ok(LogEvent { header, event })
    }

    /// Decodes a ROTATE record into the next segment index.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Corruption`] if the record is not a rotate record.
    pub fn decode_rotate(&self, record: &LogRecord) -> ThlResult<u64> {
        if record.record_type != RecordType::Rotate {
            return Err(ThlError::corruption("expected a rotate record"));
        }
        let mut buf = record.payload.as_slice();
        if buf.remaining() != 8 {
            return Err(ThlError::corruption(format!(
                "rotate record has {} bytes, expected 8",
                buf.remaining()
            )));
        }
        let index = buf.get_i64();
        u64::try_from(index)
            .map_err(|_| ThlError::corruption(format!("negative segment index {index}")))
    }

    /// Decodes any record.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`decode_event`](Self::decode_event) and
    /// [`decode_rotate`](Self::decode_rotate).
    pub fn decode(&self, record: &LogRecord) -> ThlResult<LogEntry> {
        match record.record_type {
            RecordType::Event => self.decode_event(record).map(LogEntry::Event),
            RecordType::Rotate => self.decode_rotate(record).map(LogEntry::Rotate),
        }
    }
}

fn event_payload(record: &LogRecord) -> ThlResult<&[u8]> {
    if record.record_type != RecordType::Event {
        return Err(ThlError::corruption("expected an event record"));
    }
    Ok(record.payload.as_slice())
}

fn read_header(buf: &mut &[u8]) -> ThlResult<EventHeader> {
    need(buf, 11, "event header")?;
    let seqno = buf.get_i64();
    let fragno = buf.get_i16();
    let last_frag = buf.get_u8() != 0;
    let source_id = get_string(buf, "source id")?;
    need(buf, 16, "epoch and timestamp")?;
    let epoch_number = buf.get_i64();
    let source_tstamp = buf.get_i64();
    let shard_id = get_string(buf, "shard id")?;
    let event_id = get_string(buf, "event id")?;

    Ok(EventHeader {
        seqno,
        fragno,
        last_frag,
        source_id,
        epoch_number,
        source_tstamp,
        shard_id,
        event_id,
    })
}

fn need(buf: &&[u8], len: usize, what: &str) -> ThlResult<()> {
    if buf.remaining() < len {
        return Err(ThlError::corruption(format!(
            "unexpected end of event record reading {what}"
        )));
    }
    Ok(())
}

fn put_string(buf: &mut BytesMut, value: &str) -> ThlResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        ThlError::invalid_operation(format!("string field too long: {} bytes", value.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_string(buf: &mut &[u8], what: &str) -> ThlResult<String> {
    need(buf, 2, what)?;
    let len = buf.get_u16() as usize;
    need(buf, len, what)?;
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|_| ThlError::corruption(format!("{what} is not valid UTF-8")))?
        .to_string();
    buf.advance(len);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ReplEvent;
    use crate::serializer::{BinarySerializer, JsonSerializer};
    use proptest::prelude::*;

    fn codec() -> EventCodec {
        EventCodec::new(Arc::new(BinarySerializer))
    }

    fn sample_event() -> LogEvent {
        LogEvent::new(42, 1, false, ReplEvent::Change(b"update t".to_vec()))
            .with_source_id("db1")
            .with_epoch(7)
            .with_source_tstamp(1_700_000_000_000)
            .with_shard_id("orders")
            .with_event_id("mysql-bin.000003:1204")
    }

    #[test]
    fn event_roundtrip() {
        let codec = codec();
        let event = sample_event();
        let record = codec.encode_event(&event).unwrap();
        assert_eq!(record.record_type, RecordType::Event);
        assert_eq!(codec.decode_event(&record).unwrap(), event);
    }

    #[test]
    fn header_decodes_without_payload() {
        let codec = codec();
        let event = sample_event();
        let record = codec.encode_event(&event).unwrap();
        assert_eq!(codec.decode_header(&record).unwrap(), event.header);
    }

    #[test]
    fn event_payload_layout() {
        let codec = codec();
        let event = LogEvent::change(1, Vec::new());
        let record = codec.encode_event(&event).unwrap();

        let p = &record.payload;
        assert_eq!(&p[0..8], &1i64.to_be_bytes());
        assert_eq!(&p[8..10], &0i16.to_be_bytes());
        assert_eq!(p[10], 1);
        // empty source id
        assert_eq!(&p[11..13], &[0, 0]);
    }

    #[test]
    fn filtered_range_shares_event_type() {
        let codec = EventCodec::new(Arc::new(JsonSerializer));
        let event = LogEvent::filtered(10, 19, 0);
        let record = codec.encode_event(&event).unwrap();
        assert_eq!(record.record_type, RecordType::Event);

        let decoded = codec.decode_event(&record).unwrap();
        assert!(decoded.is_filtered());
        assert_eq!(decoded.last_seqno(), 19);
    }

    #[test]
    fn rotate_roundtrip() {
        let codec = codec();
        let record = codec.encode_rotate(12);
        assert_eq!(record.payload, 12i64.to_be_bytes().to_vec());
        assert_eq!(codec.decode(&record).unwrap(), LogEntry::Rotate(12));
    }

    #[test]
    fn truncated_header_is_corruption() {
        let codec = codec();
        let record = codec.encode_event(&sample_event()).unwrap();
        let short = LogRecord::new(RecordType::Event, record.payload[..20].to_vec());
        assert!(matches!(
            codec.decode_header(&short),
            Err(ThlError::Corruption { .. })
        ));
    }

    #[test]
    fn wrong_record_type_is_corruption() {
        let codec = codec();
        let rotate = codec.encode_rotate(2);
        assert!(codec.decode_event(&rotate).is_err());
        let event = codec.encode_event(&sample_event()).unwrap();
        assert!(codec.decode_rotate(&event).is_err());
    }

    proptest! {
        #[test]
        fn encoded_records_decode_to_the_same_event(
            seqno in 0i64..i64::MAX,
            fragno in 0i16..100,
            last_frag in any::<bool>(),
            source_id in "[a-z0-9]{0,12}",
            event_id in "[a-z0-9:.]{0,24}",
            data in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let codec = codec();
            let event = LogEvent::new(seqno, fragno, last_frag, ReplEvent::Change(data))
                .with_source_id(source_id)
                .with_event_id(event_id);
            let record = codec.encode_event(&event).unwrap();
            let bytes = record.encode(true).unwrap();

            let decoded_record = LogRecord::decode_body(&bytes[4..], true, true, "p", 0).unwrap();
            prop_assert_eq!(&decoded_record, &record);
            prop_assert_eq!(codec.decode_event(&decoded_record).unwrap(), event);
            prop_assert_eq!(decoded_record.encode(true).unwrap(), bytes);
        }
    }
}
