//! The open protocol: length-prefixed batches of JSON key/value records.
//!
//! ```text
//! key   = uint64_be version || repeat( uint64_be keyLen || keyBytes )
//! value = repeat( uint64_be valueLen || valueBytes )
//! ```

mod message;

use crate::{
    compose_callbacks, Callback, CodecError, Config, Message, MessageType, RowEventEncoder,
    MAX_RECORD_OVERHEAD,
};
use model::{DdlEvent, Protocol, RowChangedEvent, Ts};
use std::sync::Arc;

pub const BATCH_VERSION_1: u64 = 1;

/// Length of the two 8-byte length prefixes framing one record.
const FRAME_OVERHEAD: usize = 16;
/// Length of the version head opening a batch key.
const VERSION_HEAD: usize = 8;

/// Batch encoder for the open protocol. Rows append into the current
/// message until the batch-size or byte caps close it; per-row callbacks
/// aggregate into one composite callback per message.
pub struct OpenBatchEncoder {
    config: Arc<Config>,
    message_buf: Vec<Message>,
    callback_buf: Vec<Callback>,
    cur_batch_size: usize,
}

impl OpenBatchEncoder {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            message_buf: Vec::new(),
            callback_buf: Vec::new(),
            cur_batch_size: 0,
        }
    }

    /// Bind every pending per-row callback to the message that carried the
    /// rows, as one composite callback.
    fn try_build_callback(&mut self) {
        if self.message_buf.is_empty() || self.callback_buf.is_empty() {
            return;
        }
        let callbacks = std::mem::take(&mut self.callback_buf);
        let last = self.message_buf.last_mut().expect("checked non-empty");
        last.callback = Some(compose_callbacks(callbacks));
    }
}

#[async_trait::async_trait]
impl RowEventEncoder for OpenBatchEncoder {
    async fn append_row(
        &mut self,
        _topic: &str,
        event: &RowChangedEvent,
        callback: Option<Callback>,
    ) -> Result<(), CodecError> {
        let (key, value) = message::row_change_to_bytes(event)?;

        // A row which cannot fit alone in a fresh message is never sendable.
        let length = key.len() + value.len() + MAX_RECORD_OVERHEAD + FRAME_OVERHEAD + VERSION_HEAD;
        if length > self.config.max_message_bytes {
            tracing::warn!(
                max_message_bytes = self.config.max_message_bytes,
                length,
                table = %event.table,
                "single row too large for open protocol"
            );
            return Err(CodecError::RowTooLarge {
                table: event.table.to_string(),
                commit_ts: event.commit_ts,
                length,
                max: self.config.max_message_bytes,
            });
        }

        let needs_new_message = match self.message_buf.last() {
            None => true,
            Some(last) => {
                self.cur_batch_size >= self.config.max_batch_size
                    || last.length() + key.len() + value.len() + FRAME_OVERHEAD
                        > self.config.max_message_bytes
            }
        };
        if needs_new_message {
            self.try_build_callback();
            let version_head = BATCH_VERSION_1.to_be_bytes().to_vec();
            self.message_buf.push(Message::new(
                Protocol::Open,
                version_head,
                Vec::new(),
                0,
                MessageType::Row,
                None,
                None,
            ));
            self.cur_batch_size = 0;
        }

        let msg = self.message_buf.last_mut().expect("just ensured non-empty");
        msg.key.extend_from_slice(&(key.len() as u64).to_be_bytes());
        msg.key.extend_from_slice(&key);
        msg.value
            .extend_from_slice(&(value.len() as u64).to_be_bytes());
        msg.value.extend_from_slice(&value);
        msg.ts = event.commit_ts;
        msg.schema = Some(event.table.schema.clone());
        msg.table = Some(event.table.table.clone());
        msg.table_id = event.table.table_id;
        msg.inc_rows_count();

        if let Some(callback) = callback {
            self.callback_buf.push(callback);
        }
        self.cur_batch_size += 1;
        Ok(())
    }

    fn encode_ddl(&mut self, ddl: &DdlEvent) -> Result<Message, CodecError> {
        let (key, value) = message::ddl_event_to_bytes(ddl)?;

        let mut key_buf = Vec::with_capacity(VERSION_HEAD + 8 + key.len());
        key_buf.extend_from_slice(&BATCH_VERSION_1.to_be_bytes());
        key_buf.extend_from_slice(&(key.len() as u64).to_be_bytes());
        key_buf.extend_from_slice(&key);

        let mut value_buf = Vec::with_capacity(8 + value.len());
        value_buf.extend_from_slice(&(value.len() as u64).to_be_bytes());
        value_buf.extend_from_slice(&value);

        Ok(Message::new_ddl(Protocol::Open, key_buf, value_buf, ddl))
    }

    fn encode_checkpoint(&mut self, ts: Ts) -> Result<Message, CodecError> {
        let key = message::resolved_ts_to_bytes(ts)?;

        let mut key_buf = Vec::with_capacity(VERSION_HEAD + 8 + key.len());
        key_buf.extend_from_slice(&BATCH_VERSION_1.to_be_bytes());
        key_buf.extend_from_slice(&(key.len() as u64).to_be_bytes());
        key_buf.extend_from_slice(&key);

        let value_buf = 0u64.to_be_bytes().to_vec();

        Ok(Message::new_resolved(Protocol::Open, key_buf, value_buf, ts))
    }

    fn build(&mut self) -> Vec<Message> {
        self.try_build_callback();
        self.cur_batch_size = 0;
        std::mem::take(&mut self.message_buf)
    }
}

/// Split the framed key and value halves of an open-protocol batch back into
/// per-row `(key, value)` byte pairs.
pub fn decode_batch(key: &[u8], value: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CodecError> {
    if key.len() < VERSION_HEAD {
        return Err(CodecError::MalformedBatch);
    }
    let version = u64::from_be_bytes(key[..VERSION_HEAD].try_into().expect("checked length"));
    if version != BATCH_VERSION_1 {
        return Err(CodecError::MalformedBatch);
    }

    let keys = split_frames(&key[VERSION_HEAD..])?;
    let values = split_frames(value)?;
    if keys.len() != values.len() {
        return Err(CodecError::MalformedBatch);
    }
    Ok(keys.into_iter().zip(values).collect())
}

fn split_frames(mut data: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut frames = Vec::new();
    while !data.is_empty() {
        if data.len() < 8 {
            return Err(CodecError::MalformedBatch);
        }
        let len = u64::from_be_bytes(data[..8].try_into().expect("checked length")) as usize;
        data = &data[8..];
        if data.len() < len {
            return Err(CodecError::MalformedBatch);
        }
        frames.push(data[..len].to_vec());
        data = &data[len..];
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Column, ColumnFlag, ColumnType, Datum, TableName};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(commit_ts: Ts, id: i64) -> RowChangedEvent {
        RowChangedEvent {
            commit_ts,
            table: TableName::new("test", "t1", 7),
            columns: vec![
                Column::new("id", ColumnType::Long, Datum::I64(id))
                    .with_flags(ColumnFlag::HANDLE_KEY),
                Column::new("name", ColumnType::Varchar, Datum::String("abcd".into())),
            ],
            ..Default::default()
        }
    }

    fn config(max_message_bytes: usize, max_batch_size: usize) -> Arc<Config> {
        Arc::new(Config {
            max_message_bytes,
            max_batch_size,
            ..Default::default()
        })
    }

    /// Framed size of one encoded row, used to size max-message-bytes in
    /// tests below.
    fn framed_row_size() -> usize {
        let (key, value) = message::row_change_to_bytes(&row(1, 0)).unwrap();
        key.len() + value.len() + FRAME_OVERHEAD
    }

    #[tokio::test]
    async fn batches_round_trip_row_bytes() {
        let mut encoder = OpenBatchEncoder::new(config(1 << 20, 64));
        let rows: Vec<_> = (0..5).map(|i| row(100 + i as u64, i)).collect();
        for r in &rows {
            encoder.append_row("topic", r, None).await.unwrap();
        }

        let messages = encoder.build();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].rows_count(), 5);
        assert_eq!(messages[0].ts, 104);

        let decoded = decode_batch(&messages[0].key, &messages[0].value).unwrap();
        assert_eq!(decoded.len(), 5);
        for (r, (key, value)) in rows.iter().zip(&decoded) {
            let (want_key, want_value) = message::row_change_to_bytes(r).unwrap();
            assert_eq!(key, &want_key);
            assert_eq!(value, &want_value);
        }
    }

    #[tokio::test]
    async fn byte_cap_splits_batches_and_groups_callbacks() {
        // Size the cap to fit exactly two framed rows per message.
        let two_rows = VERSION_HEAD + 2 * framed_row_size() + MAX_RECORD_OVERHEAD + 120;
        let mut encoder = OpenBatchEncoder::new(config(two_rows, 64));

        static FIRED: AtomicUsize = AtomicUsize::new(0);
        for i in 0..5 {
            encoder
                .append_row(
                    "topic",
                    &row(100, i),
                    Some(Box::new(|| {
                        FIRED.fetch_add(1, Ordering::SeqCst);
                    })),
                )
                .await
                .unwrap();
        }

        let mut messages = encoder.build();
        let counts: Vec<usize> = messages.iter().map(Message::rows_count).collect();
        assert_eq!(counts, vec![2, 2, 1]);

        // Three composite callbacks, one per message, firing all five.
        let with_callbacks = messages.iter().filter(|m| m.callback.is_some()).count();
        assert_eq!(with_callbacks, 3);
        for m in &mut messages {
            m.ack();
        }
        assert_eq!(FIRED.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn batch_size_cap_splits_batches() {
        let mut encoder = OpenBatchEncoder::new(config(1 << 20, 2));
        for i in 0..5 {
            encoder.append_row("topic", &row(100, i), None).await.unwrap();
        }
        let counts: Vec<usize> = encoder.build().iter().map(Message::rows_count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn oversized_single_row_is_rejected() {
        let mut encoder = OpenBatchEncoder::new(config(64, 16));
        let result = encoder.append_row("topic", &row(1, 1), None).await;
        assert!(matches!(result, Err(CodecError::RowTooLarge { .. })));
    }

    #[tokio::test]
    async fn ddl_and_checkpoint_are_framed_single_records() {
        let mut encoder = OpenBatchEncoder::new(config(1 << 20, 16));

        let ddl = DdlEvent {
            commit_ts: 9,
            query: "CREATE TABLE test.t1 (id INT PRIMARY KEY)".to_string(),
            ty: model::DdlType::CreateTable,
            table_info: model::TableSchemaInfo {
                name: TableName::new("test", "t1", 7),
                ..Default::default()
            },
            pre_table_info: None,
        };
        let msg = encoder.encode_ddl(&ddl).unwrap();
        assert_eq!(msg.ty, MessageType::Ddl);
        assert_eq!(
            u64::from_be_bytes(msg.key[..8].try_into().unwrap()),
            BATCH_VERSION_1
        );
        let decoded = decode_batch(&msg.key, &msg.value).unwrap();
        assert_eq!(decoded.len(), 1);

        let msg = encoder.encode_checkpoint(42).unwrap();
        assert_eq!(msg.ty, MessageType::Resolved);
        assert_eq!(msg.ts, 42);
        // A checkpoint has a key frame and an explicitly empty value frame.
        let decoded = decode_batch(&msg.key, &msg.value).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].1.is_empty());
    }

    #[test]
    fn malformed_batches_are_rejected() {
        assert!(decode_batch(b"short", &[]).is_err());
        let bad_version = 2u64.to_be_bytes();
        assert!(decode_batch(&bad_version, &[]).is_err());
    }
}
