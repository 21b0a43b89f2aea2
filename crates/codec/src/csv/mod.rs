//! Canonical CSV: one record per row change, with configurable delimiter,
//! quoting or backslash-escaping, terminator, and null literal.

mod message;

use crate::{
    compose_callbacks, Callback, CodecError, Config, Message, MessageType, RowEventEncoder,
    MAX_RECORD_OVERHEAD,
};
use message::CsvMessage;
use model::{DdlEvent, Protocol, RowChangedEvent, Ts};
use std::sync::Arc;

/// Batch encoder for CSV. Records accumulate into one value buffer which is
/// sealed into a message whenever another record would breach the byte cap.
pub struct CsvBatchEncoder {
    config: Arc<Config>,
    messages: Vec<Message>,
    value_buf: Vec<u8>,
    callbacks: Vec<Callback>,
    batch_rows: usize,
    // Metadata of the most recently appended row, stamped onto the sealed
    // message.
    last_ts: Ts,
    last_schema: Option<String>,
    last_table: Option<String>,
    last_table_id: i64,
}

impl CsvBatchEncoder {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            messages: Vec::new(),
            value_buf: Vec::new(),
            callbacks: Vec::new(),
            batch_rows: 0,
            last_ts: 0,
            last_schema: None,
            last_table: None,
            last_table_id: 0,
        }
    }

    fn seal(&mut self) {
        if self.value_buf.is_empty() {
            return;
        }
        let mut msg = Message::new(
            Protocol::Csv,
            Vec::new(),
            std::mem::take(&mut self.value_buf),
            self.last_ts,
            MessageType::Row,
            self.last_schema.take(),
            self.last_table.take(),
        );
        msg.table_id = self.last_table_id;
        msg.set_rows_count(self.batch_rows);
        if !self.callbacks.is_empty() {
            msg.callback = Some(compose_callbacks(std::mem::take(&mut self.callbacks)));
        }
        self.messages.push(msg);
        self.batch_rows = 0;
    }
}

#[async_trait::async_trait]
impl RowEventEncoder for CsvBatchEncoder {
    async fn append_row(
        &mut self,
        _topic: &str,
        event: &RowChangedEvent,
        callback: Option<Callback>,
    ) -> Result<(), CodecError> {
        let mut record = Vec::new();
        CsvMessage::from_event(&self.config.csv, event)?.encode(&mut record);

        // A record that cannot fit alone can never be sent.
        if record.len() + MAX_RECORD_OVERHEAD > self.config.max_message_bytes {
            return Err(CodecError::MessageTooLarge {
                table: event.table.to_string(),
                commit_ts: event.commit_ts,
                length: record.len() + MAX_RECORD_OVERHEAD,
                max: self.config.max_message_bytes,
            });
        }
        let overflows = !self.value_buf.is_empty()
            && self.value_buf.len() + record.len() + MAX_RECORD_OVERHEAD
                > self.config.max_message_bytes;
        if overflows || self.batch_rows >= self.config.max_batch_size {
            self.seal();
        }

        self.value_buf.extend_from_slice(&record);
        self.batch_rows += 1;
        self.last_ts = event.commit_ts;
        self.last_schema = Some(event.table.schema.clone());
        self.last_table = Some(event.table.table.clone());
        self.last_table_id = event.table.table_id;
        if let Some(callback) = callback {
            self.callbacks.push(callback);
        }
        Ok(())
    }

    fn encode_ddl(&mut self, ddl: &DdlEvent) -> Result<Message, CodecError> {
        // CSV carries no DDL records; the schema travels out of band. An
        // empty DDL message keeps the pipeline's bookkeeping uniform.
        Ok(Message::new_ddl(Protocol::Csv, Vec::new(), Vec::new(), ddl))
    }

    fn encode_checkpoint(&mut self, ts: Ts) -> Result<Message, CodecError> {
        Ok(Message::new_resolved(
            Protocol::Csv,
            Vec::new(),
            Vec::new(),
            ts,
        ))
    }

    fn build(&mut self) -> Vec<Message> {
        self.seal();
        std::mem::take(&mut self.messages)
    }
}
