//! The simple protocol: one structured record per event, as JSON or Avro
//! against a fixed schema, with handle-key-only downgrade and claim-check
//! offload for oversized rows.

mod marshal;
mod message;

pub(crate) use marshal::Marshaller;

use crate::{
    claimcheck::ClaimCheck, compress, Callback, CodecError, Config, Message, MessageType,
    RowEventEncoder,
};
use message::{DdlMessage, DmlMessage, WatermarkMessage};
use model::{DdlEvent, Protocol, RowChangedEvent, Ts};
use std::sync::Arc;

pub struct SimpleEncoder {
    config: Arc<Config>,
    marshaller: Arc<Marshaller>,
    claim_check: Option<Arc<ClaimCheck>>,
    messages: Vec<Message>,
}

impl SimpleEncoder {
    pub(crate) fn new(
        config: Arc<Config>,
        marshaller: Arc<Marshaller>,
        claim_check: Option<Arc<ClaimCheck>>,
    ) -> Self {
        Self {
            config,
            marshaller,
            claim_check,
            messages: Vec::new(),
        }
    }

    fn marshal_and_compress(&self, msg: &DmlMessage) -> Result<Vec<u8>, CodecError> {
        let value = self.marshaller.marshal_dml(msg)?;
        compress(self.config.compression, value)
    }
}

#[async_trait::async_trait]
impl RowEventEncoder for SimpleEncoder {
    async fn append_row(
        &mut self,
        _topic: &str,
        event: &RowChangedEvent,
        callback: Option<Callback>,
    ) -> Result<(), CodecError> {
        let value = self.marshal_and_compress(&DmlMessage::from_event(event, false))?;

        let mut result = Message::new(
            Protocol::Simple,
            Vec::new(),
            value,
            event.commit_ts,
            MessageType::Row,
            Some(event.table.schema.clone()),
            Some(event.table.table.clone()),
        );
        result.table_id = event.table.table_id;
        result.handle_keys = event.handle_key_names();
        result.callback = callback;
        result.inc_rows_count();

        if result.length() <= self.config.max_message_bytes {
            self.messages.push(result);
            return Ok(());
        }

        if self.config.large_message_handle.is_disabled() {
            tracing::error!(
                max_message_bytes = self.config.max_message_bytes,
                length = result.length(),
                table = %event.table,
                "single message too large for the simple protocol"
            );
            return Err(CodecError::MessageTooLarge {
                table: event.table.to_string(),
                commit_ts: event.commit_ts,
                length: result.length(),
                max: self.config.max_message_bytes,
            });
        }

        // Downgrade to the handle-key columns, which identify the row while
        // shedding its payload.
        let mut reduced = DmlMessage::from_event(event, true);
        if let Some(claim_check) = &self.claim_check {
            let name = ClaimCheck::new_file_name();
            reduced.claim_check_location = Some(claim_check.location_of(&name));
            claim_check
                .write_message(&result.key, &result.value, &name)
                .await?;
        }
        result.value = self.marshal_and_compress(&reduced)?;

        if result.length() <= self.config.max_message_bytes {
            tracing::warn!(
                max_message_bytes = self.config.max_message_bytes,
                length = result.length(),
                table = %event.table,
                "oversized message reduced to handle-key columns"
            );
            self.messages.push(result);
            return Ok(());
        }

        Err(CodecError::MessageTooLarge {
            table: event.table.to_string(),
            commit_ts: event.commit_ts,
            length: result.length(),
            max: self.config.max_message_bytes,
        })
    }

    fn encode_ddl(&mut self, ddl: &DdlEvent) -> Result<Message, CodecError> {
        let value = self.marshaller.marshal_ddl(&DdlMessage::from_event(ddl))?;
        let value = compress(self.config.compression, value)?;
        let result = Message::new_ddl(Protocol::Simple, Vec::new(), value, ddl);
        if result.length() > self.config.max_message_bytes {
            return Err(CodecError::MessageTooLarge {
                table: ddl.table_info.name.to_string(),
                commit_ts: ddl.commit_ts,
                length: result.length(),
                max: self.config.max_message_bytes,
            });
        }
        Ok(result)
    }

    fn encode_checkpoint(&mut self, ts: Ts) -> Result<Message, CodecError> {
        let value = self.marshaller.marshal_watermark(&WatermarkMessage::new(ts))?;
        let value = compress(self.config.compression, value)?;
        Ok(Message::new_resolved(Protocol::Simple, Vec::new(), value, ts))
    }

    fn build(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }
}
