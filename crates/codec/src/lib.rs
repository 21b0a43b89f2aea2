//! The batch-encoder family: protocol-specific conversion of row and DDL
//! events into outbound messages, under a hard per-message byte cap, with
//! claim-check offloading for oversized payloads.

mod claimcheck;
mod compression;
mod config;
mod csv;
mod group;
mod message;
mod open;
mod simple;

pub use claimcheck::{ClaimCheck, ClaimCheckMessage};
pub use compression::compress;
pub use config::{Config, EncodingFormat};
pub use csv::CsvBatchEncoder;
pub use group::EncoderGroup;
pub use message::{
    compose_callbacks, Callback, Message, MessageType, TopicPartitionKey, MAX_RECORD_OVERHEAD,
};
pub use open::{decode_batch, OpenBatchEncoder, BATCH_VERSION_1};
pub use simple::SimpleEncoder;

use model::{DdlEvent, Protocol, RowChangedEvent, Ts};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Config(#[from] model::ConfigError),
    #[error("protocol '{0}' has no encoder in this sink")]
    UnsupportedProtocol(Protocol),
    #[error("claim-check is enabled but protocol '{0}' does not implement it")]
    ClaimCheckUnsupported(Protocol),
    #[error("single row of table {table} at commit-ts {commit_ts} exceeds max-message-bytes ({length} > {max})")]
    RowTooLarge {
        table: String,
        commit_ts: Ts,
        length: usize,
        max: usize,
    },
    #[error("message for table {table} at commit-ts {commit_ts} exceeds max-message-bytes ({length} > {max})")]
    MessageTooLarge {
        table: String,
        commit_ts: Ts,
        length: usize,
        max: usize,
    },
    #[error("json encoding failed")]
    Json(#[from] serde_json::Error),
    #[error("avro encoding failed")]
    Avro(#[from] apache_avro::Error),
    #[error("compression failed")]
    Compress(#[source] std::io::Error),
    #[error("column '{column}' does not fit its declared type: {reason}")]
    EncodeFailed { column: String, reason: String },
    #[error("claim-check storage uri '{0}' is not supported")]
    ClaimCheckUri(String),
    #[error("claim-check write of '{name}' failed")]
    ClaimCheckWriteFailed {
        name: String,
        #[source]
        source: opendal::Error,
    },
    #[error("open-protocol batch is malformed")]
    MalformedBatch,
    #[error("encoder group is closed")]
    GroupClosed,
}

/// A transaction-scoped group of row events. Only protocols with explicit
/// txn framing look at it.
#[derive(Debug, Clone)]
pub struct TxnEvent {
    pub commit_ts: Ts,
    pub rows: Vec<RowChangedEvent>,
}

/// The common encoder contract. Encoders buffer appended rows until
/// [`build`](RowEventEncoder::build) drains them; DDL and checkpoint events
/// encode immediately, outside any batch.
#[async_trait::async_trait]
pub trait RowEventEncoder: Send {
    /// Buffer one row change bound for `topic`. `callback` fires once the
    /// message carrying this row is acknowledged by the bus.
    async fn append_row(
        &mut self,
        topic: &str,
        event: &RowChangedEvent,
        callback: Option<Callback>,
    ) -> Result<(), CodecError>;

    /// Observe a transaction boundary. A no-op unless the protocol frames
    /// transactions.
    fn append_txn(&mut self, _txn: &TxnEvent) -> Result<(), CodecError> {
        Ok(())
    }

    fn encode_ddl(&mut self, ddl: &DdlEvent) -> Result<Message, CodecError>;

    fn encode_checkpoint(&mut self, ts: Ts) -> Result<Message, CodecError>;

    /// Drain buffered rows into finished messages. The encoder is empty
    /// afterwards.
    fn build(&mut self) -> Vec<Message>;
}

/// Builds ready-to-use encoders for the configured protocol. Shared state
/// (the claim-check store, the parsed Avro schemas) is constructed once and
/// handed to every encoder.
pub struct EncoderBuilder {
    config: Arc<Config>,
    claim_check: Option<Arc<ClaimCheck>>,
    marshaller: Option<Arc<simple::Marshaller>>,
}

impl EncoderBuilder {
    pub fn new(config: Config) -> Result<Self, CodecError> {
        match config.protocol {
            Protocol::Open | Protocol::Csv | Protocol::Simple => (),
            other => return Err(CodecError::UnsupportedProtocol(other)),
        }
        if config.large_message_handle.claim_check_enabled() && config.protocol != Protocol::Simple
        {
            return Err(CodecError::ClaimCheckUnsupported(config.protocol));
        }
        config.validate()?;

        let claim_check = if config.large_message_handle.claim_check_enabled() {
            Some(Arc::new(ClaimCheck::new(
                &config.large_message_handle.claim_check_storage_uri,
            )?))
        } else {
            None
        };
        let marshaller = if config.protocol == Protocol::Simple {
            Some(Arc::new(simple::Marshaller::new(config.encoding_format)?))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            claim_check,
            marshaller,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared claim-check store, when one is configured.
    pub fn claim_check(&self) -> Option<Arc<ClaimCheck>> {
        self.claim_check.clone()
    }

    pub fn build(&self) -> Box<dyn RowEventEncoder> {
        match self.config.protocol {
            Protocol::Open => Box::new(OpenBatchEncoder::new(self.config.clone())),
            Protocol::Csv => Box::new(CsvBatchEncoder::new(self.config.clone())),
            Protocol::Simple => Box::new(SimpleEncoder::new(
                self.config.clone(),
                self.marshaller.clone().expect("marshaller built with config"),
                self.claim_check.clone(),
            )),
            _ => unreachable!("protocol was validated at construction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{LargeMessageHandle, LargeMessageHandleMode};

    #[test]
    fn builder_rejects_protocols_without_encoders() {
        for protocol in [Protocol::CanalJson, Protocol::Avro] {
            let result = EncoderBuilder::new(Config {
                protocol,
                ..Default::default()
            });
            assert!(matches!(
                result,
                Err(CodecError::UnsupportedProtocol(p)) if p == protocol
            ));
        }
    }

    #[test]
    fn builder_rejects_claim_check_for_batch_protocols() {
        let result = EncoderBuilder::new(Config {
            protocol: Protocol::Open,
            large_message_handle: LargeMessageHandle {
                mode: LargeMessageHandleMode::ClaimCheck,
                claim_check_storage_uri: "memory:///".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(
            result,
            Err(CodecError::ClaimCheckUnsupported(Protocol::Open))
        ));
    }
}
