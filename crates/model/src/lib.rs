//! Core data model of the changefeed egress pipeline: logical timestamps,
//! table and column descriptions, row-change and DDL events, and the
//! sink-side configuration surface.

mod column;
mod config;
mod event;
mod table;
mod ts;

pub use column::{Column, ColumnFlag, ColumnInfo, ColumnType, Datum};
pub use config::{
    Compression, ConfigError, ConsistentLevel, CsvConfig, DispatchRule, LargeMessageHandle,
    LargeMessageHandleMode, Protocol, SinkConfig, DEFAULT_ENCODER_CONCURRENCY,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_MESSAGE_BYTES,
};
pub use event::{
    ColumnSchema, DataTypeSchema, DdlEvent, DdlType, IndexSchema, OpType, PolymorphicEvent,
    RawKvEntry, RowChangedEvent, TableSchemaInfo,
};
pub use table::TableName;
pub use ts::{compose_ts, logical_ts, physical_time, physical_ts, Ts};
