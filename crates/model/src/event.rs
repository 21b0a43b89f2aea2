use crate::{Column, ColumnInfo, TableName, Ts};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Operation carried by a raw KV entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Put,
    Delete,
    /// A resolved-timestamp watermark: no further row events at or below
    /// `commit_ts` will arrive for this table.
    Resolved,
}

/// RawKvEntry is one event as emitted by the upstream puller, before the
/// mounter has decoded it into a [`RowChangedEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawKvEntry {
    pub op: OpType,
    pub commit_ts: Ts,
    pub key: Bytes,
    pub value: Bytes,
    pub old_value: Option<Bytes>,
}

impl RawKvEntry {
    pub fn approximate_bytes(&self) -> usize {
        self.key.len()
            + self.value.len()
            + self.old_value.as_ref().map(|v| v.len()).unwrap_or_default()
    }
}

/// PolymorphicEvent is the unit flowing through the sorter: a raw entry plus,
/// once the mounter has run, its decoded row.
#[derive(Debug, Clone)]
pub struct PolymorphicEvent {
    pub raw: RawKvEntry,
    pub row: Option<RowChangedEvent>,
}

impl PolymorphicEvent {
    pub fn new(raw: RawKvEntry) -> Self {
        Self { raw, row: None }
    }

    /// A watermark event at `ts`.
    pub fn resolved(ts: Ts) -> Self {
        Self {
            raw: RawKvEntry {
                op: OpType::Resolved,
                commit_ts: ts,
                key: Bytes::new(),
                value: Bytes::new(),
                old_value: None,
            },
            row: None,
        }
    }

    pub fn commit_ts(&self) -> Ts {
        self.raw.commit_ts
    }

    pub fn is_resolved(&self) -> bool {
        self.raw.op == OpType::Resolved
    }

    pub fn approximate_bytes(&self) -> usize {
        self.raw.approximate_bytes()
    }
}

/// A decoded row change. `columns` is empty for deletes and `pre_columns` is
/// empty for inserts; updates carry both. `col_infos` aligns index-wise with
/// whichever side is populated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowChangedEvent {
    pub commit_ts: Ts,
    pub table: TableName,
    pub columns: Vec<Column>,
    pub pre_columns: Vec<Column>,
    pub col_infos: Vec<ColumnInfo>,
}

impl RowChangedEvent {
    pub fn is_insert(&self) -> bool {
        !self.columns.is_empty() && self.pre_columns.is_empty()
    }

    pub fn is_update(&self) -> bool {
        !self.columns.is_empty() && !self.pre_columns.is_empty()
    }

    pub fn is_delete(&self) -> bool {
        self.columns.is_empty() && !self.pre_columns.is_empty()
    }

    /// Columns describing the row after the change, or before it for deletes.
    pub fn effective_columns(&self) -> &[Column] {
        if self.is_delete() {
            &self.pre_columns
        } else {
            &self.columns
        }
    }

    /// The handle-key columns of the effective side.
    pub fn handle_key_columns(&self) -> Vec<&Column> {
        self.effective_columns()
            .iter()
            .filter(|c| c.is_handle_key())
            .collect()
    }

    pub fn handle_key_names(&self) -> Vec<String> {
        self.handle_key_columns()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn approximate_bytes(&self) -> usize {
        self.columns
            .iter()
            .chain(self.pre_columns.iter())
            .map(Column::approximate_bytes)
            .sum()
    }
}

/// DDL statement kinds the egress distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DdlType {
    CreateSchema,
    DropSchema,
    CreateTable,
    DropTable,
    AlterTable,
    TruncateTable,
    RenameTable,
    AddColumn,
    DropColumn,
    AddIndex,
    DropIndex,
    CreateView,
    DropView,
}

/// Upstream data type of one column, as the simple protocol publishes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeSchema {
    pub mysql_type: String,
    #[serde(default)]
    pub charset: String,
    #[serde(default)]
    pub collate: String,
    #[serde(default)]
    pub length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zerofill: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataTypeSchema,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    pub name: String,
    pub unique: bool,
    pub primary: bool,
    pub nullable: bool,
    pub columns: Vec<String>,
}

/// Full table schema published alongside DDL events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchemaInfo {
    #[serde(flatten)]
    pub name: TableName,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

/// A DDL event with its schema snapshots before and after execution.
#[derive(Debug, Clone, PartialEq)]
pub struct DdlEvent {
    pub commit_ts: Ts,
    pub query: String,
    pub ty: DdlType,
    pub table_info: TableSchemaInfo,
    pub pre_table_info: Option<TableSchemaInfo>,
}
