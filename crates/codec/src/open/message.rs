use crate::CodecError;
use base64::Engine;
use model::{Column, ColumnFlag, DdlEvent, Datum, RowChangedEvent, Ts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) const TYPE_ROW: u8 = 1;
pub(crate) const TYPE_DDL: u8 = 2;
pub(crate) const TYPE_RESOLVED: u8 = 3;

/// The key half of one open-protocol record.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MessageKey {
    pub ts: Ts,
    #[serde(rename = "scm", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(rename = "tbl", skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(rename = "t")]
    pub ty: u8,
}

/// The value half of a row record: exactly one of `update`, `delete` is set,
/// with `pre` accompanying `update` for updates.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RowValue {
    #[serde(rename = "u", skip_serializing_if = "Option::is_none")]
    pub update: Option<BTreeMap<String, ColumnValue>>,
    #[serde(rename = "p", skip_serializing_if = "Option::is_none")]
    pub pre: Option<BTreeMap<String, ColumnValue>>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub delete: Option<BTreeMap<String, ColumnValue>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ColumnValue {
    #[serde(rename = "t")]
    pub ty: u8,
    #[serde(rename = "h", skip_serializing_if = "Option::is_none")]
    pub handle: Option<bool>,
    #[serde(rename = "f")]
    pub flags: u64,
    #[serde(rename = "v")]
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DdlValue {
    #[serde(rename = "q")]
    pub query: String,
    #[serde(rename = "t")]
    pub ty: model::DdlType,
}

fn columns_to_map(columns: &[Column]) -> BTreeMap<String, ColumnValue> {
    columns
        .iter()
        .map(|column| {
            let value = match &column.value {
                Datum::Null => serde_json::Value::Null,
                Datum::I64(v) => serde_json::Value::from(*v),
                Datum::U64(v) => serde_json::Value::from(*v),
                Datum::F64(v) => serde_json::Value::from(*v),
                Datum::Bytes(b) if column.flags.contains(ColumnFlag::BINARY) => {
                    serde_json::Value::from(base64::engine::general_purpose::STANDARD.encode(b))
                }
                Datum::Bytes(b) => serde_json::Value::from(String::from_utf8_lossy(b).into_owned()),
                Datum::String(s) => serde_json::Value::from(s.clone()),
            };
            (
                column.name.clone(),
                ColumnValue {
                    ty: column.ty.code(),
                    handle: column.is_handle_key().then_some(true),
                    flags: column.flags.bits(),
                    value,
                },
            )
        })
        .collect()
}

/// Encode a row change into its key and value JSON halves.
pub(crate) fn row_change_to_bytes(
    event: &RowChangedEvent,
) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
    let key = MessageKey {
        ts: event.commit_ts,
        schema: Some(event.table.schema.clone()),
        table: Some(event.table.table.clone()),
        ty: TYPE_ROW,
    };

    let mut value = RowValue::default();
    if event.is_delete() {
        value.delete = Some(columns_to_map(&event.pre_columns));
    } else {
        value.update = Some(columns_to_map(&event.columns));
        if event.is_update() {
            value.pre = Some(columns_to_map(&event.pre_columns));
        }
    }

    Ok((serde_json::to_vec(&key)?, serde_json::to_vec(&value)?))
}

pub(crate) fn ddl_event_to_bytes(event: &DdlEvent) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
    let key = MessageKey {
        ts: event.commit_ts,
        schema: Some(event.table_info.name.schema.clone()),
        table: Some(event.table_info.name.table.clone()),
        ty: TYPE_DDL,
    };
    let value = DdlValue {
        query: event.query.clone(),
        ty: event.ty,
    };
    Ok((serde_json::to_vec(&key)?, serde_json::to_vec(&value)?))
}

pub(crate) fn resolved_ts_to_bytes(ts: Ts) -> Result<Vec<u8>, CodecError> {
    let key = MessageKey {
        ts,
        schema: None,
        table: None,
        ty: TYPE_RESOLVED,
    };
    Ok(serde_json::to_vec(&key)?)
}
