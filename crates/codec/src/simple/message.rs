use base64::Engine;
use model::{Column, ColumnFlag, Datum, DdlEvent, RowChangedEvent, TableSchemaInfo, Ts};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const PROTOCOL_VERSION: u32 = 1;

pub(crate) fn build_ts_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// One column value as the simple protocol publishes it. Binary-flagged
/// bytes stay bytes (base64 in JSON); everything textual is a string.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SimpleValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl SimpleValue {
    pub fn from_column(column: &Column) -> Self {
        match &column.value {
            Datum::Null => SimpleValue::Null,
            Datum::I64(v) => SimpleValue::Int(*v),
            Datum::U64(v) => SimpleValue::UInt(*v),
            Datum::F64(v) => SimpleValue::Float(*v),
            Datum::Bytes(b) if column.flags.contains(ColumnFlag::BINARY) => {
                SimpleValue::Bytes(b.clone())
            }
            Datum::Bytes(b) => SimpleValue::Str(String::from_utf8_lossy(b).into_owned()),
            Datum::String(s) => SimpleValue::Str(s.clone()),
        }
    }
}

impl Serialize for SimpleValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SimpleValue::Null => serializer.serialize_none(),
            SimpleValue::Int(v) => serializer.serialize_i64(*v),
            SimpleValue::UInt(v) => serializer.serialize_u64(*v),
            SimpleValue::Float(v) => serializer.serialize_f64(*v),
            SimpleValue::Str(s) => serializer.serialize_str(s),
            SimpleValue::Bytes(b) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }
}

fn columns_to_map(columns: &[Column], handle_key_only: bool) -> BTreeMap<String, SimpleValue> {
    columns
        .iter()
        .filter(|c| !handle_key_only || c.is_handle_key())
        .map(|c| (c.name.clone(), SimpleValue::from_column(c)))
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DmlMessage {
    pub version: u32,
    pub database: String,
    pub table: String,
    pub table_id: i64,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub commit_ts: Ts,
    pub build_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<BTreeMap<String, SimpleValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_columns: Option<BTreeMap<String, SimpleValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_check_location: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub handle_key_only: bool,
}

impl DmlMessage {
    /// Project a row change into the simple protocol's DML form. With
    /// `handle_key_only`, only handle-key columns survive: enough to
    /// identify the row while shrinking an oversized payload.
    pub fn from_event(event: &RowChangedEvent, handle_key_only: bool) -> Self {
        let ty = if event.is_delete() {
            "DELETE"
        } else if event.is_update() {
            "UPDATE"
        } else {
            "INSERT"
        };

        let columns = (!event.columns.is_empty())
            .then(|| columns_to_map(&event.columns, handle_key_only));
        let pre_columns = (!event.pre_columns.is_empty())
            .then(|| columns_to_map(&event.pre_columns, handle_key_only));

        Self {
            version: PROTOCOL_VERSION,
            database: event.table.schema.clone(),
            table: event.table.table.clone(),
            table_id: event.table.table_id,
            ty,
            commit_ts: event.commit_ts,
            build_ts: build_ts_now(),
            columns,
            pre_columns,
            claim_check_location: None,
            handle_key_only,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DdlMessage {
    pub version: u32,
    #[serde(rename = "type")]
    pub ty: model::DdlType,
    pub sql: String,
    pub commit_ts: Ts,
    pub build_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_schema: Option<TableSchemaInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_table_schema: Option<TableSchemaInfo>,
}

impl DdlMessage {
    pub fn from_event(event: &DdlEvent) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            ty: event.ty,
            sql: event.query.clone(),
            commit_ts: event.commit_ts,
            build_ts: build_ts_now(),
            table_schema: Some(event.table_info.clone()),
            pre_table_schema: event.pre_table_info.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WatermarkMessage {
    pub version: u32,
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub commit_ts: Ts,
    pub build_ts: i64,
}

impl WatermarkMessage {
    pub fn new(ts: Ts) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            ty: "WATERMARK",
            commit_ts: ts,
            build_ts: build_ts_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{ColumnType, TableName};

    fn event() -> RowChangedEvent {
        RowChangedEvent {
            commit_ts: 433305438660591626,
            table: TableName::new("shop", "orders", 11),
            columns: vec![
                Column::new("id", ColumnType::Long, Datum::I64(42))
                    .with_flags(ColumnFlag::HANDLE_KEY),
                Column::new("note", ColumnType::Varchar, Datum::String("hi".into())),
                Column::new("blob", ColumnType::Blob, Datum::Bytes(vec![1, 2]))
                    .with_flags(ColumnFlag::BINARY),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn dml_json_shape() {
        let mut msg = DmlMessage::from_event(&event(), false);
        msg.build_ts = 0;
        let got = serde_json::to_value(&msg).unwrap();
        assert_eq!(got["type"], "INSERT");
        assert_eq!(got["database"], "shop");
        assert_eq!(got["table"], "orders");
        assert_eq!(got["commitTs"], 433305438660591626u64);
        assert_eq!(got["columns"]["id"], 42);
        assert_eq!(got["columns"]["blob"], "AQI=");
        assert!(got.get("preColumns").is_none());
        assert!(got.get("claimCheckLocation").is_none());
        assert!(got.get("handleKeyOnly").is_none());
    }

    #[test]
    fn handle_key_only_keeps_identity_columns() {
        let msg = DmlMessage::from_event(&event(), true);
        let columns = msg.columns.as_ref().unwrap();
        assert_eq!(columns.len(), 1);
        assert!(columns.contains_key("id"));
        assert!(msg.handle_key_only);

        let got = serde_json::to_value(&msg).unwrap();
        assert_eq!(got["handleKeyOnly"], true);
    }

    #[test]
    fn watermark_shape() {
        let mut msg = WatermarkMessage::new(7);
        msg.build_ts = 0;
        let got = serde_json::to_value(&msg).unwrap();
        assert_eq!(got["type"], "WATERMARK");
        assert_eq!(got["commitTs"], 7);
    }
}
