use super::message::{DdlMessage, DmlMessage, SimpleValue, WatermarkMessage};
use crate::{CodecError, EncodingFormat};
use apache_avro::types::Value;
use apache_avro::Schema;
use model::TableSchemaInfo;
use std::collections::{BTreeMap, HashMap};

const WATERMARK_SCHEMA: &str = include_str!("schema/watermark.avsc");
const DML_SCHEMA: &str = include_str!("schema/dml.avsc");
const DDL_SCHEMA: &str = include_str!("schema/ddl.avsc");

/// Marshals simple-protocol messages into their configured wire format.
/// The Avro schemas parse once, at sink construction, so a malformed schema
/// can never surface mid-stream.
pub(crate) enum Marshaller {
    Json,
    Avro(AvroSchemas),
}

pub(crate) struct AvroSchemas {
    watermark: Schema,
    dml: Schema,
    ddl: Schema,
}

impl Marshaller {
    pub fn new(format: EncodingFormat) -> Result<Self, CodecError> {
        match format {
            EncodingFormat::Json => Ok(Marshaller::Json),
            EncodingFormat::Avro => Ok(Marshaller::Avro(AvroSchemas {
                watermark: Schema::parse_str(WATERMARK_SCHEMA)?,
                dml: Schema::parse_str(DML_SCHEMA)?,
                ddl: Schema::parse_str(DDL_SCHEMA)?,
            })),
        }
    }

    pub fn marshal_dml(&self, msg: &DmlMessage) -> Result<Vec<u8>, CodecError> {
        match self {
            Marshaller::Json => Ok(serde_json::to_vec(msg)?),
            Marshaller::Avro(schemas) => {
                Ok(apache_avro::to_avro_datum(&schemas.dml, dml_to_avro(msg))?)
            }
        }
    }

    pub fn marshal_ddl(&self, msg: &DdlMessage) -> Result<Vec<u8>, CodecError> {
        match self {
            Marshaller::Json => Ok(serde_json::to_vec(msg)?),
            Marshaller::Avro(schemas) => {
                Ok(apache_avro::to_avro_datum(&schemas.ddl, ddl_to_avro(msg))?)
            }
        }
    }

    pub fn marshal_watermark(&self, msg: &WatermarkMessage) -> Result<Vec<u8>, CodecError> {
        match self {
            Marshaller::Json => Ok(serde_json::to_vec(msg)?),
            Marshaller::Avro(schemas) => Ok(apache_avro::to_avro_datum(
                &schemas.watermark,
                watermark_to_avro(msg),
            )?),
        }
    }
}

// Union positions of the column-value map: null, long, double, string, bytes.
fn value_to_avro(value: &SimpleValue) -> Value {
    match value {
        SimpleValue::Null => Value::Union(0, Box::new(Value::Null)),
        SimpleValue::Int(v) => Value::Union(1, Box::new(Value::Long(*v))),
        SimpleValue::UInt(v) if *v <= i64::MAX as u64 => {
            Value::Union(1, Box::new(Value::Long(*v as i64)))
        }
        // An unsigned value past the long range degrades to its decimal
        // string.
        SimpleValue::UInt(v) => Value::Union(3, Box::new(Value::String(v.to_string()))),
        SimpleValue::Float(v) => Value::Union(2, Box::new(Value::Double(*v))),
        SimpleValue::Str(s) => Value::Union(3, Box::new(Value::String(s.clone()))),
        SimpleValue::Bytes(b) => Value::Union(4, Box::new(Value::Bytes(b.clone()))),
    }
}

fn columns_to_avro(columns: Option<&BTreeMap<String, SimpleValue>>) -> Value {
    match columns {
        None => Value::Union(0, Box::new(Value::Null)),
        Some(map) => {
            let map: HashMap<String, Value> = map
                .iter()
                .map(|(name, value)| (name.clone(), value_to_avro(value)))
                .collect();
            Value::Union(1, Box::new(Value::Map(map)))
        }
    }
}

fn optional_string(value: Option<&String>) -> Value {
    match value {
        None => Value::Union(0, Box::new(Value::Null)),
        Some(s) => Value::Union(1, Box::new(Value::String(s.clone()))),
    }
}

fn dml_to_avro(msg: &DmlMessage) -> Value {
    Value::Record(vec![
        ("version".into(), Value::Int(msg.version as i32)),
        ("database".into(), Value::String(msg.database.clone())),
        ("table".into(), Value::String(msg.table.clone())),
        ("tableId".into(), Value::Long(msg.table_id)),
        ("type".into(), Value::String(msg.ty.to_string())),
        ("commitTs".into(), Value::Long(msg.commit_ts as i64)),
        ("buildTs".into(), Value::Long(msg.build_ts)),
        ("columns".into(), columns_to_avro(msg.columns.as_ref())),
        (
            "preColumns".into(),
            columns_to_avro(msg.pre_columns.as_ref()),
        ),
        (
            "claimCheckLocation".into(),
            optional_string(msg.claim_check_location.as_ref()),
        ),
        ("handleKeyOnly".into(), Value::Boolean(msg.handle_key_only)),
    ])
}

fn table_schema_to_avro(schema: &TableSchemaInfo) -> Value {
    let columns: Vec<Value> = schema
        .columns
        .iter()
        .map(|column| {
            let data_type = Value::Record(vec![
                (
                    "mysqlType".into(),
                    Value::String(column.data_type.mysql_type.clone()),
                ),
                ("charset".into(), Value::String(column.data_type.charset.clone())),
                ("collate".into(), Value::String(column.data_type.collate.clone())),
                ("length".into(), Value::Long(column.data_type.length)),
                (
                    "decimal".into(),
                    match column.data_type.decimal {
                        None => Value::Union(0, Box::new(Value::Null)),
                        Some(d) => Value::Union(1, Box::new(Value::Int(d))),
                    },
                ),
                (
                    "elements".into(),
                    match &column.data_type.elements {
                        None => Value::Union(0, Box::new(Value::Null)),
                        Some(elements) => Value::Union(
                            1,
                            Box::new(Value::Array(
                                elements.iter().cloned().map(Value::String).collect(),
                            )),
                        ),
                    },
                ),
                (
                    "unsigned".into(),
                    match column.data_type.unsigned {
                        None => Value::Union(0, Box::new(Value::Null)),
                        Some(b) => Value::Union(1, Box::new(Value::Boolean(b))),
                    },
                ),
                (
                    "zerofill".into(),
                    match column.data_type.zerofill {
                        None => Value::Union(0, Box::new(Value::Null)),
                        Some(b) => Value::Union(1, Box::new(Value::Boolean(b))),
                    },
                ),
            ]);
            Value::Record(vec![
                ("name".into(), Value::String(column.name.clone())),
                ("dataType".into(), data_type),
                ("nullable".into(), Value::Boolean(column.nullable)),
                (
                    "default".into(),
                    optional_string(column.default.as_ref()),
                ),
            ])
        })
        .collect();

    let indexes: Vec<Value> = schema
        .indexes
        .iter()
        .map(|index| {
            Value::Record(vec![
                ("name".into(), Value::String(index.name.clone())),
                ("unique".into(), Value::Boolean(index.unique)),
                ("primary".into(), Value::Boolean(index.primary)),
                ("nullable".into(), Value::Boolean(index.nullable)),
                (
                    "columns".into(),
                    Value::Array(index.columns.iter().cloned().map(Value::String).collect()),
                ),
            ])
        })
        .collect();

    Value::Record(vec![
        ("database".into(), Value::String(schema.name.schema.clone())),
        ("table".into(), Value::String(schema.name.table.clone())),
        ("tableId".into(), Value::Long(schema.name.table_id)),
        ("version".into(), Value::Long(schema.version as i64)),
        ("columns".into(), Value::Array(columns)),
        ("indexes".into(), Value::Array(indexes)),
    ])
}

fn optional_table_schema(schema: Option<&TableSchemaInfo>) -> Value {
    match schema {
        None => Value::Union(0, Box::new(Value::Null)),
        Some(s) => Value::Union(1, Box::new(table_schema_to_avro(s))),
    }
}

fn ddl_to_avro(msg: &DdlMessage) -> Value {
    let ty = serde_json::to_value(msg.ty)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    Value::Record(vec![
        ("version".into(), Value::Int(msg.version as i32)),
        ("type".into(), Value::String(ty)),
        ("sql".into(), Value::String(msg.sql.clone())),
        ("commitTs".into(), Value::Long(msg.commit_ts as i64)),
        ("buildTs".into(), Value::Long(msg.build_ts)),
        (
            "tableSchema".into(),
            optional_table_schema(msg.table_schema.as_ref()),
        ),
        (
            "preTableSchema".into(),
            optional_table_schema(msg.pre_table_schema.as_ref()),
        ),
    ])
}

fn watermark_to_avro(msg: &WatermarkMessage) -> Value {
    Value::Record(vec![
        ("version".into(), Value::Int(msg.version as i32)),
        ("type".into(), Value::String(msg.ty.to_string())),
        ("commitTs".into(), Value::Long(msg.commit_ts as i64)),
        ("buildTs".into(), Value::Long(msg.build_ts)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Column, ColumnType, Datum, RowChangedEvent, TableName};

    #[test]
    fn avro_schemas_parse_and_validate_at_construction() {
        assert!(Marshaller::new(EncodingFormat::Avro).is_ok());
    }

    #[test]
    fn avro_dml_round_trips_through_the_schema() {
        let marshaller = Marshaller::new(EncodingFormat::Avro).unwrap();
        let event = RowChangedEvent {
            commit_ts: 99,
            table: TableName::new("db", "t", 3),
            columns: vec![
                Column::new("id", ColumnType::Long, Datum::I64(7)),
                Column::new("name", ColumnType::Varchar, Datum::String("n".into())),
                Column::new("gone", ColumnType::Varchar, Datum::Null),
            ],
            ..Default::default()
        };
        let mut msg = DmlMessage::from_event(&event, false);
        msg.build_ts = 5;
        let bytes = marshaller.marshal_dml(&msg).unwrap();

        let schema = Schema::parse_str(DML_SCHEMA).unwrap();
        let decoded =
            apache_avro::from_avro_datum(&schema, &mut bytes.as_slice(), None).unwrap();
        let Value::Record(fields) = decoded else {
            panic!("expected record")
        };
        let by_name: HashMap<_, _> = fields.into_iter().collect();
        assert_eq!(by_name["type"], Value::String("INSERT".into()));
        assert_eq!(by_name["commitTs"], Value::Long(99));
    }

    #[test]
    fn avro_watermark_marshals() {
        let marshaller = Marshaller::new(EncodingFormat::Avro).unwrap();
        let mut msg = WatermarkMessage::new(12);
        msg.build_ts = 0;
        assert!(!marshaller.marshal_watermark(&msg).unwrap().is_empty());
    }
}
