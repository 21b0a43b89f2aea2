use serde::{Deserialize, Serialize};

/// TableName identifies a physical table under replication. On the wire it
/// uses the `database`/`table`/`tableId` field names shared with the fixed
/// Avro schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    #[serde(rename = "database")]
    pub schema: String,
    pub table: String,
    #[serde(rename = "tableId", default)]
    pub table_id: i64,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, table_id: i64) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            table_id,
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
