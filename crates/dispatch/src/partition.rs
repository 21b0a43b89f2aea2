use crate::{stable_hash32, Expression, SinkScheme};
use model::{Datum, RowChangedEvent};

/// Resolves the destination partition of a row event. Dispatch returns both
/// the partition index in `[0, partition_num)` and a partition-key string
/// for buses that route on keys.
#[derive(Debug, Clone)]
pub enum PartitionDispatcher {
    /// Index-value when the row has handle keys, table otherwise.
    Default,
    /// Shard by commit-ts: spreads one table across partitions, at the cost
    /// of per-key ordering.
    Ts,
    /// All rows of one table land on one partition.
    Table,
    /// Shard by the handle-key column values.
    IndexValue,
    /// Pulsar only: shard by a formatted key expression.
    Key(Expression),
}

impl PartitionDispatcher {
    /// Map a configured partition rule to its dispatcher. Unknown rules fall
    /// back to `Default`; on Pulsar they become a key dispatcher instead.
    pub fn for_rule(rule: &str, scheme: SinkScheme) -> Self {
        match rule.to_ascii_lowercase().as_str() {
            "" | "default" => PartitionDispatcher::Default,
            "ts" => PartitionDispatcher::Ts,
            "table" => PartitionDispatcher::Table,
            "index-value" => PartitionDispatcher::IndexValue,
            "rowid" => {
                tracing::warn!("partition rule 'rowid' is deprecated, use 'index-value' instead");
                PartitionDispatcher::IndexValue
            }
            _ if scheme == SinkScheme::Pulsar => {
                PartitionDispatcher::Key(Expression::new(rule))
            }
            other => {
                tracing::warn!(
                    rule = other,
                    "unknown partition rule, using the default dispatcher"
                );
                PartitionDispatcher::Default
            }
        }
    }

    pub fn dispatch_row(&self, row: &RowChangedEvent, partition_num: i32) -> (i32, String) {
        debug_assert!(partition_num > 0);
        match self {
            PartitionDispatcher::Default => {
                if row.handle_key_columns().is_empty() {
                    Self::by_table(row, partition_num)
                } else {
                    Self::by_index_value(row, partition_num)
                }
            }
            PartitionDispatcher::Ts => {
                let hash = stable_hash32(&[&row.commit_ts.to_le_bytes()]);
                (
                    (hash % partition_num as u32) as i32,
                    row.commit_ts.to_string(),
                )
            }
            PartitionDispatcher::Table => Self::by_table(row, partition_num),
            PartitionDispatcher::IndexValue => Self::by_index_value(row, partition_num),
            PartitionDispatcher::Key(expression) => {
                let key = expression.substitute(&row.table.schema, &row.table.table);
                let hash = stable_hash32(&[key.as_bytes()]);
                ((hash % partition_num as u32) as i32, key)
            }
        }
    }

    fn by_table(row: &RowChangedEvent, partition_num: i32) -> (i32, String) {
        let hash = stable_hash32(&[
            row.table.schema.as_bytes(),
            row.table.table.as_bytes(),
        ]);
        (
            (hash % partition_num as u32) as i32,
            format!("{}.{}", row.table.schema, row.table.table),
        )
    }

    fn by_index_value(row: &RowChangedEvent, partition_num: i32) -> (i32, String) {
        let mut parts: Vec<Vec<u8>> = vec![
            row.table.schema.as_bytes().to_vec(),
            row.table.table.as_bytes().to_vec(),
        ];
        let mut key = String::new();
        for column in row.handle_key_columns() {
            parts.push(column.name.as_bytes().to_vec());
            parts.push(datum_bytes(&column.value));
            if !key.is_empty() {
                key.push(',');
            }
            key.push_str(&column.name);
            key.push('=');
            key.push_str(&datum_display(&column.value));
        }
        let borrowed: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        let hash = stable_hash32(&borrowed);
        ((hash % partition_num as u32) as i32, key)
    }
}

/// A stable byte rendering of a datum for hashing. Tagged so that, say,
/// the string "1" and the integer 1 cannot collide.
fn datum_bytes(datum: &Datum) -> Vec<u8> {
    match datum {
        Datum::Null => vec![0x00],
        Datum::I64(v) => {
            let mut b = vec![0x01];
            b.extend_from_slice(&v.to_le_bytes());
            b
        }
        Datum::U64(v) => {
            let mut b = vec![0x02];
            b.extend_from_slice(&v.to_le_bytes());
            b
        }
        Datum::F64(v) => {
            let mut b = vec![0x03];
            b.extend_from_slice(&v.to_bits().to_le_bytes());
            b
        }
        Datum::Bytes(v) => {
            let mut b = vec![0x04];
            b.extend_from_slice(v);
            b
        }
        Datum::String(v) => {
            let mut b = vec![0x05];
            b.extend_from_slice(v.as_bytes());
            b
        }
    }
}

fn datum_display(datum: &Datum) -> String {
    match datum {
        Datum::Null => "null".to_string(),
        Datum::I64(v) => v.to_string(),
        Datum::U64(v) => v.to_string(),
        Datum::F64(v) => v.to_string(),
        Datum::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
        Datum::String(v) => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Column, ColumnFlag, ColumnType, TableName};

    fn row_with_keys(schema: &str, table: &str, id: i64) -> RowChangedEvent {
        RowChangedEvent {
            commit_ts: 400,
            table: TableName::new(schema, table, 1),
            columns: vec![
                Column::new("id", ColumnType::Long, Datum::I64(id))
                    .with_flags(ColumnFlag::HANDLE_KEY),
                Column::new("payload", ColumnType::Varchar, Datum::String("x".into())),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn dispatch_is_stable_for_equal_handle_keys() {
        let d = PartitionDispatcher::IndexValue;
        let (p1, k1) = d.dispatch_row(&row_with_keys("db", "t", 42), 16);
        let (p2, k2) = d.dispatch_row(&row_with_keys("db", "t", 42), 16);
        assert_eq!((p1, &k1), (p2, &k2));
        assert_eq!(k1, "id=42");

        let (p3, _) = d.dispatch_row(&row_with_keys("db", "t", 43), 16);
        assert!(p3 < 16);
    }

    #[test]
    fn table_dispatcher_keeps_a_table_on_one_partition() {
        let d = PartitionDispatcher::Table;
        let (p1, key) = d.dispatch_row(&row_with_keys("db", "t", 1), 8);
        let (p2, _) = d.dispatch_row(&row_with_keys("db", "t", 9), 8);
        assert_eq!(p1, p2);
        assert_eq!(key, "db.t");
    }

    #[test]
    fn default_falls_back_to_table_without_handle_keys() {
        let mut row = row_with_keys("db", "t", 1);
        row.columns[0].flags = ColumnFlag::empty();

        let by_default = PartitionDispatcher::Default.dispatch_row(&row, 8);
        let by_table = PartitionDispatcher::Table.dispatch_row(&row, 8);
        assert_eq!(by_default, by_table);
    }

    #[test]
    fn rule_lookup() {
        assert!(matches!(
            PartitionDispatcher::for_rule("ts", SinkScheme::Kafka),
            PartitionDispatcher::Ts
        ));
        assert!(matches!(
            PartitionDispatcher::for_rule("rowid", SinkScheme::Kafka),
            PartitionDispatcher::IndexValue
        ));
        assert!(matches!(
            PartitionDispatcher::for_rule("bogus", SinkScheme::Kafka),
            PartitionDispatcher::Default
        ));
        assert!(matches!(
            PartitionDispatcher::for_rule("{schema}-{table}", SinkScheme::Pulsar),
            PartitionDispatcher::Key(_)
        ));
    }

    #[test]
    fn partitions_stay_in_range() {
        for rule in ["default", "ts", "table", "index-value"] {
            let d = PartitionDispatcher::for_rule(rule, SinkScheme::Kafka);
            for id in 0..64 {
                let (p, _) = d.dispatch_row(&row_with_keys("db", "t", id), 7);
                assert!((0..7).contains(&p), "rule {rule} produced partition {p}");
            }
        }
    }
}
