use crate::CodecError;
use base64::Engine;
use model::{Column, ColumnFlag, ColumnInfo, ColumnType, CsvConfig, Datum, RowChangedEvent, Ts};

/// One CSV record, typed so that quoting applies to strings only.
pub(crate) struct CsvMessage<'a> {
    config: &'a CsvConfig,
    op_type: &'static str,
    table: &'a str,
    schema: &'a str,
    commit_ts: Ts,
    columns: Vec<CsvValue>,
}

/// A converted field value. Numbers and nulls render bare; only `Str`
/// is subject to quoting or escaping.
#[derive(Debug, PartialEq)]
pub(crate) enum CsvValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Null,
}

impl<'a> CsvMessage<'a> {
    pub fn from_event(
        config: &'a CsvConfig,
        event: &'a RowChangedEvent,
    ) -> Result<Self, CodecError> {
        let (op_type, columns) = if event.is_delete() {
            ("D", &event.pre_columns)
        } else if event.is_update() {
            // Updates emit the post-image; the old-value variant is the
            // storage sink's business, not this core's.
            ("U", &event.columns)
        } else {
            ("I", &event.columns)
        };

        let converted = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| convert_column(column, event.col_infos.get(idx)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            op_type,
            table: &event.table.table,
            schema: &event.table.schema,
            commit_ts: event.commit_ts,
            columns: converted,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut record = String::new();
        self.push_value(&CsvValue::Str(self.op_type.to_string()), &mut record);
        record.push_str(&self.config.delimiter);
        self.push_value(&CsvValue::Str(self.table.to_string()), &mut record);
        record.push_str(&self.config.delimiter);
        self.push_value(&CsvValue::Str(self.schema.to_string()), &mut record);
        if self.config.include_commit_ts {
            record.push_str(&self.config.delimiter);
            self.push_value(&CsvValue::UInt(self.commit_ts), &mut record);
        }
        for value in &self.columns {
            record.push_str(&self.config.delimiter);
            self.push_value(value, &mut record);
        }
        record.push_str(&self.config.terminator);
        out.extend_from_slice(record.as_bytes());
    }

    fn push_value(&self, value: &CsvValue, out: &mut String) {
        match value {
            CsvValue::Str(s) => match self.config.quote.chars().next() {
                Some(quote) => quote_into(s, quote, out),
                None => escape_into(s, &self.config.delimiter, out),
            },
            CsvValue::Int(v) => out.push_str(&v.to_string()),
            CsvValue::UInt(v) => out.push_str(&v.to_string()),
            CsvValue::Float(v) => out.push_str(&v.to_string()),
            // The null literal renders bare even when quoting is on, so
            // readers can tell NULL from the string "\N".
            CsvValue::Null => out.push_str(&self.config.null_string),
        }
    }
}

/// Wrap `s` in quotes, doubling any embedded quote character.
fn quote_into(s: &str, quote: char, out: &mut String) {
    out.push(quote);
    for c in s.chars() {
        if c == quote {
            out.push(quote);
        }
        out.push(c);
    }
    out.push(quote);
}

/// Escape CR, LF, backslash, and every character of the delimiter with a
/// leading backslash.
fn escape_into(s: &str, delimiter: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c if delimiter.contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

fn err(column: &Column, reason: impl Into<String>) -> CodecError {
    CodecError::EncodeFailed {
        column: column.name.clone(),
        reason: reason.into(),
    }
}

/// Map one column onto its CSV value per the type table: integers as
/// decimal literals, floats as shortest round-trippable decimals, binary as
/// standard base64, ENUM/SET through their element lists, and everything
/// temporal or decimal as its stored string.
pub(crate) fn convert_column(
    column: &Column,
    info: Option<&ColumnInfo>,
) -> Result<CsvValue, CodecError> {
    if column.value.is_null() {
        return Ok(CsvValue::Null);
    }

    match column.ty {
        ColumnType::Tiny
        | ColumnType::Short
        | ColumnType::Int24
        | ColumnType::Long
        | ColumnType::LongLong
        | ColumnType::Year => match &column.value {
            Datum::I64(v) if column.flags.contains(ColumnFlag::UNSIGNED) => {
                Ok(CsvValue::UInt(*v as u64))
            }
            Datum::I64(v) => Ok(CsvValue::Int(*v)),
            Datum::U64(v) => Ok(CsvValue::UInt(*v)),
            _ => Err(err(column, "expected an integer value")),
        },
        ColumnType::Float | ColumnType::Double => match &column.value {
            Datum::F64(v) => Ok(CsvValue::Float(*v)),
            _ => Err(err(column, "expected a float value")),
        },
        ColumnType::Bit => match &column.value {
            Datum::U64(v) => Ok(CsvValue::UInt(*v)),
            Datum::I64(v) => Ok(CsvValue::UInt(*v as u64)),
            _ => Err(err(column, "expected a bit value")),
        },
        ColumnType::NewDecimal => match &column.value {
            Datum::String(s) => Ok(CsvValue::Str(s.clone())),
            Datum::Bytes(b) => Ok(CsvValue::Str(String::from_utf8_lossy(b).into_owned())),
            Datum::I64(v) => Ok(CsvValue::Str(v.to_string())),
            Datum::U64(v) => Ok(CsvValue::Str(v.to_string())),
            _ => Err(err(column, "expected a decimal value")),
        },
        ColumnType::Enum => {
            let elements = info.map(|i| i.elements.as_slice()).unwrap_or_default();
            match &column.value {
                Datum::U64(idx) => {
                    let idx = *idx as usize;
                    elements
                        .get(idx.wrapping_sub(1))
                        .map(|e| CsvValue::Str(e.clone()))
                        .ok_or_else(|| err(column, format!("enum index {idx} out of range")))
                }
                Datum::String(s) => Ok(CsvValue::Str(s.clone())),
                _ => Err(err(column, "expected an enum index or literal")),
            }
        }
        ColumnType::Set => {
            let elements = info.map(|i| i.elements.as_slice()).unwrap_or_default();
            match &column.value {
                Datum::U64(mask) => {
                    let mut selected = Vec::new();
                    for (bit, element) in elements.iter().enumerate() {
                        if mask & (1 << bit) != 0 {
                            selected.push(element.as_str());
                        }
                    }
                    if *mask >> elements.len() != 0 {
                        return Err(err(column, format!("set mask {mask} out of range")));
                    }
                    Ok(CsvValue::Str(selected.join(",")))
                }
                Datum::String(s) => Ok(CsvValue::Str(s.clone())),
                _ => Err(err(column, "expected a set mask or literal")),
            }
        }
        ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Blob
        | ColumnType::Varchar
        | ColumnType::VarString
        | ColumnType::String
        | ColumnType::Json => match &column.value {
            Datum::Bytes(b) if column.flags.contains(ColumnFlag::BINARY) => Ok(CsvValue::Str(
                base64::engine::general_purpose::STANDARD.encode(b),
            )),
            Datum::Bytes(b) => Ok(CsvValue::Str(String::from_utf8_lossy(b).into_owned())),
            Datum::String(s) => Ok(CsvValue::Str(s.clone())),
            _ => Err(err(column, "expected a textual value")),
        },
        ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp | ColumnType::Duration => {
            match &column.value {
                Datum::String(s) => Ok(CsvValue::Str(s.clone())),
                Datum::Bytes(b) => Ok(CsvValue::Str(String::from_utf8_lossy(b).into_owned())),
                _ => Err(err(column, "expected a temporal string")),
            }
        }
        ColumnType::Null => Ok(CsvValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_embedded_quotes() {
        let mut out = String::new();
        quote_into("a,b,c", '"', &mut out);
        assert_eq!(out, r#""a,b,c""#);

        out.clear();
        quote_into("\"a,b,c", '"', &mut out);
        assert_eq!(out, r#""""a,b,c""#);

        out.clear();
        quote_into("", '"', &mut out);
        assert_eq!(out, r#""""#);
    }

    #[test]
    fn escaping_covers_cr_lf_backslash_and_delimiter() {
        let cases = [
            ("abcdef", ",", "abcdef"),
            ("abc\r\ndef", ",", "abc\\r\\ndef"),
            (r"abc\def", ",", r"abc\\def"),
            ("abc,def", ",", r"abc\,def"),
            ("abc***def", "***", r"abc\*\*\*def"),
            ("abc\\def?ghi\r\n", "?", "abc\\\\def\\?ghi\\r\\n"),
        ];
        for (input, delimiter, want) in cases {
            let mut out = String::new();
            escape_into(input, delimiter, &mut out);
            assert_eq!(out, want, "input {input:?} delimiter {delimiter:?}");
        }
    }

    #[test]
    fn escaping_plain_text_is_identity() {
        let mut out = String::new();
        escape_into("no special characters here", "|", &mut out);
        assert_eq!(out, "no special characters here");
    }

    #[test]
    fn enum_and_set_resolve_through_elements() {
        let info = ColumnInfo {
            id: 1,
            is_pk_handle: false,
            elements: vec!["a".into(), "b".into(), "c".into()],
        };

        let enum_col = Column::new("e", ColumnType::Enum, Datum::U64(2));
        assert_eq!(
            convert_column(&enum_col, Some(&info)).unwrap(),
            CsvValue::Str("b".into())
        );
        let bad = Column::new("e", ColumnType::Enum, Datum::U64(9));
        assert!(convert_column(&bad, Some(&info)).is_err());

        let set_col = Column::new("s", ColumnType::Set, Datum::U64(0b101));
        assert_eq!(
            convert_column(&set_col, Some(&info)).unwrap(),
            CsvValue::Str("a,c".into())
        );
    }

    #[test]
    fn binary_columns_emit_standard_base64() {
        let col = Column::new(
            "b",
            ColumnType::Blob,
            Datum::Bytes(vec![0x68, 0x65, 0x6c, 0x6c, 0x6f]),
        )
        .with_flags(ColumnFlag::BINARY);
        assert_eq!(
            convert_column(&col, None).unwrap(),
            CsvValue::Str("aGVsbG8=".into())
        );

        let text = Column::new("t", ColumnType::Blob, Datum::Bytes(b"hello".to_vec()));
        assert_eq!(
            convert_column(&text, None).unwrap(),
            CsvValue::Str("hello".into())
        );
    }

    #[test]
    fn unsigned_integers_render_unsigned() {
        let col = Column::new("u", ColumnType::Tiny, Datum::I64(-1)).with_flags(ColumnFlag::UNSIGNED);
        assert_eq!(
            convert_column(&col, None).unwrap(),
            CsvValue::UInt(u64::MAX)
        );
    }
}
