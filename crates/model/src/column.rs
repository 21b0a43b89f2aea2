use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Per-column flags carried alongside the value.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ColumnFlag: u64 {
        /// The column holds binary (not text) data.
        const BINARY = 1 << 0;
        /// The column is part of the handle key: the minimal set of columns
        /// uniquely identifying a row.
        const HANDLE_KEY = 1 << 1;
        /// The column is generated and not materialized upstream.
        const GENERATED = 1 << 2;
        const PRIMARY_KEY = 1 << 3;
        const UNSIGNED = 1 << 4;
        const NULLABLE = 1 << 5;
        const UNIQUE_KEY = 1 << 6;
        const MULTIPLE_KEY = 1 << 7;
    }
}

/// The SQL column types understood by the encoders. Discriminants are the
/// upstream wire-protocol type codes, so they round-trip through encoded
/// events unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Duration = 11,
    Datetime = 12,
    Year = 13,
    Varchar = 15,
    Bit = 16,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
}

impl ColumnType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Signed or unsigned integer family, including YEAR.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Tiny
                | ColumnType::Short
                | ColumnType::Int24
                | ColumnType::Long
                | ColumnType::LongLong
                | ColumnType::Year
        )
    }

    pub fn is_blob(self) -> bool {
        matches!(
            self,
            ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob | ColumnType::Blob
        )
    }
}

/// A dynamically-typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    I64(i64),
    U64(u64),
    F64(f64),
    Bytes(Vec<u8>),
    String(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// The value as UTF-8 text, if it is textual.
    pub fn as_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Datum::String(s) => Some(std::borrow::Cow::Borrowed(s)),
            Datum::Bytes(b) => Some(String::from_utf8_lossy(b)),
            _ => None,
        }
    }
}

/// One column of a row-change event.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub flags: ColumnFlag,
    pub value: Datum,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType, value: Datum) -> Self {
        Self {
            name: name.into(),
            ty,
            flags: ColumnFlag::empty(),
            value,
        }
    }

    pub fn with_flags(mut self, flags: ColumnFlag) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_handle_key(&self) -> bool {
        self.flags.contains(ColumnFlag::HANDLE_KEY) && !self.flags.contains(ColumnFlag::GENERATED)
    }

    /// Rough in-memory footprint, used for flow-control accounting.
    pub fn approximate_bytes(&self) -> usize {
        let value = match &self.value {
            Datum::Null => 0,
            Datum::I64(_) | Datum::U64(_) | Datum::F64(_) => 8,
            Datum::Bytes(b) => b.len(),
            Datum::String(s) => s.len(),
        };
        self.name.len() + value + std::mem::size_of::<ColumnFlag>()
    }
}

/// Schema-side column metadata that the value alone does not carry:
/// element lists for ENUM/SET and whether the column is the integer
/// primary-key handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: i64,
    #[serde(default)]
    pub is_pk_handle: bool,
    #[serde(default)]
    pub elements: Vec<String>,
}
