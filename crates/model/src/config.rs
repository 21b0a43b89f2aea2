use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 16;
pub const DEFAULT_ENCODER_CONCURRENCY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown sink protocol '{0}'")]
    UnknownProtocol(String),
    #[error("unknown compression codec '{0}'")]
    UnknownCompression(String),
    #[error("unknown consistent level '{0}'")]
    UnknownConsistentLevel(String),
    #[error("unknown large-message-handle mode '{0}'")]
    UnknownLargeMessageHandleMode(String),
    #[error("invalid csv config: {0}")]
    InvalidCsv(String),
    #[error("large-message-handle mode '{mode}' requires a claim-check storage URI")]
    MissingClaimCheckUri { mode: String },
}

/// Wire protocol of the sink. The encoder family covers `open`, `csv` and
/// `simple`; the remaining names parse so that configuration round-trips,
/// and are rejected when an encoder is built for them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    #[default]
    Open,
    CanalJson,
    Avro,
    Csv,
    Simple,
}

impl Protocol {
    /// Whether the protocol packs many rows into one outbound message.
    pub fn is_batch_encode(self) -> bool {
        matches!(self, Protocol::Open | Protocol::Csv)
    }
}

impl std::str::FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "open-protocol" => Ok(Protocol::Open),
            "canal-json" => Ok(Protocol::CanalJson),
            "avro" => Ok(Protocol::Avro),
            "csv" => Ok(Protocol::Csv),
            "simple" => Ok(Protocol::Simple),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Open => "open",
            Protocol::CanalJson => "canal-json",
            Protocol::Avro => "avro",
            Protocol::Csv => "csv",
            Protocol::Simple => "simple",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl std::str::FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "snappy" => Ok(Compression::Snappy),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(ConfigError::UnknownCompression(other.to_string())),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// Consistency-replication level. Anything other than `None` routes
/// watermarks through an alternate path, which disables the sorter's
/// barrier clamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistentLevel {
    #[default]
    None,
    Eventual,
}

impl ConsistentLevel {
    pub fn is_enabled(self) -> bool {
        self != ConsistentLevel::None
    }
}

impl std::str::FromStr for ConsistentLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ConsistentLevel::None),
            "eventual" => Ok(ConsistentLevel::Eventual),
            other => Err(ConfigError::UnknownConsistentLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LargeMessageHandleMode {
    #[default]
    Disabled,
    HandleKeyOnly,
    ClaimCheck,
}

/// Policy for rows whose encoded form exceeds `max_message_bytes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LargeMessageHandle {
    #[serde(default)]
    pub mode: LargeMessageHandleMode,
    #[serde(default)]
    pub claim_check_storage_uri: String,
    #[serde(default)]
    pub compression: Compression,
}

impl LargeMessageHandle {
    pub fn is_disabled(&self) -> bool {
        self.mode == LargeMessageHandleMode::Disabled
    }

    pub fn claim_check_enabled(&self) -> bool {
        self.mode == LargeMessageHandleMode::ClaimCheck
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.claim_check_enabled() && self.claim_check_storage_uri.is_empty() {
            return Err(ConfigError::MissingClaimCheckUri {
                mode: "claim-check".to_string(),
            });
        }
        Ok(())
    }
}

/// Shape of emitted CSV records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CsvConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_quote")]
    pub quote: String,
    #[serde(default = "default_terminator")]
    pub terminator: String,
    #[serde(default = "default_null_string")]
    pub null_string: String,
    #[serde(default)]
    pub include_commit_ts: bool,
}

fn default_delimiter() -> String {
    ",".to_string()
}
fn default_quote() -> String {
    "\"".to_string()
}
fn default_terminator() -> String {
    "\r\n".to_string()
}
fn default_null_string() -> String {
    "\\N".to_string()
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            quote: default_quote(),
            terminator: default_terminator(),
            null_string: default_null_string(),
            include_commit_ts: false,
        }
    }
}

impl CsvConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiter.is_empty() {
            return Err(ConfigError::InvalidCsv("delimiter must not be empty".into()));
        }
        if self.quote.chars().count() > 1 {
            return Err(ConfigError::InvalidCsv(
                "quote must be empty or a single character".into(),
            ));
        }
        if let Some(q) = self.quote.chars().next() {
            if self.delimiter.contains(q) {
                return Err(ConfigError::InvalidCsv(
                    "delimiter and quote must not overlap".into(),
                ));
            }
        }
        if self.terminator != "\n" && self.terminator != "\r\n" {
            return Err(ConfigError::InvalidCsv(
                "terminator must be LF or CRLF".into(),
            ));
        }
        Ok(())
    }
}

/// One dispatch rule: tables matched by `matcher` route through the named
/// partition and topic rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DispatchRule {
    pub matcher: Vec<String>,
    #[serde(default, alias = "partition")]
    pub partition_rule: String,
    #[serde(default, alias = "topic")]
    pub topic_rule: String,
}

/// The sink-side configuration surface recognised by the egress core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SinkConfig {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_encoder_concurrency")]
    pub encoder_concurrency: usize,
    #[serde(default)]
    pub dispatch_rules: Vec<DispatchRule>,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub consistent_level: ConsistentLevel,
    #[serde(default)]
    pub large_message_handle: LargeMessageHandle,
    #[serde(default)]
    pub csv: CsvConfig,
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}
fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}
fn default_encoder_concurrency() -> usize {
    DEFAULT_ENCODER_CONCURRENCY
}
fn default_true() -> bool {
    true
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            compression: Compression::default(),
            encoder_concurrency: DEFAULT_ENCODER_CONCURRENCY,
            dispatch_rules: Vec::new(),
            case_sensitive: true,
            consistent_level: ConsistentLevel::default(),
            large_message_handle: LargeMessageHandle::default(),
            csv: CsvConfig::default(),
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.large_message_handle.validate()?;
        if self.protocol == Protocol::Csv {
            self.csv.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_and_compression_parse() {
        assert_eq!("open".parse::<Protocol>().unwrap(), Protocol::Open);
        assert_eq!(
            "canal-json".parse::<Protocol>().unwrap(),
            Protocol::CanalJson
        );
        assert!("msgpack".parse::<Protocol>().is_err());
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("".parse::<Compression>().unwrap(), Compression::None);
    }

    #[test]
    fn csv_config_rejects_overlapping_quote_and_delimiter() {
        let cfg = CsvConfig {
            delimiter: "|\"|".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = CsvConfig {
            delimiter: "[*]".to_string(),
            quote: String::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn claim_check_requires_storage_uri() {
        let cfg = SinkConfig {
            large_message_handle: LargeMessageHandle {
                mode: LargeMessageHandleMode::ClaimCheck,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sink_config_deserializes_with_defaults() {
        let cfg: SinkConfig = serde_json::from_str(
            r#"{
                "protocol": "csv",
                "dispatch-rules": [
                    {"matcher": ["db1.*"], "partition": "ts", "topic": "a"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.protocol, Protocol::Csv);
        assert_eq!(cfg.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert_eq!(cfg.dispatch_rules[0].partition_rule, "ts");
        assert!(cfg.case_sensitive);
    }
}
