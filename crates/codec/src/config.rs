use crate::CodecError;
use model::{Compression, CsvConfig, LargeMessageHandle, Protocol, SinkConfig};
use serde::{Deserialize, Serialize};

/// Serialization format of the simple protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    #[default]
    Json,
    Avro,
}

/// Encoder-facing configuration, projected out of the sink configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub protocol: Protocol,
    pub max_message_bytes: usize,
    pub max_batch_size: usize,
    pub compression: Compression,
    pub encoding_format: EncodingFormat,
    pub large_message_handle: LargeMessageHandle,
    pub csv: CsvConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sink_config(&SinkConfig::default())
    }
}

impl Config {
    pub fn from_sink_config(sink: &SinkConfig) -> Self {
        Self {
            protocol: sink.protocol,
            max_message_bytes: sink.max_message_bytes,
            max_batch_size: sink.max_batch_size,
            compression: sink.compression,
            encoding_format: EncodingFormat::default(),
            large_message_handle: sink.large_message_handle.clone(),
            csv: sink.csv.clone(),
        }
    }

    pub fn with_encoding_format(mut self, format: EncodingFormat) -> Self {
        self.encoding_format = format;
        self
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        self.large_message_handle.validate()?;
        if self.protocol == Protocol::Csv {
            self.csv.validate()?;
        }
        Ok(())
    }
}
