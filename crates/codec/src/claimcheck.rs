use crate::CodecError;
use exponential_backoff::Backoff;
use opendal::{services, Operator};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const WRITE_RETRIES: u32 = 3;
const WRITE_BACKOFF_MIN: Duration = Duration::from_millis(20);
const WRITE_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// The JSON blob stored out of band: the key and value bytes of the message
/// that was too large to send in band.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimCheckMessage {
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// ClaimCheck writes oversized payloads to a URI-addressed object store and
/// hands back locators to embed in the replacement in-band message. Blob
/// lifecycle past the write is the downstream consumer's concern.
pub struct ClaimCheck {
    operator: Operator,
    storage_uri: String,
}

impl ClaimCheck {
    pub fn new(storage_uri: &str) -> Result<Self, CodecError> {
        let uri = url::Url::parse(storage_uri)
            .map_err(|_| CodecError::ClaimCheckUri(storage_uri.to_string()))?;

        let unsupported = || CodecError::ClaimCheckUri(storage_uri.to_string());
        let operator = match uri.scheme() {
            "file" => {
                let builder = services::Fs::default().root(uri.path());
                Operator::new(builder).map_err(|_| unsupported())?.finish()
            }
            "memory" => {
                let builder = services::Memory::default().root(uri.path());
                Operator::new(builder).map_err(|_| unsupported())?.finish()
            }
            "s3" => {
                let builder = services::S3::default()
                    .bucket(uri.host_str().unwrap_or_default())
                    .root(uri.path());
                Operator::new(builder).map_err(|_| unsupported())?.finish()
            }
            _ => return Err(unsupported()),
        };

        Ok(Self {
            operator,
            storage_uri: storage_uri.trim_end_matches('/').to_string(),
        })
    }

    /// A fresh blob name: a monotonic wall-clock stamp plus a random suffix
    /// against collisions.
    pub fn new_file_name() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("{:020}-{:08x}.json", nanos, rand::random::<u32>())
    }

    /// The full locator of `file_name`, as embedded into in-band messages.
    pub fn location_of(&self, file_name: &str) -> String {
        format!("{}/{}", self.storage_uri, file_name)
    }

    /// Persist the oversized message under `file_name`, with bounded
    /// retries. Terminal failure surfaces as the encode error.
    pub async fn write_message(
        &self,
        key: &[u8],
        value: &[u8],
        file_name: &str,
    ) -> Result<(), CodecError> {
        let blob = serde_json::to_vec(&ClaimCheckMessage {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;

        let backoff = Backoff::new(WRITE_RETRIES, WRITE_BACKOFF_MIN, Some(WRITE_BACKOFF_MAX));
        let mut attempt = 0u32;
        loop {
            match self.operator.write(file_name, blob.clone()).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    match backoff.next(attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                ?err,
                                attempt,
                                file_name,
                                "claim-check write failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(CodecError::ClaimCheckWriteFailed {
                                name: file_name.to_string(),
                                source: err,
                            })
                        }
                    }
                }
            }
        }
    }

    /// Fetch and decode a stored blob. Consumer-side helper.
    pub async fn read_message(&self, file_name: &str) -> Result<ClaimCheckMessage, CodecError> {
        let data = self
            .operator
            .read(file_name)
            .await
            .map_err(|err| CodecError::ClaimCheckWriteFailed {
                name: file_name.to_string(),
                source: err,
            })?;
        Ok(serde_json::from_slice(&data.to_vec())?)
    }
}
