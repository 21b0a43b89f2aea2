//! Event routing: a first-match rule list mapping each row or DDL event to
//! its destination topic and partition.

mod matcher;
mod partition;
mod router;
mod topic;

pub use matcher::TableMatcher;
pub use partition::PartitionDispatcher;
pub use router::EventRouter;
pub use topic::{Expression, TopicDispatcher};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid table filter rule '{pattern}': {reason}")]
    FilterRuleInvalid { pattern: String, reason: String },
    #[error("invalid topic expression '{expression}': {reason}")]
    InvalidTopicExpression { expression: String, reason: String },
}

/// The kind of message bus behind the sink. Pulsar admits a `key` partition
/// rule and laxer topic-name validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkScheme {
    #[default]
    Kafka,
    Pulsar,
}

/// The stable 32-bit hash used for every partitioning decision. Partition
/// assignment must survive restarts, so the function can never change.
pub(crate) fn stable_hash32(parts: &[&[u8]]) -> u32 {
    let mut hasher = xxhash_rust::xxh32::Xxh32::new(0);
    for part in parts {
        hasher.update(&(part.len() as u32).to_le_bytes());
        hasher.update(part);
    }
    hasher.digest()
}
