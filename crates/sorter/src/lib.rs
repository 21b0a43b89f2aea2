//! Per-table event sorting: merges raw KV events with resolved-timestamp
//! watermarks so that downstream consumers observe rows in commit-ts order
//! and watermarks that never overtake buffered rows.

mod flow_control;
mod memory;
mod node;

pub use flow_control::{FlowAborted, TableFlowController};
pub use memory::MemorySorter;
pub use node::SorterNode;

use model::PolymorphicEvent;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SorterError {
    #[error("unknown sort engine '{0}'")]
    UnknownSortEngine(String),
    #[error("sort engine '{0}' is provided by an external capability and is not available here")]
    EngineUnavailable(SortEngine),
    #[error("table flow controller was aborted")]
    FlowAborted,
    #[error("failed to decode row event")]
    Decode(#[source] anyhow::Error),
}

/// Which sorting engine backs a table pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortEngine {
    /// Sort entirely in memory. Ships in-repo.
    Memory,
    /// The disk-spilling engine. Consumed as an external capability.
    Unified,
}

impl std::str::FromStr for SortEngine {
    type Err = SorterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(SortEngine::Memory),
            "unified" | "file" => Ok(SortEngine::Unified),
            other => Err(SorterError::UnknownSortEngine(other.to_string())),
        }
    }
}

impl std::fmt::Display for SortEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortEngine::Memory => f.write_str("memory"),
            SortEngine::Unified => f.write_str("unified"),
        }
    }
}

/// EventSorter accepts per-table raw events and yields a merged stream in
/// which watermarks are monotone and never precede a buffered row whose
/// commit-ts they cover. The sorted stream is handed out as a channel
/// receiver at construction.
#[async_trait::async_trait]
pub trait EventSorter: Send + Sync {
    /// Enqueue one event. Never blocks; backpressure is the flow
    /// controller's job, upstream of this call.
    fn add_entry(&self, event: PolymorphicEvent);

    /// Drive the sorter until cancelled or the input is exhausted.
    async fn run(&self, cancel: CancellationToken) -> Result<(), SorterError>;
}

/// Build the sorter selected by `engine`, returning it with the receiving
/// half of its output channel.
pub fn create_sorter(
    engine: SortEngine,
) -> Result<
    (
        std::sync::Arc<dyn EventSorter>,
        tokio::sync::mpsc::Receiver<PolymorphicEvent>,
    ),
    SorterError,
> {
    match engine {
        SortEngine::Memory => {
            let (sorter, output) = MemorySorter::new(memory::DEFAULT_OUTPUT_CAPACITY);
            Ok((std::sync::Arc::new(sorter), output))
        }
        SortEngine::Unified => Err(SorterError::EngineUnavailable(engine)),
    }
}

/// Mounter decodes a raw KV entry into its row form on the sorter's output
/// path. Decoding is schema-catalog work and lives outside this crate.
#[async_trait::async_trait]
pub trait Mounter: Send + Sync {
    async fn decode_event(&self, event: &mut PolymorphicEvent) -> anyhow::Result<()>;
}
