//! The fan-out producer sink: routes row events to topics and partitions,
//! shards them across encoding workers, and hands finished batches to the
//! message-bus producer with per-destination ordering and graceful shutdown.

mod admin;
mod dmlsink;
mod producer;
mod state;
mod topic_manager;
mod worker;

pub use admin::{AdminApi, AdminError, AdminFactory, Broker, RetryAdminClient, TopicDetail};
pub use dmlsink::DmlSink;
pub use producer::AsyncProducer;
pub use state::TableState;
pub use topic_manager::TopicManager;

use codec::Callback;
use model::RowChangedEvent;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Codec(#[from] codec::CodecError),
    #[error(transparent)]
    Dispatch(#[from] dispatch::DispatchError),
    #[error(transparent)]
    Config(#[from] model::ConfigError),
    #[error("message-bus metadata operation failed")]
    Admin(#[from] AdminError),
    #[error("invalid message-bus sink config: {0}")]
    InvalidConfig(String),
    #[error("could not create the message-bus producer: {0}")]
    NewProducer(String),
    #[error("producer failed: {0}")]
    Producer(String),
    #[error("sink is closed")]
    Closed,
}

/// One row change on its way into the sink, carrying its ack callback and a
/// handle onto the owning table-sink's state.
pub struct RowEvent {
    pub event: RowChangedEvent,
    pub callback: Option<Callback>,
    pub state: TableState,
}

impl RowEvent {
    /// Drop the event, firing its callback immediately: for the pipeline's
    /// accounting a dropped row is indistinguishable from an acked one.
    pub(crate) fn drop_with_ack(self) {
        if let Some(callback) = self.callback {
            callback();
        }
    }
}
