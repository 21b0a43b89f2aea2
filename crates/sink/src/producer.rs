use crate::SinkError;
use codec::Message;

/// The message-bus producer capability. The concrete client library lives
/// outside this crate; the contract here is the part the sink relies on.
#[async_trait::async_trait]
pub trait AsyncProducer: Send + Sync {
    /// Enqueue one message for `(topic, partition)`. The message's callback
    /// must be invoked exactly once after broker acknowledgement; on fatal
    /// producer shutdown it may be dropped, never invoked twice.
    async fn send(&self, topic: &str, partition: i32, message: Message) -> Result<(), SinkError>;

    /// Flush and release the underlying client.
    async fn close(&self);
}
