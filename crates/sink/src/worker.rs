use crate::{AsyncProducer, RowEvent, SinkError};
use codec::{EncoderGroup, Message, RowEventEncoder, TopicPartitionKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) const DEFAULT_WORKER_COUNT: usize = 3;
const FLUSH_BATCH_SIZE: usize = 2048;
const FLUSH_INTERVAL: Duration = Duration::from_millis(15);

/// One routed event queued for a worker.
pub(crate) struct MqEvent {
    pub key: TopicPartitionKey,
    pub partition_key: Option<String>,
    pub row: RowEvent,
}

/// How a worker turns events into messages: batch protocols encode on the
/// worker's own encoder, row protocols hand events to the shared encoder
/// group whose output loop owns the producer sends.
pub(crate) enum EncodePath {
    Batch(Box<dyn RowEventEncoder>),
    Group(Arc<EncoderGroup>),
}

/// A sink worker: consumes its shard of the event stream, groups buffered
/// events by destination, and flushes on batch size or a periodic tick.
pub(crate) struct Worker {
    id: usize,
    path: EncodePath,
    producer: Arc<dyn AsyncProducer>,
}

impl Worker {
    pub fn new(id: usize, path: EncodePath, producer: Arc<dyn AsyncProducer>) -> Self {
        Self { id, path, producer }
    }

    pub async fn run(
        mut self,
        mut input: mpsc::UnboundedReceiver<MqEvent>,
        cancel: CancellationToken,
    ) -> Result<(), SinkError> {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        let mut buffered: Vec<MqEvent> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(worker = self.id, "worker cancelled");
                    return Ok(());
                }
                event = input.recv() => {
                    match event {
                        // Channel closed: the sink is shutting down. Remaining
                        // buffered events are discarded without encoding.
                        None => {
                            tracing::debug!(
                                worker = self.id,
                                discarded = buffered.len(),
                                "worker input closed"
                            );
                            return Ok(());
                        }
                        Some(event) => {
                            buffered.push(event);
                            if buffered.len() >= FLUSH_BATCH_SIZE {
                                self.flush(&mut buffered).await?;
                            }
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !buffered.is_empty() {
                        self.flush(&mut buffered).await?;
                    }
                }
            }
        }
    }

    async fn flush(&mut self, buffered: &mut Vec<MqEvent>) -> Result<(), SinkError> {
        let events = std::mem::take(buffered);

        match &mut self.path {
            EncodePath::Group(group) => {
                for MqEvent {
                    key,
                    partition_key,
                    row,
                } in events
                {
                    if !row.state.is_sinking() {
                        row.drop_with_ack();
                        continue;
                    }
                    group.add_event(key, partition_key, row.event, row.callback)?;
                }
                Ok(())
            }
            EncodePath::Batch(encoder) => {
                let mut grouped: HashMap<TopicPartitionKey, (Option<String>, Vec<RowEvent>)> =
                    HashMap::new();
                for event in events {
                    let entry = grouped
                        .entry(event.key)
                        .or_insert_with(|| (event.partition_key, Vec::new()));
                    entry.1.push(event.row);
                }

                for (key, (partition_key, rows)) in grouped {
                    for row in rows {
                        // The table may have begun stopping while the row
                        // sat in the buffer.
                        if !row.state.is_sinking() {
                            row.drop_with_ack();
                            continue;
                        }
                        encoder.append_row(&key.topic, &row.event, row.callback).await?;
                    }
                    for mut message in encoder.build() {
                        message.partition_key = partition_key.clone();
                        self.producer.send(&key.topic, key.partition, message).await?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Forward encoder-group output to the producer until the group closes.
pub(crate) async fn run_send_loop(
    mut output: mpsc::Receiver<(TopicPartitionKey, Message)>,
    producer: Arc<dyn AsyncProducer>,
) -> Result<(), SinkError> {
    while let Some((key, message)) = output.recv().await {
        producer.send(&key.topic, key.partition, message).await?;
    }
    Ok(())
}
