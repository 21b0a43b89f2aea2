use crate::{Callback, CodecError, EncoderBuilder, Message, RowEventEncoder, TopicPartitionKey};
use model::RowChangedEvent;
use tokio::sync::mpsc;

const OUTPUT_CAPACITY: usize = 1024;

struct GroupInput {
    key: TopicPartitionKey,
    partition_key: Option<String>,
    event: RowChangedEvent,
    callback: Option<Callback>,
}

/// A fixed pool of encoder tasks. Events shard across encoders by a stable
/// hash of their `(topic, partition)` key, so one destination's events are
/// always encoded by the same task and leave the shared output channel in
/// the order they were added.
pub struct EncoderGroup {
    inputs: Vec<mpsc::UnboundedSender<GroupInput>>,
    tasks: Vec<tokio::task::JoinHandle<Result<(), CodecError>>>,
}

impl EncoderGroup {
    /// Spawn `concurrency` encoder tasks producing to the returned output
    /// channel.
    pub fn new(
        builder: &EncoderBuilder,
        concurrency: usize,
    ) -> (Self, mpsc::Receiver<(TopicPartitionKey, Message)>) {
        let concurrency = concurrency.max(1);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CAPACITY);

        let mut inputs = Vec::with_capacity(concurrency);
        let mut tasks = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let (input_tx, input_rx) = mpsc::unbounded_channel();
            let encoder = builder.build();
            tasks.push(tokio::spawn(run_encoder(
                encoder,
                input_rx,
                output_tx.clone(),
            )));
            inputs.push(input_tx);
        }

        (Self { inputs, tasks }, output_rx)
    }

    /// Route one event to its encoder task.
    pub fn add_event(
        &self,
        key: TopicPartitionKey,
        partition_key: Option<String>,
        event: RowChangedEvent,
        callback: Option<Callback>,
    ) -> Result<(), CodecError> {
        let mut hasher = xxhash_rust::xxh32::Xxh32::new(0);
        hasher.update(key.topic.as_bytes());
        hasher.update(&key.partition.to_le_bytes());
        let index = (hasher.digest() as usize) % self.inputs.len();

        self.inputs[index]
            .send(GroupInput {
                key,
                partition_key,
                event,
                callback,
            })
            .map_err(|_| CodecError::GroupClosed)
    }

    /// Close the inputs and wait for every encoder task to drain. The
    /// output channel closes once the last task exits.
    pub async fn close(self) -> Result<(), CodecError> {
        drop(self.inputs);
        for task in self.tasks {
            match task.await {
                Ok(result) => result?,
                Err(join_err) => {
                    tracing::error!(error = ?join_err, "encoder task panicked");
                }
            }
        }
        Ok(())
    }
}

async fn run_encoder(
    mut encoder: Box<dyn RowEventEncoder>,
    mut input: mpsc::UnboundedReceiver<GroupInput>,
    output: mpsc::Sender<(TopicPartitionKey, Message)>,
) -> Result<(), CodecError> {
    while let Some(GroupInput {
        key,
        partition_key,
        event,
        callback,
    }) = input.recv().await
    {
        encoder.append_row(&key.topic, &event, callback).await?;
        for mut message in encoder.build() {
            message.partition_key = partition_key.clone();
            if output.send((key.clone(), message)).await.is_err() {
                // Receiver dropped; the sink is shutting down.
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use model::{Column, ColumnFlag, ColumnType, Datum, Protocol, RowChangedEvent, TableName};
    use std::collections::HashMap;

    fn simple_builder() -> EncoderBuilder {
        EncoderBuilder::new(Config {
            protocol: Protocol::Simple,
            ..Default::default()
        })
        .unwrap()
    }

    fn row(commit_ts: u64) -> RowChangedEvent {
        RowChangedEvent {
            commit_ts,
            table: TableName::new("db", "t", 1),
            columns: vec![Column::new("id", ColumnType::Long, Datum::I64(commit_ts as i64))
                .with_flags(ColumnFlag::HANDLE_KEY)],
            ..Default::default()
        }
    }

    fn key(partition: i32) -> TopicPartitionKey {
        TopicPartitionKey {
            topic: "topic".to_string(),
            partition,
        }
    }

    #[tokio::test]
    async fn per_key_order_is_preserved_across_the_pool() {
        let builder = simple_builder();
        let (group, mut output) = EncoderGroup::new(&builder, 4);

        for ts in 1..=50u64 {
            group
                .add_event(key((ts % 3) as i32), None, row(ts), None)
                .unwrap();
        }

        let close = tokio::spawn(group.close());

        let mut per_key: HashMap<i32, Vec<u64>> = HashMap::new();
        while let Some((key, message)) = output.recv().await {
            per_key.entry(key.partition).or_default().push(message.ts);
        }
        close.await.unwrap().unwrap();

        assert_eq!(per_key.values().map(Vec::len).sum::<usize>(), 50);
        for (_, timestamps) in per_key {
            let mut sorted = timestamps.clone();
            sorted.sort_unstable();
            assert_eq!(timestamps, sorted);
        }
    }

    #[tokio::test]
    async fn add_after_close_fails() {
        let builder = simple_builder();
        let (group, mut output) = EncoderGroup::new(&builder, 2);
        let inputs = group.inputs.clone();
        group.close().await.unwrap();
        assert!(output.recv().await.is_none());

        let result = inputs[0].send(GroupInput {
            key: key(0),
            partition_key: None,
            event: row(1),
            callback: None,
        });
        assert!(result.is_err());
    }
}
