use crate::worker::{EncodePath, MqEvent, Worker, DEFAULT_WORKER_COUNT};
use crate::{AsyncProducer, RetryAdminClient, RowEvent, SinkError, TopicDetail, TopicManager};
use codec::{Config, EncoderBuilder, EncoderGroup, TopicPartitionKey};
use dispatch::{EventRouter, SinkScheme};
use model::SinkConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The DML sink: routes row events to `(topic, partition)`, shards them onto
/// workers by destination, and delivers encoded batches to the producer.
///
/// Batch protocols (open, csv) encode on a per-worker encoder. Row
/// protocols (simple) feed the shared encoder group, whose output loop owns
/// the producer sends for those messages.
pub struct DmlSink {
    router: Arc<EventRouter>,
    topic_manager: Arc<TopicManager>,
    producer: Arc<dyn AsyncProducer>,
    worker_txs: Vec<mpsc::UnboundedSender<MqEvent>>,
    worker_tasks: Vec<JoinHandle<Result<(), SinkError>>>,
    group: Option<Arc<EncoderGroup>>,
    send_loop: Option<JoinHandle<Result<(), SinkError>>>,
    cancel: CancellationToken,
}

impl DmlSink {
    pub fn new(
        config: &SinkConfig,
        default_topic: impl Into<String>,
        scheme: SinkScheme,
        producer: Arc<dyn AsyncProducer>,
        admin: Arc<RetryAdminClient>,
        topic_detail: TopicDetail,
        err_tx: mpsc::UnboundedSender<SinkError>,
    ) -> Result<Self, SinkError> {
        config.validate()?;
        let router = Arc::new(EventRouter::new(config, default_topic, scheme)?);
        let encoder_builder = EncoderBuilder::new(Config::from_sink_config(config))?;
        let topic_manager = Arc::new(TopicManager::new(admin, topic_detail));
        let cancel = CancellationToken::new();

        // Row protocols run the shared encoder group plus one send loop.
        let (group, send_loop) = if config.protocol.is_batch_encode() {
            (None, None)
        } else {
            let (group, output_rx) =
                EncoderGroup::new(&encoder_builder, config.encoder_concurrency);
            let send_loop = tokio::spawn(crate::worker::run_send_loop(
                output_rx,
                producer.clone(),
            ));
            (Some(Arc::new(group)), Some(send_loop))
        };

        let mut worker_txs = Vec::with_capacity(DEFAULT_WORKER_COUNT);
        let mut worker_tasks = Vec::with_capacity(DEFAULT_WORKER_COUNT);
        for id in 0..DEFAULT_WORKER_COUNT {
            let path = match &group {
                Some(group) => EncodePath::Group(group.clone()),
                None => EncodePath::Batch(encoder_builder.build()),
            };
            let worker = Worker::new(id, path, producer.clone());
            let (tx, rx) = mpsc::unbounded_channel();
            let cancel = cancel.child_token();
            let err_tx = err_tx.clone();
            worker_tasks.push(tokio::spawn(async move {
                let result = worker.run(rx, cancel).await;
                if let Err(err) = &result {
                    tracing::error!(worker = id, ?err, "sink worker failed");
                    let _ = err_tx.send(SinkError::Producer(err.to_string()));
                }
                result
            }));
            worker_txs.push(tx);
        }

        Ok(Self {
            router,
            topic_manager,
            producer,
            worker_txs,
            worker_tasks,
            group,
            send_loop,
            cancel,
        })
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Route and enqueue row events. Asynchronous and thread-safe: the
    /// worker channels are unbounded, so this never blocks on the bus.
    /// Backpressure belongs to the sorter's flow controller, upstream.
    pub async fn write_events(&self, rows: Vec<RowEvent>) -> Result<(), SinkError> {
        for row in rows {
            // A stopping table's rows drop here, their callbacks acting as
            // the cancellation signal.
            if !row.state.is_sinking() {
                row.drop_with_ack();
                continue;
            }

            let topic = self.router.topic_for_row(&row.event);
            let partition_num = self.topic_manager.partition_num(&topic).await?;
            let (partition, partition_key) =
                self.router.partition_for_row(&row.event, partition_num);
            let key = TopicPartitionKey { topic, partition };

            let shard = shard_of(&key, self.worker_txs.len());
            self.worker_txs[shard]
                .send(MqEvent {
                    key,
                    partition_key: (!partition_key.is_empty()).then_some(partition_key),
                    row,
                })
                .map_err(|_| SinkError::Closed)?;
        }
        Ok(())
    }

    /// Close the sink: stop accepting events, let workers exit, drain the
    /// encoder group, then close the producer.
    pub async fn close(mut self) -> Result<(), SinkError> {
        // Closing the channels wakes each worker, which discards whatever
        // it had buffered and exits.
        self.worker_txs.clear();
        for task in self.worker_tasks.drain(..) {
            match task.await {
                Ok(result) => result?,
                Err(join_err) => {
                    tracing::error!(error = ?join_err, "sink worker panicked");
                }
            }
        }

        if let Some(group) = self.group.take() {
            match Arc::try_unwrap(group) {
                Ok(group) => group.close().await?,
                Err(_) => tracing::warn!("encoder group still shared at close"),
            }
        }
        if let Some(send_loop) = self.send_loop.take() {
            match send_loop.await {
                Ok(result) => result?,
                Err(join_err) => {
                    tracing::error!(error = ?join_err, "send loop panicked");
                }
            }
        }

        self.cancel.cancel();
        self.producer.close().await;
        Ok(())
    }
}

fn shard_of(key: &TopicPartitionKey, workers: usize) -> usize {
    let mut hasher = xxhash_rust::xxh32::Xxh32::new(0);
    hasher.update(key.topic.as_bytes());
    hasher.update(&key.partition.to_le_bytes());
    hasher.digest() as usize % workers
}
