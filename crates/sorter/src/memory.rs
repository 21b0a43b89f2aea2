use crate::{EventSorter, SorterError};
use model::{OpType, PolymorphicEvent};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub(crate) const DEFAULT_OUTPUT_CAPACITY: usize = 128;

/// An entirely in-memory event sorter. Rows buffer until a watermark
/// arrives; the watermark sorts the buffer and drains every row it covers,
/// then follows them out.
pub struct MemorySorter {
    input_tx: mpsc::UnboundedSender<PolymorphicEvent>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<PolymorphicEvent>>>,
    output_tx: mpsc::Sender<PolymorphicEvent>,
}

impl MemorySorter {
    pub fn new(output_capacity: usize) -> (Self, mpsc::Receiver<PolymorphicEvent>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(output_capacity);
        (
            Self {
                input_tx,
                input_rx: Mutex::new(Some(input_rx)),
                output_tx,
            },
            output_rx,
        )
    }

    async fn flush(
        &self,
        buffer: &mut Vec<PolymorphicEvent>,
        watermark: PolymorphicEvent,
    ) -> Result<(), ()> {
        let resolved = watermark.commit_ts();
        // Stable sort; deletes order ahead of puts at equal commit-ts.
        buffer.sort_by_key(|ev| (ev.commit_ts(), ev.raw.op == OpType::Put));
        let covered = buffer.partition_point(|ev| ev.commit_ts() <= resolved);
        for ev in buffer.drain(..covered) {
            self.output_tx.send(ev).await.map_err(drop)?;
        }
        self.output_tx.send(watermark).await.map_err(drop)
    }
}

#[async_trait::async_trait]
impl EventSorter for MemorySorter {
    fn add_entry(&self, event: PolymorphicEvent) {
        // A send failure means run() already exited; the entry is dropped
        // exactly as it would be on a closed pipeline.
        let _ = self.input_tx.send(event);
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), SorterError> {
        let mut input = self
            .input_rx
            .lock()
            .await
            .take()
            .expect("memory sorter run loop started twice");
        let mut buffer: Vec<PolymorphicEvent> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = input.recv() => {
                    let Some(event) = event else { return Ok(()) };
                    if event.is_resolved() {
                        if self.flush(&mut buffer, event).await.is_err() {
                            // Output receiver dropped; downstream is gone.
                            return Ok(());
                        }
                    } else {
                        buffer.push(event);
                    }
                }
            }
        }
    }
}
