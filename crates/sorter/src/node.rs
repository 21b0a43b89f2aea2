use crate::{EventSorter, Mounter, SorterError, TableFlowController};
use model::{ConsistentLevel, PolymorphicEvent, TableName, Ts};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// SorterNode wraps an [`EventSorter`] for one table: it tracks the table's
/// resolved and barrier timestamps, clamps forwarded watermarks against the
/// barrier, applies flow-control backpressure to incoming rows, and decodes
/// rows through the [`Mounter`] on the way out.
pub struct SorterNode {
    table: TableName,
    sorter: Arc<dyn EventSorter>,
    output: Mutex<mpsc::Receiver<PolymorphicEvent>>,
    mounter: Arc<dyn Mounter>,
    flow: Arc<TableFlowController>,

    resolved_ts: AtomicU64,
    barrier_ts: AtomicU64,
    clamp_watermarks: bool,

    cancel: CancellationToken,
    run_task: std::sync::Mutex<Option<tokio::task::JoinHandle<Result<(), SorterError>>>>,
}

impl SorterNode {
    pub fn new(
        table: TableName,
        start_ts: Ts,
        sorter: Arc<dyn EventSorter>,
        sorter_output: mpsc::Receiver<PolymorphicEvent>,
        mounter: Arc<dyn Mounter>,
        flow: Arc<TableFlowController>,
        consistent_level: ConsistentLevel,
    ) -> Self {
        Self {
            table,
            sorter,
            output: Mutex::new(sorter_output),
            mounter,
            flow,
            resolved_ts: AtomicU64::new(start_ts),
            barrier_ts: AtomicU64::new(start_ts),
            clamp_watermarks: !consistent_level.is_enabled(),
            cancel: CancellationToken::new(),
            run_task: std::sync::Mutex::new(None),
        }
    }

    /// Spawn the sorter's run loop. Must be called once before events flow.
    pub fn start(&self) {
        let sorter = self.sorter.clone();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move { sorter.run(cancel).await });
        *self.run_task.lock().unwrap() = Some(handle);
    }

    /// Accept one upstream event. Rows wait on the flow controller when the
    /// table is over its byte quota; watermarks pass through unthrottled.
    pub async fn receive(&self, event: PolymorphicEvent) -> Result<(), SorterError> {
        if event.is_resolved() {
            let resolved = event.commit_ts();
            let prior = self.resolved_ts.swap(resolved, Ordering::AcqRel);
            if prior > resolved {
                panic!(
                    "resolved ts regression on table {}: received {resolved}, already at {prior}",
                    self.table,
                );
            }

            let barrier = self.barrier_ts();
            let forwarded = if resolved > barrier && self.clamp_watermarks {
                // A watermark past the barrier would let downstream release
                // state that pending DDL still needs.
                PolymorphicEvent::resolved(barrier)
            } else {
                event
            };
            self.sorter.add_entry(forwarded);
            return Ok(());
        }

        self.flow
            .consume(event.approximate_bytes() as u64)
            .await
            .map_err(|_| SorterError::FlowAborted)?;
        self.sorter.add_entry(event);
        Ok(())
    }

    /// The next sorted event, with rows decoded. `None` once the sorter's
    /// output is exhausted.
    pub async fn output(&self) -> Result<Option<PolymorphicEvent>, SorterError> {
        let mut rx = self.output.lock().await;
        let Some(mut event) = rx.recv().await else {
            return Ok(None);
        };
        if !event.is_resolved() {
            self.mounter
                .decode_event(&mut event)
                .await
                .map_err(SorterError::Decode)?;
        }
        Ok(Some(event))
    }

    pub fn resolved_ts(&self) -> Ts {
        self.resolved_ts.load(Ordering::Acquire)
    }

    pub fn barrier_ts(&self) -> Ts {
        self.barrier_ts.load(Ordering::Acquire)
    }

    /// Advance the barrier. The barrier never moves backwards.
    pub fn update_barrier(&self, barrier: Ts) {
        self.barrier_ts.fetch_max(barrier, Ordering::AcqRel);
    }

    /// Flow-control handle, for the downstream stage that releases quota as
    /// it finishes with events.
    pub fn flow_controller(&self) -> Arc<TableFlowController> {
        self.flow.clone()
    }

    /// Tear the node down: cancel the run loop, abort the flow controller
    /// (it does not observe cancellation on its own), and wait for the
    /// sorter task to exit.
    pub async fn destroy(&self) -> Result<(), SorterError> {
        self.cancel.cancel();
        self.flow.abort();
        let task = self.run_task.lock().unwrap().take();
        if let Some(task) = task {
            match task.await {
                Ok(result) => result?,
                Err(join_err) => {
                    tracing::error!(table = %self.table, error = ?join_err, "sorter task panicked");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySorter;
    use bytes::Bytes;
    use model::{OpType, RawKvEntry};

    struct NoopMounter;

    #[async_trait::async_trait]
    impl Mounter for NoopMounter {
        async fn decode_event(&self, _event: &mut PolymorphicEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn node(start_ts: Ts, consistent: ConsistentLevel) -> SorterNode {
        let (sorter, output) = MemorySorter::new(16);
        let node = SorterNode::new(
            TableName::new("test", "t1", 1),
            start_ts,
            Arc::new(sorter),
            output,
            Arc::new(NoopMounter),
            Arc::new(TableFlowController::new(1 << 20)),
            consistent,
        );
        node.start();
        node
    }

    fn row(commit_ts: Ts) -> PolymorphicEvent {
        PolymorphicEvent::new(RawKvEntry {
            op: OpType::Put,
            commit_ts,
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
            old_value: None,
        })
    }

    #[tokio::test]
    async fn watermark_clamps_to_barrier_until_it_advances() {
        let node = node(0, ConsistentLevel::None);
        node.update_barrier(100);

        node.receive(PolymorphicEvent::resolved(200)).await.unwrap();
        let got = node.output().await.unwrap().unwrap();
        assert!(got.is_resolved());
        assert_eq!(got.commit_ts(), 100);
        assert_eq!(node.resolved_ts(), 200);

        node.update_barrier(250);
        node.receive(PolymorphicEvent::resolved(200)).await.unwrap();
        let got = node.output().await.unwrap().unwrap();
        assert_eq!(got.commit_ts(), 200);

        node.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn consistent_mode_forwards_watermarks_unclamped() {
        let node = node(0, ConsistentLevel::Eventual);
        node.update_barrier(100);

        node.receive(PolymorphicEvent::resolved(200)).await.unwrap();
        let got = node.output().await.unwrap().unwrap();
        assert_eq!(got.commit_ts(), 200);

        node.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn rows_drain_before_their_watermark() {
        let node = node(0, ConsistentLevel::None);
        node.update_barrier(1000);

        node.receive(row(20)).await.unwrap();
        node.receive(row(10)).await.unwrap();
        node.receive(PolymorphicEvent::resolved(30)).await.unwrap();

        let a = node.output().await.unwrap().unwrap();
        let b = node.output().await.unwrap().unwrap();
        let c = node.output().await.unwrap().unwrap();
        assert_eq!((a.commit_ts(), b.commit_ts()), (10, 20));
        assert!(c.is_resolved() && c.commit_ts() == 30);

        node.destroy().await.unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "resolved ts regression")]
    async fn resolved_ts_regression_panics() {
        let node = node(0, ConsistentLevel::None);
        node.update_barrier(1000);
        node.receive(PolymorphicEvent::resolved(50)).await.unwrap();
        node.receive(PolymorphicEvent::resolved(49)).await.unwrap();
    }

    #[tokio::test]
    async fn destroy_aborts_blocked_receivers() {
        let (sorter, output) = MemorySorter::new(16);
        let node = Arc::new(SorterNode::new(
            TableName::new("test", "t1", 1),
            0,
            Arc::new(sorter),
            output,
            Arc::new(NoopMounter),
            Arc::new(TableFlowController::new(1)),
            ConsistentLevel::None,
        ));
        node.start();

        // The first row exhausts the one-byte quota; the second parks.
        node.receive(row(1)).await.unwrap();
        let blocked = {
            let node = node.clone();
            tokio::spawn(async move { node.receive(row(2)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        node.destroy().await.unwrap();
        assert!(matches!(
            blocked.await.unwrap(),
            Err(SorterError::FlowAborted)
        ));
    }
}
