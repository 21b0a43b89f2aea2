use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
#[error("table flow controller was aborted")]
pub struct FlowAborted;

/// Byte-quota backpressure for one table pipeline.
///
/// `consume` waits until quota frees up, in the manner of a condition
/// variable: it is woken by `release` and by `abort`, and deliberately does
/// not observe task cancellation. A caller tearing the table down must call
/// `abort` or the waiter stays parked.
pub struct TableFlowController {
    capacity: u64,
    consumed: Mutex<u64>,
    notify: Notify,
    aborted: AtomicBool,
}

impl TableFlowController {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            consumed: Mutex::new(0),
            notify: Notify::new(),
            aborted: AtomicBool::new(false),
        }
    }

    /// Take `bytes` of quota, waiting for room. An event larger than the
    /// entire quota is admitted once the controller is empty, so a single
    /// oversized row cannot wedge the table.
    pub async fn consume(&self, bytes: u64) -> Result<(), FlowAborted> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.aborted.load(Ordering::Acquire) {
                return Err(FlowAborted);
            }
            {
                let mut consumed = self.consumed.lock().unwrap();
                if *consumed == 0 || *consumed + bytes <= self.capacity {
                    *consumed += bytes;
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Return `bytes` of quota and wake waiters.
    pub fn release(&self, bytes: u64) {
        {
            let mut consumed = self.consumed.lock().unwrap();
            *consumed = consumed.saturating_sub(bytes);
        }
        self.notify.notify_waiters();
    }

    /// Permanently unblock every current and future waiter with an error.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn consumed(&self) -> u64 {
        *self.consumed.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn consume_blocks_until_release() {
        let fc = Arc::new(TableFlowController::new(100));
        fc.consume(80).await.unwrap();

        let waiter = {
            let fc = fc.clone();
            tokio::spawn(async move { fc.consume(50).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        fc.release(80);
        waiter.await.unwrap().unwrap();
        assert_eq!(fc.consumed(), 50);
    }

    #[tokio::test]
    async fn oversized_event_admitted_when_empty() {
        let fc = TableFlowController::new(10);
        fc.consume(1000).await.unwrap();
        assert_eq!(fc.consumed(), 1000);
    }

    #[tokio::test]
    async fn abort_wakes_waiters_with_error() {
        let fc = Arc::new(TableFlowController::new(10));
        fc.consume(10).await.unwrap();

        let waiter = {
            let fc = fc.clone();
            tokio::spawn(async move { fc.consume(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        fc.abort();
        assert!(waiter.await.unwrap().is_err());

        // Once aborted, even an unconstrained consume fails.
        assert!(fc.consume(0).await.is_err());
    }
}
