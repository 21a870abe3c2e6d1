use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use super::WriteBuffer;
use crate::store::Store;

/// Periodic flush worker draining the write buffer on a timer.
///
/// Failures on this path are logged only; rows stay requeued until the next
/// trigger.
pub struct FlushWorker<S> {
    buffer: Arc<WriteBuffer<S>>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl<S: Store> FlushWorker<S> {
    pub fn new(buffer: Arc<WriteBuffer<S>>, interval: Duration) -> Self {
        Self {
            buffer,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Flush worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                if let Err(e) = self.buffer.flush(false).await {
                    tracing::warn!(error = %e, "Periodic flush failed");
                }
            }

            tracing::info!("Flush worker stopped");
        })
    }

    /// Stop the worker.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{normalize, InsertRow, StorageType};
    use crate::store::{MemoryStore, Store as _};

    #[tokio::test(start_paused = true)]
    async fn test_worker_flushes_on_timer() {
        let store = Arc::new(MemoryStore::new());
        store
            .execute("CREATE TABLE \"t1\" (ts BIGINT, val DOUBLE PRECISION)")
            .await
            .unwrap();
        let buffer = Arc::new(WriteBuffer::new(Arc::clone(&store), 100));

        let c = normalize(&serde_json::json!(1.0), StorageType::Auto, None).unwrap();
        buffer.enqueue(InsertRow::new("t1", 1, &c));

        let worker = Arc::new(FlushWorker::new(Arc::clone(&buffer), Duration::from_secs(5)));
        let handle = Arc::clone(&worker).start();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.row_count("t1"), 1);

        worker.stop();
        assert!(!worker.is_running());
        handle.abort();
    }
}
