//! Per-point relog timers.
//!
//! After every successful write a point re-arms a one-shot timer; on expiry
//! the point id is delivered back to the pipeline, which synthesizes the
//! last stored value with a fresh timestamp and reprocesses it with the
//! relog flag set.

use std::time::Duration;
use tokio::sync::mpsc;

/// Cancelable one-shot relog timer.
#[derive(Debug)]
pub struct RelogHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl RelogHandle {
    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Arms relog timers and delivers due point ids over a channel.
#[derive(Debug, Clone)]
pub struct RelogScheduler {
    tx: mpsc::Sender<String>,
}

impl RelogScheduler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Schedule a relog for `id` after `delay`. Dropping or canceling the
    /// returned handle stops the timer.
    pub fn arm(&self, id: &str, delay: Duration) -> RelogHandle {
        let tx = self.tx.clone();
        let id = id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(id).await.is_err() {
                tracing::debug!("Relog channel closed, timer discarded");
            }
        });
        RelogHandle { handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (scheduler, mut rx) = RelogScheduler::new(8);
        let _handle = scheduler.arm("p1", Duration::from_secs(60));

        let due = rx.recv().await.unwrap();
        assert_eq!(due, "p1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_timer_never_fires() {
        let (scheduler, mut rx) = RelogScheduler::new(8);
        let handle = scheduler.arm("p1", Duration::from_secs(60));
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }
}
