//! Shutdown coordination.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::link::LifecycleController;

/// Broadcasts a single stop signal to every long-running task.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let subscribers = self.tx.send(()).unwrap_or(0);
        tracing::info!(subscribers, "Shutdown triggered");
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Release `controller` once shutdown is triggered.
    pub fn release_on_trigger(&self, controller: LifecycleController) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            // A closed channel means the coordinator is gone; release anyway.
            let _ = rx.recv().await;
            controller.release();
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
