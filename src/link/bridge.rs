//! One-shot latch bridging asynchronous connect notifications into a bounded
//! wait.
//!
//! # Responsibilities
//! - Let any number of callers wait on the same armed latch
//! - Resolve the armed latch exactly once, on the first successful connect
//! - Bound every wait by an absolute deadline
//!
//! A timed-out wait does not cancel the connection attempt behind it. Callers
//! must read the authoritative connection state after waking up.

use std::sync::Mutex;

use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

/// How a wait on the bridge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The latch was resolved by a successful connection.
    Success,
    /// The deadline passed first.
    TimedOut,
    /// The latch was abandoned because the link was released.
    Cancelled,
}

/// Shared latch slot. At most one latch is armed at a time.
#[derive(Debug, Default)]
pub struct SyncBridge {
    armed: Mutex<Option<watch::Sender<bool>>>,
}

impl SyncBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the armed latch, or arm a new one if none is pending.
    pub fn arm(&self) -> BridgeWaiter {
        let mut armed = self.armed.lock().expect("bridge mutex poisoned");
        if let Some(tx) = armed.as_ref() {
            return BridgeWaiter {
                rx: tx.subscribe(),
            };
        }
        let (tx, rx) = watch::channel(false);
        *armed = Some(tx);
        BridgeWaiter { rx }
    }

    /// Release every waiter of the armed latch with success.
    ///
    /// Returns false when nothing was armed.
    pub fn resolve(&self) -> bool {
        let tx = self.armed.lock().expect("bridge mutex poisoned").take();
        match tx {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Abandon the armed latch; its waiters return `Cancelled`.
    pub fn cancel(&self) {
        // Dropping the sender without sending wakes every receiver.
        self.armed.lock().expect("bridge mutex poisoned").take();
    }

    pub fn is_armed(&self) -> bool {
        self.armed.lock().expect("bridge mutex poisoned").is_some()
    }
}

/// One caller's view of an armed latch.
#[derive(Debug)]
pub struct BridgeWaiter {
    rx: watch::Receiver<bool>,
}

impl BridgeWaiter {
    /// Wait until the latch resolves or `deadline` passes.
    pub async fn wait(mut self, deadline: Instant) -> BridgeOutcome {
        match timeout_at(deadline, self.rx.wait_for(|resolved| *resolved)).await {
            Ok(Ok(_)) => BridgeOutcome::Success,
            Ok(Err(_)) => BridgeOutcome::Cancelled,
            Err(_) => BridgeOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_resolve_releases_all_waiters() {
        let bridge = Arc::new(SyncBridge::new());
        let deadline = Instant::now() + Duration::from_secs(3);

        let w1 = bridge.arm();
        let w2 = bridge.arm();
        let t1 = tokio::spawn(w1.wait(deadline));
        let t2 = tokio::spawn(w2.wait(deadline));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bridge.resolve());

        assert_eq!(t1.await.unwrap(), BridgeOutcome::Success);
        assert_eq!(t2.await.unwrap(), BridgeOutcome::Success);
        assert!(!bridge.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let bridge = SyncBridge::new();
        let start = Instant::now();
        let outcome = bridge.arm().wait(start + Duration::from_secs(3)).await;

        assert_eq!(outcome, BridgeOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(3));
        // The latch stays armed for the connection attempt that is still running.
        assert!(bridge.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_before_wait_is_observed() {
        let bridge = SyncBridge::new();
        let waiter = bridge.arm();
        bridge.resolve();

        let outcome = waiter.wait(Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(outcome, BridgeOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_only_once() {
        let bridge = SyncBridge::new();
        let _waiter = bridge.arm();
        assert!(bridge.resolve());
        assert!(!bridge.resolve());

        // A new arm after resolution gets a fresh, unresolved latch.
        let outcome = bridge
            .arm()
            .wait(Instant::now() + Duration::from_millis(50))
            .await;
        assert_eq!(outcome, BridgeOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_waiters() {
        let bridge = SyncBridge::new();
        let waiter = bridge.arm();
        bridge.cancel();

        let start = Instant::now();
        let outcome = waiter.wait(start + Duration::from_secs(3)).await;
        assert_eq!(outcome, BridgeOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
