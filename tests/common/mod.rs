//! Shared utilities for link and key integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hwkey_link::config::ConnectionConfig;
use hwkey_link::keys::{KeyClient, StaticPlatform};
use hwkey_link::link::{ConnectionEvent, LifecycleController};
use hwkey_link::transport::loopback::{BindBehavior, LoopbackBinder};

pub const UID: i32 = 10_001;

/// Controller wired to a loopback binder, recording every event.
pub struct Harness {
    pub binder: Arc<LoopbackBinder>,
    pub controller: LifecycleController,
    pub events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl Harness {
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: ConnectionEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    pub fn client(&self) -> KeyClient {
        KeyClient::new(
            self.controller.clone(),
            Arc::new(StaticPlatform::supported()),
            UID,
        )
    }
}

pub fn accept(latency_ms: u64) -> BindBehavior {
    BindBehavior::Accept {
        latency: Duration::from_millis(latency_ms),
    }
}

/// Build a harness with default connection settings.
pub fn harness(behavior: BindBehavior) -> Harness {
    harness_with(behavior, ConnectionConfig::default())
}

pub fn harness_with(behavior: BindBehavior, config: ConnectionConfig) -> Harness {
    let binder = Arc::new(LoopbackBinder::new(
        tokio::runtime::Handle::current(),
        behavior,
    ));
    let controller = LifecycleController::new(binder.clone(), config).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    controller.set_listener(Some(Arc::new(move |event: ConnectionEvent| {
        sink.lock().unwrap().push(event);
    })));

    Harness {
        binder,
        controller,
        events,
    }
}

/// Let paused time run forward so pending timers and callbacks fire.
pub async fn advance(secs_f64: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs_f64)).await;
}
