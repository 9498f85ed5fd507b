//! Lifecycle controller for the link to the remote key service.
//!
//! # Responsibilities
//! - Bind on demand and bound the caller's wait (`ensure_connected`)
//! - Watch the held handle for death and orderly disconnects
//! - Rebind after losses on the disconnect backoff schedule
//! - Re-probe a silent bind on the no-response health-check schedule
//! - Tear everything down on `release`, after which nothing retries
//!
//! # Locking
//! All state lives in one `Mutex<LinkState>`. The lock is never held across
//! a transport call or an `.await`; transport callbacks can therefore arrive
//! synchronously from inside `bind` or on any other thread.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::{sleep, Instant};

use crate::config::ConnectionConfig;
use crate::link::bridge::{BridgeOutcome, SyncBridge};
use crate::link::events::{ConnectionEvent, ConnectionListener};
use crate::link::handle::{BindAttempt, HandleId, LiveHandle};
use crate::link::state::{ConnectionState, LinkState, LossKind, RetryCounters};
use crate::observability::metrics::{self, BindCause};
use crate::resilience::FibonacciBackoff;
use crate::transport::{
    BindingSink, ConnectionCallbacks, DeathRecipient, RemoteService, ServiceBinder, TransportError,
};

/// Errors constructing a controller.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no Tokio runtime available to schedule retries")]
    NoRuntime,
}

/// Failure of a controller-mediated remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("key service is not connected")]
    Unavailable,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of asking the controller to make sure a bind exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindDecision {
    AlreadyConnected,
    InFlight,
    Started,
    Refused,
    Released,
}

/// Owner of the connection to the remote key service.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    binder: Arc<dyn ServiceBinder>,
    state: Mutex<LinkState>,
    bridge: SyncBridge,
    listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
    config: ArcSwap<ConnectionConfig>,
    runtime: Handle,
    me: Weak<ControllerInner>,
}

impl LifecycleController {
    /// Create a controller. Must be called from within a Tokio runtime, which
    /// runs the controller's retry timers from then on.
    pub fn new(binder: Arc<dyn ServiceBinder>, config: ConnectionConfig) -> Result<Self, LinkError> {
        let runtime = Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let inner = Arc::new_cyclic(|me| ControllerInner {
            binder,
            state: Mutex::new(LinkState::new(&config)),
            bridge: SyncBridge::new(),
            listener: Mutex::new(None),
            config: ArcSwap::from_pointee(config),
            runtime,
            me: me.clone(),
        });
        Ok(Self { inner })
    }

    /// Make sure the link is usable, binding if needed.
    ///
    /// Returns immediately when a responsive handle is held. Otherwise waits
    /// up to the configured connect timeout; an attempt still running when the
    /// wait ends keeps going in the background.
    pub async fn ensure_connected(&self) -> bool {
        let inner = &self.inner;
        let waiter = inner.bridge.arm();

        match inner.bind_if_needed(BindCause::Demand, false).await {
            BindDecision::AlreadyConnected => return true,
            BindDecision::Released => {
                tracing::debug!("Link released, not binding");
                return false;
            }
            BindDecision::Refused => return false,
            BindDecision::InFlight | BindDecision::Started => {}
        }

        let timeout = inner.config.load().connect_timeout();
        let outcome = waiter.wait(Instant::now() + timeout).await;

        // The latch only says a connect happened; the state says whether it stuck.
        let connected = inner.lock().is_connected();
        if !connected {
            tracing::warn!(
                outcome = ?outcome,
                timeout_ms = timeout.as_millis() as u64,
                "Key service not connected after wait"
            );
        } else if outcome != BridgeOutcome::Success {
            tracing::debug!(outcome = ?outcome, "Connected despite unresolved wait");
        }
        connected
    }

    /// Reset the retry counters and bind now, skipping any pending backoff.
    ///
    /// The bind runs on the controller's runtime; a held handle is probed
    /// first and kept if it still answers.
    pub fn trigger_reconnect(&self) {
        let inner = Arc::clone(&self.inner);
        {
            let mut state = inner.lock();
            if !state.can_retry {
                tracing::debug!("Link released, ignoring reconnect trigger");
                return;
            }
            state.counters = RetryCounters::baseline(&inner.config.load());
        }
        tracing::info!("Reconnect triggered");
        let runtime = inner.runtime.clone();
        runtime.spawn(async move {
            inner.bind_if_needed(BindCause::Trigger, true).await;
        });
    }

    /// Tear the link down for good. Pending retries become no-ops.
    pub fn release(&self) {
        let inner = &self.inner;
        let (handle, binding) = {
            let mut state = inner.lock();
            if !state.can_retry {
                return;
            }
            state.shut_down()
        };

        if let Some(handle) = &handle {
            let recipient = DeathRecipient::new(handle.id, inner.callbacks());
            handle.remote.unlink_to_death(&recipient);
        }
        if let Some(binding) = binding {
            inner.binder.unbind(binding);
        }
        inner.bridge.cancel();

        if handle.is_some() {
            inner.emit(ConnectionEvent::Disconnected);
        }
        tracing::info!("Key service link released");
    }

    /// Register the single connection observer, replacing any previous one.
    pub fn set_listener(&self, listener: Option<Arc<dyn ConnectionListener>>) {
        *self.inner.listener.lock().expect("listener mutex poisoned") = listener;
    }

    /// Apply a new connection configuration to subsequent decisions.
    pub fn update_config(&self, config: ConnectionConfig) {
        tracing::info!(
            connect_timeout_ms = config.connect_timeout_ms,
            backoff_ceiling_secs = config.backoff_ceiling_secs,
            "Connection configuration updated"
        );
        self.inner.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<ConnectionConfig> {
        self.inner.config.load_full()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().is_connected()
    }

    pub fn counters(&self) -> RetryCounters {
        self.inner.lock().counters
    }

    /// Identity of the handle currently held, if any.
    pub fn current_handle(&self) -> Option<HandleId> {
        self.inner.lock().handle_id()
    }

    /// Whether `release` has been called.
    pub fn is_released(&self) -> bool {
        !self.inner.lock().can_retry
    }

    /// Tell the listener a caller found no usable service.
    pub fn report_service_unavailable(&self) {
        self.inner.emit(ConnectionEvent::ServiceUnavailable);
    }

    /// Run `f` against the held remote handle on the blocking pool.
    ///
    /// The handle never leaves the controller: `f` borrows it for the duration
    /// of one call. A dead-object failure is treated as the handle's death.
    pub async fn call<T, F>(&self, f: F) -> Result<T, CallError>
    where
        F: FnOnce(&dyn RemoteService) -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let handle = {
            let state = self.inner.lock();
            match state.handle.as_ref() {
                Some(handle) if state.is_connected() => handle.clone(),
                _ => return Err(CallError::Unavailable),
            }
        };
        let id = handle.id;
        let remote = handle.remote;

        let result = match self
            .inner
            .runtime
            .spawn_blocking(move || f(remote.as_ref()))
            .await
        {
            Ok(result) => result,
            Err(e) => Err(TransportError::Failed(e.to_string())),
        };

        if let Err(TransportError::DeadObject) = &result {
            self.inner
                .handle_loss(|h| h.id == id, LossKind::BinderDied, true);
        }
        result.map_err(CallError::from)
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("LifecycleController")
            .field("state", &state.phase)
            .field("handle", &state.handle_id())
            .field("counters", &state.counters)
            .field("can_retry", &state.can_retry)
            .finish()
    }
}

impl ControllerInner {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().expect("link state mutex poisoned")
    }

    fn callbacks(&self) -> Weak<dyn ConnectionCallbacks> {
        self.me.clone()
    }

    fn no_response_policy(config: &ConnectionConfig) -> FibonacciBackoff {
        FibonacciBackoff::new(config.no_response_baseline, config.backoff_ceiling_secs)
    }

    fn disconnect_policy(config: &ConnectionConfig) -> FibonacciBackoff {
        FibonacciBackoff::new(config.disconnect_baseline, config.backoff_ceiling_secs)
    }

    fn emit(&self, event: ConnectionEvent) {
        metrics::record_connection_event(event);
        let listener = self
            .listener
            .lock()
            .expect("listener mutex poisoned")
            .clone();
        if let Some(listener) = listener {
            listener.on_event(event);
        }
    }

    /// Bind unless a responsive handle is held or (without `force`) a bind is
    /// already in flight. A held handle that fails its ping is dropped first.
    async fn bind_if_needed(&self, cause: BindCause, force: bool) -> BindDecision {
        let held = {
            let state = self.lock();
            if !state.can_retry {
                return BindDecision::Released;
            }
            match state.phase {
                ConnectionState::Connecting if !force => return BindDecision::InFlight,
                ConnectionState::Connected => state.handle.clone(),
                _ => None,
            }
        };

        if let Some(handle) = held {
            if self.is_responsive(&handle).await {
                tracing::trace!(handle = %handle.id, "Held handle responsive, no bind needed");
                return BindDecision::AlreadyConnected;
            }
            tracing::warn!(handle = %handle.id, "Held handle stopped responding");
            self.handle_loss(|h| h.id == handle.id, LossKind::Unresponsive, false);
        }

        self.start_bind(cause, force)
    }

    /// Liveness check of a held handle. The ping is blocking IPC, so it runs
    /// on the blocking pool; a probe that cannot complete counts as dead.
    async fn is_responsive(&self, handle: &LiveHandle) -> bool {
        let remote = Arc::clone(&handle.remote);
        match self
            .runtime
            .spawn_blocking(move || remote.is_alive() && remote.ping())
            .await
        {
            Ok(alive) => alive,
            Err(e) => {
                tracing::warn!(handle = %handle.id, error = %e, "Liveness probe did not complete");
                false
            }
        }
    }

    fn start_bind(&self, cause: BindCause, force: bool) -> BindDecision {
        let (attempt, previous, no_response) = {
            let mut state = self.lock();
            if !state.can_retry {
                return BindDecision::Released;
            }
            match state.phase {
                ConnectionState::Connected => return BindDecision::AlreadyConnected,
                ConnectionState::Connecting if !force => return BindDecision::InFlight,
                _ => {}
            }
            let (attempt, previous) = state.begin_bind(Instant::now());
            (attempt, previous, state.counters.no_response_count)
        };

        if let Some(previous) = previous {
            self.binder.unbind(previous);
        }

        tracing::info!(
            attempt = %attempt,
            cause = ?cause,
            no_response_count = no_response,
            "Binding to key service"
        );
        metrics::record_bind_attempt(cause);
        self.emit(ConnectionEvent::StartedConnecting);

        let sink = BindingSink::new(attempt, self.callbacks());
        match self.binder.bind(sink) {
            Ok(()) => {
                self.arm_health_check(attempt);
                BindDecision::Started
            }
            Err(e) => {
                tracing::warn!(attempt = %attempt, error = %e, "Bind refused by platform");
                self.abandon_attempt(attempt, false);
                BindDecision::Refused
            }
        }
    }

    /// Give up on an attempt that never produced a handle and back off.
    fn abandon_attempt(&self, attempt: BindAttempt, unbind: bool) {
        let failed = self.lock().fail_attempt(attempt);
        let binding = match failed {
            Some(binding) => binding,
            None => {
                tracing::debug!(attempt = %attempt, "Ignoring failure of superseded bind");
                return;
            }
        };
        if unbind {
            if let Some(binding) = binding {
                self.binder.unbind(binding);
            }
        }
        self.emit(ConnectionEvent::Disconnected);
        self.schedule_rebind(false);
    }

    /// Arm the no-response check for `attempt`, superseding earlier checks.
    fn arm_health_check(&self, attempt: BindAttempt) {
        let (epoch, delay) = {
            let mut state = self.lock();
            if !state.can_retry
                || state.attempt != attempt
                || state.phase != ConnectionState::Connecting
            {
                return;
            }
            state.check_epoch += 1;
            let policy = Self::no_response_policy(&self.config.load());
            (state.check_epoch, policy.delay(state.counters.no_response_count))
        };

        tracing::debug!(attempt = %attempt, delay_secs = delay.as_secs(), "Health check armed");
        let me = self.me.clone();
        self.runtime.spawn(async move {
            sleep(delay).await;
            if let Some(inner) = me.upgrade() {
                inner.run_health_check(epoch);
            }
        });
    }

    fn run_health_check(&self, epoch: u64) {
        let (rebind, count) = {
            let mut state = self.lock();
            if !state.can_retry || state.check_epoch != epoch {
                tracing::trace!(epoch, "Discarding superseded health check");
                return;
            }
            let policy = Self::no_response_policy(&self.config.load());
            state.counters.no_response_count = policy.advance(state.counters.no_response_count);
            (
                state.phase != ConnectionState::Connected,
                state.counters.no_response_count,
            )
        };
        metrics::record_no_response_count(count);

        if rebind {
            tracing::info!(no_response_count = count, "Key service did not answer, rebinding");
            self.start_bind(BindCause::HealthCheck, true);
        }
    }

    /// Schedule a rebind on the disconnect backoff schedule. After a counter
    /// reset the rebind runs at the baseline delay.
    fn schedule_rebind(&self, counters_reset: bool) {
        let (delay, count) = {
            let mut state = self.lock();
            if !state.can_retry {
                return;
            }
            let policy = Self::disconnect_policy(&self.config.load());
            let delay = state.next_rebind_delay(&policy, Instant::now(), counters_reset);
            (delay, state.counters.disconnect_count)
        };

        // Only reached after a loss or failed attempt, so no handle is held
        // and there is nothing to probe.
        if delay.is_zero() {
            tracing::info!(disconnect_count = count, "Rebinding now");
            self.start_bind(BindCause::Rebind, false);
            return;
        }

        tracing::info!(
            delay_secs = delay.as_secs(),
            disconnect_count = count,
            "Rebind scheduled"
        );
        let me = self.me.clone();
        self.runtime.spawn(async move {
            sleep(delay).await;
            if let Some(inner) = me.upgrade() {
                inner.bind_if_needed(BindCause::Rebind, false).await;
            }
        });
    }

    /// Drop the held handle if `matches` identifies it and run the follow-up
    /// exactly once. Returns false when another path already did.
    fn handle_loss(
        &self,
        matches: impl FnOnce(&LiveHandle) -> bool,
        kind: LossKind,
        rebind: bool,
    ) -> bool {
        let loss = {
            let config = self.config.load();
            let policy = Self::no_response_policy(&config);
            self.lock().lose_handle(matches, kind, &policy, &config)
        };
        let Some(loss) = loss else {
            tracing::debug!(kind = ?kind, "Ignoring loss of a handle no longer held");
            return false;
        };

        let recipient = DeathRecipient::new(loss.handle.id, self.callbacks());
        loss.handle.remote.unlink_to_death(&recipient);
        if let Some(binding) = loss.binding {
            self.binder.unbind(binding);
        }

        if loss.counters_reset {
            tracing::info!("Backoff passed ceiling, counters reset to baseline");
        }
        tracing::info!(handle = %loss.handle.id, kind = ?loss.kind, "Key service connection lost");

        let event = match loss.kind {
            LossKind::BinderDied => ConnectionEvent::BinderDied,
            _ => ConnectionEvent::Disconnected,
        };
        self.emit(event);

        if rebind {
            self.schedule_rebind(loss.counters_reset);
        }
        true
    }
}

impl ConnectionCallbacks for ControllerInner {
    fn service_connected(&self, attempt: BindAttempt, remote: Arc<dyn RemoteService>) {
        {
            let state = self.lock();
            if !state.can_retry || state.attempt != attempt {
                tracing::debug!(attempt = %attempt, "Ignoring connection for superseded bind");
                return;
            }
        }

        let id = HandleId::new();
        let recipient = DeathRecipient::new(id, self.callbacks());
        if let Err(e) = remote.link_to_death(recipient.clone()) {
            tracing::error!(attempt = %attempt, error = %e, "Failed to watch key service for death");
            self.abandon_attempt(attempt, true);
            return;
        }

        let accepted = {
            let config = self.config.load();
            let handle = LiveHandle {
                id,
                attempt,
                remote: Arc::clone(&remote),
            };
            self.lock().accept(handle, &config)
        };
        if !accepted {
            remote.unlink_to_death(&recipient);
            tracing::debug!(attempt = %attempt, "Connection arrived after bind was superseded");
            return;
        }

        tracing::info!(attempt = %attempt, handle = %id, "Key service connected");
        metrics::record_no_response_count(self.lock().counters.no_response_count);
        self.emit(ConnectionEvent::Connected);
        self.bridge.resolve();

        // A death between link_to_death and accept found no handle to drop.
        if !remote.is_alive() {
            self.handle_loss(|h| h.id == id, LossKind::BinderDied, true);
        }
    }

    fn service_disconnected(&self, attempt: BindAttempt) {
        self.handle_loss(|h| h.attempt == attempt, LossKind::Disconnected, true);
    }

    fn binding_died(&self, attempt: BindAttempt) {
        if !self.handle_loss(|h| h.attempt == attempt, LossKind::BindingDied, true) {
            self.abandon_attempt(attempt, true);
        }
    }

    fn binder_died(&self, handle: HandleId) {
        self.handle_loss(|h| h.id == handle, LossKind::BinderDied, true);
    }
}
