//! Connection state machine.
//!
//! # States
//! - Disconnected: no handle held, no death watch registered
//! - Connecting: a bind is in flight
//! - Connected: a live handle with a registered death watch
//!
//! # State Transitions
//! ```text
//! Disconnected → Connecting: bind requested
//! Connecting   → Connected:  remote accepted (counters reset)
//! Connecting   → Disconnected: bind refused
//! Connected    → Disconnected: disconnect, binding/binder death, failed ping
//! any          → Disconnected: release (terminal)
//! ```
//!
//! `LinkState` is only ever touched under the controller's mutex. Its methods
//! mutate fields and report what the caller must do outside the lock; they
//! never call into the transport themselves.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::link::handle::{BindAttempt, HandleId, LiveHandle};
use crate::resilience::FibonacciBackoff;

/// Phase of the link to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Retry counters driving the two backoff schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryCounters {
    /// Drives the rebind delay after a loss.
    pub disconnect_count: u32,
    /// Drives the "service never answered" health check.
    pub no_response_count: u32,
}

impl RetryCounters {
    pub fn baseline(config: &ConnectionConfig) -> Self {
        Self {
            disconnect_count: config.disconnect_baseline,
            no_response_count: config.no_response_baseline,
        }
    }
}

/// Why a held handle stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Orderly disconnect reported by the platform.
    Disconnected,
    /// The binding itself died.
    BindingDied,
    /// The remote process died.
    BinderDied,
    /// Ping or liveness check failed before a call.
    Unresponsive,
}

/// Side effects owed after a handle was dropped under the lock.
#[derive(Debug)]
pub(crate) struct Loss {
    pub handle: LiveHandle,
    pub kind: LossKind,
    pub binding: Option<BindAttempt>,
    pub counters_reset: bool,
}

/// Everything the controller guards with its mutex.
#[derive(Debug)]
pub(crate) struct LinkState {
    pub phase: ConnectionState,
    pub handle: Option<LiveHandle>,
    pub counters: RetryCounters,
    pub last_bind: Option<Instant>,
    /// Attempt whose binding the platform still holds for us.
    pub binding: Option<BindAttempt>,
    /// Most recently started attempt.
    pub attempt: BindAttempt,
    /// Kill switch; false after release.
    pub can_retry: bool,
    /// Bumped to invalidate armed health checks.
    pub check_epoch: u64,
}

impl LinkState {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            phase: ConnectionState::Disconnected,
            handle: None,
            counters: RetryCounters::baseline(config),
            last_bind: None,
            binding: None,
            attempt: BindAttempt::default(),
            can_retry: true,
            check_epoch: 0,
        }
    }

    /// Enter `Connecting` for a fresh attempt. Returns the new attempt and the
    /// previous binding that must be released first, if any.
    pub fn begin_bind(&mut self, now: Instant) -> (BindAttempt, Option<BindAttempt>) {
        self.attempt = self.attempt.next();
        self.phase = ConnectionState::Connecting;
        self.last_bind = Some(now);
        let previous = self.binding.replace(self.attempt);
        (self.attempt, previous)
    }

    /// Record a handle the remote side accepted for `attempt`.
    ///
    /// Returns false when the attempt is stale or the link was released.
    pub fn accept(&mut self, handle: LiveHandle, config: &ConnectionConfig) -> bool {
        if !self.can_retry || handle.attempt != self.attempt {
            return false;
        }
        self.phase = ConnectionState::Connected;
        self.handle = Some(handle);
        self.counters = RetryCounters::baseline(config);
        self.check_epoch += 1;
        true
    }

    /// Drop the held handle if it is the one identified by `matches`.
    ///
    /// The first observer of a live-to-dead transition gets the `Loss`; any
    /// later observer of the same handle gets `None`.
    pub fn lose_handle(
        &mut self,
        matches: impl FnOnce(&LiveHandle) -> bool,
        kind: LossKind,
        policy: &FibonacciBackoff,
        config: &ConnectionConfig,
    ) -> Option<Loss> {
        if !self.handle.as_ref().is_some_and(matches) {
            return None;
        }
        let handle = self.handle.take()?;
        self.phase = ConnectionState::Disconnected;

        let counters_reset = policy.exceeds_ceiling(self.counters.no_response_count);
        if counters_reset {
            self.counters = RetryCounters::baseline(config);
            self.check_epoch += 1;
        }

        let binding = if self.binding == Some(handle.attempt) {
            self.binding.take()
        } else {
            None
        };

        Some(Loss {
            handle,
            kind,
            binding,
            counters_reset,
        })
    }

    /// A bind failed before producing a handle. Returns the binding to drop.
    pub fn fail_attempt(&mut self, attempt: BindAttempt) -> Option<Option<BindAttempt>> {
        if attempt != self.attempt || self.phase != ConnectionState::Connecting {
            return None;
        }
        self.phase = ConnectionState::Disconnected;
        Some(if self.binding == Some(attempt) {
            self.binding.take()
        } else {
            None
        })
    }

    /// Compute the rebind delay, net of the time already spent since the last
    /// bind.
    ///
    /// The disconnect counter advances on the policy unless the loss just
    /// reset it, in which case the rebind runs at the baseline delay.
    pub fn next_rebind_delay(
        &mut self,
        policy: &FibonacciBackoff,
        now: Instant,
        counters_reset: bool,
    ) -> Duration {
        if !counters_reset {
            self.counters.disconnect_count = policy.advance(self.counters.disconnect_count);
        }

        let elapsed = self
            .last_bind
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        policy
            .delay(self.counters.disconnect_count)
            .saturating_sub(elapsed)
    }

    /// Flip the kill switch and drop everything held.
    pub fn shut_down(&mut self) -> (Option<LiveHandle>, Option<BindAttempt>) {
        self.can_retry = false;
        self.phase = ConnectionState::Disconnected;
        self.check_epoch += 1;
        (self.handle.take(), self.binding.take())
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionState::Connected && self.handle.is_some()
    }

    pub fn handle_id(&self) -> Option<HandleId> {
        self.handle.as_ref().map(|h| h.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackService;
    use std::sync::Arc;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    fn no_response_policy(config: &ConnectionConfig) -> FibonacciBackoff {
        FibonacciBackoff::new(config.no_response_baseline, config.backoff_ceiling_secs)
    }

    fn disconnect_policy(config: &ConnectionConfig) -> FibonacciBackoff {
        FibonacciBackoff::new(config.disconnect_baseline, config.backoff_ceiling_secs)
    }

    fn live(attempt: BindAttempt) -> LiveHandle {
        LiveHandle {
            id: HandleId::new(),
            attempt,
            remote: Arc::new(LoopbackService::standalone()),
        }
    }

    #[test]
    fn test_bind_then_accept() {
        let cfg = config();
        let mut state = LinkState::new(&cfg);
        let (attempt, previous) = state.begin_bind(Instant::now());
        assert_eq!(state.phase, ConnectionState::Connecting);
        assert!(previous.is_none());

        state.counters.no_response_count = 7;
        assert!(state.accept(live(attempt), &cfg));
        assert!(state.is_connected());
        assert_eq!(state.counters, RetryCounters::baseline(&cfg));
    }

    #[test]
    fn test_stale_attempt_rejected() {
        let cfg = config();
        let mut state = LinkState::new(&cfg);
        let (first, _) = state.begin_bind(Instant::now());
        let (_, previous) = state.begin_bind(Instant::now());
        assert_eq!(previous, Some(first));

        assert!(!state.accept(live(first), &cfg));
        assert_eq!(state.phase, ConnectionState::Connecting);
    }

    #[test]
    fn test_loss_observed_once() {
        let cfg = config();
        let policy = no_response_policy(&cfg);
        let mut state = LinkState::new(&cfg);
        let (attempt, _) = state.begin_bind(Instant::now());
        let handle = live(attempt);
        let id = handle.id;
        state.accept(handle, &cfg);

        let first = state.lose_handle(|h| h.id == id, LossKind::BinderDied, &policy, &cfg);
        assert!(first.is_some());
        assert_eq!(first.unwrap().binding, Some(attempt));

        let second = state.lose_handle(|h| h.attempt == attempt, LossKind::Disconnected, &policy, &cfg);
        assert!(second.is_none());
        assert_eq!(state.phase, ConnectionState::Disconnected);
    }

    #[test]
    fn test_loss_for_superseded_handle_ignored() {
        let cfg = config();
        let policy = no_response_policy(&cfg);
        let mut state = LinkState::new(&cfg);
        let (attempt, _) = state.begin_bind(Instant::now());
        state.accept(live(attempt), &cfg);

        let stale = HandleId::new();
        let loss = state.lose_handle(|h| h.id == stale, LossKind::BinderDied, &policy, &cfg);
        assert!(loss.is_none());
        assert!(state.is_connected());
    }

    #[test]
    fn test_loss_resets_counters_past_ceiling() {
        let cfg = config();
        let policy = no_response_policy(&cfg);
        let mut state = LinkState::new(&cfg);
        let (attempt, _) = state.begin_bind(Instant::now());
        state.accept(live(attempt), &cfg);
        state.counters = RetryCounters {
            disconnect_count: 6,
            no_response_count: 10,
        };
        let epoch = state.check_epoch;

        let loss = state
            .lose_handle(|_| true, LossKind::Disconnected, &policy, &cfg)
            .unwrap();
        assert!(loss.counters_reset);
        assert_eq!(state.counters, RetryCounters::baseline(&cfg));
        assert!(state.check_epoch > epoch);
    }

    #[test]
    fn test_loss_keeps_counters_below_ceiling() {
        let cfg = config();
        let policy = no_response_policy(&cfg);
        let mut state = LinkState::new(&cfg);
        let (attempt, _) = state.begin_bind(Instant::now());
        state.accept(live(attempt), &cfg);
        state.counters = RetryCounters {
            disconnect_count: 2,
            no_response_count: 5,
        };

        let loss = state
            .lose_handle(|_| true, LossKind::Disconnected, &policy, &cfg)
            .unwrap();
        assert!(!loss.counters_reset);
        assert_eq!(state.counters.no_response_count, 5);
        assert_eq!(state.counters.disconnect_count, 2);
    }

    #[test]
    fn test_rebind_delay_subtracts_elapsed() {
        let cfg = config();
        let policy = disconnect_policy(&cfg);
        let mut state = LinkState::new(&cfg);
        let start = Instant::now();
        state.begin_bind(start);
        state.counters.disconnect_count = 4;

        // F(5) = 5s, 2s already spent
        let delay = state.next_rebind_delay(&policy, start + Duration::from_secs(2), false);
        assert_eq!(state.counters.disconnect_count, 5);
        assert_eq!(delay, Duration::from_secs(3));

        // F(6) = 8s, 10s already spent
        let delay = state.next_rebind_delay(&policy, start + Duration::from_secs(10), false);
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_rebind_counter_resets_past_ceiling() {
        let cfg = config();
        let policy = disconnect_policy(&cfg);
        let mut state = LinkState::new(&cfg);
        state.counters.disconnect_count = 9; // F(9) = 34 > 30

        let now = Instant::now();
        let delay = state.next_rebind_delay(&policy, now, false);
        assert_eq!(state.counters.disconnect_count, cfg.disconnect_baseline);
        assert_eq!(delay, policy.delay(cfg.disconnect_baseline));

        let delay = state.next_rebind_delay(&policy, now, false);
        assert_eq!(state.counters.disconnect_count, cfg.disconnect_baseline + 1);
        assert_eq!(delay, policy.delay(cfg.disconnect_baseline + 1));
    }

    #[test]
    fn test_rebind_after_loss_reset_uses_baseline() {
        let cfg = config();
        let mut state = LinkState::new(&cfg);
        let (attempt, _) = state.begin_bind(Instant::now());
        state.accept(live(attempt), &cfg);
        state.counters = RetryCounters {
            disconnect_count: 6,
            no_response_count: 10,
        };

        let loss = state
            .lose_handle(|_| true, LossKind::Disconnected, &no_response_policy(&cfg), &cfg)
            .unwrap();
        assert!(loss.counters_reset);

        let delay = state.next_rebind_delay(
            &disconnect_policy(&cfg),
            Instant::now(),
            loss.counters_reset,
        );
        assert_eq!(state.counters, RetryCounters::baseline(&cfg));
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_fail_attempt_only_for_current() {
        let cfg = config();
        let mut state = LinkState::new(&cfg);
        let (first, _) = state.begin_bind(Instant::now());
        let (second, _) = state.begin_bind(Instant::now());

        assert!(state.fail_attempt(first).is_none());
        assert_eq!(state.fail_attempt(second), Some(Some(second)));
        assert_eq!(state.phase, ConnectionState::Disconnected);
    }

    #[test]
    fn test_shut_down_is_terminal() {
        let cfg = config();
        let mut state = LinkState::new(&cfg);
        let (attempt, _) = state.begin_bind(Instant::now());
        state.accept(live(attempt), &cfg);

        let (handle, binding) = state.shut_down();
        assert!(handle.is_some());
        assert_eq!(binding, Some(attempt));
        assert!(!state.can_retry);
        assert!(!state.accept(live(attempt), &cfg));
    }
}
