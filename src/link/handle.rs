//! Identities for bind attempts and remote handles.
//!
//! Every callback the transport delivers carries one of these so the
//! controller can discard notifications about a binding or handle it has
//! already replaced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::transport::RemoteService;

/// Relaxed ordering is enough: only uniqueness matters.
static HANDLE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted remote handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    /// Allocate a new unique handle ID.
    pub fn new() -> Self {
        Self(HANDLE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Sequence number of a bind started by one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BindAttempt(pub(crate) u64);

impl BindAttempt {
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BindAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bind-{}", self.0)
    }
}

/// The remote handle the controller currently holds.
#[derive(Clone)]
pub(crate) struct LiveHandle {
    pub id: HandleId,
    pub attempt: BindAttempt,
    pub remote: Arc<dyn RemoteService>,
}

impl std::fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveHandle")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_id_unique() {
        let id1 = HandleId::new();
        let id2 = HandleId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn bind_attempt_sequence() {
        let first = BindAttempt::default().next();
        assert_eq!(first.as_u64(), 1);
        assert_eq!(first.next().to_string(), "bind-2");
    }
}
