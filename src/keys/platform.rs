//! Platform capability checks run before any remote interaction.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Why an operation was rejected before touching the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("hardware key support unavailable on this device")]
    Unsupported,

    #[error("hardware key support disabled after an out-of-memory failure")]
    OutOfMemory,
}

/// Answers whether key operations may run at all.
pub trait PlatformGate: Send + Sync {
    fn check(&self) -> Result<(), PreconditionError>;
}

/// Gate with a fixed support flag and a one-way out-of-memory latch.
#[derive(Debug)]
pub struct StaticPlatform {
    supported: bool,
    oom: AtomicBool,
}

impl StaticPlatform {
    pub fn new(supported: bool) -> Self {
        Self {
            supported,
            oom: AtomicBool::new(false),
        }
    }

    pub fn supported() -> Self {
        Self::new(true)
    }

    /// Disable all operations for the rest of the process.
    pub fn mark_oom(&self) {
        if !self.oom.swap(true, Ordering::SeqCst) {
            tracing::warn!("Out-of-memory reported, hardware key operations disabled");
        }
    }

    pub fn is_oom(&self) -> bool {
        self.oom.load(Ordering::SeqCst)
    }
}

impl PlatformGate for StaticPlatform {
    fn check(&self) -> Result<(), PreconditionError> {
        if !self.supported {
            return Err(PreconditionError::Unsupported);
        }
        if self.is_oom() {
            return Err(PreconditionError::OutOfMemory);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_platform() {
        let gate = StaticPlatform::new(false);
        assert_eq!(gate.check(), Err(PreconditionError::Unsupported));
    }

    #[test]
    fn test_oom_latch_is_permanent() {
        let gate = StaticPlatform::supported();
        assert_eq!(gate.check(), Ok(()));

        gate.mark_oom();
        gate.mark_oom();
        assert!(gate.is_oom());
        assert_eq!(gate.check(), Err(PreconditionError::OutOfMemory));
    }
}
