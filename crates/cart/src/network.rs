//! Connectivity flag consulted before server-mode mutations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Shared online/offline state.
///
/// The host application flips this when its network monitor reports a
/// change. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    /// Create a flag in the given state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Create a flag that starts online.
    #[must_use]
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Record a connectivity change.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::AcqRel);
        if previous != online {
            info!(online, "Connectivity changed");
        }
    }

    /// Whether the device is currently online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let a = Connectivity::online();
        let b = a.clone();
        b.set_online(false);
        assert!(!a.is_online());
        a.set_online(true);
        assert!(b.is_online());
    }
}
