//! Owner tags for engine-side mutations

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of one consumer of a shared engine.
///
/// Every layer, source, listener and event handler a consumer adds is tagged
/// with its `ConsumerId`. Two bindings never share an id, even when they
/// target the same engine and use the same layer id prefix.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Tag for mutations made by the host itself (style layers, foreign sources)
    pub const HOST: Self = Self(0);

    /// Mint a new unique consumer ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Rebuild an ID from a raw value.
    ///
    /// Only meant for host adapters echoing back tags they were given.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Check if this is the host tag
    #[inline]
    pub const fn is_host(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "ConsumerId(host)")
        } else {
            write!(f, "ConsumerId({})", self.0)
        }
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "host")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
