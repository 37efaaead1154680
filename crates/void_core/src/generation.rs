//! Generation counters for state that a host can silently discard
//!
//! A host engine owns its layers. When it reloads its style it drops all of
//! them without telling each owner. Whoever created a layer records the
//! generation current at creation time; a later mismatch means the layer is
//! gone and must be built again.

use core::fmt;

/// Monotonic generation of a host's internal state
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// Generation of a freshly registered host
    pub const INITIAL: Self = Self(0);

    /// Create from a raw value
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw generation number
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Get the next generation (wrapping)
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Check whether something recorded at `self` is still valid at `current`
    #[inline]
    pub fn is_current(&self, current: Generation) -> bool {
        *self == current
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation({})", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}
