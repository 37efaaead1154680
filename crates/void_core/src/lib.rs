//! # void_core - Void Engine Core
//!
//! Zero-dependency primitives shared by the map binding crates:
//! - **Owner tags**: [`ConsumerId`], minted once per binding and attached to
//!   every engine-side mutation so teardown can remove exactly one
//!   consumer's effects
//! - **Generations**: [`Generation`], the counter a host engine bumps each
//!   time it throws away and rebuilds its layer state

#![cfg_attr(not(feature = "std"), no_std)]

pub mod generation;
pub mod id;

pub use generation::*;
pub use id::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::generation::Generation;
    pub use crate::id::ConsumerId;
}
