//! Charge targets and persisted state
//!
//! Contains the target model with its validation, and the store for targets and locks.

mod store;
mod target;

pub use store::{FsStateStore, MemoryStateStore, ProcessLock, Role, StateStore};
pub use target::{
    is_valid_percentage, is_valid_range, validate_percentage, Bounds, ChargeTarget, TargetMode,
};
