//! Control-side bookkeeping: which slot plays what, and when to clean up.

/// Voice pool and stealing policy.
pub mod allocator;
/// Cancelable cleanup timers.
pub mod scheduler;

pub use allocator::{Allocation, AllocationKind, VoicePool};
pub use scheduler::{Scheduler, TimerId};
