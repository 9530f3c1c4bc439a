//! Error taxonomy (spec.md §7).
//!
//! `Empty` is not a member of this enum: an empty-queue dequeue is not an
//! error, it is `Option::None` returned from `dequeue`. `ContractViolation`
//! (destroy-while-active, double-destroy of a tls pool, use-after-destroy)
//! is not a member either — spec.md calls that case "undefined; may assert",
//! and we enforce it with `debug_assert!` at the call boundary rather than a
//! recoverable error a caller could reasonably handle.

use thiserror::Error;

/// Failure modes a caller can actually recover from.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `init()` could not allocate the handle, its gate, or its initial
    /// sentinel node.
    #[error("queue initialization failed: {0}")]
    ResourceExhausted(&'static str),

    /// `enqueue()` could not obtain a node: the slab (if enabled) was at
    /// its reservation cap and the system allocator also failed.
    #[error("node allocation failed")]
    AllocationFailure,
}
