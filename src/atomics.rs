//! Atomic primitive aliases.
//!
//! The enqueue chain fix-up (`list.rs`) and the per-node claim CAS
//! (`node.rs`) are the two places where the interleavings spec.md §8 asks
//! us to defend against actually happen. Under `--features loom` (and
//! `--cfg loom`) those two modules run on `loom`'s model-checked atomics
//! instead of `core`'s so the `#[cfg(loom)]` tests in `tests/loom_basic.rs`
//! can exhaustively explore their schedules. Everything else (the gate's
//! hazard-pointer bookkeeping, the head-version chain) keeps plain atomics;
//! loom's state space is already large enough restricted to the hot path.

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};
