//! Per-(thread, queue) state registration (spec.md §9 "Global thread-local
//! state" redesign flag).
//!
//! The original ships a process-wide `MAX_SCQ_NUM`-sized array of thread-
//! local slots, indexed by a queue id handed out from a fixed global table.
//! We replace both: each queue handle carries its own id (a monotonically
//! assigned `u64`, `queue::next_queue_id`, never reused, no cap), and each
//! call site that needs per-thread state declares its own keyed map via
//! [`registry`]. Because `registry` is generic, its `thread_local!` is
//! monomorphized once per concrete state type `T` — gate hazard records,
//! detach private lists, and slab arenas each get their own independent
//! thread-local `HashMap<u64, T>`, and a lookup is amortized O(1) instead
//! of a linear scan of a fixed array.

use std::cell::RefCell;
use std::collections::HashMap;
use std::thread::LocalKey;

pub(crate) fn registry<T: 'static>() -> &'static LocalKey<RefCell<HashMap<u64, T>>> {
    thread_local! {
        static MAP: RefCell<HashMap<u64, T>> = RefCell::new(HashMap::new());
    }
    &MAP
}

/// Run `f` against this thread's `T` for `queue_id`, constructing it via
/// `make` on first touch.
pub(crate) fn with_local<T: 'static, R>(
    queue_id: u64,
    make: impl FnOnce() -> T,
    f: impl FnOnce(&mut T) -> R,
) -> R {
    registry::<T>().with(|map| {
        let mut map = map.borrow_mut();
        let slot = map.entry(queue_id).or_insert_with(make);
        f(slot)
    })
}
