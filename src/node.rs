//! C1 — Node & Datum (spec.md §3.1).
//!
//! One `Node<T>` layout is shared by every engine; each engine reads only
//! the fields it needs. `state` is the LL-RCU `is_dequeued` flag widened
//! to the slab's tri-state (spec.md §3.1, §4.6) — `Detach-TLS` never reads
//! it, ownership there transfers with the detach exchange instead.

use crate::atomics::{AtomicBool, AtomicPtr, AtomicU8, Ordering};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;

/// Node lifecycle state (spec.md §3.1, §4.6).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    /// Slab slot not carrying live data; eligible for re-carving.
    Free = 0,
    /// Published, not yet claimed by a consumer.
    Enqueued = 1,
    /// Claimed by exactly one LL-RCU consumer; `datum` has been read.
    Dequeued = 2,
}

/// A single linked-list element.
///
/// Invariants (spec.md §3.1): once `next` is non-null it is never reset,
/// except by the Detach-TLS steal resetting the *sentinel*'s `next` — never
/// a real node's. `datum` is written before the node is published (the tail
/// exchange, `list::SharedList::publish`) and never mutated thereafter.
pub(crate) struct Node<T> {
    pub(crate) next: AtomicPtr<Node<T>>,
    datum: UnsafeCell<MaybeUninit<T>>,
    state: AtomicU8,
    /// True when this node came from a slab carve rather than `Box::new`;
    /// the slab's `free_node` only recycles the former (spec.md §4.6).
    /// Unused when the `slab` feature is off.
    is_node_pool: AtomicBool,
}

// Node<T> is sent/shared across threads only once wrapped in the queue's
// own synchronization (tail exchange, gate, detach); the raw UnsafeCell
// access is guarded by those protocols, not by this impl.
unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

impl<T> Node<T> {
    /// A node ready for immediate publication, carrying `datum`.
    pub(crate) fn new(datum: T) -> Self {
        Node {
            next: AtomicPtr::new(ptr::null_mut()),
            datum: UnsafeCell::new(MaybeUninit::new(datum)),
            state: AtomicU8::new(NodeState::Enqueued as u8),
            is_node_pool: AtomicBool::new(false),
        }
    }

    /// An empty dummy node used as the Detach-TLS sentinel anchor, or as
    /// a freshly-carved, not-yet-written slab slot.
    pub(crate) fn empty() -> Self {
        Node {
            next: AtomicPtr::new(ptr::null_mut()),
            datum: UnsafeCell::new(MaybeUninit::uninit()),
            state: AtomicU8::new(NodeState::Free as u8),
            is_node_pool: AtomicBool::new(false),
        }
    }

    /// Write `datum` into a slab-carved (`state == Free`) node and publish
    /// it logically as `Enqueued`. Used only by the slab allocation path;
    /// heap nodes are built fully formed via `Node::new`.
    pub(crate) fn reinit(&self, datum: T) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), NodeState::Free as u8);
        unsafe {
            (*self.datum.get()).write(datum);
        }
        self.next.store(ptr::null_mut(), Ordering::Relaxed);
        self.state.store(NodeState::Enqueued as u8, Ordering::Release);
    }

    /// Read the datum out.
    ///
    /// # Safety
    /// The caller must have exclusive logical ownership of the node's
    /// payload (claimed via `try_claim_dequeued`, or via Detach-TLS
    /// ownership transfer) and `datum` must have been written. `T: Copy`
    /// keeps repeated / racing reads memory-safe; ownership is still a
    /// single-reader contract enforced by the caller.
    pub(crate) unsafe fn read_datum(&self) -> T {
        ptr::read((*self.datum.get()).as_ptr())
    }

    /// Attempt to claim this node for dequeue (LL-RCU, spec.md §4.3 step 3).
    /// Exactly one caller among racers observes `true`.
    pub(crate) fn try_claim_dequeued(&self) -> bool {
        self.state
            .compare_exchange(
                NodeState::Enqueued as u8,
                NodeState::Dequeued as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Read-side optimization only (spec.md §4.3): correctness rests on the
    /// CAS in `try_claim_dequeued` alone.
    pub(crate) fn looks_claimed(&self) -> bool {
        self.state.load(Ordering::Acquire) != NodeState::Enqueued as u8
    }

    pub(crate) fn mark_node_pool(&self) {
        self.is_node_pool.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_node_pool(&self) -> bool {
        self.is_node_pool.load(Ordering::Relaxed)
    }

    #[cfg(feature = "slab")]
    pub(crate) fn mark_free(&self) {
        self.state.store(NodeState::Free as u8, Ordering::Release);
    }

    #[cfg(feature = "slab")]
    pub(crate) fn is_free(&self) -> bool {
        self.state.load(Ordering::Acquire) == NodeState::Free as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let node = Node::new(7u64);
        assert!(node.try_claim_dequeued());
        assert!(!node.try_claim_dequeued());
        assert_eq!(unsafe { node.read_datum() }, 7u64);
    }

    #[test]
    fn reinit_roundtrip() {
        let node = Node::<u64>::empty();
        assert!(!node.try_claim_dequeued());
        node.reinit(42);
        assert!(node.try_claim_dequeued());
        assert_eq!(unsafe { node.read_datum() }, 42u64);
    }

    #[test]
    fn node_pool_flag_defaults_false() {
        let node = Node::new(1u64);
        assert!(!node.is_node_pool());
        node.mark_node_pool();
        assert!(node.is_node_pool());
    }
}
