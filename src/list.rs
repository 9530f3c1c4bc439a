//! C2 — Shared List, the single-tail multi-producer append path shared by
//! both dequeue engines (spec.md §3.2, §4.1).
//!
//! Generalizes the teacher's `tail: CachePadded<Atomic<Node<T>>>` field to
//! a raw `AtomicPtr` — reclamation here is custom (gate-managed head
//! versions or detach-and-own), not an automatic epoch GC, so the tail
//! itself is a bare pointer the two engines interpret differently: LL-RCU
//! starts it `null`, Detach-TLS starts it pointing at a sentinel.

use crate::atomics::{AtomicPtr, Ordering};
use crate::node::Node;
use crossbeam_utils::CachePadded;
use std::ptr;

/// The append side of the queue: one atomic tail, shared by every producer.
pub(crate) struct SharedList<T> {
    pub(crate) tail: CachePadded<AtomicPtr<Node<T>>>,
}

impl<T> SharedList<T> {
    /// LL-RCU form: tail starts null: the first producer is responsible
    /// for installing the initial head version (spec.md §3.2, §4.1 step 3).
    pub(crate) fn new_unanchored() -> Self {
        SharedList {
            tail: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Detach-TLS form: tail starts at a caller-owned sentinel so producers
    /// always have something non-null to link from (spec.md §3.2).
    pub(crate) fn new_anchored(sentinel: *mut Node<T>) -> Self {
        debug_assert!(!sentinel.is_null());
        SharedList {
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
        }
    }

    /// Publish `node` as the new tail and link it from its predecessor
    /// (spec.md §4.1 steps 2-3). Returns the previous tail pointer: null
    /// only in the LL-RCU unanchored form's first call, never otherwise.
    ///
    /// Between the exchange and the predecessor-link store there is a
    /// transient window where `prev_tail.next` is still null even though
    /// `prev_tail` is no longer the tail (spec.md §4.1). Callers that may
    /// observe this — Detach-TLS popping a non-last node — must spin on
    /// `next` themselves; this function does not hide that window.
    pub(crate) fn publish(&self, node: *mut Node<T>) -> *mut Node<T> {
        debug_assert!(!node.is_null());
        let prev_tail = self.tail.swap(node, Ordering::AcqRel);
        if !prev_tail.is_null() {
            unsafe {
                (*prev_tail).next.store(node, Ordering::Release);
            }
        }
        prev_tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn first_publish_on_unanchored_list_returns_null() {
        let list = SharedList::<u64>::new_unanchored();
        let n = Box::into_raw(Box::new(Node::new(1)));
        let prev = list.publish(n);
        assert!(prev.is_null());
        unsafe {
            drop(Box::from_raw(n));
        }
    }

    #[test]
    fn second_publish_links_predecessor() {
        let list = SharedList::<u64>::new_unanchored();
        let n1 = Box::into_raw(Box::new(Node::new(1)));
        let n2 = Box::into_raw(Box::new(Node::new(2)));
        list.publish(n1);
        let prev = list.publish(n2);
        assert_eq!(prev, n1);
        unsafe {
            assert_eq!((*n1).next.load(Ordering::Acquire), n2);
            drop(Box::from_raw(n1));
            drop(Box::from_raw(n2));
        }
    }

    #[test]
    fn anchored_list_always_links_from_sentinel() {
        let sentinel = Box::into_raw(Box::new(Node::<u64>::empty()));
        let list = SharedList::new_anchored(sentinel);
        let n1 = Box::into_raw(Box::new(Node::new(9)));
        let prev = list.publish(n1);
        assert_eq!(prev, sentinel);
        unsafe {
            assert_eq!((*sentinel).next.load(Ordering::Acquire), n1);
            drop(Box::from_raw(sentinel));
            drop(Box::from_raw(n1));
        }
    }
}
