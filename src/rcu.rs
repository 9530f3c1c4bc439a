//! C5 — LL-RCU Dequeue Engine (spec.md §4.1 first-publisher branch, §4.3).
//!
//! Grounded on `examples/original_source/linearizable/scalable_queue.c`'s
//! `scq_enqueue`/`scq_dequeue`. Lock-free, not wait-free: a consumer whose
//! whole visited prefix was already claimed by someone else retries on a
//! fresh head version rather than blocking (spec.md §4.3 step 4).

use crate::gate::{FreeNode, Gate};
use crate::list::SharedList;
use crate::node::Node;
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};

/// The LL-RCU engine's half of a queue: the shared append list plus the
/// versioned head gate that makes traversal safe without per-node locks.
pub(crate) struct LlRcuEngine<T> {
    list: SharedList<T>,
    gate: Gate<T>,
    /// spec.md §3.2/§4.7: unset until the first producer installs the
    /// initial head version; `dequeue` on an uninitialized head is simply
    /// not-found, never a retry loop over nothing.
    head_init_flag: AtomicBool,
}

impl<T: 'static> LlRcuEngine<T> {
    pub(crate) fn new(free_node: FreeNode<T>) -> Self {
        LlRcuEngine {
            list: SharedList::new_unanchored(),
            gate: Gate::new(free_node),
            head_init_flag: AtomicBool::new(false),
        }
    }

    /// spec.md §4.1: publish `node`, and if it is the very first node ever
    /// published, install the initial head version (the `prev_tail == null`
    /// branch, unique to the LL-RCU engine).
    pub(crate) fn enqueue(&self, node: *mut Node<T>) {
        let prev_tail = self.list.publish(node);
        if prev_tail.is_null() {
            self.gate.install(node);
            self.head_init_flag.store(true, Ordering::Release);
        }
    }

    /// spec.md §4.3.
    pub(crate) fn dequeue(&self) -> Option<T> {
        if !self.head_init_flag.load(Ordering::Acquire) {
            return None;
        }

        let backoff = Backoff::new();
        loop {
            let handle = match self.gate.acquire() {
                Some(h) => h,
                None => return None,
            };
            let version = handle.get();

            let mut node = version.head_node;
            let mut claimed: Option<T> = None;

            while !node.is_null() && version.tail_node.load(Ordering::Acquire).is_null() {
                let n = unsafe { &*node };
                if !n.looks_claimed() && n.try_claim_dequeued() {
                    claimed = Some(unsafe { n.read_datum() });
                    break;
                }
                node = n.next.load(Ordering::Acquire);
            }

            if let Some(datum) = claimed {
                let next = unsafe { (*node).next.load(Ordering::Acquire) };
                if !next.is_null() {
                    // Best-effort: a losing CAS here means another consumer
                    // already advanced the head (spec.md §4.4).
                    self.gate.try_advance(handle.as_ptr(), next, node);
                }
                return Some(datum);
            }

            if node.is_null() {
                // Reached the real tail of the known-live range without a
                // claim: the queue is empty from this version's viewpoint.
                return None;
            }

            // Every node we visited was already claimed and the version
            // closed out from under us mid-walk; retry on the new head.
            backoff.spin();
        }
    }

    /// Drain and free everything; caller guarantees quiescence (spec.md
    /// §4.7). `drain_for_destroy` walks from the live version's head_node
    /// through to the real tail of `self.list`, so every published node is
    /// covered without needing a separate pass over `list` here.
    pub(crate) fn destroy(&mut self) {
        self.gate.drain_for_destroy();
    }

    /// Racy O(n) peek (SPEC_FULL.md §6.2 `is_empty_hint`): true iff no
    /// unclaimed node was visible in the live head version at the moment of
    /// the call. Never claims anything itself, so it cannot steal a value
    /// from a real `dequeue`.
    pub(crate) fn is_empty_hint(&self) -> bool {
        if !self.head_init_flag.load(Ordering::Acquire) {
            return true;
        }
        let handle = match self.gate.acquire() {
            Some(h) => h,
            None => return true,
        };
        let version = handle.get();
        let mut node = version.head_node;
        while !node.is_null() && version.tail_node.load(Ordering::Acquire).is_null() {
            let n = unsafe { &*node };
            if !n.looks_claimed() {
                return false;
            }
            node = n.next.load(Ordering::Acquire);
        }
        true
    }

    /// Racy O(n) size estimate (SPEC_FULL.md §6.2 `len_hint`): counts the
    /// unclaimed nodes visible in the live head version at the moment of the
    /// call. Same approximate-under-concurrent-mutation caveat as
    /// `is_empty_hint`; a value claimed or published mid-walk can be missed
    /// or double-counted relative to any single linearization point.
    pub(crate) fn len_hint(&self) -> usize {
        if !self.head_init_flag.load(Ordering::Acquire) {
            return 0;
        }
        let handle = match self.gate.acquire() {
            Some(h) => h,
            None => return 0,
        };
        let version = handle.get();
        let mut node = version.head_node;
        let mut count = 0usize;
        while !node.is_null() && version.tail_node.load(Ordering::Acquire).is_null() {
            let n = unsafe { &*node };
            if !n.looks_claimed() {
                count += 1;
            }
            node = n.next.load(Ordering::Acquire);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn heap_free() -> FreeNode<u64> {
        Arc::new(|n: *mut Node<u64>| unsafe {
            drop(Box::from_raw(n));
        })
    }

    #[test]
    fn empty_queue_returns_none() {
        let engine = LlRcuEngine::<u64>::new(heap_free());
        assert_eq!(engine.dequeue(), None);
    }

    #[test]
    fn single_enqueue_dequeue_roundtrip() {
        let engine = LlRcuEngine::<u64>::new(heap_free());
        engine.enqueue(Box::into_raw(Box::new(Node::new(42))));
        assert_eq!(engine.dequeue(), Some(42));
        assert_eq!(engine.dequeue(), None);
    }

    #[test]
    fn fifo_order_for_single_producer() {
        let engine = LlRcuEngine::<u64>::new(heap_free());
        for i in 0..100u64 {
            engine.enqueue(Box::into_raw(Box::new(Node::new(i))));
        }
        for i in 0..100u64 {
            assert_eq!(engine.dequeue(), Some(i));
        }
        assert_eq!(engine.dequeue(), None);
    }

    #[test]
    fn each_value_delivered_at_most_once_under_racing_consumers() {
        use std::collections::HashSet;
        let engine = Arc::new(LlRcuEngine::<u64>::new(heap_free()));
        for i in 0..500u64 {
            engine.enqueue(Box::into_raw(Box::new(Node::new(i))));
        }

        let results: Vec<_> = crossbeam_utils::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let engine = Arc::clone(&engine);
                    scope.spawn(move |_| {
                        let mut got = Vec::new();
                        while let Some(v) = engine.dequeue() {
                            got.push(v);
                        }
                        got
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        let mut seen = HashSet::new();
        let mut total = 0;
        for batch in results {
            total += batch.len();
            for v in batch {
                assert!(seen.insert(v), "value {v} delivered more than once");
            }
        }
        assert_eq!(total, 500);
        assert_eq!(seen.len(), 500);
    }
}
