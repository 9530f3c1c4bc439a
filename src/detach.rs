//! C6 — Detach-TLS Dequeue Engine (spec.md §4.2, plus the §4.8 supplemental
//! per-producer-lane variant).
//!
//! Grounded on `examples/original_source/scalable_queue.c`'s `scq_enqueue`/
//! `scq_dequeue`: a consumer with an empty private list detaches the whole
//! shared chain in one exchange (`sentinel.next`, then `tail`) and owns it
//! outright from then on — no CAS races with other consumers over
//! individual nodes, unlike LL-RCU. Node state (`node.rs`'s tri-state) is
//! never consulted here; ownership transfers with the detach exchange.

use crate::gate::FreeNode;
use crate::list::SharedList;
use crate::node::Node;
use crate::tls;
use crossbeam_utils::Backoff;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One producer-facing lane: a shared tail anchored at a dummy sentinel.
/// Single-lane mode (the default) has exactly one of these; the §4.8
/// per-producer-lane variant has one per producer to remove the single
/// shared tail as a contention point.
struct DetachLane<T> {
    list: SharedList<T>,
    sentinel: *mut Node<T>,
}

unsafe impl<T: Send> Send for DetachLane<T> {}
unsafe impl<T: Send> Sync for DetachLane<T> {}

impl<T> DetachLane<T> {
    fn new() -> Self {
        let sentinel = Box::into_raw(Box::new(Node::empty()));
        DetachLane {
            list: SharedList::new_anchored(sentinel),
            sentinel,
        }
    }

    fn enqueue(&self, node: *mut Node<T>) {
        self.list.publish(node);
    }

    /// Detach the whole chain currently reachable from this lane's
    /// sentinel into `private`, if any. Mirrors `scq_dequeue`'s two-step
    /// exchange: steal `sentinel.next` first, then capture whatever `tail`
    /// is at that moment (which may have already moved past the node we
    /// just stole, if producers raced in between — those nodes come along
    /// for free since `private.tail` is read after the steal).
    fn try_detach(&self, private: &mut PrivateList<T>) -> bool {
        let head = unsafe { (*self.sentinel).next.swap(ptr::null_mut(), Ordering::AcqRel) };
        if head.is_null() {
            return false;
        }
        let tail = self.list.tail.swap(self.sentinel, Ordering::AcqRel);
        private.head = head;
        private.tail = tail;
        true
    }
}

impl<T> Drop for DetachLane<T> {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.sentinel));
        }
    }
}

/// A consumer's private chain, stolen whole from a lane and then owned
/// exclusively — no other thread will ever touch these nodes again
/// (spec.md §4.2).
struct PrivateList<T> {
    head: *mut Node<T>,
    tail: *mut Node<T>,
}

impl<T> PrivateList<T> {
    fn empty() -> Self {
        PrivateList {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    /// Pop one datum, spinning through the §4.1/§9 transient `next == null`
    /// window if the node we're about to advance past hasn't been linked
    /// by its producer yet.
    fn pop(&mut self, free_node: &FreeNode<T>) -> Option<T> {
        if self.head.is_null() {
            return None;
        }
        let node = self.head;
        let datum = unsafe { (*node).read_datum() };

        if node == self.tail {
            self.head = ptr::null_mut();
            self.tail = ptr::null_mut();
        } else {
            let backoff = Backoff::new();
            loop {
                let next = unsafe { (*node).next.load(Ordering::Acquire) };
                if !next.is_null() {
                    self.head = next;
                    break;
                }
                backoff.spin();
            }
        }

        free_node(node);
        Some(datum)
    }

    /// Racy O(n) length of the reachable (non-spinning) prefix, used only
    /// by `len_hint`.
    fn len(&self) -> usize {
        count_chain(self.head)
    }
}

fn count_chain<T>(node: *mut Node<T>) -> usize {
    let mut node = node;
    let mut n = 0usize;
    while !node.is_null() {
        n += 1;
        node = unsafe { (*node).next.load(Ordering::Acquire) };
    }
    n
}

/// Tracks every thread's `PrivateList` that has ever been touched for one
/// engine, so `destroy` can reach and drain batches a consumer stole but
/// never fully consumed — not just what's still reachable from a lane
/// (spec.md §4.7 "destroy... Drains the list"). Registration happens once
/// per thread, on first touch, via the brief lock below; the hot dequeue
/// path never takes it (spec.md §5's "brief registry spinlock ... not in
/// the hot path").
struct PrivateListRegistry<T> {
    lists: Mutex<Vec<*mut PrivateList<T>>>,
}

unsafe impl<T: Send> Send for PrivateListRegistry<T> {}
unsafe impl<T: Send> Sync for PrivateListRegistry<T> {}

impl<T> PrivateListRegistry<T> {
    fn new() -> Self {
        PrivateListRegistry {
            lists: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, ptr: *mut PrivateList<T>) {
        self.lists.lock().unwrap().push(ptr);
    }

    /// Drain and free every registered list's remaining nodes, then the
    /// list allocations themselves. Caller guarantees quiescence, same
    /// contract as every other `destroy` path in this crate: no registered
    /// thread may still be popping from its list concurrently.
    fn drain_all(&self, free_node: &FreeNode<T>) {
        let ptrs = std::mem::take(&mut *self.lists.lock().unwrap());
        for ptr in ptrs {
            unsafe {
                let list = &mut *ptr;
                while list.pop(free_node).is_some() {}
                drop(Box::from_raw(ptr));
            }
        }
    }
}

pub(crate) struct DetachEngine<T> {
    lanes: Vec<DetachLane<T>>,
    queue_id: u64,
    /// Round-robin cursor consumers use to pick which lane to raid next
    /// when their own private list runs dry (spec.md §4.8).
    last_dequeued_thread_idx: AtomicUsize,
    /// Round-robin cursor producers use, once each, to pick their lane in
    /// multi-lane mode.
    next_producer_lane: AtomicUsize,
    free_node: FreeNode<T>,
    /// Every thread's `PrivateList`, registered on first touch, so
    /// `destroy` can reclaim nodes no lane can see anymore.
    private_lists: PrivateListRegistry<T>,
}

impl<T: 'static> DetachEngine<T> {
    pub(crate) fn new(queue_id: u64, free_node: FreeNode<T>) -> Self {
        Self::with_lanes(queue_id, 1, free_node)
    }

    /// spec.md §4.8: one lane per producer instead of a single shared
    /// sentinel, to remove the tail as a single point of contention.
    pub(crate) fn with_lanes(queue_id: u64, lane_count: usize, free_node: FreeNode<T>) -> Self {
        assert!(lane_count >= 1);
        DetachEngine {
            lanes: (0..lane_count).map(|_| DetachLane::new()).collect(),
            queue_id,
            last_dequeued_thread_idx: AtomicUsize::new(0),
            next_producer_lane: AtomicUsize::new(0),
            free_node,
            private_lists: PrivateListRegistry::new(),
        }
    }

    fn producer_lane_index(&self) -> usize {
        if self.lanes.len() == 1 {
            return 0;
        }
        tls::with_local(
            self.queue_id,
            || self.next_producer_lane.fetch_add(1, Ordering::Relaxed) % self.lanes.len(),
            |lane: &mut usize| *lane,
        )
    }

    /// Run `f` against this thread's private list, registering it with
    /// `private_lists` the first time this thread touches this queue.
    fn with_private_list<R>(&self, f: impl FnOnce(&mut PrivateList<T>) -> R) -> R {
        let registry = &self.private_lists;
        tls::with_local(
            self.queue_id,
            || {
                let ptr = Box::into_raw(Box::new(PrivateList::empty()));
                registry.register(ptr);
                ptr
            },
            |slot: &mut *mut PrivateList<T>| {
                let private = unsafe { &mut **slot };
                f(private)
            },
        )
    }

    pub(crate) fn enqueue(&self, node: *mut Node<T>) {
        let idx = self.producer_lane_index();
        self.lanes[idx].enqueue(node);
    }

    /// spec.md §4.2.
    pub(crate) fn dequeue(&self) -> Option<T> {
        self.with_private_list(|private| {
            if let Some(v) = private.pop(&self.free_node) {
                return Some(v);
            }

            let lane_count = self.lanes.len();
            for _ in 0..lane_count {
                let idx = self.last_dequeued_thread_idx.fetch_add(1, Ordering::Relaxed) % lane_count;
                if self.lanes[idx].try_detach(private) {
                    return private.pop(&self.free_node);
                }
            }
            None
        })
    }

    /// Drain and free everything; caller guarantees quiescence (spec.md
    /// §4.7). Lane sentinels are freed by `DetachLane`'s own `Drop`; every
    /// thread's leftover private-list nodes are freed via `private_lists`,
    /// which is how a partially-drained steal batch gets reclaimed instead
    /// of leaking past `destroy`.
    pub(crate) fn destroy(&mut self) {
        for lane in &self.lanes {
            let mut node = unsafe { (*lane.sentinel).next.load(Ordering::Acquire) };
            while !node.is_null() {
                let next = unsafe { (*node).next.load(Ordering::Acquire) };
                (self.free_node)(node);
                node = next;
            }
        }
        self.private_lists.drain_all(&self.free_node);
    }

    /// Racy O(lanes) peek (SPEC_FULL.md §6.2 `is_empty_hint`): true iff this
    /// thread's private list is empty and every lane's sentinel currently
    /// has no successor. Does not detach anything, so it cannot steal a
    /// value from a real `dequeue`.
    pub(crate) fn is_empty_hint(&self) -> bool {
        let private_empty = self.with_private_list(|p| p.head.is_null());
        if !private_empty {
            return false;
        }
        self.lanes
            .iter()
            .all(|lane| unsafe { (*lane.sentinel).next.load(Ordering::Acquire).is_null() })
    }

    /// Racy O(lanes + private list) size estimate (SPEC_FULL.md §6.2
    /// `len_hint`): this thread's private list length plus every lane's
    /// currently-reachable chain length. Same approximate-under-concurrent-
    /// mutation caveat as `is_empty_hint`.
    pub(crate) fn len_hint(&self) -> usize {
        let private_len = self.with_private_list(|p| p.len());
        let lanes_len: usize = self
            .lanes
            .iter()
            .map(|lane| unsafe { count_chain((*lane.sentinel).next.load(Ordering::Acquire)) })
            .sum();
        private_len + lanes_len
    }
}
