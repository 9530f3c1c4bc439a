//! C8 — Queue Handle & Registry (spec.md §4.7, §6.2; redesigned per spec.md
//! §9's "Global thread-local state" and "global queue-id table" flags).
//!
//! The original ties every operation to a fixed-size, process-wide id table
//! so C's thread-locals can be indexed by (thread, queue). Rust doesn't need
//! that indirection: each handle below carries its own id, handed out by a
//! crate-wide `AtomicU64` counter with no cap and no reuse, and uses it only
//! to key into the per-call-site `thread_local!` maps in `tls.rs`. There is
//! no registry left to spin a lock over, so `init`/`destroy` need none
//! either — matching the teacher's own `SelkirkLinkedQueue::new` shape
//! (a plain constructor, no external registration step).

use crate::config::QueueConfig;
use crate::detach::DetachEngine;
use crate::error::QueueError;
use crate::gate::FreeNode;
use crate::node::Node;
use crate::rcu::LlRcuEngine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

fn next_queue_id() -> u64 {
    NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Marker bound for the queue's payload (spec.md §3.1: "64-bit opaque
/// payload (scalar or caller-supplied pointer)"). Blanket-implemented for
/// any `Copy + Send + 'static` type, so `u64` and raw pointer newtypes both
/// qualify without the caller writing an impl.
pub trait Payload: Copy + Send + 'static {}
impl<T: Copy + Send + 'static> Payload for T {}

fn heap_free<T: Payload>() -> FreeNode<T> {
    Arc::new(|n: *mut Node<T>| unsafe {
        drop(Box::from_raw(n));
    })
}

/// Node-reclamation callback for the LL-RCU engine. Unlike Detach-TLS,
/// LL-RCU nodes may have been carved from a per-thread slab (spec.md §4.6),
/// so the callback must check `Node::is_node_pool` and hand slab-sourced
/// nodes back to the slab via `mark_free` instead of `Box::from_raw`-ing a
/// pointer the global allocator never produced.
#[cfg(feature = "slab")]
fn rcu_free_node<T: Payload>() -> FreeNode<T> {
    Arc::new(|n: *mut Node<T>| unsafe {
        if (*n).is_node_pool() {
            (*n).mark_free();
        } else {
            drop(Box::from_raw(n));
        }
    })
}

#[cfg(not(feature = "slab"))]
fn rcu_free_node<T: Payload>() -> FreeNode<T> {
    heap_free()
}

/// Fallible heap allocation for a single node (spec.md §7
/// `AllocationFailure`): the system allocator returning null is the only
/// way `enqueue` can fail once a slab (if any) has already declined. Uses
/// `Node<T>`'s ordinary layout, so the result can still be freed later with
/// a plain `Box::from_raw`.
fn heap_alloc_node<T: Payload>(datum: T) -> Result<*mut Node<T>, QueueError> {
    use std::alloc::{alloc, Layout};
    let layout = Layout::new::<Node<T>>();
    unsafe {
        let raw = alloc(layout) as *mut Node<T>;
        if raw.is_null() {
            return Err(QueueError::AllocationFailure);
        }
        raw.write(Node::new(datum));
        Ok(raw)
    }
}

/// LL-RCU-backed queue handle (spec.md §4.3, §6.2).
///
/// Dequeue is lock-free: a consumer whose entire visited prefix was claimed
/// out from under it retries on the newly-installed head version rather
/// than blocking. Nodes are carved from a per-thread huge-page slab when
/// the `slab` feature is enabled and [`QueueConfig::use_slab`] is set
/// (spec.md §4.6); otherwise every node goes through the system allocator.
pub struct LlRcuQueue<T: Payload> {
    id: u64,
    engine: LlRcuEngine<T>,
    config: QueueConfig,
}

impl<T: Payload> LlRcuQueue<T> {
    /// spec.md §4.7 `init`, default configuration.
    pub fn init() -> Result<Self, QueueError> {
        Self::with_config(QueueConfig::default())
    }

    /// spec.md §4.7 `init`, with explicit slab tunables (SPEC_FULL.md §8).
    pub fn with_config(config: QueueConfig) -> Result<Self, QueueError> {
        let id = next_queue_id();
        log::debug!("LlRcuQueue[{id}]: init (use_slab={})", config.use_slab);
        Ok(LlRcuQueue {
            id,
            engine: LlRcuEngine::new(rcu_free_node()),
            config,
        })
    }

    /// spec.md §6.2 `create_tls_node_pool`: reserve this thread's slab
    /// arena for this queue. A no-op when the slab is disabled by config or
    /// by compiling without the `slab` feature.
    pub fn create_tls_node_pool(&self) -> Result<(), QueueError> {
        if !self.config.use_slab {
            return Ok(());
        }
        #[cfg(feature = "slab")]
        {
            crate::slab::create_tls_node_pool::<T>(self.id, self.config.slab)
        }
        #[cfg(not(feature = "slab"))]
        {
            Ok(())
        }
    }

    /// spec.md §6.2 `destroy_tls_node_pool`: must precede thread exit;
    /// calling it without a prior `create_tls_node_pool` on this thread is
    /// a contract violation (spec.md §7), enforced with `debug_assert!`
    /// inside the slab module.
    pub fn destroy_tls_node_pool(&self) {
        if !self.config.use_slab {
            return;
        }
        #[cfg(feature = "slab")]
        {
            crate::slab::destroy_tls_node_pool::<T>(self.id);
        }
    }

    /// spec.md §4.1 `enqueue`. Fails only if the slab (when enabled) has
    /// declined and the system allocator then also returns null
    /// (`AllocationFailure`, spec.md §7) — slab exhaustion alone is not an
    /// error, it just falls back to the system allocator.
    pub fn enqueue(&self, datum: T) -> Result<(), QueueError> {
        let node = self.alloc_node(datum)?;
        self.engine.enqueue(node);
        Ok(())
    }

    fn alloc_node(&self, datum: T) -> Result<*mut Node<T>, QueueError> {
        #[cfg(feature = "slab")]
        if self.config.use_slab {
            if let Some(n) = crate::slab::alloc_node(self.id, datum) {
                return Ok(n);
            }
        }
        heap_alloc_node(datum)
    }

    /// spec.md §4.3 `dequeue`.
    pub fn dequeue(&self) -> Option<T> {
        self.engine.dequeue()
    }

    /// SPEC_FULL.md §6.2 `is_empty_hint`: racy, O(visited prefix). Approximate
    /// under concurrent mutation; never claims a node, so it cannot steal a
    /// value a real `dequeue` would otherwise see.
    pub fn is_empty_hint(&self) -> bool {
        self.engine.is_empty_hint()
    }

    /// SPEC_FULL.md §6.2 `len_hint`: racy, O(visited prefix) count of
    /// unclaimed nodes. Same approximation caveats as `is_empty_hint`.
    pub fn len_hint(&self) -> usize {
        self.engine.len_hint()
    }

    /// spec.md §4.7 `destroy`: requires the caller to guarantee quiescence
    /// (no producer or consumer concurrently active). Consuming `self`
    /// makes a use-after-destroy a compile error rather than the "may
    /// assert" contract violation spec.md §7 allows for; the actual drain
    /// runs once, in `Drop`, when `self` falls out of scope below.
    pub fn destroy(self) {
        log::debug!("LlRcuQueue[{}]: destroy", self.id);
    }
}

impl<T: Payload> Drop for LlRcuQueue<T> {
    fn drop(&mut self) {
        self.engine.destroy();
    }
}

/// Detach-TLS-backed queue handle (spec.md §4.2, §6.2).
///
/// Dequeue is wait-free on the fast path (pop from the calling thread's own
/// private list); the slow path detaches a whole shared-list prefix in two
/// atomic exchanges. No FIFO guarantee across consumers — each consumer
/// only sees its own detached batches in order (spec.md §4.2).
pub struct DetachQueue<T: Payload> {
    id: u64,
    engine: DetachEngine<T>,
}

impl<T: Payload> DetachQueue<T> {
    /// spec.md §4.7 `init`: single shared sentinel (the form
    /// `examples/original_source/scalable_queue.c` implements).
    pub fn init() -> Result<Self, QueueError> {
        let id = next_queue_id();
        log::debug!("DetachQueue[{id}]: init (single lane)");
        Ok(DetachQueue {
            id,
            engine: DetachEngine::new(id, heap_free()),
        })
    }

    /// SPEC_FULL.md §4.8: one sentinel/tail lane per producer instead of a
    /// single shared one, removing the tail as a single contention point.
    /// Consumers round-robin across lanes, starting from
    /// `last_dequeued_thread_idx`, and steal from the first non-empty one
    /// (spec.md §4.2 prose).
    pub fn with_producer_lanes(lane_count: usize) -> Result<Self, QueueError> {
        let id = next_queue_id();
        log::debug!("DetachQueue[{id}]: init ({lane_count} producer lanes)");
        Ok(DetachQueue {
            id,
            engine: DetachEngine::with_lanes(id, lane_count, heap_free()),
        })
    }

    /// spec.md §4.1 `enqueue`. Fails only if the system allocator returns
    /// null (`AllocationFailure`, spec.md §7) — Detach-TLS never uses the
    /// slab (spec.md §4.6 is LL-RCU only).
    pub fn enqueue(&self, datum: T) -> Result<(), QueueError> {
        let node = heap_alloc_node(datum)?;
        self.engine.enqueue(node);
        Ok(())
    }

    /// spec.md §4.2 `dequeue`.
    pub fn dequeue(&self) -> Option<T> {
        self.engine.dequeue()
    }

    /// SPEC_FULL.md §6.2 `is_empty_hint`: racy; true iff this thread's
    /// private list and every lane's shared chain looked empty at the
    /// moment of the call.
    pub fn is_empty_hint(&self) -> bool {
        self.engine.is_empty_hint()
    }

    /// SPEC_FULL.md §6.2 `len_hint`: racy; this thread's private list length
    /// plus every lane's currently-reachable chain length.
    pub fn len_hint(&self) -> usize {
        self.engine.len_hint()
    }

    /// spec.md §4.7 `destroy`: requires quiescence. As with `LlRcuQueue`,
    /// the drain itself runs once in `Drop`, right after this call consumes
    /// `self`.
    pub fn destroy(self) {
        log::debug!("DetachQueue[{}]: destroy", self.id);
    }
}

impl<T: Payload> Drop for DetachQueue<T> {
    fn drop(&mut self) {
        self.engine.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ll_rcu_roundtrip_without_slab() {
        let q = LlRcuQueue::<u64>::with_config(QueueConfig::without_slab()).unwrap();
        for i in 0..50u64 {
            q.enqueue(i).unwrap();
        }
        for i in 0..50u64 {
            assert_eq!(q.dequeue(), Some(i));
        }
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty_hint());
    }

    #[test]
    fn ll_rcu_is_empty_hint_tracks_claims() {
        let q = LlRcuQueue::<u64>::with_config(QueueConfig::without_slab()).unwrap();
        assert!(q.is_empty_hint());
        q.enqueue(1).unwrap();
        assert!(!q.is_empty_hint());
        q.dequeue();
        assert!(q.is_empty_hint());
    }

    #[test]
    fn detach_roundtrip_single_lane() {
        let q = DetachQueue::<u64>::init().unwrap();
        for i in 0..50u64 {
            q.enqueue(i).unwrap();
        }
        for i in 0..50u64 {
            assert_eq!(q.dequeue(), Some(i));
        }
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty_hint());
    }

    #[test]
    fn distinct_queues_get_distinct_ids() {
        let a = LlRcuQueue::<u64>::with_config(QueueConfig::without_slab()).unwrap();
        let b = LlRcuQueue::<u64>::with_config(QueueConfig::without_slab()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn destroy_after_partial_drain_frees_remainder() {
        // Smoke test at the public-API level: `destroy` must not crash or
        // double-free when nodes are still parked in the calling thread's
        // private list. `detach::tests::destroy_reclaims_leftover_private_
        // list_nodes` verifies, with a counting free callback, that those
        // nodes are actually reclaimed rather than merely not-crashing.
        let q = DetachQueue::<u64>::init().unwrap();
        for i in 0..10u64 {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.dequeue(), Some(0));
        q.destroy();
    }

    #[test]
    fn ll_rcu_len_hint_tracks_enqueue_and_dequeue() {
        let q = LlRcuQueue::<u64>::with_config(QueueConfig::without_slab()).unwrap();
        assert_eq!(q.len_hint(), 0);
        for i in 0..5u64 {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.len_hint(), 5);
        q.dequeue();
        assert_eq!(q.len_hint(), 4);
    }

    #[test]
    fn detach_len_hint_tracks_enqueue_and_dequeue() {
        let q = DetachQueue::<u64>::init().unwrap();
        assert_eq!(q.len_hint(), 0);
        for i in 0..5u64 {
            q.enqueue(i).unwrap();
        }
        assert_eq!(q.len_hint(), 5);
        q.dequeue();
        assert_eq!(q.len_hint(), 4);
    }
}
