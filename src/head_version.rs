//! C4 — Head-Version Chain & Reclaimer (spec.md §3.3, §4.4, §4.5).
//!
//! Grounded on `examples/original_source/linearizable/scalable_queue.c`'s
//! `struct scq_head_version`, `adjust_head`, and `scq_head_version_free`.
//! `prev` doubles as a one-bit mailbox: its top bit, when set, means "my
//! last reader released me and I'm ready to be freed, I'm just waiting for
//! my older sibling to finish first" (spec.md §9 "Cyclic structures").

use crate::node::Node;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

const RELEASE_BIT: usize = 1 << (usize::BITS - 1);

#[inline]
fn untagged<T>(p: *mut T) -> *mut T {
    ((p as usize) & !RELEASE_BIT) as *mut T
}

#[inline]
fn has_release_bit<T>(p: *mut T) -> bool {
    (p as usize) & RELEASE_BIT != 0
}

#[inline]
fn tagged<T>(p: *mut T) -> *mut T {
    ((p as usize) | RELEASE_BIT) as *mut T
}

/// A contiguous range `[head_node, tail_node]` of live nodes, kept alive by
/// the gate's grace period (spec.md §3.3).
pub(crate) struct HeadVersion<T> {
    pub(crate) head_node: *mut Node<T>,
    /// Null while this version is current; set once a successor version
    /// has been installed (spec.md §3.3, §4.4).
    pub(crate) tail_node: AtomicPtr<Node<T>>,
    /// Non-owning back reference into the chain; its top bit is the
    /// release-flag mailbox described above (spec.md §4.5, §9).
    pub(crate) prev: AtomicPtr<HeadVersion<T>>,
    pub(crate) next: AtomicPtr<HeadVersion<T>>,
}

impl<T> HeadVersion<T> {
    pub(crate) fn new(head_node: *mut Node<T>, prev: *mut HeadVersion<T>) -> Self {
        HeadVersion {
            head_node,
            tail_node: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(prev),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        !self.tail_node.load(Ordering::Acquire).is_null()
    }
}

/// Reclaim `version` and, transitively, any older sibling already waiting
/// on it (spec.md §4.5). `free_node` releases one node's memory (system
/// allocator free or slab `mark_free`, per the caller's engine); `free_version`
/// releases the `HeadVersion` allocation itself.
///
/// # Safety
/// The caller (the gate) must guarantee this runs at most once per version
/// and only once that version has zero acquired references.
pub(crate) unsafe fn reclaim<T>(
    mut version: *mut HeadVersion<T>,
    free_node: &mut dyn FnMut(*mut Node<T>),
    free_version: &mut dyn FnMut(*mut HeadVersion<T>),
) {
    loop {
        let v = &*version;

        // Step 1: mark ourselves ready; learn whether an older sibling is
        // still unfreed.
        let prev_before = v.prev.fetch_or(RELEASE_BIT, Ordering::AcqRel);
        if !untagged(prev_before).is_null() {
            // Not the oldest: our older sibling's eventual free will walk
            // into us via `next` and notice the release bit we just set.
            return;
        }

        // Step 2: we are the oldest live link. Free our node range and the
        // version struct itself.
        let mut node = v.head_node;
        let tail = v.tail_node.load(Ordering::Acquire);
        debug_assert!(!tail.is_null(), "reclaimed version must be closed");
        loop {
            let next = (*node).next.load(Ordering::Acquire);
            let done = node == tail;
            free_node(node);
            if done {
                break;
            }
            node = next;
        }

        let next_version = v.next.load(Ordering::Acquire);
        free_version(version);

        if next_version.is_null() {
            // We were the newest closed version with no successor yet
            // installed; nothing further to cascade into.
            return;
        }

        // Step 3: hand the baton to `next`, or discover it's already ready.
        let next_ref = &*next_version;
        let expected = version;
        match next_ref.prev.compare_exchange(
            expected,
            ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // `next` isn't ready yet; its own eventual release will see
                // a null prev and free itself with no further help.
                return;
            }
            Err(observed) => {
                if has_release_bit(observed) {
                    // `next`'s last reader already released while we were
                    // freeing; continue the cascade into it.
                    version = next_version;
                    continue;
                }
                // `prev` changed to something else entirely: impossible
                // under the single-writer-per-slot discipline above, but
                // treat conservatively as "not our turn" rather than loop
                // forever on an assumption that no longer holds.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;

    fn leaf_node() -> *mut Node<u64> {
        Box::into_raw(Box::new(Node::new(0)))
    }

    #[test]
    fn single_version_frees_its_own_range() {
        unsafe {
            let n1 = leaf_node();
            let n2 = leaf_node();
            (*n1).next.store(n2, Ordering::Release);

            let v = Box::into_raw(Box::new(HeadVersion::new(n1, ptr::null_mut())));
            (*v).tail_node.store(n2, Ordering::Release);

            let freed_nodes = Counter::new(0);
            let freed_versions = Counter::new(0);
            let mut free_node = |p: *mut Node<u64>| {
                freed_nodes.fetch_add(1, Ordering::Relaxed);
                drop(Box::from_raw(p));
            };
            let mut free_version = |p: *mut HeadVersion<u64>| {
                freed_versions.fetch_add(1, Ordering::Relaxed);
                drop(Box::from_raw(p));
            };
            reclaim(v, &mut free_node, &mut free_version);

            assert_eq!(freed_nodes.load(Ordering::Relaxed), 2);
            assert_eq!(freed_versions.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn cascades_into_already_ready_successor() {
        unsafe {
            let n1 = leaf_node();
            let n2 = leaf_node();
            (*n1).next.store(n2, Ordering::Release);

            // v1 covers [n1], v2 covers [n2]; v2 is "ready" (release bit
            // already set on its own prev) before v1 is reclaimed.
            let v1 = Box::into_raw(Box::new(HeadVersion::new(n1, ptr::null_mut())));
            (*v1).tail_node.store(n1, Ordering::Release);

            let v2 = Box::into_raw(Box::new(HeadVersion::new(n2, v1)));
            (*v2).tail_node.store(n2, Ordering::Release);
            (*v1).next.store(v2, Ordering::Release);
            // Simulate v2's last reader having already released.
            (*v2).prev.fetch_or(RELEASE_BIT, Ordering::AcqRel);

            let freed_nodes = Counter::new(0);
            let freed_versions = Counter::new(0);
            let mut free_node = |p: *mut Node<u64>| {
                freed_nodes.fetch_add(1, Ordering::Relaxed);
                drop(Box::from_raw(p));
            };
            let mut free_version = |p: *mut HeadVersion<u64>| {
                freed_versions.fetch_add(1, Ordering::Relaxed);
                drop(Box::from_raw(p));
            };
            reclaim(v1, &mut free_node, &mut free_version);

            assert_eq!(freed_nodes.load(Ordering::Relaxed), 2);
            assert_eq!(freed_versions.load(Ordering::Relaxed), 2);
        }
    }

    #[test]
    fn waits_when_not_oldest() {
        unsafe {
            let n1 = leaf_node();
            let v1 = Box::into_raw(Box::new(HeadVersion::new(n1, ptr::null_mut())));
            (*v1).tail_node.store(n1, Ordering::Release);

            let n2 = leaf_node();
            let v2 = Box::into_raw(Box::new(HeadVersion::new(n2, v1)));
            (*v2).tail_node.store(n2, Ordering::Release);

            let mut free_node = |_p: *mut Node<u64>| panic!("must not free yet");
            let mut free_version = |_p: *mut HeadVersion<u64>| panic!("must not free yet");
            // v1 (the older sibling) hasn't been freed, so v2 must not free.
            reclaim(v2, &mut free_node, &mut free_version);

            assert!(has_release_bit((*v2).prev.load(Ordering::Acquire)));

            drop(Box::from_raw(n1));
            drop(Box::from_raw(n2));
            drop(Box::from_raw(v1));
            drop(Box::from_raw(v2));
        }
    }
}
