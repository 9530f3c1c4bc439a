//! C7 — Per-Thread Slab Allocator (spec.md §3.5, §4.6; LL-RCU only).
//!
//! No C source in the retrieved original covers this component directly —
//! it's described only in prose (a virtually-reserved, incrementally
//! committed huge-page arena). The reservation is a single anonymous
//! mapping sized to `reserved_pages * page_bytes` up front, with
//! `MADV_HUGEPAGE` requested best-effort; "committing" a page is simply
//! the bookkeeping step of starting to carve nodes from it; Linux's
//! demand-paging backs the physical pages lazily on first touch, so there
//! is no separate per-page `mmap`/`mprotect` call.

use crate::config::SlabConfig;
use crate::error::QueueError;
use crate::node::Node;
use crate::tls;
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

struct SlabArena<T> {
    base: *mut u8,
    total_bytes: usize,
    page_bytes: usize,
    node_size: usize,
    nodes_per_page: usize,
    reserved_pages: usize,
    committed_pages: usize,
    current_page_idx: usize,
    current_node_idx: usize,
}

impl<T> SlabArena<T> {
    fn new(config: SlabConfig) -> Result<Self, QueueError> {
        let node_size = size_of::<Node<T>>();
        let nodes_per_page = config.page_bytes / node_size;
        if nodes_per_page == 0 {
            return Err(QueueError::ResourceExhausted(
                "slab page_bytes too small to hold a single node",
            ));
        }

        let total_bytes = config.reserved_pages * config.page_bytes;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(QueueError::ResourceExhausted("slab arena mmap failed"));
        }

        // Best-effort: a host without transparent huge pages still works,
        // just without the TLB benefit.
        let advised = unsafe { libc::madvise(base, total_bytes, libc::MADV_HUGEPAGE) };
        if advised != 0 {
            log::debug!("slab arena: MADV_HUGEPAGE not honored, continuing with base pages");
        }

        Ok(SlabArena {
            base: base as *mut u8,
            total_bytes,
            page_bytes: config.page_bytes,
            node_size,
            nodes_per_page,
            reserved_pages: config.reserved_pages,
            committed_pages: 0,
            current_page_idx: 0,
            current_node_idx: nodes_per_page, // forces the first alloc to commit page 0
        })
    }

    fn slot_ptr(&self, page_idx: usize, node_idx: usize) -> *mut Node<T> {
        let page_base = unsafe { self.base.add(page_idx * self.page_bytes) };
        unsafe { (page_base as *mut Node<T>).add(node_idx) }
    }

    /// Lay down fresh `Node::empty()` state across a page's slots before any
    /// carving happens (spec.md §4.6 "nodes are laid out contiguously
    /// inside a huge page").
    unsafe fn commit_page(&mut self, page_idx: usize) {
        for i in 0..self.nodes_per_page {
            let slot = self.slot_ptr(page_idx, i);
            ptr::write(slot, Node::empty());
            (*slot).mark_node_pool();
        }
        self.committed_pages += 1;
        log::trace!(
            "slab arena: committed page {} ({}/{})",
            page_idx,
            self.committed_pages,
            self.reserved_pages
        );
    }

    /// A page is reusable once every slot in it has cycled back to FREE;
    /// checking the *last* slot is sufficient because pages are carved
    /// sequentially and reclamation returns nodes in the same publication
    /// order (spec.md §4.6).
    fn find_reusable_page(&self) -> Option<usize> {
        for idx in 0..self.committed_pages {
            let last = self.slot_ptr(idx, self.nodes_per_page - 1);
            if unsafe { (*last).is_free() } {
                return Some(idx);
            }
        }
        None
    }

    fn alloc_node(&mut self, datum: T) -> Option<*mut Node<T>> {
        loop {
            if self.current_node_idx < self.nodes_per_page {
                let slot = self.slot_ptr(self.current_page_idx, self.current_node_idx);
                self.current_node_idx += 1;
                unsafe {
                    debug_assert!((*slot).is_free());
                    (*slot).reinit(datum);
                }
                return Some(slot);
            }

            if let Some(reuse_idx) = self.find_reusable_page() {
                self.current_page_idx = reuse_idx;
                self.current_node_idx = 0;
                continue;
            }

            if self.committed_pages < self.reserved_pages {
                let new_idx = self.committed_pages;
                unsafe {
                    self.commit_page(new_idx);
                }
                self.current_page_idx = new_idx;
                self.current_node_idx = 0;
                continue;
            }

            log::debug!("slab arena: reservation cap hit, falling back to system allocator");
            return None;
        }
    }
}

impl<T> Drop for SlabArena<T> {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut c_void, self.total_bytes);
        }
    }
}

/// spec.md §6.2 `create_tls_node_pool`: must be called once per thread per
/// queue before that thread's `enqueue` calls may use the slab.
pub(crate) fn create_tls_node_pool<T: 'static>(
    queue_id: u64,
    config: SlabConfig,
) -> Result<(), QueueError> {
    tls::with_local(
        queue_id,
        || None::<SlabArena<T>>,
        |slot| {
            debug_assert!(slot.is_none(), "create_tls_node_pool called twice for this thread/queue");
            *slot = Some(SlabArena::new(config)?);
            Ok(())
        },
    )
}

/// spec.md §6.2 `destroy_tls_node_pool`: must precede thread exit.
pub(crate) fn destroy_tls_node_pool<T: 'static>(queue_id: u64) {
    tls::with_local(
        queue_id,
        || None::<SlabArena<T>>,
        |slot| {
            debug_assert!(slot.is_some(), "destroy_tls_node_pool called without a pool");
            *slot = None;
        },
    );
}

/// Returns `None` if no pool was created for this thread/queue, or the pool
/// is at its reservation cap — either way the caller falls back to the
/// system allocator.
pub(crate) fn alloc_node<T: 'static>(queue_id: u64, datum: T) -> Option<*mut Node<T>> {
    tls::with_local(
        queue_id,
        || None::<SlabArena<T>>,
        |slot| slot.as_mut()?.alloc_node(datum),
    )
}
