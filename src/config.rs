//! Tunables (spec.md §3.5 / §4.6). Not a file format or CLI surface — just
//! a plain struct passed to `init`, the way the corpus configures systems
//! crates that have no outer config layer of their own.

/// Huge page size used by the slab allocator, in bytes (spec.md §3.5: 2 MiB).
pub const HUGE_PAGE_BYTES: usize = 2 * 1024 * 1024;

/// Default page reservation count (spec.md §3.5: 512 x 2 MiB).
pub const DEFAULT_RESERVED_PAGES: usize = 512;

/// Slab allocator tunables.
#[derive(Debug, Clone, Copy)]
pub struct SlabConfig {
    /// Number of huge pages virtually reserved up front.
    pub reserved_pages: usize,
    /// Size of each huge page, in bytes. Must be a multiple of the system
    /// page size; 2 MiB matches Linux's default hugetlbfs page size.
    pub page_bytes: usize,
}

impl Default for SlabConfig {
    fn default() -> Self {
        SlabConfig {
            reserved_pages: DEFAULT_RESERVED_PAGES,
            page_bytes: HUGE_PAGE_BYTES,
        }
    }
}

/// Top-level tunables for a queue handle.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Whether the LL-RCU engine carves nodes from a per-thread slab
    /// (spec.md §4.6) or always goes through the system allocator. Turning
    /// this off is mainly useful in environments where reserving huge-page
    /// virtual memory isn't available (e.g. some CI containers).
    pub use_slab: bool,
    /// Slab tunables, consulted only when `use_slab` is set.
    pub slab: SlabConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            use_slab: cfg!(feature = "slab"),
            slab: SlabConfig::default(),
        }
    }
}

impl QueueConfig {
    /// A config with the slab allocator disabled: every node goes through
    /// the system allocator. Handy for tests and for hosts without huge
    /// page support.
    pub fn without_slab() -> Self {
        QueueConfig {
            use_slab: false,
            ..QueueConfig::default()
        }
    }
}
