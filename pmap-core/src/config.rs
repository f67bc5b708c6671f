//! Pmap configuration
//!
//! Run-time parameters fixed at bootstrap. Page geometry and the virtual
//! layout are compile-time constants in `pmap_common`.

use pmap_common::layout::{DIRECT_MAP_BASE, DIRECT_MAP_SIZE};
use pmap_paging::{PA, PhysMemoryRegion, VA};

use crate::directmap::DirectMap;

/// Upper bound on CPUs (width of the active-CPU bitset)
pub const MAX_CPUS: usize = 64;

/// Pages above which a range invalidation becomes a whole-ASID invalidation
pub const DEFAULT_TLB_RANGE_THRESHOLD: usize = 16;

/// Run-time pmap parameters
#[derive(Debug, Clone, Copy)]
pub struct PmapConfig {
    /// ASID width supported by the CPUs (8 or 16)
    pub asid_bits: u8,
    /// Number of CPUs that may activate pmaps
    pub cpus: usize,
    /// Largest range (in pages) invalidated page by page
    pub tlb_range_threshold: usize,
    /// The linear map of physical RAM
    pub direct_map: DirectMap,
}

impl PmapConfig {
    pub const fn new(direct_map: DirectMap) -> Self {
        Self {
            asid_bits: 16,
            cpus: 1,
            tlb_range_threshold: DEFAULT_TLB_RANGE_THRESHOLD,
            direct_map,
        }
    }

    #[must_use]
    pub const fn with_asid_bits(mut self, bits: u8) -> Self {
        self.asid_bits = bits;
        self
    }

    /// # Panics
    ///
    /// If `cpus` is zero or larger than [`MAX_CPUS`].
    #[must_use]
    pub const fn with_cpus(mut self, cpus: usize) -> Self {
        assert!(cpus > 0 && cpus <= MAX_CPUS, "CPU count out of range");
        self.cpus = cpus;
        self
    }

    #[must_use]
    pub const fn with_tlb_range_threshold(mut self, pages: usize) -> Self {
        self.tlb_range_threshold = pages;
        self
    }
}

impl Default for PmapConfig {
    fn default() -> Self {
        Self::new(DirectMap::new(
            VA::new(DIRECT_MAP_BASE),
            PhysMemoryRegion::new(PA::null(), DIRECT_MAP_SIZE as usize),
        ))
    }
}
