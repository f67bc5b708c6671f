//! Allocator, window and mapping traits
//!
//! Provides the capabilities page table code is handed instead of reaching
//! for globals:
//! - `FrameAllocator`: Supplies zero-filled physical pages for tables
//! - `PhysWindow`: Reaches a table page given its physical address
//! - `MapAttributes`: Describes a mapping operation

use crate::address::PA;
use crate::arch::arm64::PageTable;
use crate::permissions::PteAttrs;
use crate::region::{PhysMemoryRegion, VirtMemoryRegion};

/// Source of zero-filled physical pages
///
/// Implementations lock internally, so a shared reference is enough.
pub trait FrameAllocator {
    /// Allocate one zero-filled, page-aligned physical page.
    ///
    /// With `no_wait` set the allocator must fail rather than block for
    /// memory to become available. Failure is reported, never retried here.
    fn alloc_zeroed_page(&self, no_wait: bool) -> Option<PA>;

    /// Return a page obtained from `alloc_zeroed_page`
    fn free_page(&self, pa: PA);
}

impl<A: FrameAllocator + ?Sized> FrameAllocator for &A {
    #[inline]
    fn alloc_zeroed_page(&self, no_wait: bool) -> Option<PA> {
        (**self).alloc_zeroed_page(no_wait)
    }

    #[inline]
    fn free_page(&self, pa: PA) {
        (**self).free_page(pa)
    }
}

/// Access to physical pages through some virtual window
///
/// # Safety
///
/// `table` must return a reference to the memory that actually lives at
/// `pa`, valid for the lifetime of `self`, for every page-aligned `pa`
/// the window covers. Two calls with the same `pa` must alias.
pub unsafe trait PhysWindow {
    /// Reach the page at `pa` as a translation table
    fn table(&self, pa: PA) -> &PageTable;

    /// Whether `pa` can be reached through this window
    fn covers(&self, pa: PA) -> bool;

    /// Fill the page at `pa` with zeroes
    fn zero_page(&self, pa: PA) {
        self.table(pa).clear();
    }

    /// Copy one page of memory from `src` to `dst`
    fn copy_page(&self, src: PA, dst: PA) {
        let (from, to) = (self.table(src), self.table(dst));
        for i in 0..crate::ENTRIES_PER_TABLE {
            to.store(i, from.load(i));
        }
    }
}

// SAFETY: forwards to the underlying window
unsafe impl<W: PhysWindow + ?Sized> PhysWindow for &W {
    #[inline]
    fn table(&self, pa: PA) -> &PageTable {
        (**self).table(pa)
    }

    #[inline]
    fn covers(&self, pa: PA) -> bool {
        (**self).covers(pa)
    }
}

/// Attributes for a memory mapping operation
#[derive(Clone, Debug)]
pub struct MapAttributes {
    /// Physical memory region to map
    pub phys: PhysMemoryRegion,
    /// Virtual memory region (target addresses)
    pub virt: VirtMemoryRegion,
    /// Attributes of every leaf entry created
    pub attrs: PteAttrs,
}

impl MapAttributes {
    /// Create new mapping attributes
    #[inline]
    pub const fn new(phys: PhysMemoryRegion, virt: VirtMemoryRegion, attrs: PteAttrs) -> Self {
        Self { phys, virt, attrs }
    }

    /// Check if the mapping is valid
    ///
    /// A valid mapping has:
    /// - Equal physical and virtual region sizes
    /// - Non-empty regions
    /// - Page-aligned regions
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.phys.size() == self.virt.size()
            && !self.phys.is_empty()
            && self.phys.is_page_aligned()
            && self.virt.is_page_aligned()
    }
}

/// Errors that can occur during table operations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "mapping errors must be handled"]
pub enum MapError {
    /// The frame allocator could not supply a table page
    OutOfMemory,
    /// A block mapping sits where a finer table was needed
    TypeConflict,
    /// The virtual address is already mapped
    AlreadyMapped,
    /// Region is not page-aligned
    NotAligned,
    /// Physical and virtual region sizes don't match
    SizeMismatch,
}

impl core::fmt::Display for MapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "failed to allocate page table"),
            Self::TypeConflict => write!(f, "block mapping in the way of a table"),
            Self::AlreadyMapped => write!(f, "virtual address is already mapped"),
            Self::NotAligned => write!(f, "region is not page-aligned"),
            Self::SizeMismatch => write!(f, "physical and virtual region sizes don't match"),
        }
    }
}
