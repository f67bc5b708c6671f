//! Memory region abstractions
//!
//! Half-open `[start, start + size)` ranges in either address space, with
//! the containment tests used by devmap lookups and the page/block walks
//! used by the mappers.

use crate::PAGE_SIZE;
use crate::address::{Address, MemKind, PA, Physical, VA, Virtual};

/// A contiguous memory region in either physical or virtual address space
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion<K: MemKind> {
    start: Address<K, ()>,
    size: usize,
}

/// Physical memory region
pub type PhysMemoryRegion = MemoryRegion<Physical>;

/// Virtual memory region
pub type VirtMemoryRegion = MemoryRegion<Virtual>;

impl<K: MemKind> MemoryRegion<K> {
    #[inline]
    pub const fn new(start: Address<K, ()>, size: usize) -> Self {
        Self { start, size }
    }

    #[inline]
    pub const fn empty() -> Self {
        Self {
            start: Address::null(),
            size: 0,
        }
    }

    #[inline]
    pub const fn start(&self) -> Address<K, ()> {
        self.start
    }

    /// Exclusive end. Wraps to zero for a region ending at the top of the space.
    #[inline]
    pub const fn end(&self) -> Address<K, ()> {
        Address::new(self.start.value().wrapping_add(self.size as u64))
    }

    /// Inclusive last byte, which never wraps for a non-empty region
    #[inline]
    pub const fn last(&self) -> Address<K, ()> {
        Address::new(self.start.value() + (self.size as u64 - 1))
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub const fn page_count(&self) -> usize {
        self.size.div_ceil(PAGE_SIZE)
    }

    #[inline]
    pub const fn is_page_aligned(&self) -> bool {
        self.start.is_page_aligned() && (self.size & (PAGE_SIZE - 1)) == 0
    }

    #[inline]
    pub fn contains_addr(&self, addr: Address<K, ()>) -> bool {
        !self.is_empty()
            && addr.value() >= self.start.value()
            && addr.value() <= self.last().value()
    }

    /// Whether `other` lies entirely inside this region
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        !other.is_empty()
            && !self.is_empty()
            && other.start.value() >= self.start.value()
            && other.last().value() <= self.last().value()
    }

    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start.value() <= other.last().value()
            && other.start.value() <= self.last().value()
    }

    /// Advance the region by `bytes`
    ///
    /// Returns the remainder, or an empty region once `bytes` covers it all.
    #[inline]
    #[must_use]
    pub fn advance(self, bytes: u64) -> Self {
        if bytes >= self.size as u64 {
            Self::empty()
        } else {
            Self {
                start: self.start + bytes,
                size: self.size - bytes as usize,
            }
        }
    }

    /// Advance the region by the given number of pages
    #[inline]
    #[must_use]
    pub fn add_pages(self, pages: usize) -> Self {
        self.advance((pages * PAGE_SIZE) as u64)
    }

    /// Align region to page boundaries (expand)
    ///
    /// Aligns start down and end up to page boundaries.
    #[inline]
    #[must_use]
    pub fn page_align_expand(self) -> Self {
        let pages = self.pages_spanned();
        Self::new(self.start.page_align_down(), pages * PAGE_SIZE)
    }

    /// Number of pages touched by the region, counting partial pages
    fn pages_spanned(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let first = self.start.page_align_down();
        let last = self.last().page_align_down();
        ((last - first) as usize / PAGE_SIZE) + 1
    }

    #[inline]
    pub fn iter_pages(&self) -> PageIterator<K> {
        PageIterator {
            current: self.start.page_align_down(),
            remaining: self.pages_spanned(),
        }
    }
}

impl PhysMemoryRegion {
    #[inline]
    pub const fn from_raw(start: u64, size: usize) -> Self {
        Self::new(PA::new(start), size)
    }
}

impl VirtMemoryRegion {
    #[inline]
    pub const fn from_raw(start: u64, size: usize) -> Self {
        Self::new(VA::new(start), size)
    }
}

pub struct PageIterator<K: MemKind> {
    current: Address<K, ()>,
    remaining: usize,
}

impl<K: MemKind> Iterator for PageIterator<K> {
    type Item = Address<K, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let addr = self.current;
        self.remaining -= 1;
        if self.remaining != 0 {
            self.current = self.current + PAGE_SIZE as u64;
        }
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: MemKind> ExactSizeIterator for PageIterator<K> {}

impl<K: MemKind> core::fmt::Debug for MemoryRegion<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "MemoryRegion {{ {:#x}..{:#x} ({} bytes) }}",
            self.start.value(),
            self.end().value(),
            self.size
        )
    }
}

impl<K: MemKind> Default for MemoryRegion<K> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containment_is_full_range() {
        let r = VirtMemoryRegion::from_raw(0x1000, 0x3000);
        assert!(r.contains(&VirtMemoryRegion::from_raw(0x1000, 0x3000)));
        assert!(r.contains(&VirtMemoryRegion::from_raw(0x2000, 0x1000)));
        assert!(!r.contains(&VirtMemoryRegion::from_raw(0x3000, 0x2000)));
        assert!(!r.contains(&VirtMemoryRegion::empty()));
        assert!(r.overlaps(&VirtMemoryRegion::from_raw(0x3000, 0x2000)));
        assert!(!r.overlaps(&VirtMemoryRegion::from_raw(0x4000, 0x1000)));
    }

    #[test]
    fn test_top_of_address_space() {
        let top = VirtMemoryRegion::from_raw(0xFFFF_FFFF_FFFF_F000, 0x1000);
        assert!(top.contains_addr(VA::new(0xFFFF_FFFF_FFFF_FFFF)));
        assert_eq!(top.iter_pages().count(), 1);
    }

    #[test]
    fn test_iter_pages_expands_partial_pages() {
        let r = VirtMemoryRegion::from_raw(0x1800, 0x1000);
        let pages: Vec<u64> = r.iter_pages().map(|va| va.value()).collect();
        assert_eq!(pages, vec![0x1000, 0x2000]);
    }

    #[test]
    fn test_advance() {
        let r = PhysMemoryRegion::from_raw(0x4000_0000, 0x40_0000);
        let rest = r.advance(0x20_0000);
        assert_eq!(rest.start().value(), 0x4020_0000);
        assert_eq!(rest.size(), 0x20_0000);
        assert!(r.add_pages(1024).is_empty());
    }
}
