//! Kernel virtual address allocator
//!
//! First-fit allocator over the kernel VA window handed to bootstrap.
//! Free ranges are kept sorted by address and coalesced on free.

use alloc::vec;
use alloc::vec::Vec;

use pmap_paging::{PAGE_SIZE, VA, VirtMemoryRegion};

/// Free ranges as `(start, end)` pairs, sorted and non-adjacent
pub struct KvaAllocator {
    window: VirtMemoryRegion,
    free: Vec<(u64, u64)>,
}

impl KvaAllocator {
    pub fn new(window: VirtMemoryRegion) -> Self {
        debug_assert!(window.is_page_aligned());
        let free = if window.is_empty() {
            Vec::new()
        } else {
            vec![(window.start().value(), window.last().value() + 1)]
        };
        Self { window, free }
    }

    #[inline]
    pub fn window(&self) -> VirtMemoryRegion {
        self.window
    }

    /// Total free bytes
    pub fn free_bytes(&self) -> u64 {
        self.free.iter().map(|(s, e)| e - s).sum()
    }

    /// Allocate `size` bytes (rounded up to pages) aligned to `align`.
    pub fn alloc(&mut self, size: usize, align: u64) -> Option<VA> {
        let size = size.div_ceil(PAGE_SIZE).max(1) as u64 * PAGE_SIZE as u64;
        let align = align.max(PAGE_SIZE as u64);
        debug_assert!(align.is_power_of_two());

        let (i, start) = self.free.iter().enumerate().find_map(|(i, &(s, e))| {
            let start = s.checked_add(align - 1)? & !(align - 1);
            (start.checked_add(size)? <= e).then_some((i, start))
        })?;

        let (s, e) = self.free[i];
        let end = start + size;
        match (start == s, end == e) {
            (true, true) => {
                self.free.remove(i);
            }
            (true, false) => self.free[i].0 = end,
            (false, true) => self.free[i].1 = start,
            (false, false) => {
                self.free[i].1 = start;
                self.free.insert(i + 1, (end, e));
            }
        }
        Some(VA::new(start))
    }

    /// Whether every page of `[va, va + size)` is inside the window and
    /// currently allocated
    pub fn is_allocated(&self, va: VA, size: usize) -> bool {
        let start = va.value();
        let Some(end) = start.checked_add((size.div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE) as u64)
        else {
            return false;
        };
        if !self.window.contains(&VirtMemoryRegion::new(va, (end - start) as usize)) {
            return false;
        }
        !self.free.iter().any(|&(s, e)| s < end && start < e)
    }

    /// Return a range obtained from `alloc`.
    ///
    /// # Panics
    ///
    /// If the range lies outside the window or overlaps a free range.
    pub fn free(&mut self, va: VA, size: usize) {
        let start = va.value();
        let end = start + (size.div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE) as u64;
        assert!(
            self.window.contains(&VirtMemoryRegion::new(va, (end - start) as usize)),
            "{va:?} is outside the kernel VA window"
        );

        let i = self.free.partition_point(|&(s, _)| s < start);
        let overlaps_prev = i > 0 && self.free[i - 1].1 > start;
        let overlaps_next = i < self.free.len() && self.free[i].0 < end;
        assert!(!overlaps_prev && !overlaps_next, "double free of {va:?}");

        let merge_prev = i > 0 && self.free[i - 1].1 == start;
        let merge_next = i < self.free.len() && self.free[i].0 == end;
        match (merge_prev, merge_next) {
            (true, true) => {
                self.free[i - 1].1 = self.free[i].1;
                self.free.remove(i);
            }
            (true, false) => self.free[i - 1].1 = end,
            (false, true) => self.free[i].0 = start,
            (false, false) => self.free.insert(i, (start, end)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0xFFFF_FFC0_0000_0000;

    fn kva() -> KvaAllocator {
        KvaAllocator::new(VirtMemoryRegion::from_raw(BASE, 0x10_0000))
    }

    #[test]
    fn test_first_fit() {
        let mut k = kva();
        let a = k.alloc(0x1000, 0).unwrap();
        let b = k.alloc(0x1800, 0).unwrap();
        assert_eq!(a.value(), BASE);
        assert_eq!(b.value(), BASE + 0x1000);
        assert_eq!(k.free_bytes(), 0x10_0000 - 0x3000);

        k.free(a, 0x1000);
        // the hole at the front is reused first
        assert_eq!(k.alloc(0x1000, 0), Some(a));
    }

    #[test]
    fn test_alignment_splits_range() {
        let mut k = kva();
        k.alloc(0x1000, 0).unwrap();
        let big = k.alloc(0x1000, 0x10_000).unwrap();
        assert_eq!(big.value(), BASE + 0x10_000);
        assert_eq!(k.free.len(), 2);
    }

    #[test]
    fn test_coalesce_on_free() {
        let mut k = kva();
        let a = k.alloc(0x1000, 0).unwrap();
        let b = k.alloc(0x1000, 0).unwrap();
        let c = k.alloc(0x1000, 0).unwrap();
        k.free(a, 0x1000);
        k.free(c, 0x1000);
        k.free(b, 0x1000);
        assert_eq!(k.free, vec![(BASE, BASE + 0x10_0000)]);
    }

    #[test]
    fn test_exhaustion() {
        let mut k = kva();
        assert!(k.alloc(0x10_0000, 0).is_some());
        assert!(k.alloc(0x1000, 0).is_none());
    }

    #[test]
    fn test_is_allocated() {
        let mut k = kva();
        assert!(!k.is_allocated(VA::new(BASE), 0x1000));
        let a = k.alloc(0x2000, 0).unwrap();
        assert!(k.is_allocated(a, 0x2000));
        assert!(k.is_allocated(a + 0x1000u64, 0x1000));
        // runs into free space
        assert!(!k.is_allocated(a, 0x3000));
        // outside the window
        assert!(!k.is_allocated(VA::new(BASE - 0x1000), 0x1000));
        k.free(a, 0x2000);
        assert!(!k.is_allocated(a, 0x1000));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let mut k = kva();
        let a = k.alloc(0x1000, 0).unwrap();
        k.free(a, 0x1000);
        k.free(a, 0x1000);
    }
}
