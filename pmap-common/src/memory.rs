//! Physical Memory Segments
//!
//! Page geometry for the 4KB translation granule and the physical memory
//! map that boot code hands to the pmap bootstrap.

/// Maximum number of physical segments tracked at boot
pub const MAX_SEGMENTS: usize = 32;

/// Physical segment classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SegmentType {
    /// Unusable memory
    Reserved = 0,
    /// Conventional RAM, free for the kernel to use
    Conventional = 1,
    /// Memory-mapped I/O
    Mmio = 2,
    /// Kernel text, data and bss
    KernelImage = 3,
    /// Page tables built by the boot assembly
    BootPageTables = 4,
    /// Memory used by the loader (can be reclaimed)
    LoaderReclaimable = 5,
}

impl SegmentType {
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Conventional,
            2 => Self::Mmio,
            3 => Self::KernelImage,
            4 => Self::BootPageTables,
            5 => Self::LoaderReclaimable,
            _ => Self::Reserved,
        }
    }

    /// Whether pages of this segment may be handed out by the boot stealer
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self, Self::Conventional | Self::LoaderReclaimable)
    }
}

/// One contiguous range of physical memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PhysSegment {
    /// Physical start address (page-aligned)
    pub base: u64,
    /// Size in bytes (page-aligned)
    pub size: u64,
    pub segment_type: SegmentType,
}

impl PhysSegment {
    #[must_use]
    pub const fn new(base: u64, size: u64, segment_type: SegmentType) -> Self {
        Self {
            base,
            size,
            segment_type,
        }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self::new(0, 0, SegmentType::Reserved)
    }

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base + self.size
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Physical memory map, sorted by base address
#[derive(Debug, Clone)]
pub struct PhysMemoryMap {
    count: usize,
    segments: [PhysSegment; MAX_SEGMENTS],
}

impl PhysMemoryMap {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            count: 0,
            segments: [PhysSegment::empty(); MAX_SEGMENTS],
        }
    }

    /// Insert a segment, keeping the map sorted by base address.
    ///
    /// Returns `false` when the map is full or the segment is empty.
    pub fn push(&mut self, segment: PhysSegment) -> bool {
        if self.count == MAX_SEGMENTS || segment.size == 0 {
            return false;
        }
        let pos = self.segments[..self.count]
            .iter()
            .position(|s| s.base > segment.base)
            .unwrap_or(self.count);
        self.segments.copy_within(pos..self.count, pos + 1);
        self.segments[pos] = segment;
        self.count += 1;
        true
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PhysSegment> {
        self.segments[..self.count].iter()
    }

    pub(crate) fn segments_mut(&mut self) -> &mut [PhysSegment] {
        &mut self.segments[..self.count]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn total_usable_memory(&self) -> u64 {
        self.iter()
            .filter(|s| s.segment_type.is_usable())
            .map(|s| s.size)
            .sum()
    }

    #[must_use]
    pub fn find_segment(&self, addr: u64) -> Option<&PhysSegment> {
        self.iter().find(|s| s.contains(addr))
    }

    /// Remove `bytes` from the tail of the segment starting at `base`.
    ///
    /// Returns the physical address of the carved-off tail.
    pub fn carve_tail(&mut self, base: u64, bytes: u64) -> Option<u64> {
        let seg = self.segments_mut().iter_mut().find(|s| s.base == base)?;
        if seg.size < bytes {
            return None;
        }
        seg.size -= bytes;
        Some(seg.end())
    }
}

impl Default for PhysMemoryMap {
    fn default() -> Self {
        Self::empty()
    }
}

/// Page size constants
pub mod page {
    /// 4KB page size
    pub const SIZE_4K: usize = 4096;
    /// 2MB block size
    pub const SIZE_2M: usize = 2 * 1024 * 1024;
    /// 1GB block size
    pub const SIZE_1G: usize = 1024 * 1024 * 1024;

    /// 4KB page shift
    pub const SHIFT_4K: usize = 12;
    /// 2MB block shift
    pub const SHIFT_2M: usize = 21;
    /// 1GB block shift
    pub const SHIFT_1G: usize = 30;
    /// Bytes covered by one L0 entry
    pub const SHIFT_512G: usize = 39;

    /// 4KB page mask
    pub const MASK_4K: usize = SIZE_4K - 1;

    const _: () = assert!(SIZE_4K.is_power_of_two(), "SIZE_4K must be a power of two");
    const _: () = assert!(SIZE_2M.is_power_of_two(), "SIZE_2M must be a power of two");
    const _: () = assert!(1 << SHIFT_4K == SIZE_4K, "SHIFT_4K must match SIZE_4K");
    const _: () = assert!(1 << SHIFT_2M == SIZE_2M, "SHIFT_2M must match SIZE_2M");
    const _: () = assert!(1 << SHIFT_1G == SIZE_1G, "SHIFT_1G must match SIZE_1G");
    const _: () = assert!(SHIFT_512G - SHIFT_1G == 9, "each level resolves 9 bits");

    #[must_use]
    pub const fn align_down_4k(addr: usize) -> usize {
        addr & !MASK_4K
    }

    #[must_use]
    pub const fn align_up_4k(addr: usize) -> usize {
        (addr + MASK_4K) & !MASK_4K
    }

    #[must_use]
    pub const fn is_aligned_4k(addr: usize) -> bool {
        addr & MASK_4K == 0
    }

    /// Round `value` down to a multiple of `align` (a power of two)
    #[must_use]
    pub const fn align_down(value: u64, align: u64) -> u64 {
        value & !(align - 1)
    }

    /// Round `value` up to a multiple of `align` (a power of two)
    #[must_use]
    pub const fn align_up(value: u64, align: u64) -> u64 {
        (value + align - 1) & !(align - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::page::*;
    use super::*;

    #[test]
    fn test_push_keeps_sorted() {
        let mut map = PhysMemoryMap::empty();
        assert!(map.push(PhysSegment::new(0x8000_0000, 0x1000_0000, SegmentType::Conventional)));
        assert!(map.push(PhysSegment::new(0x4000_0000, 0x10_0000, SegmentType::KernelImage)));
        assert!(!map.push(PhysSegment::new(0x1000, 0, SegmentType::Conventional)));

        let bases: Vec<u64> = map.iter().map(|s| s.base).collect();
        assert_eq!(bases, vec![0x4000_0000, 0x8000_0000]);
        assert_eq!(map.total_usable_memory(), 0x1000_0000);
    }

    #[test]
    fn test_carve_tail() {
        let mut map = PhysMemoryMap::empty();
        map.push(PhysSegment::new(0x8000_0000, 0x4000, SegmentType::Conventional));

        assert_eq!(map.carve_tail(0x8000_0000, 0x1000), Some(0x8000_3000));
        assert_eq!(map.carve_tail(0x8000_0000, 0x1000), Some(0x8000_2000));
        assert_eq!(map.carve_tail(0x8000_0000, 0x4000), None);
        assert_eq!(map.find_segment(0x8000_0000).map(|s| s.size), Some(0x2000));
    }

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_down(0x20_1234, SIZE_2M as u64), 0x20_0000);
        assert_eq!(align_up(0x20_0001, SIZE_2M as u64), 0x40_0000);
        assert_eq!(align_up_4k(1), SIZE_4K);
        assert!(is_aligned_4k(0x3000));
    }
}
