//! Greedy page table mapping algorithm
//!
//! Implements an efficient mapping algorithm that:
//! 1. Tries to use the largest possible block size (1GB at L1, 2MB at L2)
//! 2. Falls back to smaller sizes when alignment doesn't permit larger blocks
//! 3. Allocates intermediate tables as needed through the walker
//!
//! This approach minimises TLB pressure and page table memory usage. It is
//! used for the static kernel mappings (direct map, devmap); TLB
//! maintenance is the caller's concern.

use super::descriptors::{Level, Pte};
use super::walk::ensure_path_to;
use crate::address::{PA, VA};
use crate::region::PhysMemoryRegion;
use crate::traits::{FrameAllocator, MapAttributes, MapError, PhysWindow};

/// Whether one entry at `level` can map the head of `phys` at `va`
fn can_map(level: Level, phys: PhysMemoryRegion, va: VA) -> bool {
    let size = level.block_size();
    phys.start().is_aligned(size) && va.is_aligned(size) && phys.size() as u64 >= size
}

/// Map a memory region using the greedy algorithm
///
/// Maps a contiguous physical region to a contiguous virtual region under
/// the table at `root`, using the largest block each step allows.
///
/// # Returns
/// * `Ok(entries)` - number of leaf descriptors written
/// * `Err(MapError)` on failure; entries written before the failure stay
///
/// # Algorithm
/// For each page/block in the region:
/// 1. Try to map at L1 (1GB block) if aligned and large enough
/// 2. Otherwise try L2 (2MB block)
/// 3. Fall back to L3 (4KB page)
pub fn map_range<W, A>(
    window: &W,
    root: PA,
    attrs: &MapAttributes,
    alloc: &A,
) -> Result<usize, MapError>
where
    W: PhysWindow + ?Sized,
    A: FrameAllocator + ?Sized,
{
    if attrs.phys.size() != attrs.virt.size() {
        return Err(MapError::SizeMismatch);
    }
    if attrs.phys.is_empty() {
        return Ok(0);
    }
    if !attrs.phys.is_page_aligned() || !attrs.virt.is_page_aligned() {
        return Err(MapError::NotAligned);
    }

    let mut phys = attrs.phys;
    let mut virt = attrs.virt;
    let mut written = 0;

    while !virt.is_empty() {
        let va = virt.start();
        let level = [Level::L1, Level::L2]
            .into_iter()
            .find(|&l| can_map(l, phys, va))
            .unwrap_or(Level::L3);

        let slot = ensure_path_to(window, root, va, level, alloc)?;
        if slot.load().is_valid() {
            return Err(MapError::AlreadyMapped);
        }
        slot.store(Pte::encode_block(level, phys.start(), attrs.attrs));
        written += 1;

        phys = phys.advance(level.block_size());
        virt = virt.advance(level.block_size());
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::walk::lookup;
    use crate::arena::FrameArena;
    use crate::permissions::{MemoryType, Prot, PteAttrs};
    use crate::region::VirtMemoryRegion;

    fn rw() -> PteAttrs {
        PteAttrs::kernel(Prot::READ_WRITE, MemoryType::Normal)
    }

    #[test]
    fn test_greedy_uses_blocks() {
        let arena = FrameArena::new(PA::new(0x1000_0000), 32);
        let root = arena.alloc_zeroed_page(true).unwrap();

        // 1GB + 2MB + 4KB, all suitably aligned
        let size = (1 << 30) + (2 << 20) + 0x1000;
        let attrs = MapAttributes::new(
            PhysMemoryRegion::from_raw(0x4000_0000, size),
            VirtMemoryRegion::from_raw(0xFFFF_0000_4000_0000, size),
            rw(),
        );
        assert_eq!(map_range(&arena, root, &attrs, &arena), Ok(3));

        let gig = lookup(&arena, root, VA::new(0xFFFF_0000_4000_0000)).unwrap();
        assert_eq!(gig.level(), Level::L1);
        let two_meg = lookup(&arena, root, VA::new(0xFFFF_0000_8000_0000)).unwrap();
        assert_eq!(two_meg.level(), Level::L2);
        let page = lookup(&arena, root, VA::new(0xFFFF_0000_8020_0000)).unwrap();
        assert_eq!(page.level(), Level::L3);
        assert_eq!(page.load().output_address(Level::L3), PA::new(0x8020_0000));
        assert!(lookup(&arena, root, VA::new(0xFFFF_0000_8020_1000))
            .is_some_and(|s| !s.load().is_valid()));
    }

    #[test]
    fn test_misaligned_pa_falls_back_to_pages() {
        let arena = FrameArena::new(PA::new(0x1000_0000), 32);
        let root = arena.alloc_zeroed_page(true).unwrap();
        let attrs = MapAttributes::new(
            PhysMemoryRegion::from_raw(0x0900_1000, 0x20_0000),
            VirtMemoryRegion::from_raw(0xFFFF_FFFE_0000_0000, 0x20_0000),
            rw(),
        );
        assert_eq!(map_range(&arena, root, &attrs, &arena), Ok(512));
    }

    #[test]
    fn test_rejects_bad_requests() {
        let arena = FrameArena::new(PA::new(0x1000_0000), 8);
        let root = arena.alloc_zeroed_page(true).unwrap();
        let mismatch = MapAttributes::new(
            PhysMemoryRegion::from_raw(0x1000, 0x2000),
            VirtMemoryRegion::from_raw(0x1000, 0x1000),
            rw(),
        );
        assert_eq!(map_range(&arena, root, &mismatch, &arena), Err(MapError::SizeMismatch));

        let page = MapAttributes::new(
            PhysMemoryRegion::from_raw(0x1000, 0x1000),
            VirtMemoryRegion::from_raw(0x1000, 0x1000),
            rw(),
        );
        map_range(&arena, root, &page, &arena).unwrap();
        assert_eq!(map_range(&arena, root, &page, &arena), Err(MapError::AlreadyMapped));
    }
}
