//! Boot-time page stealing and kernel table growth
//!
//! Before the page pool exists, table pages come from the tail of the
//! highest usable physical segment that the direct map covers. Stolen
//! pages carry no metadata and are never returned.

use core::sync::atomic::{AtomicUsize, Ordering};

use pmap_common::PhysMemoryMap;
use pmap_paging::{
    FrameAllocator, Level, MapError, PA, PAGE_SIZE, PageTable, PhysWindow, Pte, PteKind, PteSlot,
    VA,
};
use spin::Mutex;

use crate::directmap::DirectMap;

/// Monotonic boot-time page allocator
pub struct BootStealer<'w, W: PhysWindow + ?Sized> {
    map: Mutex<PhysMemoryMap>,
    direct_map: DirectMap,
    window: &'w W,
    stolen: AtomicUsize,
}

impl<'w, W: PhysWindow + ?Sized> BootStealer<'w, W> {
    pub fn new(map: PhysMemoryMap, direct_map: DirectMap, window: &'w W) -> Self {
        Self {
            map: Mutex::new(map),
            direct_map,
            window,
            stolen: AtomicUsize::new(0),
        }
    }

    /// Steal `count` contiguous zeroed pages, returning their direct map
    /// address. Each call returns memory below the previous one from the
    /// same segment.
    pub fn steal_pages(&self, count: usize) -> Option<VA> {
        self.steal(count).and_then(|pa| self.direct_map.pa_to_va(pa))
    }

    fn steal(&self, count: usize) -> Option<PA> {
        if count == 0 {
            return None;
        }
        let bytes = (count * PAGE_SIZE) as u64;

        let mut map = self.map.lock();
        let base = map
            .iter()
            .rev()
            .filter(|s| s.segment_type.is_usable() && s.size >= bytes)
            .find(|s| {
                // The tail must be reachable through the direct map.
                let tail = s.end() - bytes;
                tail % PAGE_SIZE as u64 == 0
                    && self.direct_map.covers_pa(PA::new(tail))
                    && self.direct_map.covers_pa(PA::new(s.end() - 1))
            })?
            .base;
        let pa = PA::new(map.carve_tail(base, bytes)?);
        drop(map);

        for i in 0..count {
            self.window.zero_page(pa + (i * PAGE_SIZE) as u64);
        }
        self.stolen.fetch_add(count, Ordering::Relaxed);
        log::trace!("stole {count} page(s) at {pa:?}");
        Some(pa)
    }

    /// Pages stolen so far
    pub fn stolen(&self) -> usize {
        self.stolen.load(Ordering::Relaxed)
    }

    /// The memory map minus everything stolen, for the page pool to
    /// take over.
    pub fn into_memory_map(self) -> PhysMemoryMap {
        self.map.into_inner()
    }
}

impl<W: PhysWindow + ?Sized> FrameAllocator for BootStealer<'_, W> {
    fn alloc_zeroed_page(&self, _no_wait: bool) -> Option<PA> {
        self.steal(1)
    }

    fn free_page(&self, pa: PA) {
        log::warn!("stolen boot page {pa:?} cannot be freed; leaking it");
    }
}

/// Make sure every table needed to map `[va, va + size)` exists below the
/// `level` table at `table`.
///
/// Existing tables are reused, missing ones are allocated from `alloc`.
/// Recursion stops at the leaf level or when nothing is left to cover.
/// Returns the number of tables created.
///
/// # Errors
///
/// * `TypeConflict` - a block or page already covers part of the range
/// * `OutOfMemory` - `alloc` ran dry; tables created so far stay in place
pub fn grow<W, A>(
    window: &W,
    table: PA,
    level: Level,
    va: VA,
    size: u64,
    alloc: &A,
) -> Result<usize, MapError>
where
    W: PhysWindow + ?Sized,
    A: FrameAllocator + ?Sized,
{
    let Some(next) = level.next() else {
        return Ok(0);
    };

    let entries: &PageTable = window.table(table);
    let span = level.block_size();
    let mut va = va;
    let mut remaining = size;
    let mut created = 0;

    while remaining > 0 {
        let chunk = remaining.min(span - (va.value() & (span - 1)));
        let slot = PteSlot::new(entries, level.index(va), level);

        let current = slot.load();
        let child = match current.kind(level) {
            PteKind::Table => current.table_address(),
            PteKind::Invalid => {
                let pa = alloc.alloc_zeroed_page(true).ok_or(MapError::OutOfMemory)?;
                match slot.compare_exchange(current, Pte::encode_table(pa)) {
                    Ok(_) => {
                        created += 1;
                        pa
                    }
                    Err(winner) if winner.is_table(level) => {
                        alloc.free_page(pa);
                        winner.table_address()
                    }
                    Err(_) => {
                        alloc.free_page(pa);
                        return Err(MapError::TypeConflict);
                    }
                }
            }
            PteKind::Block | PteKind::Page => return Err(MapError::TypeConflict),
        };

        created += grow(window, child, next, va, chunk, alloc)?;

        remaining -= chunk;
        if remaining > 0 {
            va = va + chunk;
        }
    }
    Ok(created)
}
