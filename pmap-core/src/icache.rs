//! Instruction cache synchronisation
//!
//! The instruction cache is not coherent with data writes, so after code
//! is written into a page the range must be cleaned to the point of
//! unification and invalidated. The maintenance instructions need the
//! page to be accessible, which a lazily armed user page may not be yet.
//! Each page is therefore made accessible for the duration of the
//! maintenance and put back exactly as it was afterwards.

use pmap_paging::arch::arm64::descriptors::bits;
use pmap_paging::{PAGE_SIZE, PhysWindow, Pte, PteSlot, VA, lookup};

use crate::error::PmapError;
use crate::hal::{Mmu, PreemptGuard};
use crate::pmap::Pmap;
use crate::system::PmapSystem;

/// Temporarily accessible page; the saved entry is restored on drop
struct TempAccess<'a, M: Mmu, W: PhysWindow> {
    sys: &'a PmapSystem<M, W>,
    pmap: &'a Pmap,
    slot: PteSlot<'a>,
    saved: Pte,
    va: VA,
}

impl<'a, M: Mmu, W: PhysWindow> TempAccess<'a, M, W> {
    fn new(sys: &'a PmapSystem<M, W>, pmap: &'a Pmap, slot: PteSlot<'a>, va: VA) -> Self {
        let saved = slot.swap(slot.load().with_set(bits::AF).with_clear(bits::AP_RO));
        sys.mmu.store_barrier();
        sys.invalidate_page(pmap, va);
        Self {
            sys,
            pmap,
            slot,
            saved,
            va,
        }
    }
}

impl<M: Mmu, W: PhysWindow> Drop for TempAccess<'_, M, W> {
    fn drop(&mut self) {
        self.slot.swap(self.saved);
        self.sys.mmu.store_barrier();
        self.sys.invalidate_page(self.pmap, self.va);
    }
}

impl<M: Mmu, W: PhysWindow> PmapSystem<M, W> {
    /// Make instruction fetches from `[va, va + len)` in `pmap` see the
    /// data written there.
    ///
    /// A user pmap must be active on the calling CPU, since the
    /// maintenance goes through the live translation.
    ///
    /// # Errors
    ///
    /// * `NotActive` - `pmap` is a user pmap not running on this CPU
    /// * `InvalidAddress` - the range leaves the half `pmap` translates
    /// * `NotMapped` - a page in the range is not mapped
    pub fn sync_icache(&self, pmap: &Pmap, va: VA, len: usize) -> Result<(), PmapError> {
        if len == 0 {
            return Ok(());
        }
        let _preempt = PreemptGuard::new(&self.mmu);
        if !pmap.is_kernel() && !pmap.is_active_on(self.mmu.cpu_id()) {
            return Err(PmapError::NotActive);
        }
        let last = va.value().checked_add(len as u64 - 1).ok_or(PmapError::InvalidAddress)?;
        if !pmap.owns(va) || !pmap.owns(VA::new(last)) {
            return Err(PmapError::InvalidAddress);
        }

        let _guard = pmap.lock();
        let mut cur = va;
        loop {
            let page = cur.page_align_down();
            let chunk = (PAGE_SIZE - cur.page_offset()).min((last - cur.value()) as usize + 1);

            let slot = lookup(&self.window, pmap.root(), page).ok_or(PmapError::NotMapped)?;
            if !slot.load().is_leaf(slot.level()) {
                return Err(PmapError::NotMapped);
            }
            {
                let _access = TempAccess::new(self, pmap, slot, page);
                self.mmu.icache_sync_range(cur, chunk);
            }

            if page.value() >= last & !(PAGE_SIZE as u64 - 1) {
                break;
            }
            cur = page + PAGE_SIZE;
        }
        Ok(())
    }
}
