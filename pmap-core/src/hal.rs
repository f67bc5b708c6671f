//! MMU capability
//!
//! The fixed set of CPU and TLB primitives the pmap layer is driven
//! through. One implementation per target is injected when the
//! [`PmapSystem`](crate::PmapSystem) is constructed: the AArch64 register
//! backend on hardware, the software model in tests.
//!
//! Every method acts on the CPU that calls it. Invalidations are
//! broadcast to the inner-shareable domain and complete (including the
//! trailing `dsb ish`) before they return.

use pmap_paging::{PA, VA};

use crate::asid::Asid;

/// CPU, barrier, root register and TLB primitives
pub trait Mmu: Sync {
    /// Index of the calling CPU
    fn cpu_id(&self) -> usize;

    /// Disable preemption on this CPU, returning the state to restore
    fn disable_preemption(&self) -> u64;

    /// Restore the state returned by `disable_preemption`
    fn restore_preemption(&self, saved: u64);

    /// Order prior page table stores before later TLB maintenance
    /// (`dsb ishst`)
    fn store_barrier(&self);

    /// Context synchronisation (`isb`)
    fn instruction_barrier(&self);

    /// Kernel root table base (TTBR1), fixed by boot code
    fn read_root_base(&self) -> u64;

    /// User root table base and ASID (TTBR0)
    fn read_user_root(&self) -> u64;

    /// Write the user root table base and ASID (TTBR0)
    fn write_root_base_and_asid(&self, value: u64);

    /// Enable or disable table walks through TTBR0 (TCR_EL1.EPD0)
    fn set_user_walks(&self, enabled: bool);

    /// Invalidate every TLB entry
    fn invalidate_all(&self);

    /// Invalidate the non-global entries tagged with `asid`
    fn invalidate_asid(&self, asid: Asid);

    /// Invalidate the entry for `va` tagged with `asid`
    fn invalidate_one(&self, asid: Asid, va: VA);

    /// Invalidate the entry for `va` under every ASID
    fn invalidate_global(&self, va: VA);

    /// Make instruction fetches from `[va, va + len)` observe prior data
    /// writes
    fn icache_sync_range(&self, va: VA, len: usize);
}

/// Preemption stays disabled while the guard lives
#[must_use = "preemption is re-enabled as soon as the guard is dropped"]
pub struct PreemptGuard<'a, M: Mmu + ?Sized> {
    mmu: &'a M,
    saved: u64,
}

impl<'a, M: Mmu + ?Sized> PreemptGuard<'a, M> {
    #[inline]
    pub fn new(mmu: &'a M) -> Self {
        let saved = mmu.disable_preemption();
        Self { mmu, saved }
    }
}

impl<M: Mmu + ?Sized> Drop for PreemptGuard<'_, M> {
    #[inline]
    fn drop(&mut self) {
        self.mmu.restore_preemption(self.saved);
    }
}

/// ASID field of TTBR0_EL1 (bits 63:48)
const TTBR_ASID_SHIFT: u32 = 48;
const TTBR_BADDR_MASK: u64 = 0x0000_FFFF_FFFF_FFFE;

/// Compose a TTBR0 value from a root table address and an ASID
#[inline]
pub const fn ttbr_value(root: PA, asid: Asid) -> u64 {
    (root.value() & TTBR_BADDR_MASK) | ((asid.value() as u64) << TTBR_ASID_SHIFT)
}

/// Root table address held in a TTBR value
#[inline]
pub const fn ttbr_root(ttbr: u64) -> PA {
    PA::new(ttbr & TTBR_BADDR_MASK)
}

/// ASID held in a TTBR value
#[inline]
pub const fn ttbr_asid(ttbr: u64) -> Asid {
    Asid::new((ttbr >> TTBR_ASID_SHIFT) as u16)
}
