//! Access flag and dirty bit emulation
//!
//! User mappings are entered with AF clear and, when writable, with the
//! hardware write permission withheld. The first access of each kind
//! takes an access flag or permission fault, and [`fault_fixup`] arms
//! exactly the bits that access needed:
//!
//! | fault   | entry state                              | update            |
//! |---------|------------------------------------------|-------------------|
//! | write   | logically writable, not hardware writable | set AF, clear AP_RO |
//! | read    | logically readable, AF clear             | set AF            |
//! | execute | logically readable and executable, AF clear | set AF         |
//!
//! Anything else is a real fault and is left to the caller.
//!
//! [`fault_fixup`]: PmapSystem::fault_fixup

use pmap_paging::arch::arm64::descriptors::bits;
use pmap_paging::{PhysWindow, VA, lookup};

use crate::fault::AccessType;
use crate::hal::{Mmu, PreemptGuard};
use crate::pmap::Pmap;
use crate::system::PmapSystem;

impl<M: Mmu, W: PhysWindow> PmapSystem<M, W> {
    /// Try to resolve a fault at `va` in `pmap` by arming the entry that
    /// maps it.
    ///
    /// Returns `true` if the entry was updated and the access can simply
    /// be retried, `false` if the fault needs full handling. At most one
    /// upgrade is made per call, and the entry is changed by a single
    /// compare-exchange derived from the value it replaces.
    pub fn fault_fixup(&self, pmap: &Pmap, va: VA, access: AccessType, is_user: bool) -> bool {
        let _preempt = PreemptGuard::new(&self.mmu);
        if !pmap.owns(va) {
            return false;
        }

        let _guard = pmap.lock();
        let Some(slot) = lookup(&self.window, pmap.root(), va) else {
            log::trace!("fixup: no table for {va} ({access:?})");
            return false;
        };
        let level = slot.level();

        let mut cur = slot.load();
        let new = loop {
            if !cur.is_leaf(level) || (is_user && !cur.is_user()) {
                return false;
            }
            let new = match access {
                AccessType::Write if cur.os_write() && !cur.is_writable() => {
                    cur.with_set(bits::AF).with_clear(bits::AP_RO)
                }
                AccessType::Read if cur.os_read() && !cur.accessed() => cur.with_set(bits::AF),
                AccessType::Execute
                    if cur.os_read() && cur.executable_at(is_user) && !cur.accessed() =>
                {
                    cur.with_set(bits::AF)
                }
                _ => return false,
            };
            match slot.compare_exchange(cur, new) {
                Ok(_) => break new,
                Err(actual) => cur = actual,
            }
        };

        self.mmu.store_barrier();
        // Entries without AF are never cached, read-only ones may be.
        if cur.accessed() && cur.raw() & bits::AP_RO != new.raw() & bits::AP_RO {
            self.invalidate_page(pmap, va.page_align_down());
        }

        let offset = va.page_align_down().value() & (level.block_size() - 1);
        let pa = new.output_address(level) + offset;
        if self.is_managed(pa) {
            match access {
                AccessType::Write => self.pv().mark_modified(pa),
                AccessType::Read | AccessType::Execute => self.pv().mark_referenced(pa),
            }
        }
        log::trace!("fixup: {access:?} at {va} -> {new:?}");
        true
    }
}
