//! Address space activation
//!
//! Switching TTBR0 is bracketed by disabling walks through it
//! (TCR_EL1.EPD0), so no speculative walk can pair the new root with the
//! old ASID or the other way round:
//!
//! ```text
//! EPD0 = 1; dsb ishst; isb      no new walks through TTBR0
//! TTBR0 = root | asid << 48; isb
//! EPD0 = 0; isb
//! ```
//!
//! ASIDs are assigned lazily, on first activation in a generation.

use alloc::sync::Arc;
use alloc::vec::Vec;

use pmap_paging::PhysWindow;

use crate::asid::{Asid, AsidAllocator};
use crate::hal::{Mmu, PreemptGuard, ttbr_value};
use crate::pmap::Pmap;
use crate::system::PmapSystem;

impl<M: Mmu, W: PhysWindow> PmapSystem<M, W> {
    /// Run `pmap` on `cpu`, which must be the calling CPU.
    ///
    /// Activating the pmap that is already installed with an unchanged
    /// root and ASID returns without touching any register. Activating
    /// the kernel pmap is a [`deactivate`](Self::deactivate).
    pub fn activate(&self, pmap: &Arc<Pmap>, cpu: usize) {
        let _preempt = PreemptGuard::new(&self.mmu);
        debug_assert_eq!(cpu, self.mmu.cpu_id(), "activate on a remote CPU");
        if pmap.is_kernel() {
            self.deactivate(cpu);
            return;
        }

        // Held across the switch so a rollover on another CPU sees this
        // pmap as running and keeps its ASID.
        let mut asids = self.asids.lock();
        let asid = self.assign_asid(&mut asids, pmap);
        let ttbr = ttbr_value(pmap.root(), asid);

        let mut current = self.cpus[cpu].current.lock();
        let same = current.as_ref().is_some_and(|c| Arc::ptr_eq(c, pmap));
        if same && self.mmu.read_user_root() == ttbr {
            return;
        }

        if let Some(prev) = current.take() {
            if !Arc::ptr_eq(&prev, pmap) {
                prev.active.remove(cpu);
            }
        }
        pmap.active.insert(cpu);
        self.switch_user_root(ttbr);
        *current = Some(Arc::clone(pmap));
        drop(current);
        drop(asids);

        log::trace!("cpu{cpu}: activated root {} asid {}", pmap.root(), asid.value());
    }

    /// Leave user space on `cpu`: TTBR0 goes back to the empty root with
    /// ASID 0 and walks through it stay disabled until the next
    /// activation.
    pub fn deactivate(&self, cpu: usize) {
        let _preempt = PreemptGuard::new(&self.mmu);
        debug_assert_eq!(cpu, self.mmu.cpu_id(), "deactivate on a remote CPU");

        let mut current = self.cpus[cpu].current.lock();
        if let Some(prev) = current.take() {
            prev.active.remove(cpu);
        }
        self.mmu.set_user_walks(false);
        self.mmu.store_barrier();
        self.mmu.instruction_barrier();
        self.mmu.write_root_base_and_asid(0);
        self.mmu.instruction_barrier();
        log::trace!("cpu{cpu}: deactivated");
    }

    /// The user pmap installed on `cpu`, if any
    pub fn current(&self, cpu: usize) -> Option<Arc<Pmap>> {
        self.cpus[cpu].current.lock().clone()
    }

    fn switch_user_root(&self, ttbr: u64) {
        self.mmu.set_user_walks(false);
        self.mmu.store_barrier();
        self.mmu.instruction_barrier();
        self.mmu.write_root_base_and_asid(ttbr);
        self.mmu.instruction_barrier();
        self.mmu.set_user_walks(true);
        self.mmu.instruction_barrier();
    }

    /// The pmap's ASID in the current generation, allocating one (and
    /// rolling the generation over if needed) when it has none.
    fn assign_asid(&self, asids: &mut AsidAllocator, pmap: &Pmap) -> Asid {
        let generation = asids.generation();
        if let Some(asid) = pmap.asid.get(generation) {
            return asid;
        }

        let asid = match asids.allocate() {
            Some(asid) => asid,
            None => {
                let running: Vec<Arc<Pmap>> = self
                    .cpus
                    .iter()
                    .filter_map(|slot| slot.current.lock().clone())
                    .collect();
                let keep: Vec<Asid> = running
                    .iter()
                    .filter_map(|p| p.asid.get(generation))
                    .collect();
                let next = asids.rollover(keep);
                for p in &running {
                    if let Some(asid) = p.asid.get(generation) {
                        p.asid.set(asid, next);
                    }
                }
                // Nothing tagged with a recycled ASID may survive.
                self.mmu.invalidate_all();

                let Some(asid) = asids.allocate() else {
                    panic!("every ASID is held by a running pmap");
                };
                asid
            }
        };
        pmap.asid.set(asid, asids.generation());
        asid
    }
}
