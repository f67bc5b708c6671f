//! The pmap system handle
//!
//! [`PmapSystem`] is built once by [`PmapSystem::bootstrap`] and threaded
//! by reference to everything that maps memory. It owns the kernel pmap,
//! the ASID allocator, the device map, the kernel VA allocator, the
//! reverse mapping records and the per-CPU state, together with the
//! [`Mmu`] and [`PhysWindow`] implementations it drives.
//!
//! Lock order: KVA allocator, then pmap lock, then ASID allocator, then
//! per-CPU slot; the pv table lock is a leaf.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use pmap_common::memory::page::SIZE_2M;
use pmap_paging::arch::arm64::descriptors::bits;
use pmap_paging::{
    FrameAllocator, Level, MapAttributes, MemoryType, PA, PAGE_SIZE, PhysWindow, Prot, Pte,
    PteAttrs, PteKind, PteSlot, VA, VirtMemoryRegion, ensure_path, lookup, map_range,
    release_tables,
};
use spin::Mutex;

use crate::asid::{Asid, AsidAllocator};
use crate::bootstrap::grow;
use crate::config::PmapConfig;
use crate::devmap::{DevmapEntry, DevmapRegistry};
use crate::directmap::DirectMap;
use crate::error::PmapError;
use crate::fault::{AccessType, FaultBuf};
use crate::hal::{Mmu, PreemptGuard, ttbr_root};
use crate::kva::KvaAllocator;
use crate::pmap::{EnterFlags, Pmap, PmapKind, PmapStats};
use crate::pv::PvTable;

/// Per-CPU state
pub(crate) struct CpuSlot {
    /// User pmap whose root is in this CPU's TTBR0
    pub(crate) current: Mutex<Option<Arc<Pmap>>>,
    pub(crate) faultbuf: FaultBuf,
}

/// The machine-dependent pmap layer
pub struct PmapSystem<M: Mmu, W: PhysWindow> {
    pub(crate) mmu: M,
    pub(crate) window: W,
    pub(crate) config: PmapConfig,
    pub(crate) kernel: Arc<Pmap>,
    pub(crate) asids: Mutex<AsidAllocator>,
    pub(crate) cpus: Box<[CpuSlot]>,
    devmap: DevmapRegistry,
    kva: Mutex<KvaAllocator>,
    /// End of the kernel VA range whose tables exist
    kernel_end: Mutex<VA>,
    pv: PvTable,
}

impl<M: Mmu, W: PhysWindow> PmapSystem<M, W> {
    /// Build the kernel pmap around the root table boot code loaded into
    /// TTBR1, and set up `[vstart, vend)` as the kernel VA window.
    ///
    /// Runs once, on the boot CPU, before secondary CPUs start.
    ///
    /// # Errors
    ///
    /// * `NotAligned` - `vstart` or `vend` is not page-aligned
    /// * `InvalidAddress` - the window is empty or not in the kernel half,
    ///   or the window cannot reach the kernel root table
    pub fn bootstrap(
        mmu: M,
        window: W,
        config: PmapConfig,
        vstart: VA,
        vend: VA,
    ) -> Result<Self, PmapError> {
        if !vstart.is_page_aligned() || !vend.is_page_aligned() {
            return Err(PmapError::NotAligned);
        }
        if vstart >= vend || !vstart.is_kernel() {
            return Err(PmapError::InvalidAddress);
        }

        let root = ttbr_root(mmu.read_root_base());
        if root.is_null() || !window.covers(root) {
            return Err(PmapError::InvalidAddress);
        }

        let kva_window = VirtMemoryRegion::new(vstart, (vend - vstart) as usize);
        let cpus = (0..config.cpus)
            .map(|_| CpuSlot {
                current: Mutex::new(None),
                faultbuf: FaultBuf::new(),
            })
            .collect();

        log::info!(
            "pmap: kernel root {} (va {:?}), kva {}..{}, {} cpu(s)",
            root,
            config.direct_map.pa_to_va(root),
            vstart,
            vend,
            config.cpus
        );

        Ok(Self {
            asids: Mutex::new(AsidAllocator::new(config.asid_bits)),
            kernel: Arc::new(Pmap::new(PmapKind::Kernel, root)),
            kva: Mutex::new(KvaAllocator::new(kva_window)),
            kernel_end: Mutex::new(vstart),
            devmap: DevmapRegistry::new(),
            pv: PvTable::new(),
            cpus,
            mmu,
            window,
            config,
        })
    }

    #[inline]
    pub fn kernel(&self) -> &Arc<Pmap> {
        &self.kernel
    }

    #[inline]
    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    #[inline]
    pub fn window(&self) -> &W {
        &self.window
    }

    #[inline]
    pub fn config(&self) -> &PmapConfig {
        &self.config
    }

    #[inline]
    pub fn direct_map(&self) -> &DirectMap {
        &self.config.direct_map
    }

    #[inline]
    pub fn devmap(&self) -> &DevmapRegistry {
        &self.devmap
    }

    /// Kernel VA window handed to bootstrap
    pub fn kva_window(&self) -> VirtMemoryRegion {
        self.kva.lock().window()
    }

    /// End of the kernel VA range with tables in place
    pub fn kernel_end(&self) -> VA {
        *self.kernel_end.lock()
    }

    /// The ASID `pmap` holds in the current generation
    pub fn asid_of(&self, pmap: &Pmap) -> Option<Asid> {
        if pmap.is_kernel() {
            return Some(Asid::KERNEL);
        }
        let generation = self.asids.lock().generation();
        pmap.asid.get(generation)
    }

    // -- Lifecycle

    /// Create an empty user pmap
    pub fn create<A: FrameAllocator + ?Sized>(&self, alloc: &A) -> Result<Arc<Pmap>, PmapError> {
        let root = alloc.alloc_zeroed_page(true).ok_or(PmapError::OutOfMemory)?;
        log::trace!("pmap: created user pmap, root {root}");
        Ok(Arc::new(Pmap::new(PmapKind::User, root)))
    }

    /// Tear down a user pmap: release its ASID, its reverse mapping
    /// records and every table it owns. The pages it mapped are not
    /// touched.
    ///
    /// # Errors
    ///
    /// * `StillActive` - some CPU still runs on it
    ///
    /// # Panics
    ///
    /// If `pmap` is the kernel pmap.
    pub fn destroy<A: FrameAllocator + ?Sized>(
        &self,
        pmap: Arc<Pmap>,
        alloc: &A,
    ) -> Result<(), PmapError> {
        assert!(!pmap.is_kernel(), "the kernel pmap is never destroyed");
        if !pmap.active.is_empty() {
            return Err(PmapError::StillActive);
        }

        let mut stats = pmap.lock();
        {
            let mut asids = self.asids.lock();
            if let Some(asid) = pmap.asid.get(asids.generation()) {
                self.mmu.invalidate_asid(asid);
                asids.free(asid);
            }
            pmap.asid.clear();
        }
        self.pv.remove_pmap(&pmap);
        release_tables(&self.window, pmap.root(), alloc);
        *stats = PmapStats::default();
        log::trace!("pmap: destroyed user pmap, root {}", pmap.root());
        Ok(())
    }

    // -- Mapping

    /// Map the page at `pa` at `va` in `pmap`, replacing any previous
    /// mapping of `va`.
    ///
    /// User mappings start with the access flag and hardware write
    /// permission clear, except for what `flags.access` pre-arms; kernel
    /// mappings are fully armed. Managed pages (inside the direct map and
    /// not flagged unmanaged) get a reverse mapping record.
    ///
    /// # Errors
    ///
    /// * `NotAligned` - `va` or `pa` is not page-aligned
    /// * `InvalidAddress` - `va` is outside the half `pmap` translates
    /// * `OutOfMemory` - a table page could not be allocated
    /// * `TypeConflict` - a block mapping covers `va`
    pub fn enter<A: FrameAllocator + ?Sized>(
        &self,
        pmap: &Arc<Pmap>,
        va: VA,
        pa: PA,
        prot: Prot,
        flags: EnterFlags,
        alloc: &A,
    ) -> Result<(), PmapError> {
        if !va.is_page_aligned() || !pa.is_page_aligned() {
            return Err(PmapError::NotAligned);
        }
        if !pmap.owns(va) {
            return Err(PmapError::InvalidAddress);
        }

        let attrs = match pmap.kind() {
            PmapKind::Kernel => PteAttrs::kernel(prot, flags.mem_type).with_wired(flags.wired),
            PmapKind::User => {
                let base = PteAttrs {
                    mem_type: flags.mem_type,
                    wired: flags.wired,
                    ..PteAttrs::user(prot)
                };
                match flags.access {
                    None => base,
                    Some(AccessType::Write) => base.with_accessed(true).with_dirty(prot.write),
                    Some(AccessType::Read | AccessType::Execute) => base.with_accessed(true),
                }
            }
        };
        let managed = !flags.unmanaged && self.is_managed(pa);

        let mut stats = pmap.lock();
        let slot = ensure_path(&self.window, pmap.root(), va, alloc)?;
        let mut new = Pte::encode_block(Level::L3, pa, attrs);
        let old = slot.load();

        if old.is_valid() {
            if old.output_address(Level::L3) == pa {
                // Same page: keep what the hardware already earned.
                if old.accessed() {
                    new = new.with_set(bits::AF);
                }
                if old.is_writable() && prot.write {
                    new = new.with_clear(bits::AP_RO);
                }
                slot.swap(new);
                self.mmu.store_barrier();
                self.invalidate_page(pmap, va);
                stats.wired = stats.wired - old.is_wired() as usize + flags.wired as usize;
                if managed {
                    self.note_access(pa, new);
                }
                return Ok(());
            }

            // Break before make.
            slot.swap(Pte::INVALID);
            self.mmu.store_barrier();
            self.invalidate_page(pmap, va);
            self.pv.remove(old.output_address(Level::L3), pmap, va);
            stats.resident -= 1;
            stats.wired -= old.is_wired() as usize;
        }

        slot.store(new);
        self.mmu.store_barrier();
        stats.resident += 1;
        stats.wired += flags.wired as usize;

        if managed {
            self.pv.insert(pa, pmap, va);
            self.note_access(pa, new);
        }
        log::trace!("pmap: enter {va} -> {pa} {prot:?}");
        Ok(())
    }

    /// Remove every page mapping in `[sva, eva)`, returning how many were
    /// removed.
    ///
    /// Entries are cleared first, then a single store barrier orders all
    /// of them before the TLB maintenance. Ranges above the configured
    /// threshold flush the whole ASID (or the whole TLB for the kernel)
    /// instead of one page at a time.
    ///
    /// # Errors
    ///
    /// * `NotAligned` - `sva` or `eva` is not page-aligned
    /// * `InvalidAddress` - the range is inverted or leaves the half
    ///   `pmap` translates
    /// * `TypeConflict` - a block mapping lies in the range
    pub fn remove(&self, pmap: &Pmap, sva: VA, eva: VA) -> Result<usize, PmapError> {
        self.check_range(pmap, sva, eva)?;
        let mut stats = pmap.lock();

        // Blocks cannot lose single pages: refuse before clearing anything.
        self.walk_leaves(pmap.root(), sva, eva, |_, slot| {
            if slot.level() == Level::L3 {
                Ok(())
            } else {
                Err(PmapError::TypeConflict)
            }
        })?;

        let mut cleared = Vec::new();
        self.walk_leaves(pmap.root(), sva, eva, |va, slot| {
            let old = slot.swap(Pte::INVALID);
            if old.is_valid() {
                stats.resident -= 1;
                stats.wired -= old.is_wired() as usize;
                self.pv.remove(old.output_address(Level::L3), pmap, va);
                cleared.push(va);
            }
            Ok(())
        })?;
        drop(stats);

        if !cleared.is_empty() {
            self.mmu.store_barrier();
            self.invalidate_pages(pmap, &cleared);
        }
        Ok(cleared.len())
    }

    /// Lower the permissions of every mapping in `[sva, eva)` to `prot`.
    ///
    /// Dropping read permission removes the mappings altogether.
    pub fn protect(&self, pmap: &Pmap, sva: VA, eva: VA, prot: Prot) -> Result<(), PmapError> {
        if !prot.read {
            return self.remove(pmap, sva, eva).map(|_| ());
        }
        self.check_range(pmap, sva, eva)?;
        let _guard = pmap.lock();

        let mut changed = Vec::new();
        self.walk_leaves(pmap.root(), sva, eva, |va, slot| {
            let level = slot.level();
            let mut cur = slot.load();
            while cur.is_leaf(level) {
                let attrs = cur.attrs().restrict(prot);
                let new = Pte::encode_block(level, cur.output_address(level), attrs);
                if new == cur {
                    break;
                }
                match slot.compare_exchange(cur, new) {
                    Ok(_) => {
                        changed.push(va);
                        break;
                    }
                    Err(actual) => cur = actual,
                }
            }
            Ok(())
        })?;

        if !changed.is_empty() {
            self.mmu.store_barrier();
            self.invalidate_pages(pmap, &changed);
        }
        Ok(())
    }

    /// Physical address `va` translates to in `pmap`
    pub fn extract(&self, pmap: &Pmap, va: VA) -> Option<PA> {
        if pmap.is_kernel() {
            if let Some(pa) = self.config.direct_map.va_to_pa(va) {
                return Some(pa);
            }
        }
        if !pmap.owns(va) {
            return None;
        }
        let slot = lookup(&self.window, pmap.root(), va)?;
        let level = slot.level();
        let pte = slot.load();
        pte.is_leaf(level)
            .then(|| pte.output_address(level) + (va.value() & (level.block_size() - 1)))
    }

    /// Map a wired, unmanaged kernel page. The kernel tables covering
    /// `va` must already exist (see [`grow_kernel`](Self::grow_kernel)).
    pub fn kenter(&self, va: VA, pa: PA, prot: Prot, mem_type: MemoryType) -> Result<(), PmapError> {
        if !va.is_page_aligned() || !pa.is_page_aligned() {
            return Err(PmapError::NotAligned);
        }
        if !va.is_kernel() {
            return Err(PmapError::InvalidAddress);
        }

        let mut stats = self.kernel.lock();
        let slot = lookup(&self.window, self.kernel.root(), va).ok_or(PmapError::InvalidAddress)?;
        if slot.level() != Level::L3 {
            return Err(PmapError::TypeConflict);
        }
        if slot.load().is_valid() {
            return Err(PmapError::AlreadyMapped);
        }
        slot.store(Pte::encode_block(Level::L3, pa, PteAttrs::kernel(prot, mem_type)));
        self.mmu.store_barrier();
        stats.resident += 1;
        stats.wired += 1;
        Ok(())
    }

    /// Remove kernel page mappings in `[va, va + size)`
    pub fn kremove(&self, va: VA, size: usize) -> Result<usize, PmapError> {
        let eva = va.checked_add(size as u64).ok_or(PmapError::InvalidAddress)?;
        self.remove(&self.kernel, va, eva)
    }

    // -- Kernel growth

    /// Extend the kernel tables so that every page below `max_kva` in
    /// the kernel VA window has an L3 slot. Growth is in 2MB steps and
    /// stops at the end of the window.
    ///
    /// During boot `alloc` is a [`BootStealer`](crate::bootstrap::BootStealer);
    /// afterwards it is the page pool. Returns the new end of the grown
    /// range.
    pub fn grow_kernel<A: FrameAllocator + ?Sized>(
        &self,
        max_kva: VA,
        alloc: &A,
    ) -> Result<VA, PmapError> {
        let window = self.kva_window();
        if !window.contains_addr(max_kva) && max_kva != window.end() {
            return Err(PmapError::InvalidAddress);
        }

        let mut end = self.kernel_end.lock();
        let target = max_kva
            .checked_align_up(SIZE_2M as u64)
            .map_or(window.end(), |t| t.min(window.end()));
        if target <= *end {
            return Ok(*end);
        }

        let _guard = self.kernel.lock();
        let created = grow(
            &self.window,
            self.kernel.root(),
            Level::L0,
            *end,
            target - *end,
            alloc,
        )?;
        log::debug!("pmap: kernel grown {}..{} ({created} tables)", *end, target);
        *end = target;
        Ok(target)
    }

    // -- Device mappings

    /// Install the platform's static device map table
    pub fn register_devmap(&self, table: &'static [DevmapEntry]) -> Result<(), PmapError> {
        self.devmap.register(table)
    }

    /// Map every registered device window into the kernel tables,
    /// returning the number of descriptors written.
    pub fn bootstrap_devmap<A: FrameAllocator + ?Sized>(&self, alloc: &A) -> Result<usize, PmapError> {
        let _guard = self.kernel.lock();
        let mut written = 0;
        for e in self.devmap.entries() {
            let attrs = MapAttributes::new(
                e.phys(),
                e.virt(),
                PteAttrs::kernel(e.prot, e.flags.mem_type()),
            );
            written += map_range(&self.window, self.kernel.root(), &attrs, alloc)?;
        }
        self.mmu.store_barrier();
        log::info!("devmap: {} window(s) installed, {written} entries", self.devmap.entries().len());
        Ok(written)
    }

    /// Kernel VA through which `[pa, pa + size)` can be accessed as
    /// device memory.
    ///
    /// A static device window covering the range is used as is.
    /// Otherwise kernel VA is allocated and mapped page by page.
    pub fn device_map<A: FrameAllocator + ?Sized>(
        &self,
        pa: PA,
        size: usize,
        alloc: &A,
    ) -> Result<VA, PmapError> {
        if let Some(e) = self.devmap.find_by_pa(pa, size) {
            return Ok(e.va + (pa - e.pa));
        }

        let offset = pa.page_offset();
        let base = pa.page_align_down();
        let len = (size + offset).max(1).next_multiple_of(PAGE_SIZE);
        let va = self
            .kva
            .lock()
            .alloc(len, PAGE_SIZE as u64)
            .ok_or(PmapError::KvaExhausted)?;

        if let Err(e) = self.map_device_pages(va, base, len, alloc) {
            self.kva.lock().free(va, len);
            return Err(e);
        }
        log::debug!("pmap: device {base}+{len:#x} mapped at {va}");
        Ok(va + offset)
    }

    fn map_device_pages<A: FrameAllocator + ?Sized>(
        &self,
        va: VA,
        pa: PA,
        len: usize,
        alloc: &A,
    ) -> Result<(), PmapError> {
        let attrs = PteAttrs::kernel(Prot::READ_WRITE, MemoryType::Device);
        let mut stats = self.kernel.lock();
        let mut done = 0;
        while done < len {
            let slot = match ensure_path(&self.window, self.kernel.root(), va + done, alloc) {
                Ok(slot) if !slot.load().is_valid() => slot,
                result => {
                    drop(stats);
                    self.remove(&self.kernel, va, va + done)?;
                    return Err(result.err().map_or(PmapError::AlreadyMapped, PmapError::from));
                }
            };
            slot.store(Pte::encode_block(Level::L3, pa + done, attrs));
            stats.resident += 1;
            stats.wired += 1;
            done += PAGE_SIZE;
        }
        self.mmu.store_barrier();
        Ok(())
    }

    /// Undo [`device_map`](Self::device_map). Static device windows stay
    /// mapped.
    pub fn device_unmap(&self, va: VA, size: usize) -> Result<(), PmapError> {
        if self.devmap.find_by_va(va, size).is_some() {
            return Ok(());
        }
        let base = va.page_align_down();
        let len = (size + va.page_offset()).max(1).next_multiple_of(PAGE_SIZE);
        let mut kva = self.kva.lock();
        if !kva.is_allocated(base, len) {
            return Err(PmapError::InvalidAddress);
        }
        self.remove(&self.kernel, base, base + len)?;
        kva.free(base, len);
        Ok(())
    }

    // -- Pool pages

    /// Kernel VA of a pool page, through the direct map
    pub fn map_poolpage(&self, pa: PA) -> Result<VA, PmapError> {
        self.config
            .direct_map
            .pa_to_va(pa)
            .ok_or(PmapError::InvalidAddress)
    }

    /// Physical address behind a VA returned by `map_poolpage`
    pub fn unmap_poolpage(&self, va: VA) -> Result<PA, PmapError> {
        self.config
            .direct_map
            .va_to_pa(va)
            .ok_or(PmapError::InvalidAddress)
    }

    pub fn zero_page(&self, pa: PA) {
        self.window.zero_page(pa);
    }

    pub fn copy_page(&self, src: PA, dst: PA) {
        self.window.copy_page(src, dst);
    }

    // -- Referenced / modified

    pub fn is_referenced(&self, pa: PA) -> bool {
        self.pv.is_referenced(pa)
    }

    pub fn is_modified(&self, pa: PA) -> bool {
        self.pv.is_modified(pa)
    }

    /// Forget that `pa` was referenced; every mapping of it faults on its
    /// next access. Returns whether it had been referenced.
    pub fn clear_reference(&self, pa: PA) -> bool {
        let (was, mappings) = self.pv.take_referenced(pa);
        for (pmap, va) in mappings {
            self.rearm(&pmap, va, pa, |pte| pte.accessed().then(|| pte.with_clear(bits::AF)));
        }
        was
    }

    /// Forget that `pa` was modified; every mapping of it faults on its
    /// next write. Returns whether it had been modified.
    pub fn clear_modify(&self, pa: PA) -> bool {
        let (was, mappings) = self.pv.take_modified(pa);
        for (pmap, va) in mappings {
            self.rearm(&pmap, va, pa, |pte| {
                (pte.raw() & bits::AP_RO == 0).then(|| pte.with_set(bits::AP_RO))
            });
        }
        was
    }

    /// Apply `update` to the L3 entry mapping `pa` at `va` in `pmap`
    fn rearm(&self, pmap: &Pmap, va: VA, pa: PA, update: impl Fn(Pte) -> Option<Pte>) {
        let _guard = pmap.lock();
        let Some(slot) = lookup(&self.window, pmap.root(), va) else {
            return;
        };
        let mut cur = slot.load();
        loop {
            if !cur.is_leaf(slot.level()) || cur.output_address(slot.level()) != pa {
                return;
            }
            let Some(new) = update(cur) else {
                return;
            };
            match slot.compare_exchange(cur, new) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.mmu.store_barrier();
        self.invalidate_page(pmap, va);
    }

    // -- Fault probes

    /// Run `f` with this CPU's fault probe armed. A fault inside `f` that
    /// the exception path reports through [`onfault_hit`](Self::onfault_hit)
    /// turns into `BadAddress`.
    pub fn probe<T>(&self, f: impl FnOnce() -> T) -> Result<T, PmapError> {
        let _preempt = PreemptGuard::new(&self.mmu);
        self.cpus[self.mmu.cpu_id()].faultbuf.probe(f)
    }

    /// Called by the exception path on a kernel fault at `va`. Returns
    /// `true` if a probe is armed on this CPU and execution must resume
    /// past the faulting access.
    pub fn onfault_hit(&self, va: VA) -> bool {
        self.cpus[self.mmu.cpu_id()].faultbuf.hit(va)
    }

    // -- Internals

    /// Whether `pa` is a page the pmap tracks reverse mappings for
    pub(crate) fn is_managed(&self, pa: PA) -> bool {
        self.config.direct_map.covers_pa(pa)
    }

    pub(crate) fn pv(&self) -> &PvTable {
        &self.pv
    }

    /// Record the hardware state `pte` was armed with
    pub(crate) fn note_access(&self, pa: PA, pte: Pte) {
        if pte.is_writable() {
            self.pv.mark_modified(pa);
        } else if pte.accessed() {
            self.pv.mark_referenced(pa);
        }
    }

    /// Drop any TLB entry for `va` in `pmap`
    pub(crate) fn invalidate_page(&self, pmap: &Pmap, va: VA) {
        if pmap.is_kernel() {
            self.mmu.invalidate_global(va);
        } else if let Some(asid) = self.asid_of(pmap) {
            self.mmu.invalidate_one(asid, va);
        }
    }

    fn invalidate_pages(&self, pmap: &Pmap, pages: &[VA]) {
        if pages.len() <= self.config.tlb_range_threshold {
            for &va in pages {
                self.invalidate_page(pmap, va);
            }
        } else if pmap.is_kernel() {
            self.mmu.invalidate_all();
        } else if let Some(asid) = self.asid_of(pmap) {
            self.mmu.invalidate_asid(asid);
        }
    }

    fn check_range(&self, pmap: &Pmap, sva: VA, eva: VA) -> Result<(), PmapError> {
        if !sva.is_page_aligned() || !eva.is_page_aligned() {
            return Err(PmapError::NotAligned);
        }
        if sva > eva {
            return Err(PmapError::InvalidAddress);
        }
        if sva != eva && !(pmap.owns(sva) && pmap.owns(eva - PAGE_SIZE as u64)) {
            return Err(PmapError::InvalidAddress);
        }
        Ok(())
    }

    /// Call `f` for every leaf entry (valid or not) in `[sva, eva)`,
    /// skipping the ranges whose intermediate tables are missing.
    fn walk_leaves(
        &self,
        root: PA,
        sva: VA,
        eva: VA,
        mut f: impl FnMut(VA, PteSlot<'_>) -> Result<(), PmapError>,
    ) -> Result<(), PmapError> {
        let mut va = sva;
        'outer: while va < eva {
            let mut table = self.window.table(root);
            for level in Level::ALL {
                let slot = PteSlot::new(table, level.index(va), level);
                let pte = slot.load();
                let step = match pte.kind(level) {
                    PteKind::Table if level != Level::L3 => {
                        table = self.window.table(pte.table_address());
                        continue;
                    }
                    PteKind::Invalid if level != Level::L3 => level.block_size(),
                    _ => {
                        f(va, slot)?;
                        level.block_size()
                    }
                };
                match va.align_down(step).value().checked_add(step) {
                    Some(next) => va = VA::new(next),
                    None => break 'outer,
                }
                continue 'outer;
            }
        }
        Ok(())
    }
}
