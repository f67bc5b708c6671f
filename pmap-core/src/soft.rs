//! Software MMU model
//!
//! An [`Mmu`] for host tests: per-CPU TTBR0 and EPD0, a shared TTBR1, a
//! TLB tagged by ASID (or global), and an ordered log of every barrier,
//! register write and invalidation so tests can check sequences.
//!
//! [`SoftMmu::translate`] walks the tables through a [`PhysWindow`] the
//! way the hardware would, faulting on a clear access flag or missing
//! permission, and caches what it walked.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use pmap_paging::{Level, PA, PAGE_SHIFT, PhysWindow, Pte, VA, lookup};
use spin::Mutex;

use crate::asid::Asid;
use crate::fault::AccessType;
use crate::hal::{Mmu, ttbr_asid, ttbr_root};

/// One recorded MMU operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    StoreBarrier,
    InstructionBarrier,
    UserWalks(bool),
    WriteTtbr0(u64),
    InvalidateAll,
    InvalidateAsid(Asid),
    InvalidateOne(Asid, VA),
    InvalidateGlobal(VA),
    IcacheSync(VA, usize),
}

/// Why a translation faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftFault {
    Translation,
    AccessFlag,
    Permission,
}

#[derive(Default)]
struct SoftCpu {
    ttbr0: AtomicU64,
    /// TCR_EL1.EPD0 clear
    user_walks: AtomicBool,
    preempt_depth: AtomicU64,
}

/// Cached translation: the leaf entry and its level
#[derive(Clone, Copy)]
struct TlbEntry {
    pte: Pte,
    level: Level,
}

/// Key: full virtual page number and ASID tag (`None` for global entries)
type TlbKey = (u64, Option<u16>);

fn page(va: VA) -> u64 {
    va.value() >> PAGE_SHIFT
}

pub struct SoftMmu {
    cpu: AtomicUsize,
    ttbr1: u64,
    cpus: Box<[SoftCpu]>,
    tlb: Mutex<BTreeMap<TlbKey, TlbEntry>>,
    events: Mutex<Vec<Event>>,
}

impl SoftMmu {
    /// A model with `cpus` CPUs whose TTBR1 holds `kernel_root`
    pub fn new(kernel_root: PA, cpus: usize) -> Self {
        Self {
            cpu: AtomicUsize::new(0),
            ttbr1: kernel_root.value(),
            cpus: (0..cpus).map(|_| SoftCpu::default()).collect(),
            tlb: Mutex::new(BTreeMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Make `cpu` the CPU subsequent calls act on
    pub fn set_cpu(&self, cpu: usize) {
        assert!(cpu < self.cpus.len(), "no cpu{cpu}");
        self.cpu.store(cpu, Ordering::SeqCst);
    }

    fn this(&self) -> &SoftCpu {
        &self.cpus[self.cpu.load(Ordering::SeqCst)]
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn user_root(&self, cpu: usize) -> u64 {
        self.cpus[cpu].ttbr0.load(Ordering::SeqCst)
    }

    pub fn user_walks(&self, cpu: usize) -> bool {
        self.cpus[cpu].user_walks.load(Ordering::SeqCst)
    }

    pub fn preempt_disabled(&self, cpu: usize) -> bool {
        self.cpus[cpu].preempt_depth.load(Ordering::SeqCst) != 0
    }

    /// Physical address of a cached translation of `va` usable under
    /// `asid`, without walking
    pub fn tlb_lookup(&self, va: VA, asid: Asid) -> Option<PA> {
        let tlb = self.tlb.lock();
        let entry = tlb
            .get(&(page(va), Some(asid.value())))
            .or_else(|| tlb.get(&(page(va), None)))?;
        Some(output(entry, va))
    }

    pub fn tlb_len(&self) -> usize {
        self.tlb.lock().len()
    }

    /// Translate `va` on the current CPU as an access of kind `access`
    /// from EL0 (`el0`) or EL1.
    pub fn translate<W: PhysWindow + ?Sized>(
        &self,
        window: &W,
        va: VA,
        access: AccessType,
        el0: bool,
    ) -> Result<PA, SoftFault> {
        let cpu = self.this();
        let (root, tag) = if va.is_user() {
            let ttbr0 = cpu.ttbr0.load(Ordering::SeqCst);
            (ttbr_root(ttbr0), ttbr_asid(ttbr0))
        } else if va.is_kernel() {
            if el0 {
                return Err(SoftFault::Permission);
            }
            (ttbr_root(self.ttbr1), Asid::KERNEL)
        } else {
            return Err(SoftFault::Translation);
        };

        if let Some(entry) = self.cached(va, tag) {
            check(entry.pte, access, el0)?;
            return Ok(output(&entry, va));
        }

        if va.is_user() && (!cpu.user_walks.load(Ordering::SeqCst) || root.is_null()) {
            return Err(SoftFault::Translation);
        }
        let slot = lookup(window, root, va).ok_or(SoftFault::Translation)?;
        let level = slot.level();
        let pte = slot.load();
        if !pte.is_leaf(level) {
            return Err(SoftFault::Translation);
        }
        if !pte.accessed() {
            return Err(SoftFault::AccessFlag);
        }

        let entry = TlbEntry { pte, level };
        let key = (page(va), (!pte.is_global()).then_some(tag.value()));
        self.tlb.lock().insert(key, entry);

        check(pte, access, el0)?;
        Ok(output(&entry, va))
    }

    fn cached(&self, va: VA, tag: Asid) -> Option<TlbEntry> {
        let tlb = self.tlb.lock();
        tlb.get(&(page(va), Some(tag.value())))
            .or_else(|| tlb.get(&(page(va), None)))
            .copied()
    }
}

fn output(entry: &TlbEntry, va: VA) -> PA {
    entry.pte.output_address(entry.level) + (va.value() & (entry.level.block_size() - 1))
}

fn check(pte: Pte, access: AccessType, el0: bool) -> Result<(), SoftFault> {
    if el0 && !pte.is_user() {
        return Err(SoftFault::Permission);
    }
    let ok = match access {
        AccessType::Read => true,
        AccessType::Write => pte.is_writable(),
        AccessType::Execute => pte.executable_at(el0),
    };
    if ok { Ok(()) } else { Err(SoftFault::Permission) }
}

impl Mmu for SoftMmu {
    fn cpu_id(&self) -> usize {
        self.cpu.load(Ordering::SeqCst)
    }

    fn disable_preemption(&self) -> u64 {
        self.this().preempt_depth.fetch_add(1, Ordering::SeqCst)
    }

    fn restore_preemption(&self, saved: u64) {
        self.this().preempt_depth.store(saved, Ordering::SeqCst);
    }

    fn store_barrier(&self) {
        self.record(Event::StoreBarrier);
    }

    fn instruction_barrier(&self) {
        self.record(Event::InstructionBarrier);
    }

    fn read_root_base(&self) -> u64 {
        self.ttbr1
    }

    fn read_user_root(&self) -> u64 {
        self.this().ttbr0.load(Ordering::SeqCst)
    }

    fn write_root_base_and_asid(&self, value: u64) {
        let cpu = self.this();
        assert!(
            !cpu.user_walks.load(Ordering::SeqCst),
            "TTBR0 written with walks through it enabled"
        );
        cpu.ttbr0.store(value, Ordering::SeqCst);
        self.record(Event::WriteTtbr0(value));
    }

    fn set_user_walks(&self, enabled: bool) {
        self.this().user_walks.store(enabled, Ordering::SeqCst);
        self.record(Event::UserWalks(enabled));
    }

    fn invalidate_all(&self) {
        self.tlb.lock().clear();
        self.record(Event::InvalidateAll);
    }

    fn invalidate_asid(&self, asid: Asid) {
        self.tlb
            .lock()
            .retain(|&(_, tag), _| tag != Some(asid.value()));
        self.record(Event::InvalidateAsid(asid));
    }

    fn invalidate_one(&self, asid: Asid, va: VA) {
        let mut tlb = self.tlb.lock();
        tlb.remove(&(page(va), Some(asid.value())));
        // TLBI VAE1 also drops global entries for the address.
        tlb.remove(&(page(va), None));
        drop(tlb);
        self.record(Event::InvalidateOne(asid, va));
    }

    fn invalidate_global(&self, va: VA) {
        self.tlb.lock().retain(|&(p, _), _| p != page(va));
        self.record(Event::InvalidateGlobal(va));
    }

    fn icache_sync_range(&self, va: VA, len: usize) {
        self.record(Event::IcacheSync(va, len));
    }
}
