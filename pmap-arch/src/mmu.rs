//! AArch64 system register backend
//!
//! Implements the pmap MMU capability with the real registers: TTBR0/1,
//! TCR_EL1.EPD0, inner-shareable TLBI broadcasts and DAIF masking for
//! preemption control.

use core::arch::asm;

use aarch64_cpu::registers::{DAIF, MPIDR_EL1, TCR_EL1, TTBR0_EL1, TTBR1_EL1};
use pmap_core::{Asid, Mmu};
use pmap_paging::VA;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::cache::sync_icache_range;
use crate::tlbi::{all_asids_operand, asid_operand, va_operand};

/// The calling CPU's MMU
pub struct Aarch64Mmu {
    _private: (),
}

impl Aarch64Mmu {
    /// # Safety
    ///
    /// Must only be used at EL1 with the MMU enabled, TTBR1_EL1 holding
    /// the kernel root table and TCR_EL1 set up for a 48-bit VA with a
    /// 4 KiB granule in both halves.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

/// Wait for outstanding TLB maintenance and resynchronise
#[inline]
fn tlbi_complete() {
    // SAFETY: barriers have no memory-safety preconditions.
    unsafe { asm!("dsb ish", "isb", options(nostack)) };
}

impl Mmu for Aarch64Mmu {
    #[inline]
    fn cpu_id(&self) -> usize {
        (MPIDR_EL1.get() & 0xFF) as usize
    }

    #[inline]
    fn disable_preemption(&self) -> u64 {
        let daif = DAIF.get();
        // SAFETY: masking IRQ and FIQ at EL1 only delays interrupts.
        unsafe { asm!("msr daifset, #0x3", options(nomem, nostack)) };
        daif
    }

    #[inline]
    fn restore_preemption(&self, saved: u64) {
        DAIF.set(saved);
    }

    #[inline]
    fn store_barrier(&self) {
        // SAFETY: barrier.
        unsafe { asm!("dsb ishst", options(nostack)) };
    }

    #[inline]
    fn instruction_barrier(&self) {
        // SAFETY: barrier.
        unsafe { asm!("isb", options(nostack)) };
    }

    fn read_root_base(&self) -> u64 {
        TTBR1_EL1.get()
    }

    fn read_user_root(&self) -> u64 {
        TTBR0_EL1.get()
    }

    fn write_root_base_and_asid(&self, value: u64) {
        TTBR0_EL1.set(value);
    }

    fn set_user_walks(&self, enabled: bool) {
        if enabled {
            TCR_EL1.modify(TCR_EL1::EPD0::EnableTTBR0Walks);
        } else {
            TCR_EL1.modify(TCR_EL1::EPD0::DisableTTBR0Walks);
        }
    }

    fn invalidate_all(&self) {
        // SAFETY: TLB invalidation only drops cached translations.
        unsafe { asm!("tlbi vmalle1is", options(nostack)) };
        tlbi_complete();
    }

    fn invalidate_asid(&self, asid: Asid) {
        // SAFETY: as above.
        unsafe { asm!("tlbi aside1is, {}", in(reg) asid_operand(asid), options(nostack)) };
        tlbi_complete();
    }

    fn invalidate_one(&self, asid: Asid, va: VA) {
        // SAFETY: as above.
        unsafe { asm!("tlbi vae1is, {}", in(reg) va_operand(asid, va), options(nostack)) };
        tlbi_complete();
    }

    fn invalidate_global(&self, va: VA) {
        // SAFETY: as above.
        unsafe { asm!("tlbi vaae1is, {}", in(reg) all_asids_operand(va), options(nostack)) };
        tlbi_complete();
    }

    fn icache_sync_range(&self, va: VA, len: usize) {
        sync_icache_range(va.value(), len);
    }
}
