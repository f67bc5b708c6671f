//! Instruction cache maintenance
//!
//! Making freshly written code visible to instruction fetch takes a data
//! cache clean to the point of unification followed by an instruction
//! cache invalidate, each by line. CTR_EL0 gives the line sizes and says
//! when either half can be skipped (IDC, DIC).

/// Decoded CTR_EL0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheType(u64);

impl CacheType {
    pub const fn from_raw(ctr: u64) -> Self {
        Self(ctr)
    }

    /// Smallest data cache line in bytes (DminLine is log2 of words)
    #[inline]
    pub const fn dcache_line(self) -> usize {
        4 << ((self.0 >> 16) & 0xF)
    }

    /// Smallest instruction cache line in bytes
    #[inline]
    pub const fn icache_line(self) -> usize {
        4 << (self.0 & 0xF)
    }

    /// Data cache clean to PoU not required for instruction coherence
    #[inline]
    pub const fn idc(self) -> bool {
        self.0 & (1 << 28) != 0
    }

    /// Instruction cache invalidation not required for coherence
    #[inline]
    pub const fn dic(self) -> bool {
        self.0 & (1 << 29) != 0
    }
}

/// Start address of every `line`-byte cache line touching `[va, va + len)`
pub fn lines(va: u64, len: usize, line: usize) -> impl Iterator<Item = u64> {
    let start = va & !(line as u64 - 1);
    let end = va.saturating_add(len as u64);
    (start..end).step_by(line)
}

#[cfg(target_arch = "aarch64")]
pub fn read_cache_type() -> CacheType {
    let ctr: u64;
    // SAFETY: reading CTR_EL0 has no side effects.
    unsafe {
        core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));
    }
    CacheType(ctr)
}

/// Clean `[va, va + len)` to PoU and invalidate it from the instruction
/// cache. The range must be mapped and readable.
#[cfg(target_arch = "aarch64")]
pub fn sync_icache_range(va: u64, len: usize) {
    use core::arch::asm;

    let ctr = read_cache_type();
    if !ctr.idc() {
        for line in lines(va, len, ctr.dcache_line()) {
            // SAFETY: the caller guarantees the range is mapped.
            unsafe { asm!("dc cvau, {}", in(reg) line, options(nostack)) };
        }
    }
    // SAFETY: barriers have no memory-safety preconditions.
    unsafe { asm!("dsb ish", options(nostack)) };
    if !ctr.dic() {
        for line in lines(va, len, ctr.icache_line()) {
            // SAFETY: as above.
            unsafe { asm!("ic ivau, {}", in(reg) line, options(nostack)) };
        }
        // SAFETY: barrier.
        unsafe { asm!("dsb ish", options(nostack)) };
    }
    // SAFETY: barrier.
    unsafe { asm!("isb", options(nostack)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cortex_a53_geometry() {
        let ctr = CacheType::from_raw(0x8444_C004);
        assert_eq!(ctr.dcache_line(), 64);
        assert_eq!(ctr.icache_line(), 64);
        assert!(!ctr.idc());
        assert!(!ctr.dic());
        let coherent = CacheType::from_raw(0x8444_C004 | (1 << 28) | (1 << 29));
        assert!(coherent.idc() && coherent.dic());
    }

    #[test]
    fn test_lines_cover_unaligned_range() {
        let v: Vec<u64> = lines(0x1030, 0x20, 64).collect();
        assert_eq!(v, [0x1000, 0x1040]);
        assert_eq!(lines(0x1000, 64, 64).count(), 1);
        assert_eq!(lines(0x1000, 0, 64).count(), 0);
    }
}
