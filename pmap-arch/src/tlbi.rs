//! TLBI operand encoding
//!
//! The register operand of the by-ASID and by-VA TLB invalidations:
//! ASID in bits [63:48], VA[55:12] in bits [43:0].

use pmap_core::Asid;
use pmap_paging::VA;

const ASID_SHIFT: u32 = 48;
const VA_MASK: u64 = (1 << 44) - 1;

/// Operand of `tlbi aside1is`
#[inline]
pub const fn asid_operand(asid: Asid) -> u64 {
    (asid.value() as u64) << ASID_SHIFT
}

/// Operand of `tlbi vae1is`: one page under one ASID
#[inline]
pub const fn va_operand(asid: Asid, va: VA) -> u64 {
    asid_operand(asid) | page_bits(va)
}

/// Operand of `tlbi vaae1is`: one page under every ASID
#[inline]
pub const fn all_asids_operand(va: VA) -> u64 {
    page_bits(va)
}

const fn page_bits(va: VA) -> u64 {
    (va.value() >> 12) & VA_MASK
}
