//! Direct map of physical RAM
//!
//! All of RAM is mapped once, at boot, at a constant offset in the
//! kernel half. Addresses inside that window translate by arithmetic
//! alone, with no table walk, and table pages can be reached through it.

use pmap_paging::arch::arm64::PageTable;
use pmap_paging::{PA, PhysMemoryRegion, PhysWindow, VA, VirtMemoryRegion};

/// The linear window `[va_base, va_base + size)` onto `[pa_start, pa_start + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectMap {
    va_base: VA,
    phys: PhysMemoryRegion,
}

impl DirectMap {
    pub const fn new(va_base: VA, phys: PhysMemoryRegion) -> Self {
        Self { va_base, phys }
    }

    #[inline]
    pub const fn va_base(&self) -> VA {
        self.va_base
    }

    #[inline]
    pub const fn phys(&self) -> PhysMemoryRegion {
        self.phys
    }

    #[inline]
    pub const fn virt(&self) -> VirtMemoryRegion {
        VirtMemoryRegion::new(self.va_base, self.phys.size())
    }

    /// Whether `va` lies inside the window
    #[inline]
    pub fn is_direct_mapped(&self, va: VA) -> bool {
        self.virt().contains_addr(va)
    }

    /// Whether `pa` can be reached through the window
    #[inline]
    pub fn covers_pa(&self, pa: PA) -> bool {
        self.phys.contains_addr(pa)
    }

    #[inline]
    pub fn va_to_pa(&self, va: VA) -> Option<PA> {
        self.is_direct_mapped(va)
            .then(|| self.phys.start() + (va - self.va_base))
    }

    #[inline]
    pub fn pa_to_va(&self, pa: PA) -> Option<VA> {
        self.covers_pa(pa)
            .then(|| self.va_base + (pa - self.phys.start()))
    }
}

/// Reaches physical pages through an established direct map
pub struct DirectMapWindow {
    map: DirectMap,
}

impl DirectMapWindow {
    /// # Safety
    ///
    /// `map` must describe a mapping that is live in the kernel tables
    /// for as long as the window is used, with normal cacheable memory
    /// behind every page in it.
    pub const unsafe fn new(map: DirectMap) -> Self {
        Self { map }
    }
}

// SAFETY: `new` requires the window to be live; every covered PA has
// exactly one direct-map alias.
unsafe impl PhysWindow for DirectMapWindow {
    fn table(&self, pa: PA) -> &PageTable {
        let Some(va) = self.map.pa_to_va(pa.page_align_down()) else {
            panic!("{pa:?} is outside the direct map");
        };
        // SAFETY: the page is mapped read-write at `va` and a PageTable
        // is exactly one page of atomics, valid for any bit pattern.
        unsafe { &*va.as_mut_ptr::<PageTable>() }
    }

    fn covers(&self, pa: PA) -> bool {
        self.map.covers_pa(pa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm() -> DirectMap {
        DirectMap::new(
            VA::new(0xFFFF_0000_0000_0000),
            PhysMemoryRegion::from_raw(0x4000_0000, 0x4000_0000),
        )
    }

    #[test]
    fn test_translation_is_arithmetic() {
        let m = dm();
        assert_eq!(
            m.pa_to_va(PA::new(0x4000_1234)),
            Some(VA::new(0xFFFF_0000_0000_1234))
        );
        assert_eq!(
            m.va_to_pa(VA::new(0xFFFF_0000_3FFF_F000)),
            Some(PA::new(0x7FFF_F000))
        );
        assert_eq!(m.pa_to_va(PA::new(0x8000_0000)), None);
        assert_eq!(m.va_to_pa(VA::new(0xFFFF_0000_4000_0000)), None);
        assert!(m.is_direct_mapped(VA::new(0xFFFF_0000_0000_0000)));
    }
}
