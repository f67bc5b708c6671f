//! Static device mappings
//!
//! Platform code describes the device windows that must be mapped from
//! early boot (console UART, interrupt controller, ...) as a table of
//! [`DevmapEntry`] terminated by a zero-size sentinel. The table is
//! registered once, before secondary CPUs start, and is read-only from
//! then on, so lookups take no lock.

use pmap_paging::{MemoryType, PA, PhysMemoryRegion, Prot, VA, VirtMemoryRegion};
use spin::Once;

use crate::error::PmapError;

/// Mapping flags of a device window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DevmapFlags(u32);

impl DevmapFlags {
    /// Device-nGnRE (the default)
    pub const DEVICE: Self = Self(0);
    /// Normal non-cacheable, e.g. a framebuffer
    pub const NOCACHE: Self = Self(1 << 0);
    /// Normal write-back cacheable, e.g. firmware tables
    pub const CACHED: Self = Self(1 << 1);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn mem_type(self) -> MemoryType {
        if self.0 & Self::CACHED.0 != 0 {
            MemoryType::Normal
        } else if self.0 & Self::NOCACHE.0 != 0 {
            MemoryType::NonCacheable
        } else {
            MemoryType::Device
        }
    }
}

/// One permanent device mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevmapEntry {
    pub pa: PA,
    pub va: VA,
    pub size: usize,
    pub prot: Prot,
    pub flags: DevmapFlags,
}

impl DevmapEntry {
    /// Table terminator
    pub const SENTINEL: Self = Self::new(PA::null(), VA::null(), 0, Prot::NONE, DevmapFlags::DEVICE);

    pub const fn new(pa: PA, va: VA, size: usize, prot: Prot, flags: DevmapFlags) -> Self {
        Self {
            pa,
            va,
            size,
            prot,
            flags,
        }
    }

    #[inline]
    pub const fn phys(&self) -> PhysMemoryRegion {
        PhysMemoryRegion::new(self.pa, self.size)
    }

    #[inline]
    pub const fn virt(&self) -> VirtMemoryRegion {
        VirtMemoryRegion::new(self.va, self.size)
    }
}

/// The registered device map
pub struct DevmapRegistry {
    table: Once<&'static [DevmapEntry]>,
}

impl DevmapRegistry {
    pub const fn new() -> Self {
        Self { table: Once::new() }
    }

    /// Install the table. Entries past the first zero-size one are ignored.
    pub fn register(&self, table: &'static [DevmapEntry]) -> Result<(), PmapError> {
        let end = table.iter().position(|e| e.size == 0).unwrap_or(table.len());
        let mut installed = false;
        self.table.call_once(|| {
            installed = true;
            &table[..end]
        });
        if !installed {
            return Err(PmapError::AlreadyRegistered);
        }
        for e in self.entries() {
            log::info!(
                "devmap: {:#x}..{:#x} -> {} ({:?})",
                e.pa.value(),
                e.pa.value() + e.size as u64,
                e.va,
                e.flags.mem_type()
            );
        }
        Ok(())
    }

    /// Registered entries (empty before `register`)
    #[inline]
    pub fn entries(&self) -> &'static [DevmapEntry] {
        self.table.get().copied().unwrap_or(&[])
    }

    /// Entry whose virtual range fully contains `[va, va + size)`
    ///
    /// A zero `size` asks about the single byte at `va`.
    pub fn find_by_va(&self, va: VA, size: usize) -> Option<&'static DevmapEntry> {
        let want = VirtMemoryRegion::new(va, size.max(1));
        self.entries().iter().find(|e| e.virt().contains(&want))
    }

    /// Entry whose physical range fully contains `[pa, pa + size)`
    pub fn find_by_pa(&self, pa: PA, size: usize) -> Option<&'static DevmapEntry> {
        let want = PhysMemoryRegion::new(pa, size.max(1));
        self.entries().iter().find(|e| e.phys().contains(&want))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TABLE: [DevmapEntry; 3] = [
        DevmapEntry::new(
            PA::new(0x0900_0000),
            VA::new(0xFFFF_FFFE_0000_0000),
            0x1000,
            Prot::READ_WRITE,
            DevmapFlags::DEVICE,
        ),
        DevmapEntry::new(
            PA::new(0x0800_0000),
            VA::new(0xFFFF_FFFE_0020_0000),
            0x20_0000,
            Prot::READ_WRITE,
            DevmapFlags::DEVICE,
        ),
        DevmapEntry::SENTINEL,
    ];

    #[test]
    fn test_lookup_requires_full_containment() {
        let reg = DevmapRegistry::new();
        assert!(reg.find_by_pa(PA::new(0x0900_0000), 4).is_none());
        reg.register(&TABLE).unwrap();
        assert_eq!(reg.entries().len(), 2);

        let uart = reg.find_by_pa(PA::new(0x0900_0010), 4).unwrap();
        assert_eq!(uart.va.value(), 0xFFFF_FFFE_0000_0000);
        assert!(reg.find_by_pa(PA::new(0x0900_0ff0), 0x20).is_none());

        let gic = reg.find_by_va(VA::new(0xFFFF_FFFE_0030_0000), 0x1000).unwrap();
        assert_eq!(gic.pa.value(), 0x0800_0000);
        assert!(reg.find_by_va(VA::new(0xFFFF_FFFE_0010_0000), 0x1000).is_none());
        assert!(reg.find_by_va(VA::new(0xFFFF_FFFE_0000_0800), 0).is_some());
    }

    #[test]
    fn test_register_once() {
        let reg = DevmapRegistry::new();
        reg.register(&TABLE).unwrap();
        assert_eq!(reg.register(&TABLE), Err(PmapError::AlreadyRegistered));
    }

    #[test]
    fn test_flags_select_memory_type() {
        assert_eq!(DevmapFlags::DEVICE.mem_type(), MemoryType::Device);
        assert_eq!(DevmapFlags::NOCACHE.mem_type(), MemoryType::NonCacheable);
        assert_eq!(DevmapFlags::CACHED.mem_type(), MemoryType::Normal);
    }
}
