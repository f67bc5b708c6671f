//! Address space objects
//!
//! A [`Pmap`] owns a root translation table and everything reachable from
//! it, plus the bookkeeping needed to run on a CPU: its ASID and the set
//! of CPUs it is active on.
//!
//! Lifecycle:
//!
//! ```text
//! create ──> eligible ──activate(cpu)──> active on cpu
//!               ^                             │
//!               └─────────deactivate(cpu)─────┘
//! eligible ──destroy (active set empty)──> gone
//! ```
//!
//! The kernel pmap is built once by bootstrap around the root table boot
//! code loaded into TTBR1, and is never destroyed.

use core::sync::atomic::{AtomicU64, Ordering};

use pmap_paging::{MemoryType, PA, VA};
use spin::{Mutex, MutexGuard};

use crate::asid::AsidCell;
use crate::fault::AccessType;

/// Which half of the address space a pmap translates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PmapKind {
    /// Upper half through TTBR1, shared by every CPU
    Kernel,
    /// Lower half through TTBR0, ASID-tagged
    User,
}

/// Set of CPUs, one bit each
///
/// Updated with atomic bit operations, never under the pmap lock.
#[derive(Debug, Default)]
pub struct CpuSet(AtomicU64);

impl CpuSet {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns `true` if the CPU was not already present
    #[inline]
    pub fn insert(&self, cpu: usize) -> bool {
        self.0.fetch_or(1 << cpu, Ordering::AcqRel) & (1 << cpu) == 0
    }

    /// Returns `true` if the CPU was present
    #[inline]
    pub fn remove(&self, cpu: usize) -> bool {
        self.0.fetch_and(!(1 << cpu), Ordering::AcqRel) & (1 << cpu) != 0
    }

    #[inline]
    pub fn contains(&self, cpu: usize) -> bool {
        self.0.load(Ordering::Acquire) & (1 << cpu) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }

    #[inline]
    pub fn bits(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters kept under the pmap lock
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PmapStats {
    /// Valid leaf entries
    pub resident: usize,
    /// Wired leaf entries
    pub wired: usize,
}

/// Options for entering a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnterFlags {
    /// Never reclaimed; counted in `PmapStats::wired`
    pub wired: bool,
    /// The access that caused the mapping, if any. It pre-arms the
    /// access flag (and hardware write access for a write) so the same
    /// access does not fault again.
    pub access: Option<AccessType>,
    pub mem_type: MemoryType,
    /// Skip reverse mapping records even for managed pages
    pub unmanaged: bool,
}

impl EnterFlags {
    pub const fn new() -> Self {
        Self {
            wired: false,
            access: None,
            mem_type: MemoryType::Normal,
            unmanaged: false,
        }
    }

    #[must_use]
    pub const fn wired(mut self) -> Self {
        self.wired = true;
        self
    }

    #[must_use]
    pub const fn access(mut self, access: AccessType) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub const fn mem_type(mut self, mem_type: MemoryType) -> Self {
        self.mem_type = mem_type;
        self
    }

    #[must_use]
    pub const fn unmanaged(mut self) -> Self {
        self.unmanaged = true;
        self
    }
}

/// An address space
#[derive(Debug)]
pub struct Pmap {
    kind: PmapKind,
    root: PA,
    pub(crate) asid: AsidCell,
    pub(crate) active: CpuSet,
    lock: Mutex<PmapStats>,
}

impl Pmap {
    pub(crate) fn new(kind: PmapKind, root: PA) -> Self {
        Self {
            kind,
            root,
            asid: AsidCell::new(),
            active: CpuSet::new(),
            lock: Mutex::new(PmapStats::default()),
        }
    }

    #[inline]
    pub fn kind(&self) -> PmapKind {
        self.kind
    }

    #[inline]
    pub fn is_kernel(&self) -> bool {
        self.kind == PmapKind::Kernel
    }

    /// Physical address of the root (L0) table
    #[inline]
    pub fn root(&self) -> PA {
        self.root
    }

    /// Bitset of CPUs this pmap is active on
    #[inline]
    pub fn active_cpus(&self) -> u64 {
        self.active.bits()
    }

    #[inline]
    pub fn is_active_on(&self, cpu: usize) -> bool {
        self.active.contains(cpu)
    }

    /// Whether `va` belongs to the half this pmap translates
    #[inline]
    pub fn owns(&self, va: VA) -> bool {
        match self.kind {
            PmapKind::Kernel => va.is_kernel(),
            PmapKind::User => va.is_user(),
        }
    }

    pub fn stats(&self) -> PmapStats {
        *self.lock.lock()
    }

    /// Take the pmap lock; every PTE mutation happens under it
    pub(crate) fn lock(&self) -> MutexGuard<'_, PmapStats> {
        self.lock.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_set() {
        let set = CpuSet::new();
        assert!(set.is_empty());
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(63));
        assert!(set.contains(63));
        assert_eq!(set.bits(), (1 << 63) | (1 << 3));
        assert!(set.remove(3));
        assert!(!set.remove(3));
        assert!(set.remove(63));
        assert!(set.is_empty());
    }

    #[test]
    fn test_owns_matches_half() {
        let k = Pmap::new(PmapKind::Kernel, PA::new(0x1000));
        let u = Pmap::new(PmapKind::User, PA::new(0x2000));
        assert!(k.owns(VA::new(0xFFFF_FFC0_0000_0000)));
        assert!(!k.owns(VA::new(0x40_0000)));
        assert!(u.owns(VA::new(0x40_0000)));
        assert!(!u.owns(VA::new(0xFFFF_FFC0_0000_0000)));
    }
}
