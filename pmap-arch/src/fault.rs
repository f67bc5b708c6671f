//! Abort decoding and dispatch
//!
//! The synchronous exception handler passes data and instruction aborts
//! to [`resolve_abort`]. Access flag and permission faults are offered to
//! the pmap fixup first; a kernel fault the fixup cannot resolve is then
//! checked against the fault probe armed on the current CPU. Anything
//! else goes back to the caller for full handling.

use alloc::sync::Arc;

use pmap_core::{AccessType, Mmu, PmapSystem};
use pmap_paging::{PhysWindow, VA};

/// Exception classes (ESR_EL1.EC) that carry an abort
pub mod ec {
    pub const INSTRUCTION_ABORT_LOWER: u8 = 0b100000;
    pub const INSTRUCTION_ABORT_SAME: u8 = 0b100001;
    pub const DATA_ABORT_LOWER: u8 = 0b100100;
    pub const DATA_ABORT_SAME: u8 = 0b100101;
}

/// Write not Read
pub const ISS_WNR: u64 = 1 << 6;
/// Cache maintenance operation
pub const ISS_CM: u64 = 1 << 8;
/// FAR not valid
pub const ISS_FNV: u64 = 1 << 10;

const FSC_ALIGNMENT: u8 = 0b100001;

#[inline]
pub const fn exception_class(esr: u64) -> u8 {
    ((esr >> 26) & 0x3F) as u8
}

/// Data/instruction fault status code (ISS bits [5:0])
#[inline]
pub const fn fault_status(esr: u64) -> u8 {
    (esr & 0x3F) as u8
}

/// Fault status family, with the table level where it has one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    AddressSize(u8),
    Translation(u8),
    AccessFlag(u8),
    Permission(u8),
    Alignment,
    /// External aborts, parity errors, TLB conflicts and the rest
    Other(u8),
}

impl AbortKind {
    pub const fn from_status(fsc: u8) -> Self {
        let level = fsc & 0b11;
        match fsc >> 2 {
            0b0000 => Self::AddressSize(level),
            0b0001 => Self::Translation(level),
            0b0010 => Self::AccessFlag(level),
            0b0011 => Self::Permission(level),
            _ if fsc == FSC_ALIGNMENT => Self::Alignment,
            _ => Self::Other(fsc),
        }
    }

    /// Whether arming the entry can resolve it
    #[inline]
    pub const fn is_fixable(self) -> bool {
        matches!(self, Self::AccessFlag(_) | Self::Permission(_))
    }
}

/// A decoded abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort {
    pub va: VA,
    pub access: AccessType,
    /// Taken from EL0
    pub is_user: bool,
    pub kind: AbortKind,
}

/// Decode an abort from ESR_EL1 and FAR_EL1.
///
/// Returns `None` for exception classes other than data and instruction
/// aborts, and for aborts whose FAR is not valid.
pub fn classify_abort(esr: u64, far: u64) -> Option<Abort> {
    let class = exception_class(esr);
    let (access, is_user) = match class {
        ec::INSTRUCTION_ABORT_LOWER => (AccessType::Execute, true),
        ec::INSTRUCTION_ABORT_SAME => (AccessType::Execute, false),
        ec::DATA_ABORT_LOWER | ec::DATA_ABORT_SAME => {
            // Cache maintenance reports WnR set but needs read access only.
            let write = esr & ISS_WNR != 0 && esr & ISS_CM == 0;
            let access = if write { AccessType::Write } else { AccessType::Read };
            (access, class == ec::DATA_ABORT_LOWER)
        }
        _ => return None,
    };
    if esr & ISS_FNV != 0 {
        return None;
    }
    Some(Abort {
        va: VA::new(far),
        access,
        is_user,
        kind: AbortKind::from_status(fault_status(esr)),
    })
}

/// What the exception handler should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The entry was armed; return and retry the access
    Retry,
    /// A fault probe is armed; resume past the faulting access
    Probed,
    /// Needs the full fault handler
    Unresolved(Abort),
    /// Not an abort this layer decodes
    NotAnAbort,
}

/// Try to resolve an abort on the calling CPU without the full fault
/// handler.
pub fn resolve_abort<M: Mmu, W: PhysWindow>(
    sys: &PmapSystem<M, W>,
    esr: u64,
    far: u64,
) -> Resolution {
    let Some(abort) = classify_abort(esr, far) else {
        return Resolution::NotAnAbort;
    };

    if abort.kind.is_fixable() {
        let pmap = if abort.va.is_kernel() {
            Some(Arc::clone(sys.kernel()))
        } else {
            sys.current(sys.mmu().cpu_id())
        };
        if pmap.is_some_and(|p| sys.fault_fixup(&p, abort.va, abort.access, abort.is_user)) {
            return Resolution::Retry;
        }
    }

    if !abort.is_user && sys.onfault_hit(abort.va) {
        log::trace!("abort: probe caught {:?} at {}", abort.kind, abort.va);
        return Resolution::Probed;
    }
    log::debug!(
        "abort: unresolved {:?} {:?} at {} (el0: {})",
        abort.access,
        abort.kind,
        abort.va,
        abort.is_user
    );
    Resolution::Unresolved(abort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmap_common::layout::{DIRECT_MAP_BASE, KERNEL_VM_BASE};
    use pmap_core::soft::SoftMmu;
    use pmap_core::{DirectMap, EnterFlags, PmapConfig, PmapError};
    use pmap_paging::{FrameAllocator, FrameArena, PA, PAGE_SIZE, PhysMemoryRegion, Prot};

    const RAM_BASE: u64 = 0x4000_0000;
    const FRAMES: usize = 64;
    const UVA: u64 = 0x40_0000;

    fn esr(class: u8, iss: u64) -> u64 {
        ((class as u64) << 26) | (1 << 25) | iss
    }

    fn boot() -> PmapSystem<SoftMmu, FrameArena> {
        let arena = FrameArena::new(PA::new(RAM_BASE), FRAMES);
        let root = arena.alloc_zeroed_page(true).unwrap();
        let direct_map = DirectMap::new(
            VA::new(DIRECT_MAP_BASE),
            PhysMemoryRegion::from_raw(RAM_BASE, FRAMES * PAGE_SIZE),
        );
        PmapSystem::bootstrap(
            SoftMmu::new(root, 1),
            arena,
            PmapConfig::new(direct_map),
            VA::new(KERNEL_VM_BASE),
            VA::new(KERNEL_VM_BASE + 0x100_0000),
        )
        .unwrap()
    }

    #[test]
    fn test_status_families() {
        assert_eq!(AbortKind::from_status(0b000111), AbortKind::Translation(3));
        assert_eq!(AbortKind::from_status(0b001001), AbortKind::AccessFlag(1));
        assert_eq!(AbortKind::from_status(0b001111), AbortKind::Permission(3));
        assert_eq!(AbortKind::from_status(0b000010), AbortKind::AddressSize(2));
        assert_eq!(AbortKind::from_status(0b100001), AbortKind::Alignment);
        assert_eq!(AbortKind::from_status(0b010000), AbortKind::Other(0b010000));
        assert!(AbortKind::Permission(2).is_fixable());
        assert!(!AbortKind::Translation(3).is_fixable());
    }

    #[test]
    fn test_classify_data_aborts() {
        let a = classify_abort(esr(ec::DATA_ABORT_LOWER, ISS_WNR | 0b001011), 0x1234).unwrap();
        assert_eq!(
            a,
            Abort {
                va: VA::new(0x1234),
                access: AccessType::Write,
                is_user: true,
                kind: AbortKind::AccessFlag(3),
            }
        );

        // dc civac on a read-only page
        let a = classify_abort(esr(ec::DATA_ABORT_SAME, ISS_WNR | ISS_CM | 0b001111), 0x1000)
            .unwrap();
        assert_eq!(a.access, AccessType::Read);
        assert!(!a.is_user);
        assert_eq!(a.kind, AbortKind::Permission(3));
    }

    #[test]
    fn test_classify_instruction_abort() {
        let a = classify_abort(esr(ec::INSTRUCTION_ABORT_LOWER, 0b000110), 0x40_0000).unwrap();
        assert_eq!(a.access, AccessType::Execute);
        assert!(a.is_user);
        assert_eq!(a.kind, AbortKind::Translation(2));
    }

    #[test]
    fn test_classify_rejects_non_aborts() {
        assert_eq!(classify_abort(esr(0b010101, 0), 0), None);
        assert_eq!(classify_abort(esr(ec::DATA_ABORT_LOWER, ISS_FNV | 0b000111), 0), None);
    }

    #[test]
    fn test_resolve_arms_user_page() {
        let sys = boot();
        let arena = sys.window();
        let a = sys.create(arena).unwrap();
        let pa = arena.alloc_zeroed_page(true).unwrap();
        sys.enter(&a, VA::new(UVA), pa, Prot::READ_WRITE, EnterFlags::new(), arena)
            .unwrap();

        let read_af = esr(ec::DATA_ABORT_LOWER, 0b001011);
        // Nothing runs on this CPU yet.
        assert!(matches!(
            resolve_abort(&sys, read_af, UVA + 8),
            Resolution::Unresolved(_)
        ));

        sys.activate(&a, 0);
        assert_eq!(resolve_abort(&sys, read_af, UVA + 8), Resolution::Retry);
        // Already armed for reads: a second one is a real fault.
        assert!(matches!(
            resolve_abort(&sys, read_af, UVA + 8),
            Resolution::Unresolved(_)
        ));

        let write_perm = esr(ec::DATA_ABORT_LOWER, ISS_WNR | 0b001111);
        assert_eq!(resolve_abort(&sys, write_perm, UVA), Resolution::Retry);
        assert!(sys.is_modified(pa));
    }

    #[test]
    fn test_resolve_reaches_probe() {
        let sys = boot();
        let kernel_translation = esr(ec::DATA_ABORT_SAME, 0b000111);
        let kva = KERNEL_VM_BASE + 0x5000;

        let probed = sys.probe(|| resolve_abort(&sys, kernel_translation, kva));
        assert_eq!(probed, Err(PmapError::BadAddress));

        let r = resolve_abort(&sys, kernel_translation, kva);
        assert!(matches!(r, Resolution::Unresolved(a) if a.va == VA::new(kva)));
        assert_eq!(resolve_abort(&sys, esr(0b010101, 0), 0), Resolution::NotAnAbort);
    }
}
