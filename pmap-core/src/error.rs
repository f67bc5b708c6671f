//! Error types for pmap operations

use pmap_paging::MapError;

/// Errors returned by pmap operations
///
/// All of them are local failures returned to the immediate caller. A
/// fault the fixup cannot resolve is not an error; `fault_fixup` simply
/// returns `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "pmap errors must be handled"]
pub enum PmapError {
    /// A page for a table (or a pmap root) could not be allocated
    OutOfMemory,
    /// A block mapping is in the way of a finer-grained operation
    TypeConflict,
    /// The address is already mapped
    AlreadyMapped,
    /// Address outside the legal range of the address space
    InvalidAddress,
    /// Address or size not page-aligned
    NotAligned,
    /// No mapping at the address
    NotMapped,
    /// The pmap is still active on some CPU
    StillActive,
    /// The pmap is not active on the current CPU
    NotActive,
    /// No free kernel virtual address range of the requested size
    KvaExhausted,
    /// A fault probe hit a fault
    BadAddress,
    /// The device map registry was already installed
    AlreadyRegistered,
}

impl core::fmt::Display for PmapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory for page tables"),
            Self::TypeConflict => write!(f, "block mapping in the way"),
            Self::AlreadyMapped => write!(f, "address already mapped"),
            Self::InvalidAddress => write!(f, "address outside the address space"),
            Self::NotAligned => write!(f, "address not page-aligned"),
            Self::NotMapped => write!(f, "address not mapped"),
            Self::StillActive => write!(f, "pmap still active on a CPU"),
            Self::NotActive => write!(f, "pmap not active on this CPU"),
            Self::KvaExhausted => write!(f, "kernel virtual address space exhausted"),
            Self::BadAddress => write!(f, "probe faulted"),
            Self::AlreadyRegistered => write!(f, "device map already registered"),
        }
    }
}

impl From<MapError> for PmapError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::OutOfMemory => Self::OutOfMemory,
            MapError::TypeConflict => Self::TypeConflict,
            MapError::AlreadyMapped => Self::AlreadyMapped,
            MapError::NotAligned | MapError::SizeMismatch => Self::NotAligned,
        }
    }
}
