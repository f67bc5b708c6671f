//! ARM64 (AArch64) page table implementation
//!
//! Implements 4-level page tables with 4KB granule:
//! - L0: 512GB per entry (table only)
//! - L1: 1GB per entry (table or block)
//! - L2: 2MB per entry (table or block)
//! - L3: 4KB per entry (page only)

pub mod descriptors;
pub mod mapping;
pub mod tables;
pub mod walk;

pub use descriptors::{Decoded, Level, Pte, PteKind};
pub use mapping::map_range;
pub use tables::{PageTable, PteSlot};
pub use walk::{ensure_path, ensure_path_to, lookup, release_tables};
