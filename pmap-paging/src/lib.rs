//! Paging - Type-safe page table abstractions
//!
//! AArch64 translation tables for a 4KB granule and 48-bit virtual
//! addresses, as consumed by the pmap layer.
//!
//! # Architecture
//!
//! - `address`: Typed physical and virtual addresses (`PA`, `VA`, `TPA<T>`, `TVA<T>`)
//! - `region`: Memory region abstractions with alignment helpers
//! - `permissions`: Logical protections and the attribute set a leaf entry carries
//! - `traits`: Frame allocator and physical window capabilities, mapping errors
//! - `arena`: Simulated physical memory (frames keyed by page index)
//! - `arch::arm64`: Descriptor codec, atomic tables, walker and greedy mapper
//!
//! # Reaching table memory
//!
//! Tables are never reached through a global physical-to-virtual offset.
//! Every walk takes a [`PhysWindow`] that turns a table's physical address
//! into a reference: the kernel direct map on hardware, a [`FrameArena`]
//! on the host.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod address;
pub mod arena;
pub mod permissions;
pub mod region;
pub mod traits;

pub mod arch;

pub use address::{Address, MemKind, PA, Physical, TPA, TVA, VA, Virtual};
pub use arch::arm64::{
    Decoded, Level, PageTable, Pte, PteKind, PteSlot, ensure_path, ensure_path_to, lookup, map_range,
    release_tables,
};
pub use arena::FrameArena;
pub use permissions::{MemoryType, Prot, PteAttrs};
pub use region::{MemoryRegion, PhysMemoryRegion, VirtMemoryRegion};
pub use traits::{FrameAllocator, MapAttributes, MapError, PhysWindow};

/// Page size constant (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page shift for the 4KB granule
pub const PAGE_SHIFT: usize = 12;

/// Number of entries per page table (512 for 4KB granule)
pub const ENTRIES_PER_TABLE: usize = 512;

const _: () = assert!(PAGE_SIZE.is_power_of_two(), "PAGE_SIZE must be a power of two");
const _: () = assert!(PAGE_SIZE == pmap_common::memory::page::SIZE_4K);
const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE, "PAGE_SHIFT must match PAGE_SIZE");
const _: () = assert!(ENTRIES_PER_TABLE == 512, "4KB granule requires 512 entries per table");
const _: () = assert!(
    ENTRIES_PER_TABLE * core::mem::size_of::<u64>() == PAGE_SIZE,
    "a table must fill exactly one page"
);
