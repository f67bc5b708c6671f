//! # pmap-core
//!
//! The machine-dependent physical map layer for AArch64: everything that
//! owns translation tables and keeps the TLB coherent with them.
//!
//! - [`pmap`]: address space objects (kernel and user) and their lifecycle
//! - [`system`]: [`PmapSystem`], the explicitly constructed handle every
//!   operation goes through (kernel pmap, ASIDs, devmap, KVA, pv records)
//! - [`bootstrap`]: boot-time page stealing and kernel table growth
//! - [`fixup`]: access-flag and dirty-bit emulation on permission faults
//! - [`context`]: activation/deactivation of user address spaces
//! - [`icache`]: instruction cache synchronisation for code pages
//! - [`asid`]: ASID allocation with generation-based reuse
//! - [`devmap`]: static device mapping registry
//! - [`directmap`]: the linear map of physical RAM
//! - [`pv`]: reverse mappings and referenced/modified tracking
//! - [`kva`]: kernel virtual address range allocator
//! - [`fault`]: access types and per-CPU fault probe buffers
//! - [`hal`]: the MMU capability this crate is driven through
//!
//! # Concurrency
//!
//! A user pmap is mutated only under its own lock. The active-CPU set and
//! the ASID cell are atomics, updated without that lock. PTEs are atomic
//! words changed by single store/swap/compare-exchange operations, each
//! followed by a store barrier before any TLB invalidation.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod asid;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod devmap;
pub mod directmap;
pub mod error;
pub mod fault;
pub mod fixup;
pub mod hal;
pub mod icache;
pub mod kva;
pub mod pmap;
pub mod pv;
pub mod system;

#[cfg(any(test, feature = "soft-mmu"))]
pub mod soft;


pub use asid::Asid;
pub use config::PmapConfig;
pub use devmap::{DevmapEntry, DevmapFlags};
pub use directmap::DirectMap;
pub use error::PmapError;
pub use fault::AccessType;
pub use hal::Mmu;
pub use pmap::{EnterFlags, Pmap, PmapKind};
pub use system::PmapSystem;
