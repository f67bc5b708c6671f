//! # pmap-arch
//!
//! AArch64 support for pmap-core:
//! - [`mmu`]: [`Aarch64Mmu`], the system register implementation of the
//!   MMU capability (aarch64 targets only)
//! - [`tlbi`]: TLBI operand encoding
//! - [`cache`]: CTR_EL0 decoding and instruction cache maintenance
//! - [`fault`]: abort syndrome decoding and dispatch to the fixup
//!
//! # Safety
//!
//! The hardware backend is `unsafe` to construct: it assumes EL1 with the
//! MMU on and TTBR1/TCR_EL1 programmed by boot code. Every `unsafe` block
//! carries a `// SAFETY:` comment.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod cache;
pub mod fault;
#[cfg(target_arch = "aarch64")]
pub mod mmu;
pub mod tlbi;

pub use fault::{Abort, AbortKind, Resolution, classify_abort, resolve_abort};
#[cfg(target_arch = "aarch64")]
pub use mmu::Aarch64Mmu;
