//! # pmap-common
//!
//! Shared constants and types for the pmap crates.
//!
//! - [`memory`]: page geometry and the physical memory segment map handed
//!   over by early boot
//! - [`layout`]: the fixed virtual address layout (user half, direct map,
//!   kernel VM window, devmap window)
//!
//! # no_std
//!
//! This crate is `#![no_std]` and has zero dependencies so every other
//! pmap crate can build on it.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod layout;
pub mod memory;

pub use memory::{PhysMemoryMap, PhysSegment, SegmentType};
