//! Virtual Address Layout
//!
//! Fixed layout of the 48-bit address space:
//!
//! ```text
//! 0x0000_0000_0000_0000 - 0x0000_FFFF_FFFF_FFFF   user space (TTBR0, ASID-tagged)
//! 0xFFFF_0000_0000_0000 - 0xFFFF_007F_FFFF_FFFF   direct map of physical RAM
//! 0xFFFF_FFC0_0000_0000 - 0xFFFF_FFFD_FFFF_FFFF   kernel VM (grown on demand)
//! 0xFFFF_FFFE_0000_0000 - 0xFFFF_FFFE_FFFF_FFFF   static device mappings
//! 0xFFFF_FFFF_0000_0000 - 0xFFFF_FFFF_FFFF_FFFF   kernel image
//! ```

/// Number of implemented virtual address bits
pub const VA_BITS: u32 = 48;

/// First user address
pub const USER_SPACE_START: u64 = 0;

/// End of user space (exclusive)
pub const USER_SPACE_END: u64 = 1 << VA_BITS;

/// Start of the kernel half (TTBR1)
pub const KERNEL_SPACE_START: u64 = !((1 << VA_BITS) - 1);

/// Base of the linear map of all physical RAM
pub const DIRECT_MAP_BASE: u64 = 0xFFFF_0000_0000_0000;

/// Size of the direct map window (one L0 entry)
pub const DIRECT_MAP_SIZE: u64 = 1 << 39;

/// Start of the dynamically grown kernel VA window
pub const KERNEL_VM_BASE: u64 = 0xFFFF_FFC0_0000_0000;

/// End of the kernel VA window (exclusive)
pub const KERNEL_VM_END: u64 = 0xFFFF_FFFE_0000_0000;

/// Start of the static device mapping window
pub const DEVMAP_BASE: u64 = 0xFFFF_FFFE_0000_0000;

/// End of the static device mapping window (exclusive)
pub const DEVMAP_END: u64 = 0xFFFF_FFFF_0000_0000;

/// Kernel image base
pub const KERNEL_IMAGE_BASE: u64 = 0xFFFF_FFFF_0000_0000;

const _: () = assert!(DIRECT_MAP_BASE == KERNEL_SPACE_START);
const _: () = assert!(DIRECT_MAP_BASE + DIRECT_MAP_SIZE <= KERNEL_VM_BASE);
const _: () = assert!(KERNEL_VM_END <= DEVMAP_BASE);
const _: () = assert!(DEVMAP_END <= KERNEL_IMAGE_BASE);

/// Whether `va` lies in the user (lower) half
#[inline]
#[must_use]
pub const fn is_user_address(va: u64) -> bool {
    va < USER_SPACE_END
}

/// Whether `va` lies in the kernel (upper) half
#[inline]
#[must_use]
pub const fn is_kernel_address(va: u64) -> bool {
    va >= KERNEL_SPACE_START
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves_are_disjoint() {
        assert!(is_user_address(0));
        assert!(is_user_address(USER_SPACE_END - 1));
        assert!(!is_kernel_address(USER_SPACE_END - 1));
        assert!(is_kernel_address(DIRECT_MAP_BASE));
        assert!(!is_user_address(KERNEL_VM_BASE));
        // non-canonical hole
        assert!(!is_user_address(0x0001_0000_0000_0000));
        assert!(!is_kernel_address(0x0001_0000_0000_0000));
    }
}
