//! Typed physical and virtual addresses
//!
//! Provides compile-time distinction between physical and virtual addresses,
//! with optional type parameter for additional semantic information.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Add, Sub};

use pmap_common::layout;

use crate::{ENTRIES_PER_TABLE, PAGE_SHIFT, PAGE_SIZE};

/// Marker trait for address kinds (physical or virtual)
pub trait MemKind: private::Sealed + Copy + Clone {}

/// Physical address space marker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Physical;

/// Virtual address space marker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Virtual;

impl MemKind for Physical {}
impl MemKind for Virtual {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Physical {}
    impl Sealed for super::Virtual {}
}

/// A typed address in either physical or virtual address space
///
/// The `K` parameter determines whether this is a physical or virtual address.
/// The `T` parameter can be used to associate the address with a specific type
/// (e.g., `TPA<PageTable>` for the physical address of a translation table).
#[repr(transparent)]
pub struct Address<K: MemKind, T = ()> {
    value: u64,
    _kind: PhantomData<K>,
    _type: PhantomData<T>,
}

/// Untyped physical address
pub type PA = Address<Physical, ()>;

/// Untyped virtual address
pub type VA = Address<Virtual, ()>;

/// Typed physical address (associated with type T)
pub type TPA<T> = Address<Physical, T>;

/// Typed virtual address (associated with type T)
pub type TVA<T> = Address<Virtual, T>;

// Manual impls so that `T` needs none of these traits itself.
impl<K: MemKind, T> Clone for Address<K, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: MemKind, T> Copy for Address<K, T> {}

impl<K: MemKind, T> PartialEq for Address<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<K: MemKind, T> Eq for Address<K, T> {}

impl<K: MemKind, T> PartialOrd for Address<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: MemKind, T> Ord for Address<K, T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<K: MemKind, T> core::hash::Hash for Address<K, T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<K: MemKind, T> Address<K, T> {
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _kind: PhantomData,
            _type: PhantomData,
        }
    }

    /// Create a null (zero) address
    #[inline]
    pub const fn null() -> Self {
        Self::new(0)
    }

    /// Get the raw address value
    #[inline]
    pub const fn value(self) -> u64 {
        self.value
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.value == 0
    }

    /// Check if address is aligned to `align` bytes (a power of two)
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.value & (align - 1) == 0
    }

    /// Check if address is page-aligned (4KB)
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.is_aligned(PAGE_SIZE as u64)
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        Self::new(self.value & !(align - 1))
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u64) -> Self {
        Self::new((self.value + align - 1) & !(align - 1))
    }

    /// `align_up` that reports wrapping past the top of the address space
    #[inline]
    pub const fn checked_align_up(self, align: u64) -> Option<Self> {
        match self.value.checked_add(align - 1) {
            Some(v) => Some(Self::new(v & !(align - 1))),
            None => None,
        }
    }

    #[inline]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.value.checked_add(rhs) {
            Some(v) => Some(Self::new(v)),
            None => None,
        }
    }

    /// Align address down to page boundary
    #[inline]
    #[must_use]
    pub const fn page_align_down(self) -> Self {
        self.align_down(PAGE_SIZE as u64)
    }

    /// Align address up to page boundary
    #[inline]
    #[must_use]
    pub const fn page_align_up(self) -> Self {
        self.align_up(PAGE_SIZE as u64)
    }

    /// Get the page offset (lower 12 bits)
    #[inline]
    pub const fn page_offset(self) -> usize {
        (self.value & (PAGE_SIZE as u64 - 1)) as usize
    }

    /// Add an offset to this address
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self::new(self.value + offset)
    }

    /// Convert to an untyped address (remove type parameter)
    #[inline]
    #[must_use]
    pub const fn to_untyped(self) -> Address<K, ()> {
        Address::new(self.value)
    }

    /// Cast to a differently typed address
    #[inline]
    #[must_use]
    pub const fn cast<U>(self) -> Address<K, U> {
        Address::new(self.value)
    }
}

impl<T> Address<Physical, T> {
    /// Physical frame number
    #[inline]
    pub const fn pfn(self) -> u64 {
        self.value >> PAGE_SHIFT
    }

    #[inline]
    pub const fn from_pfn(pfn: u64) -> Self {
        Self::new(pfn << PAGE_SHIFT)
    }
}

impl<T> Address<Virtual, T> {
    /// Table index selected by this address at a level with the given shift
    #[inline]
    pub const fn table_index(self, shift: usize) -> usize {
        ((self.value >> shift) as usize) & (ENTRIES_PER_TABLE - 1)
    }

    #[inline]
    pub const fn is_user(self) -> bool {
        layout::is_user_address(self.value)
    }

    #[inline]
    pub const fn is_kernel(self) -> bool {
        layout::is_kernel_address(self.value)
    }

    /// Virtual page number with the sign-extension bits stripped
    #[inline]
    pub const fn vpn(self) -> u64 {
        (self.value & (layout::USER_SPACE_END - 1)) >> PAGE_SHIFT
    }

    /// Raw pointer to the memory at this address
    ///
    /// The address must be mapped for the pointer to be usable.
    #[inline]
    pub const fn as_mut_ptr<P>(self) -> *mut P {
        self.value as *mut P
    }
}

// Arithmetic operations

impl<K: MemKind, T> Add<u64> for Address<K, T> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self::new(self.value + rhs)
    }
}

impl<K: MemKind, T> Add<usize> for Address<K, T> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self::new(self.value + rhs as u64)
    }
}

impl<K: MemKind, T> Sub<u64> for Address<K, T> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: u64) -> Self::Output {
        Self::new(self.value - rhs)
    }
}

impl<K: MemKind, T> Sub for Address<K, T> {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.value - rhs.value
    }
}

// Formatting

impl<K: MemKind, T> fmt::Debug for Address<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.value)
    }
}

impl<K: MemKind, T> fmt::Display for Address<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.value)
    }
}

impl<K: MemKind, T> fmt::LowerHex for Address<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.value, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        let va = VA::new(0x20_1234);
        assert_eq!(va.page_align_down().value(), 0x20_1000);
        assert_eq!(va.page_align_up().value(), 0x20_2000);
        assert_eq!(va.align_down(0x20_0000).value(), 0x20_0000);
        assert!(!va.is_page_aligned());
        assert!(VA::new(0x4000_0000).is_aligned(1 << 30));
    }

    #[test]
    fn test_checked_arithmetic_at_the_top() {
        let va = VA::new(0xFFFF_FFFF_FFFF_F000);
        assert_eq!(va.checked_align_up(0x20_0000), None);
        assert_eq!(va.checked_align_up(0x1000), Some(va));
        assert_eq!(va.checked_add(0x1000), None);
        assert_eq!(va.checked_add(0xFFF), Some(VA::new(u64::MAX)));
    }

    #[test]
    fn test_table_index() {
        let va = VA::new(0xFFFF_FFC0_1234_5000);
        assert_eq!(va.table_index(39), 511);
        assert_eq!(va.table_index(30), 256);
        assert_eq!(va.table_index(21), 0x91);
        assert_eq!(va.table_index(12), 0x145);
        assert!(va.is_kernel());
        assert!(!va.is_user());
    }

    #[test]
    fn test_pfn_round_trip() {
        let pa = PA::new(0x8012_3000);
        assert_eq!(pa.pfn(), 0x80123);
        assert_eq!(PA::from_pfn(pa.pfn()), pa);
    }

    #[test]
    fn test_vpn_ignores_sign_extension() {
        assert_eq!(VA::new(0x0000_0000_0040_0000).vpn(), 0x400);
        assert_eq!(VA::new(0xFFFF_0000_0040_0000).vpn(), 0x400);
    }
}
