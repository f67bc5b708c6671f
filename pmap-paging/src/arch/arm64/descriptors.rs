//! ARM64 translation table descriptor codec
//!
//! Pure functions turning a physical address plus [`PteAttrs`] into the
//! 64-bit descriptor the table walker expects, and back.
//!
//! Descriptor format (ARMv8-A, 4KB granule):
//! ```text
//! +----+-------+-----+-----+---+------------------------+----+----+----+----+------+----+----+
//! | R  |  SW   | UXN | PXN | R | Output address [47:12] | nG | AF | SH | AP | INDX | TB | VB |
//! +----+-------+-----+-----+---+------------------------+----+----+----+----+------+----+----+
//!  63 58 57  55  54    53   52  47                   12   11   10  9  8 7  6 5    2   1    0
//! ```
//!
//! Software bits 55-57 hold the logical read/write permission and the
//! wired flag. The hardware bits (AF, AP[2]) may lag behind them; the
//! fault fixup closes the gap on first access.

use tock_registers::{
    interfaces::{ReadWriteable, Readable},
    register_bitfields,
    registers::InMemoryRegister,
};

use crate::address::{PA, VA};
use crate::permissions::{MemoryType, PteAttrs};
use pmap_common::memory::page::{SHIFT_1G, SHIFT_2M, SHIFT_4K, SHIFT_512G};

/// Output address bits [47:12] of table and page descriptors
pub const OUTPUT_ADDRESS_MASK: u64 = 0x0000_FFFF_FFFF_F000;
const L2_BLOCK_OUTPUT_MASK: u64 = 0x0000_FFFF_FFE0_0000; // bits [47:21]
const L1_BLOCK_OUTPUT_MASK: u64 = 0x0000_FFFF_C000_0000; // bits [47:30]

register_bitfields![u64,
    /// Fields shared by block, page and table descriptors
    pub DescriptorFields [
        /// Valid bit - entry is valid when set
        VALID OFFSET(0) NUMBITS(1) [],

        /// 0=Block (L1/L2 only), 1=Table (L0-L2) or Page (L3)
        TYPE OFFSET(1) NUMBITS(1) [
            Block = 0,
            TableOrPage = 1
        ],

        /// Memory attribute index into MAIR_EL1
        ATTR_INDEX OFFSET(2) NUMBITS(3) [
            Normal = 0,
            Device = 1,
            NonCacheable = 2
        ],

        /// AP[1]: accessible from EL0
        AP_EL0 OFFSET(6) NUMBITS(1) [],

        /// AP[2]: read-only at every exception level
        AP_RO OFFSET(7) NUMBITS(1) [],

        /// Shareability
        SH OFFSET(8) NUMBITS(2) [
            NonShareable = 0b00,
            OuterShareable = 0b10,
            InnerShareable = 0b11
        ],

        /// Access flag
        AF OFFSET(10) NUMBITS(1) [],

        /// Not global - translation is tagged with the current ASID
        NG OFFSET(11) NUMBITS(1) [],

        /// Privileged Execute Never
        PXN OFFSET(53) NUMBITS(1) [],

        /// Unprivileged Execute Never
        UXN OFFSET(54) NUMBITS(1) [],

        /// Software: logically readable
        OS_READ OFFSET(55) NUMBITS(1) [],

        /// Software: logically writable
        OS_WRITE OFFSET(56) NUMBITS(1) [],

        /// Software: wired mapping
        OS_WIRED OFFSET(57) NUMBITS(1) []
    ]
];

/// Single-bit masks used by the lock-free update paths
pub mod bits {
    pub const VALID: u64 = 1 << 0;
    pub const TABLE_OR_PAGE: u64 = 1 << 1;
    pub const AP_EL0: u64 = 1 << 6;
    pub const AP_RO: u64 = 1 << 7;
    pub const AF: u64 = 1 << 10;
    pub const NG: u64 = 1 << 11;
    pub const PXN: u64 = 1 << 53;
    pub const UXN: u64 = 1 << 54;
    pub const OS_READ: u64 = 1 << 55;
    pub const OS_WRITE: u64 = 1 << 56;
    pub const OS_WIRED: u64 = 1 << 57;
}

/// Translation table level for a 4KB granule
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// 512GB per entry, table only
    L0 = 0,
    /// 1GB per entry, table or block
    L1 = 1,
    /// 2MB per entry, table or block
    L2 = 2,
    /// 4KB per entry, page only
    L3 = 3,
}

impl Level {
    /// Root-to-leaf walk order
    pub const ALL: [Level; 4] = [Level::L0, Level::L1, Level::L2, Level::L3];

    /// VA shift selecting this level's index
    #[inline]
    pub const fn shift(self) -> usize {
        match self {
            Self::L0 => SHIFT_512G,
            Self::L1 => SHIFT_1G,
            Self::L2 => SHIFT_2M,
            Self::L3 => SHIFT_4K,
        }
    }

    /// Bytes covered by one entry at this level
    #[inline]
    pub const fn block_size(self) -> u64 {
        1 << self.shift()
    }

    /// Whether a terminal entry may live at this level
    #[inline]
    pub const fn supports_block(self) -> bool {
        !matches!(self, Self::L0)
    }

    #[inline]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::L0 => Some(Self::L1),
            Self::L1 => Some(Self::L2),
            Self::L2 => Some(Self::L3),
            Self::L3 => None,
        }
    }

    /// Table index of `va` at this level
    #[inline]
    pub const fn index(self, va: VA) -> usize {
        va.table_index(self.shift())
    }

    const fn output_mask(self) -> u64 {
        match self {
            Self::L0 | Self::L3 => OUTPUT_ADDRESS_MASK,
            Self::L1 => L1_BLOCK_OUTPUT_MASK,
            Self::L2 => L2_BLOCK_OUTPUT_MASK,
        }
    }
}

/// Shape of a descriptor, which depends on the level it was read from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PteKind {
    Invalid,
    /// Non-terminal, points at the next level's table
    Table,
    /// Terminal at L1/L2
    Block,
    /// Terminal at L3
    Page,
}

/// Fields extracted by [`Pte::decode`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub kind: PteKind,
    /// Output address (block/page) or next table address (table)
    pub pa: PA,
    /// Leaf attributes; `PteAttrs::NONE` for tables and invalid entries
    pub attrs: PteAttrs,
}

/// A raw translation table descriptor
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Pte(u64);

type DescReg = InMemoryRegister<u64, DescriptorFields::Register>;

impl Pte {
    pub const INVALID: Self = Self(0);

    #[inline]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Encode a terminal entry mapping `pa` at `level`.
    ///
    /// At L1/L2 this is a block descriptor, at L3 a page descriptor.
    ///
    /// # Panics
    ///
    /// If `level` is L0, or `pa` is not aligned to the level's block size,
    /// or `pa` does not fit the 48-bit output address.
    pub fn encode_block(level: Level, pa: PA, attrs: PteAttrs) -> Self {
        assert!(level.supports_block(), "L0 cannot hold a block descriptor");
        assert!(
            pa.is_aligned(level.block_size()),
            "{pa:?} is not aligned to the {:#x} block size of {level:?}",
            level.block_size()
        );
        assert!(
            pa.value() & !OUTPUT_ADDRESS_MASK == 0,
            "{pa:?} exceeds the output address range"
        );
        debug_assert!(attrs.is_legal(), "hardware-writable entry without write permission");

        let reg = DescReg::new(pa.value());
        let ty = if level == Level::L3 {
            DescriptorFields::TYPE::TableOrPage
        } else {
            DescriptorFields::TYPE::Block
        };
        let sh = match attrs.mem_type {
            MemoryType::Device => DescriptorFields::SH::NonShareable,
            MemoryType::Normal | MemoryType::NonCacheable => DescriptorFields::SH::InnerShareable,
        };
        // Executable user pages are PXN, executable kernel pages are UXN.
        let (uxn, pxn) = match (attrs.execute, attrs.user) {
            (false, _) => (true, true),
            (true, true) => (false, true),
            (true, false) => (true, false),
        };

        reg.modify(
            DescriptorFields::VALID::SET
                + ty
                + DescriptorFields::ATTR_INDEX.val(attrs.mem_type.attr_index())
                + DescriptorFields::AP_EL0.val(attrs.user as u64)
                + DescriptorFields::AP_RO.val(!attrs.dirty as u64)
                + sh
                + DescriptorFields::AF.val(attrs.accessed as u64)
                + DescriptorFields::NG.val(!attrs.global as u64)
                + DescriptorFields::PXN.val(pxn as u64)
                + DescriptorFields::UXN.val(uxn as u64)
                + DescriptorFields::OS_READ.val(attrs.read as u64)
                + DescriptorFields::OS_WRITE.val(attrs.write as u64)
                + DescriptorFields::OS_WIRED.val(attrs.wired as u64),
        );
        Self(reg.get())
    }

    /// Encode a non-terminal entry pointing at the table at `pa`.
    ///
    /// # Panics
    ///
    /// If `pa` is not page-aligned or exceeds the output address range.
    pub fn encode_table(pa: PA) -> Self {
        assert!(pa.is_page_aligned(), "table address {pa:?} is not page-aligned");
        assert!(
            pa.value() & !OUTPUT_ADDRESS_MASK == 0,
            "{pa:?} exceeds the output address range"
        );
        Self(pa.value() | bits::VALID | bits::TABLE_OR_PAGE)
    }

    /// Classify this descriptor as read from a table at `level`
    #[inline]
    pub const fn kind(self, level: Level) -> PteKind {
        match (self.0 & 0b11, level) {
            (0b11, Level::L3) => PteKind::Page,
            (0b11, _) => PteKind::Table,
            (0b01, Level::L1 | Level::L2) => PteKind::Block,
            _ => PteKind::Invalid,
        }
    }

    pub fn decode(self, level: Level) -> Decoded {
        match self.kind(level) {
            PteKind::Invalid => Decoded {
                kind: PteKind::Invalid,
                pa: PA::null(),
                attrs: PteAttrs::NONE,
            },
            PteKind::Table => Decoded {
                kind: PteKind::Table,
                pa: self.table_address(),
                attrs: PteAttrs::NONE,
            },
            kind => Decoded {
                kind,
                pa: PA::new(self.0 & level.output_mask()),
                attrs: self.attrs(),
            },
        }
    }

    /// Leaf attributes of a block or page descriptor
    pub fn attrs(self) -> PteAttrs {
        let reg = DescReg::new(self.0);
        let user = reg.is_set(DescriptorFields::AP_EL0);
        let execute = if user {
            !reg.is_set(DescriptorFields::UXN)
        } else {
            !reg.is_set(DescriptorFields::PXN)
        };
        PteAttrs {
            read: reg.is_set(DescriptorFields::OS_READ),
            write: reg.is_set(DescriptorFields::OS_WRITE),
            execute,
            user,
            global: !reg.is_set(DescriptorFields::NG),
            mem_type: MemoryType::from_attr_index(reg.read(DescriptorFields::ATTR_INDEX))
                .unwrap_or(MemoryType::Device),
            accessed: reg.is_set(DescriptorFields::AF),
            dirty: !reg.is_set(DescriptorFields::AP_RO),
            wired: reg.is_set(DescriptorFields::OS_WIRED),
        }
    }

    /// Next-level table address of a table descriptor
    #[inline]
    pub const fn table_address(self) -> PA {
        PA::new(self.0 & OUTPUT_ADDRESS_MASK)
    }

    /// Output address of a terminal descriptor at `level`
    #[inline]
    pub const fn output_address(self, level: Level) -> PA {
        PA::new(self.0 & level.output_mask())
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 & bits::VALID != 0
    }

    /// Valid and the hardware will satisfy a read without faulting
    #[inline]
    pub const fn is_readable(self) -> bool {
        self.is_valid() && self.0 & bits::AF != 0
    }

    /// Valid and the hardware will satisfy a write without faulting
    #[inline]
    pub const fn is_writable(self) -> bool {
        self.is_readable() && self.0 & bits::AP_RO == 0
    }

    #[inline]
    pub const fn is_table(self, level: Level) -> bool {
        matches!(self.kind(level), PteKind::Table)
    }

    /// Block or page descriptor
    #[inline]
    pub const fn is_leaf(self, level: Level) -> bool {
        matches!(self.kind(level), PteKind::Block | PteKind::Page)
    }

    #[inline]
    pub const fn accessed(self) -> bool {
        self.0 & bits::AF != 0
    }

    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 & bits::AP_EL0 != 0
    }

    #[inline]
    pub const fn is_global(self) -> bool {
        self.0 & bits::NG == 0
    }

    #[inline]
    pub const fn os_read(self) -> bool {
        self.0 & bits::OS_READ != 0
    }

    #[inline]
    pub const fn os_write(self) -> bool {
        self.0 & bits::OS_WRITE != 0
    }

    #[inline]
    pub const fn is_wired(self) -> bool {
        self.0 & bits::OS_WIRED != 0
    }

    /// Whether an instruction fetch from EL0 (`user`) or EL1 may execute
    #[inline]
    pub const fn executable_at(self, user: bool) -> bool {
        if user {
            self.0 & bits::UXN == 0
        } else {
            self.0 & bits::PXN == 0
        }
    }

    #[inline]
    #[must_use]
    pub const fn with_set(self, mask: u64) -> Self {
        Self(self.0 | mask)
    }

    #[inline]
    #[must_use]
    pub const fn with_clear(self, mask: u64) -> Self {
        Self(self.0 & !mask)
    }
}

impl core::fmt::Debug for Pte {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_valid() {
            write!(f, "Pte({:#018x})", self.0)
        } else {
            write!(f, "Pte::Invalid")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Prot;

    fn attrs_from_bits(n: u32, mem_type: MemoryType) -> PteAttrs {
        PteAttrs {
            read: n & 1 != 0,
            write: n & 2 != 0,
            execute: n & 4 != 0,
            user: n & 8 != 0,
            global: n & 16 != 0,
            mem_type,
            accessed: n & 32 != 0,
            dirty: n & 64 != 0,
            wired: n & 128 != 0,
        }
    }

    #[test]
    fn test_round_trip_all_legal_attributes() {
        let cases = [
            (Level::L1, PA::new(0x4000_0000)),
            (Level::L2, PA::new(0x8020_0000)),
            (Level::L3, PA::new(0x8020_3000)),
        ];
        for (level, pa) in cases {
            for mem_type in [MemoryType::Normal, MemoryType::NonCacheable, MemoryType::Device] {
                for n in 0..256 {
                    let attrs = attrs_from_bits(n, mem_type);
                    if !attrs.is_legal() {
                        continue;
                    }
                    let d = Pte::encode_block(level, pa, attrs).decode(level);
                    let kind = if level == Level::L3 { PteKind::Page } else { PteKind::Block };
                    assert_eq!(d, Decoded { kind, pa, attrs }, "{level:?} {attrs:?}");
                }
            }
        }
    }

    #[test]
    fn test_table_round_trip() {
        let pa = PA::new(0x8123_4000);
        let pte = Pte::encode_table(pa);
        for level in [Level::L0, Level::L1, Level::L2] {
            let d = pte.decode(level);
            assert_eq!(d.kind, PteKind::Table);
            assert_eq!(d.pa, pa);
        }
        // The same bit pattern is a page at L3.
        assert_eq!(pte.kind(Level::L3), PteKind::Page);
    }

    #[test]
    fn test_kernel_page_bit_layout() {
        let pte = Pte::encode_block(
            Level::L3,
            PA::new(0x4000_0000),
            PteAttrs::kernel(Prot::READ_WRITE, MemoryType::Normal),
        );
        let expected = 0x4000_0000
            | 0b11
            | (0b11 << 8)
            | bits::AF
            | bits::PXN
            | bits::UXN
            | bits::OS_READ
            | bits::OS_WRITE
            | bits::OS_WIRED;
        assert_eq!(pte.raw(), expected);
    }

    #[test]
    fn test_execute_never_encoding() {
        let pa = PA::new(0x1000);
        let user_x = Pte::encode_block(Level::L3, pa, PteAttrs::user(Prot::READ_EXECUTE));
        assert_eq!(user_x.raw() & (bits::PXN | bits::UXN), bits::PXN);
        assert!(user_x.executable_at(true));
        assert!(!user_x.executable_at(false));

        let kern_x = Pte::encode_block(
            Level::L3,
            pa,
            PteAttrs::kernel(Prot::READ_EXECUTE, MemoryType::Normal),
        );
        assert_eq!(kern_x.raw() & (bits::PXN | bits::UXN), bits::UXN);

        let data = Pte::encode_block(Level::L3, pa, PteAttrs::user(Prot::READ_WRITE));
        assert_eq!(data.raw() & (bits::PXN | bits::UXN), bits::PXN | bits::UXN);
        assert!(data.raw() & bits::NG != 0);
    }

    #[test]
    fn test_device_is_non_shareable() {
        let pte = Pte::encode_block(
            Level::L2,
            PA::new(0x0900_0000 & !0x1F_FFFF),
            PteAttrs::kernel(Prot::READ_WRITE, MemoryType::Device),
        );
        assert_eq!((pte.raw() >> 8) & 0b11, 0);
        assert_eq!((pte.raw() >> 2) & 0b111, 1);
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn test_misaligned_block_panics() {
        let _ = Pte::encode_block(
            Level::L2,
            PA::new(0x4000_1000),
            PteAttrs::kernel(Prot::READ, MemoryType::Normal),
        );
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn test_misaligned_gigabyte_block_panics() {
        let _ = Pte::encode_block(
            Level::L1,
            PA::new(0x4020_0000),
            PteAttrs::kernel(Prot::READ, MemoryType::Normal),
        );
    }

    #[test]
    #[should_panic(expected = "L0")]
    fn test_l0_block_panics() {
        let _ = Pte::encode_block(Level::L0, PA::null(), PteAttrs::NONE);
    }

    #[test]
    fn test_predicates() {
        let cold = Pte::encode_block(Level::L3, PA::new(0x2000), PteAttrs::user(Prot::READ_WRITE));
        assert!(cold.is_valid());
        assert!(!cold.is_readable());
        assert!(!cold.is_writable());

        let read = cold.with_set(bits::AF);
        assert!(read.is_readable());
        assert!(!read.is_writable());
        assert!(read.with_clear(bits::AP_RO).is_writable());

        assert!(!Pte::INVALID.is_valid());
        assert_eq!(Pte::INVALID.kind(Level::L2), PteKind::Invalid);
        // reserved encoding at L3
        assert_eq!(Pte::from_raw(0x1001).kind(Level::L3), PteKind::Invalid);
        // block encoding is not legal at L0
        assert_eq!(Pte::from_raw(0x1).kind(Level::L0), PteKind::Invalid);
    }
}
