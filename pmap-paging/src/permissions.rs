//! Protections and leaf entry attributes
//!
//! [`Prot`] is the logical protection a caller asks for. [`PteAttrs`] is
//! everything a leaf descriptor records: the logical permissions (kept in
//! software bits), what the hardware currently permits (access flag and
//! AP read-write), and the memory type.

/// Memory type for page table entries
///
/// Each variant selects one MAIR_EL1 attribute slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MemoryType {
    /// Normal memory, write-back cacheable
    #[default]
    Normal,
    /// Normal memory, non-cacheable
    NonCacheable,
    /// Device-nGnRE memory (no speculation, ordered access)
    Device,
}

impl MemoryType {
    /// MAIR_EL1 attribute index
    #[inline]
    pub const fn attr_index(self) -> u64 {
        match self {
            Self::Normal => 0,
            Self::Device => 1,
            Self::NonCacheable => 2,
        }
    }

    #[inline]
    pub const fn from_attr_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(Self::Normal),
            1 => Some(Self::Device),
            2 => Some(Self::NonCacheable),
            _ => None,
        }
    }
}

/// Logical protection requested for a mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Prot {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Prot {
    pub const NONE: Self = Self::new(false, false, false);
    pub const READ: Self = Self::new(true, false, false);
    pub const READ_WRITE: Self = Self::new(true, true, false);
    pub const READ_EXECUTE: Self = Self::new(true, false, true);
    pub const ALL: Self = Self::new(true, true, true);

    #[inline]
    pub const fn new(read: bool, write: bool, execute: bool) -> Self {
        Self {
            read,
            write,
            execute,
        }
    }

    /// Intersection of two protections
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self::new(
            self.read && other.read,
            self.write && other.write,
            self.execute && other.execute,
        )
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        !self.read && !self.write && !self.execute
    }
}

/// Attributes carried by a block or page descriptor
///
/// `read` and `write` are the logical permissions. `accessed` mirrors the
/// hardware access flag and `dirty` means the hardware currently permits
/// writes. A legal combination never has `dirty` without `write`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PteAttrs {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    /// EL0 accessible
    pub user: bool,
    /// Global translation (nG clear), shared across all ASIDs
    pub global: bool,
    pub mem_type: MemoryType,
    /// Hardware access flag
    pub accessed: bool,
    /// Hardware write permission (AP read-write)
    pub dirty: bool,
    /// Mapping may not be reclaimed
    pub wired: bool,
}

impl PteAttrs {
    /// No permissions (invalid)
    pub const NONE: Self = Self {
        read: false,
        write: false,
        execute: false,
        user: false,
        global: false,
        mem_type: MemoryType::Normal,
        accessed: false,
        dirty: false,
        wired: false,
    };

    /// Kernel mapping, fully accessible to the hardware from the start
    ///
    /// Kernel mappings are global and never take access-flag faults.
    #[inline]
    pub const fn kernel(prot: Prot, mem_type: MemoryType) -> Self {
        Self {
            read: prot.read,
            write: prot.write,
            execute: prot.execute,
            user: false,
            global: true,
            mem_type,
            accessed: true,
            dirty: prot.write,
            wired: true,
        }
    }

    /// User mapping with the hardware bits left clear
    ///
    /// The first access faults and the fixup arms AF (and AP read-write
    /// on a write) for the kind of access that actually happened.
    #[inline]
    pub const fn user(prot: Prot) -> Self {
        Self {
            read: prot.read,
            write: prot.write,
            execute: prot.execute,
            user: true,
            global: false,
            mem_type: MemoryType::Normal,
            accessed: false,
            dirty: false,
            wired: false,
        }
    }

    #[inline]
    pub const fn prot(&self) -> Prot {
        Prot::new(self.read, self.write, self.execute)
    }

    /// Whether the combination can be stored in a descriptor
    #[inline]
    pub const fn is_legal(&self) -> bool {
        !self.dirty || self.write
    }

    #[inline]
    #[must_use]
    pub const fn with_accessed(mut self, accessed: bool) -> Self {
        self.accessed = accessed;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_wired(mut self, wired: bool) -> Self {
        self.wired = wired;
        self
    }

    /// Lower the logical permissions to `prot`, dropping hardware write
    /// access along with logical write access
    #[inline]
    #[must_use]
    pub const fn restrict(mut self, prot: Prot) -> Self {
        let p = self.prot().intersect(prot);
        self.read = p.read;
        self.write = p.write;
        self.execute = p.execute;
        self.dirty = self.dirty && p.write;
        self
    }
}
