//! ARM64 translation tables
//!
//! A [`PageTable`] is one page of 512 descriptors. Every entry is an
//! `AtomicU64`: the hardware walker reads the same memory concurrently,
//! and other CPUs race on access-flag updates, so an entry is only ever
//! changed by a single store, swap or compare-exchange.

use core::sync::atomic::{AtomicU64, Ordering};

use super::descriptors::{Level, Pte};
use crate::ENTRIES_PER_TABLE;

/// One translation table page
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [AtomicU64; ENTRIES_PER_TABLE],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == crate::PAGE_SIZE);
const _: () = assert!(core::mem::align_of::<PageTable>() == crate::PAGE_SIZE);

impl PageTable {
    /// An empty table (all entries invalid)
    pub const fn new() -> Self {
        Self {
            entries: [const { AtomicU64::new(0) }; ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    pub fn load(&self, index: usize) -> Pte {
        Pte::from_raw(self.entries[index].load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, index: usize, pte: Pte) {
        self.entries[index].store(pte.raw(), Ordering::Release);
    }

    /// Replace an entry, returning the previous value
    #[inline]
    pub fn swap(&self, index: usize, pte: Pte) -> Pte {
        Pte::from_raw(self.entries[index].swap(pte.raw(), Ordering::AcqRel))
    }

    /// Replace an entry only if it still holds `current`
    #[inline]
    pub fn compare_exchange(&self, index: usize, current: Pte, new: Pte) -> Result<Pte, Pte> {
        self.entries[index]
            .compare_exchange(current.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(Pte::from_raw)
            .map_err(Pte::from_raw)
    }

    /// Invalidate every entry
    pub fn clear(&self) {
        for e in &self.entries {
            e.store(0, Ordering::Relaxed);
        }
        core::sync::atomic::fence(Ordering::Release);
    }

    /// Whether no entry is valid
    pub fn is_empty(&self) -> bool {
        (0..ENTRIES_PER_TABLE).all(|i| !self.load(i).is_valid())
    }

    /// Indices and values of the valid entries
    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, Pte)> + '_ {
        (0..ENTRIES_PER_TABLE)
            .map(|i| (i, self.load(i)))
            .filter(|(_, pte)| pte.is_valid())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference to one descriptor within a table
///
/// Returned by the walker; carries the level so the descriptor can be
/// classified without re-walking.
#[derive(Clone, Copy)]
pub struct PteSlot<'a> {
    table: &'a PageTable,
    index: usize,
    level: Level,
}

impl<'a> PteSlot<'a> {
    #[inline]
    pub const fn new(table: &'a PageTable, index: usize, level: Level) -> Self {
        Self {
            table,
            index,
            level,
        }
    }

    #[inline]
    pub const fn level(&self) -> Level {
        self.level
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn load(&self) -> Pte {
        self.table.load(self.index)
    }

    #[inline]
    pub fn store(&self, pte: Pte) {
        self.table.store(self.index, pte);
    }

    #[inline]
    pub fn swap(&self, pte: Pte) -> Pte {
        self.table.swap(self.index, pte)
    }

    #[inline]
    pub fn compare_exchange(&self, current: Pte, new: Pte) -> Result<Pte, Pte> {
        self.table.compare_exchange(self.index, current, new)
    }

    /// Whether the slot holds a block or page descriptor
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.load().is_leaf(self.level)
    }

    /// The table this slot lives in
    #[inline]
    pub const fn table(&self) -> &'a PageTable {
        self.table
    }
}

impl core::fmt::Debug for PteSlot<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PteSlot({:?}[{}] = {:?})", self.level, self.index, self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_ops() {
        let t = PageTable::new();
        assert!(t.is_empty());

        let pte = Pte::from_raw(0x4000_0403);
        t.store(7, pte);
        assert_eq!(t.load(7), pte);
        assert!(!t.is_empty());

        let newer = pte.with_set(1 << 10);
        assert_eq!(t.compare_exchange(7, Pte::INVALID, newer), Err(pte));
        assert_eq!(t.compare_exchange(7, pte, newer), Ok(pte));
        assert_eq!(t.swap(7, Pte::INVALID), newer);

        t.store(3, pte);
        t.store(9, pte);
        let valid: Vec<usize> = t.iter_valid().map(|(i, _)| i).collect();
        assert_eq!(valid, vec![3, 9]);

        t.clear();
        assert!(t.is_empty());
    }
}
