//! Reverse mapping records
//!
//! One record per managed physical page: every (pmap, va) that maps it,
//! plus the referenced/modified attributes gathered by the fault fixup.
//! The lock order is pmap lock, then the pv table lock; code that walks
//! the mappings of a page takes a snapshot and drops the pv lock before
//! locking any pmap.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use pmap_paging::{PA, VA};
use spin::Mutex;

use crate::pmap::Pmap;

#[derive(Default)]
struct PvEntry {
    referenced: bool,
    modified: bool,
    mappings: Vec<(Weak<Pmap>, VA)>,
}

impl PvEntry {
    fn is_unused(&self) -> bool {
        self.mappings.is_empty() && !self.referenced && !self.modified
    }
}

/// Reverse mapping records keyed by page frame number
#[derive(Default)]
pub struct PvTable {
    inner: Mutex<BTreeMap<u64, PvEntry>>,
}

impl PvTable {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record that `pmap` maps `pa` at `va`
    pub fn insert(&self, pa: PA, pmap: &Arc<Pmap>, va: VA) {
        let mut table = self.inner.lock();
        let entry = table.entry(pa.pfn()).or_default();
        debug_assert!(
            !entry
                .mappings
                .iter()
                .any(|(p, v)| *v == va && p.as_ptr() == Arc::as_ptr(pmap)),
            "duplicate pv entry for {va:?}"
        );
        entry.mappings.push((Arc::downgrade(pmap), va));
    }

    /// Forget the mapping of `pa` by `pmap` at `va`. Returns whether it
    /// was recorded.
    pub fn remove(&self, pa: PA, pmap: &Pmap, va: VA) -> bool {
        let mut table = self.inner.lock();
        let Some(entry) = table.get_mut(&pa.pfn()) else {
            return false;
        };
        let before = entry.mappings.len();
        entry
            .mappings
            .retain(|(p, v)| !(*v == va && core::ptr::eq(p.as_ptr(), pmap)));
        let removed = entry.mappings.len() != before;
        if entry.is_unused() {
            table.remove(&pa.pfn());
        }
        removed
    }

    /// Drop every record that belongs to `pmap`
    pub fn remove_pmap(&self, pmap: &Pmap) {
        let mut table = self.inner.lock();
        table.retain(|_, entry| {
            entry
                .mappings
                .retain(|(p, _)| !core::ptr::eq(p.as_ptr(), pmap));
            !entry.is_unused()
        });
    }

    pub fn mark_referenced(&self, pa: PA) {
        if let Some(entry) = self.inner.lock().get_mut(&pa.pfn()) {
            entry.referenced = true;
        }
    }

    /// A write implies a reference
    pub fn mark_modified(&self, pa: PA) {
        if let Some(entry) = self.inner.lock().get_mut(&pa.pfn()) {
            entry.referenced = true;
            entry.modified = true;
        }
    }

    pub fn is_referenced(&self, pa: PA) -> bool {
        self.inner
            .lock()
            .get(&pa.pfn())
            .is_some_and(|e| e.referenced)
    }

    pub fn is_modified(&self, pa: PA) -> bool {
        self.inner.lock().get(&pa.pfn()).is_some_and(|e| e.modified)
    }

    /// Whether any mapping of `pa` is recorded
    pub fn is_managed(&self, pa: PA) -> bool {
        self.inner.lock().contains_key(&pa.pfn())
    }

    pub fn mapping_count(&self, pa: PA) -> usize {
        self.inner
            .lock()
            .get(&pa.pfn())
            .map_or(0, |e| e.mappings.len())
    }

    /// Reset the referenced attribute and return the live mappings whose
    /// access flag must now be cleared.
    pub fn take_referenced(&self, pa: PA) -> (bool, Vec<(Arc<Pmap>, VA)>) {
        self.take_with(pa, |e| core::mem::replace(&mut e.referenced, false))
    }

    /// Reset the modified attribute and return the live mappings that
    /// must now be write-protected.
    pub fn take_modified(&self, pa: PA) -> (bool, Vec<(Arc<Pmap>, VA)>) {
        self.take_with(pa, |e| core::mem::replace(&mut e.modified, false))
    }

    fn take_with(
        &self,
        pa: PA,
        reset: impl FnOnce(&mut PvEntry) -> bool,
    ) -> (bool, Vec<(Arc<Pmap>, VA)>) {
        let mut table = self.inner.lock();
        let Some(entry) = table.get_mut(&pa.pfn()) else {
            return (false, Vec::new());
        };
        let was = reset(entry);
        let live = entry
            .mappings
            .iter()
            .filter_map(|(p, va)| Some((p.upgrade()?, *va)))
            .collect();
        (was, live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmap::PmapKind;

    fn pmap() -> Arc<Pmap> {
        Arc::new(Pmap::new(PmapKind::User, PA::new(0x1000)))
    }

    #[test]
    fn test_insert_and_remove() {
        let pv = PvTable::new();
        let p = pmap();
        let pa = PA::new(0x8000);
        pv.insert(pa, &p, VA::new(0x4000));
        pv.insert(pa, &p, VA::new(0x5000));
        assert_eq!(pv.mapping_count(pa), 2);

        assert!(pv.remove(pa, &p, VA::new(0x4000)));
        assert!(!pv.remove(pa, &p, VA::new(0x4000)));
        assert!(pv.remove(pa, &p, VA::new(0x5000)));
        assert!(!pv.is_managed(pa));
    }

    #[test]
    fn test_attributes_outlive_mappings() {
        let pv = PvTable::new();
        let p = pmap();
        let pa = PA::new(0x8000);
        pv.insert(pa, &p, VA::new(0x4000));
        pv.mark_modified(pa);
        pv.remove(pa, &p, VA::new(0x4000));

        assert!(pv.is_referenced(pa));
        assert!(pv.is_modified(pa));
    }

    #[test]
    fn test_marks_ignore_unmanaged_pages() {
        let pv = PvTable::new();
        pv.mark_referenced(PA::new(0x8000));
        assert!(!pv.is_referenced(PA::new(0x8000)));
    }

    #[test]
    fn test_take_skips_dead_pmaps() {
        let pv = PvTable::new();
        let a = pmap();
        let b = pmap();
        let pa = PA::new(0x8000);
        pv.insert(pa, &a, VA::new(0x4000));
        pv.insert(pa, &b, VA::new(0x9000));
        pv.mark_referenced(pa);
        drop(a);

        let (was, live) = pv.take_referenced(pa);
        assert!(was);
        assert_eq!(live.len(), 1);
        assert!(Arc::ptr_eq(&live[0].0, &b));
        assert!(!pv.is_referenced(pa));
    }

    #[test]
    fn test_remove_pmap() {
        let pv = PvTable::new();
        let a = pmap();
        let b = pmap();
        pv.insert(PA::new(0x8000), &a, VA::new(0x4000));
        pv.insert(PA::new(0x9000), &a, VA::new(0x5000));
        pv.insert(PA::new(0x9000), &b, VA::new(0x5000));

        pv.remove_pmap(&a);
        assert!(!pv.is_managed(PA::new(0x8000)));
        assert_eq!(pv.mapping_count(PA::new(0x9000)), 1);
    }
}
