//! Multi-level table walker
//!
//! Levels are walked root to leaf, indexing each table by the VA bits of
//! that level: O(1) per level, four levels in total.
//!
//! - [`lookup`] never allocates. It stops at the first invalid
//!   intermediate entry, or at a block.
//! - [`ensure_path`] installs a zero-filled table for every invalid
//!   intermediate entry it meets. A block in the way is a
//!   [`MapError::TypeConflict`]: splitting a coarse mapping in place is
//!   not supported, the caller has to remove it first.

use super::descriptors::{Level, Pte, PteKind};
use super::tables::PteSlot;
use crate::address::{PA, VA};
use crate::traits::{FrameAllocator, MapError, PhysWindow};

/// Find the descriptor that translates `va` under the table at `root`.
///
/// Returns the L3 slot (valid or not) when every intermediate level holds
/// a table, the block slot when an L1/L2 block covers `va`, and `None`
/// when an intermediate entry is invalid.
pub fn lookup<'w, W: PhysWindow + ?Sized>(window: &'w W, root: PA, va: VA) -> Option<PteSlot<'w>> {
    let mut table = window.table(root);
    for level in Level::ALL {
        let slot = PteSlot::new(table, level.index(va), level);
        match slot.load().kind(level) {
            PteKind::Table if level != Level::L3 => {
                table = window.table(slot.load().table_address());
            }
            PteKind::Block => return Some(slot),
            _ if level == Level::L3 => return Some(slot),
            _ => return None,
        }
    }
    None
}

/// Walk to the L3 slot for `va`, creating intermediate tables on demand.
pub fn ensure_path<'w, W, A>(
    window: &'w W,
    root: PA,
    va: VA,
    alloc: &A,
) -> Result<PteSlot<'w>, MapError>
where
    W: PhysWindow + ?Sized,
    A: FrameAllocator + ?Sized,
{
    ensure_path_to(window, root, va, Level::L3, alloc)
}

/// Walk to the slot for `va` at `target`, creating intermediate tables on
/// demand.
///
/// An intermediate entry that holds a block fails with `TypeConflict`.
/// A failed allocation fails with `OutOfMemory`; tables installed before
/// the failure stay in place and are reused by the next attempt.
pub fn ensure_path_to<'w, W, A>(
    window: &'w W,
    root: PA,
    va: VA,
    target: Level,
    alloc: &A,
) -> Result<PteSlot<'w>, MapError>
where
    W: PhysWindow + ?Sized,
    A: FrameAllocator + ?Sized,
{
    let mut table = window.table(root);
    for level in Level::ALL {
        let slot = PteSlot::new(table, level.index(va), level);
        if level == target {
            return Ok(slot);
        }

        let current = slot.load();
        let next = match current.kind(level) {
            PteKind::Table => current.table_address(),
            PteKind::Invalid => install_table(window, &slot, current, alloc)?,
            PteKind::Block | PteKind::Page => return Err(MapError::TypeConflict),
        };
        table = window.table(next);
    }
    unreachable!("walk always reaches L3")
}

/// Install a fresh table in an invalid slot. If another CPU got there
/// first, the new page goes back and the winner's table is used.
fn install_table<W, A>(window: &W, slot: &PteSlot<'_>, seen: Pte, alloc: &A) -> Result<PA, MapError>
where
    W: PhysWindow + ?Sized,
    A: FrameAllocator + ?Sized,
{
    let pa = alloc.alloc_zeroed_page(true).ok_or(MapError::OutOfMemory)?;
    debug_assert!(window.table(pa).is_empty(), "allocator returned a dirty page");

    match slot.compare_exchange(seen, Pte::encode_table(pa)) {
        Ok(_) => Ok(pa),
        Err(winner) => {
            alloc.free_page(pa);
            match winner.kind(slot.level()) {
                PteKind::Table => Ok(winner.table_address()),
                _ => Err(MapError::TypeConflict),
            }
        }
    }
}

/// Free every table reachable from `root`, then `root` itself.
///
/// Leaf mappings are dropped without touching the pages they map. The
/// caller guarantees no CPU can still walk these tables.
pub fn release_tables<W, A>(window: &W, root: PA, alloc: &A)
where
    W: PhysWindow + ?Sized,
    A: FrameAllocator + ?Sized,
{
    release_level(window, root, Level::L0, alloc);
}

fn release_level<W, A>(window: &W, table_pa: PA, level: Level, alloc: &A)
where
    W: PhysWindow + ?Sized,
    A: FrameAllocator + ?Sized,
{
    if let Some(next) = level.next() {
        for (_, pte) in window.table(table_pa).iter_valid() {
            if pte.is_table(level) {
                release_level(window, pte.table_address(), next, alloc);
            }
        }
    }
    window.table(table_pa).clear();
    alloc.free_page(table_pa);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::FrameArena;
    use crate::permissions::{MemoryType, Prot, PteAttrs};

    fn setup() -> (FrameArena, PA) {
        let arena = FrameArena::new(PA::new(0x4000_0000), 64);
        let root = arena.alloc_zeroed_page(true).unwrap();
        (arena, root)
    }

    #[test]
    fn test_lookup_empty() {
        let (arena, root) = setup();
        assert!(lookup(&arena, root, VA::new(0x40_0000)).is_none());
    }

    #[test]
    fn test_ensure_path_then_lookup() {
        let (arena, root) = setup();
        let va = VA::new(0x0000_0012_3456_7000);

        let slot = ensure_path(&arena, root, va, &arena).unwrap();
        assert_eq!(slot.level(), Level::L3);
        assert!(!slot.load().is_valid());
        // root + L1 + L2 + L3
        assert_eq!(arena.allocated(), 4);

        let found = lookup(&arena, root, va).unwrap();
        assert_eq!(found.index(), slot.index());
        assert_eq!(found.level(), Level::L3);

        // same L3 table for the neighbouring page
        assert!(lookup(&arena, root, va + 0x1000u64).is_some());
        // different L2 entry: nothing there yet
        assert!(lookup(&arena, root, va + 0x20_0000u64).is_none());
    }

    #[test]
    fn test_ensure_path_is_idempotent() {
        let (arena, root) = setup();
        let va = VA::new(0x8000_0000);
        ensure_path(&arena, root, va, &arena).unwrap();
        let before = arena.allocated();
        ensure_path(&arena, root, va, &arena).unwrap();
        ensure_path(&arena, root, va + 0x1000u64, &arena).unwrap();
        assert_eq!(arena.allocated(), before);
    }

    #[test]
    fn test_ensure_path_out_of_memory() {
        let (arena, root) = setup();
        arena.fail_after(Some(1));
        let err = ensure_path(&arena, root, VA::new(0x1000), &arena).unwrap_err();
        assert_eq!(err, MapError::OutOfMemory);
        // the L1 table that did get installed is reused on retry
        arena.fail_after(None);
        let before = arena.allocated();
        ensure_path(&arena, root, VA::new(0x1000), &arena).unwrap();
        assert_eq!(arena.allocated(), before + 2);
    }

    #[test]
    fn test_block_is_a_type_conflict() {
        let (arena, root) = setup();
        let va = VA::new(0x4000_0000);
        let l2 = ensure_path_to(&arena, root, va, Level::L2, &arena).unwrap();
        let attrs = PteAttrs::kernel(Prot::READ_WRITE, MemoryType::Normal);
        l2.store(Pte::encode_block(Level::L2, PA::new(0x8000_0000), attrs));

        assert_eq!(
            ensure_path(&arena, root, va + 0x3000u64, &arena).unwrap_err(),
            MapError::TypeConflict
        );
        let hit = lookup(&arena, root, va + 0x3000u64).unwrap();
        assert_eq!(hit.level(), Level::L2);
        assert!(hit.is_leaf());
    }

    #[test]
    fn test_release_tables() {
        let (arena, root) = setup();
        ensure_path(&arena, root, VA::new(0x1000), &arena).unwrap();
        ensure_path(&arena, root, VA::new(0x80_0000_0000), &arena).unwrap();
        assert_eq!(arena.allocated(), 7);
        release_tables(&arena, root, &arena);
        assert_eq!(arena.allocated(), 0);
    }
}
