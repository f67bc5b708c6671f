//! Simulated physical memory
//!
//! A `FrameArena` owns a run of page frames keyed by physical frame number
//! starting at a base address. It is both a [`PhysWindow`] (reaching a
//! frame given its PA) and a bitmap [`FrameAllocator`], so page tables can
//! be built and walked on the host exactly as on hardware.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::address::PA;
use crate::arch::arm64::PageTable;
use crate::traits::{FrameAllocator, PhysWindow};
use crate::PAGE_SIZE;

/// Bitmap allocation state. Each bit is one frame: 1 = allocated, 0 = free.
///
/// # Invariants
///
/// - `free` always equals the number of zero bits covering real frames
/// - `bitmap.len() * 64 >= frame count`
struct ArenaState {
    bitmap: Vec<u64>,
    free: usize,
    search_hint: usize,
    /// Successful allocations left before every request fails
    budget: Option<usize>,
}

/// Page frames addressed by physical frame number
pub struct FrameArena {
    base: PA,
    frames: Box<[PageTable]>,
    state: Mutex<ArenaState>,
}

impl FrameArena {
    const BITS_PER_ENTRY: usize = 64;

    /// Create an arena of `frames` zeroed pages starting at `base`
    ///
    /// # Panics
    ///
    /// If `base` is not page-aligned.
    pub fn new(base: PA, frames: usize) -> Self {
        assert!(base.is_page_aligned(), "arena base {base:?} is not page-aligned");
        let words = frames.div_ceil(Self::BITS_PER_ENTRY);
        let mut bitmap = vec![0u64; words];
        // Bits past the last frame stay permanently allocated.
        let tail = frames % Self::BITS_PER_ENTRY;
        if tail != 0 {
            bitmap[words - 1] = !0u64 << tail;
        }
        Self {
            base,
            frames: core::iter::repeat_with(PageTable::new).take(frames).collect(),
            state: Mutex::new(ArenaState {
                bitmap,
                free: frames,
                search_hint: 0,
                budget: None,
            }),
        }
    }

    #[inline]
    pub fn base(&self) -> PA {
        self.base
    }

    /// First address past the arena
    #[inline]
    pub fn end(&self) -> PA {
        self.base + (self.frames.len() * PAGE_SIZE) as u64
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames currently allocated
    pub fn allocated(&self) -> usize {
        self.frame_count() - self.state.lock().free
    }

    /// Make every allocation after the next `successes` fail; `None`
    /// lifts the limit.
    pub fn fail_after(&self, successes: Option<usize>) {
        self.state.lock().budget = successes;
    }

    pub fn is_allocated(&self, pa: PA) -> bool {
        let Some(idx) = self.index_of(pa) else {
            return false;
        };
        let state = self.state.lock();
        state.bitmap[idx / Self::BITS_PER_ENTRY] & (1 << (idx % Self::BITS_PER_ENTRY)) != 0
    }

    /// Mark a specific frame allocated (e.g. a table built before the
    /// allocator took over). Returns `false` if it already was.
    pub fn reserve(&self, pa: PA) -> bool {
        let idx = self.frame_index(pa);
        let mut state = self.state.lock();
        let (word, bit) = (idx / Self::BITS_PER_ENTRY, idx % Self::BITS_PER_ENTRY);
        if state.bitmap[word] & (1 << bit) != 0 {
            return false;
        }
        state.bitmap[word] |= 1 << bit;
        state.free -= 1;
        true
    }

    fn index_of(&self, pa: PA) -> Option<usize> {
        if !pa.is_page_aligned() || pa < self.base || pa >= self.end() {
            return None;
        }
        Some(((pa - self.base) / PAGE_SIZE as u64) as usize)
    }

    fn frame_index(&self, pa: PA) -> usize {
        match self.index_of(pa) {
            Some(idx) => idx,
            None => panic!("{pa:?} is outside the frame arena"),
        }
    }
}

impl FrameAllocator for FrameArena {
    fn alloc_zeroed_page(&self, _no_wait: bool) -> Option<PA> {
        let mut state = self.state.lock();
        if state.free == 0 || state.budget == Some(0) {
            return None;
        }

        let words = state.bitmap.len();
        let start = state.search_hint;
        let (word, bit) = (0..words)
            .map(|i| (start + i) % words)
            .find_map(|w| {
                let free_bits = !state.bitmap[w];
                (free_bits != 0).then(|| (w, free_bits.trailing_zeros() as usize))
            })?;

        state.bitmap[word] |= 1 << bit;
        state.free -= 1;
        state.search_hint = word;
        if let Some(b) = state.budget.as_mut() {
            *b -= 1;
        }
        drop(state);

        let idx = word * Self::BITS_PER_ENTRY + bit;
        self.frames[idx].clear();
        Some(self.base + (idx * PAGE_SIZE) as u64)
    }

    fn free_page(&self, pa: PA) {
        let idx = self.frame_index(pa);
        let mut state = self.state.lock();
        let (word, bit) = (idx / Self::BITS_PER_ENTRY, idx % Self::BITS_PER_ENTRY);
        assert!(
            state.bitmap[word] & (1 << bit) != 0,
            "double free of frame {pa:?}"
        );
        state.bitmap[word] &= !(1 << bit);
        state.free += 1;
    }
}

// SAFETY: every covered PA maps to exactly one frame owned by the arena,
// and frames live as long as the arena.
unsafe impl PhysWindow for FrameArena {
    fn table(&self, pa: PA) -> &PageTable {
        &self.frames[self.frame_index(pa.page_align_down())]
    }

    fn covers(&self, pa: PA) -> bool {
        self.index_of(pa.page_align_down()).is_some()
    }
}
