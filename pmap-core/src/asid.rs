//! ASID (Address Space Identifier) allocation
//!
//! ARM64 supports 8 or 16-bit ASIDs depending on implementation. ASID 0
//! is reserved: it tags the "no user address space" TTBR0 value and is
//! never handed to a pmap.
//!
//! ASIDs are taken from a bitmap. When the bitmap is full the allocator
//! starts a new generation: every ASID is released except those of pmaps
//! currently active on some CPU, and the caller invalidates the whole TLB
//! before any recycled ASID is used. A pmap whose recorded generation is
//! older than the allocator's holds no ASID at all.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// Maximum ASID value for 8-bit ASID support.
const MAX_ASID_8BIT: u16 = 255;

/// Maximum ASID value for 16-bit ASID support.
const MAX_ASID_16BIT: u16 = 0xFFFF;

/// An address space identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Asid(u16);

impl Asid {
    /// Reserved; tags the empty user root
    pub const KERNEL: Self = Self(0);

    #[inline]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 == 0
    }
}

/// A pmap's ASID and the generation it was allocated in
///
/// Packed into one atomic word, `(generation << 16) | asid`, so readers
/// never see an ASID paired with the wrong generation. Zero means none.
#[derive(Debug, Default)]
pub struct AsidCell(AtomicU64);

impl AsidCell {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// The ASID, if it was allocated in `generation`
    #[inline]
    pub fn get(&self, generation: u64) -> Option<Asid> {
        let v = self.0.load(Ordering::Acquire);
        (v != 0 && v >> 16 == generation).then_some(Asid(v as u16))
    }

    #[inline]
    pub fn set(&self, asid: Asid, generation: u64) {
        debug_assert!(!asid.is_kernel());
        self.0.store((generation << 16) | asid.0 as u64, Ordering::Release);
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Bitmap ASID allocator with generation tracking
///
/// # Invariants
///
/// - bit 0 (ASID 0) is always set
/// - `in_use` equals the number of set bits for ASIDs 1..=max
pub struct AsidAllocator {
    /// 1 = allocated in the current generation
    bitmap: Vec<u64>,
    max_asid: u16,
    /// Starts at 1 so a packed cell is never zero
    generation: u64,
    search_hint: usize,
    in_use: usize,
}

impl AsidAllocator {
    /// Create an allocator for `asid_bits`-wide ASIDs (8 or 16).
    #[must_use]
    pub fn new(asid_bits: u8) -> Self {
        let max_asid = if asid_bits >= 16 {
            MAX_ASID_16BIT
        } else {
            MAX_ASID_8BIT
        };
        let mut bitmap = vec![0u64; (max_asid as usize + 1).div_ceil(64)];
        bitmap[0] = 1;

        log::info!(
            "ASID allocator initialised: {}-bit ASIDs (max={})",
            if asid_bits >= 16 { 16 } else { 8 },
            max_asid
        );
        Self {
            bitmap,
            max_asid,
            generation: 1,
            search_hint: 0,
            in_use: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    #[must_use]
    pub const fn max_asid(&self) -> u16 {
        self.max_asid
    }

    /// ASIDs allocated in the current generation
    #[inline]
    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.in_use
    }

    #[must_use]
    pub fn is_allocated(&self, asid: Asid) -> bool {
        let i = asid.0 as usize;
        self.bitmap[i / 64] & (1 << (i % 64)) != 0
    }

    /// Take a free ASID from the current generation, or `None` when the
    /// generation is exhausted.
    pub fn allocate(&mut self) -> Option<Asid> {
        if self.in_use == self.max_asid as usize {
            return None;
        }
        let words = self.bitmap.len();
        let (word, bit) = (0..words)
            .map(|i| (self.search_hint + i) % words)
            .find_map(|w| {
                let free = !self.bitmap[w];
                (free != 0).then(|| (w, free.trailing_zeros() as usize))
            })?;

        self.bitmap[word] |= 1 << bit;
        self.in_use += 1;
        self.search_hint = word;
        Some(Asid((word * 64 + bit) as u16))
    }

    /// Return an ASID of the current generation.
    ///
    /// The caller has already invalidated every TLB entry tagged with it.
    pub fn free(&mut self, asid: Asid) {
        assert!(!asid.is_kernel(), "ASID 0 is never allocated");
        assert!(self.is_allocated(asid), "freeing unallocated {asid:?}");
        let i = asid.0 as usize;
        self.bitmap[i / 64] &= !(1 << (i % 64));
        self.in_use -= 1;
    }

    /// Start a new generation, carrying over the ASIDs in `keep`.
    ///
    /// The caller must invalidate the entire TLB before handing out any
    /// ASID from the new generation.
    pub fn rollover(&mut self, keep: impl IntoIterator<Item = Asid>) -> u64 {
        self.bitmap.fill(0);
        self.bitmap[0] = 1;
        self.in_use = 0;
        for asid in keep {
            let i = asid.0 as usize;
            if !asid.is_kernel() && self.bitmap[i / 64] & (1 << (i % 64)) == 0 {
                self.bitmap[i / 64] |= 1 << (i % 64);
                self.in_use += 1;
            }
        }
        self.generation += 1;
        self.search_hint = 0;
        log::debug!(
            "ASID rollover, new generation: {} ({} kept)",
            self.generation,
            self.in_use
        );
        self.generation
    }
}
