//! Fault context
//!
//! The access type a fault is classified as, and the per-CPU probe buffer
//! for accesses that may legally fault (e.g. probing whether a device
//! register answers).
//!
//! A probe is armed for the duration of exactly one closure call. When
//! the exception path sees a fault on a CPU with an armed probe it calls
//! [`FaultBuf::hit`], skips the faulting access and returns into the
//! closure; the probe then reports [`PmapError::BadAddress`]. Probes do
//! not nest.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use pmap_paging::VA;

use crate::error::PmapError;

/// Kind of access that faulted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    /// Instruction fetch
    Execute,
}

/// Recovery point for one CPU
#[derive(Debug, Default)]
pub struct FaultBuf {
    armed: AtomicBool,
    faulted: AtomicBool,
    fault_va: AtomicU64,
}

impl FaultBuf {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            fault_va: AtomicU64::new(0),
        }
    }

    /// Run `f` with the buffer armed.
    ///
    /// # Panics
    ///
    /// If a probe is already armed on this buffer.
    pub fn probe<T>(&self, f: impl FnOnce() -> T) -> Result<T, PmapError> {
        assert!(
            !self.armed.swap(true, Ordering::AcqRel),
            "nested fault probe"
        );
        self.faulted.store(false, Ordering::Relaxed);

        let value = f();

        self.armed.store(false, Ordering::Release);
        if self.faulted.swap(false, Ordering::AcqRel) {
            log::trace!(
                "probe faulted at {:#x}",
                self.fault_va.load(Ordering::Relaxed)
            );
            Err(PmapError::BadAddress)
        } else {
            Ok(value)
        }
    }

    /// Record a fault at `va`. Returns `true` if a probe is armed, in
    /// which case the exception path resumes past the faulting access.
    pub fn hit(&self, va: VA) -> bool {
        if !self.armed.load(Ordering::Acquire) {
            return false;
        }
        self.fault_va.store(va.value(), Ordering::Relaxed);
        self.faulted.store(true, Ordering::Release);
        true
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_without_fault() {
        let fb = FaultBuf::new();
        assert_eq!(fb.probe(|| 7), Ok(7));
        assert!(!fb.is_armed());
    }

    #[test]
    fn test_probe_reports_fault() {
        let fb = FaultBuf::new();
        let r = fb.probe(|| {
            assert!(fb.hit(VA::new(0xFFFF_FFFE_0000_1000)));
            0u32
        });
        assert_eq!(r, Err(PmapError::BadAddress));
        // unarmed again: a later fault is not absorbed
        assert!(!fb.hit(VA::new(0x1000)));
    }

    #[test]
    #[should_panic(expected = "nested")]
    fn test_nested_probe_panics() {
        let fb = FaultBuf::new();
        let _ = fb.probe(|| fb.probe(|| ()));
    }
}
