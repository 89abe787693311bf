// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! One-writer, many-reader ring of frequency-domain frames.
//!
//! The master filter publishes one N-point spectrum per block into slot
//! `blocknum % depth`; every channel reads the slots it needs. Readers are
//! wait-free: each slot carries a seqlock word so a reader detects when the
//! master overwrote the slot mid-read and can retry or skip ahead instead
//! of consuming a torn frame.
//!
//! Seqlock protocol per slot:
//! - idle after block k:  seq == 2*k + 2
//! - while writing k:     seq == 2*k + 1 (odd)
//!
//! A reader wanting block k loads seq, runs its gather only if
//! seq == 2*k + 2, then re-checks seq.

use num_complex::Complex;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

struct Slot {
    seq: AtomicU64,
    data: UnsafeCell<Vec<Complex<f32>>>,
}

/// Fixed-depth ring of complex spectra.
pub struct FrameRing {
    slots: Vec<Slot>,
    depth: usize,
    bins: usize,
}

// SAFETY: slot data is only written by the single master thread between the
// odd/even seq transitions; readers validate seq around every access and
// discard anything read during a write window.
unsafe impl Send for FrameRing {}
unsafe impl Sync for FrameRing {}

impl FrameRing {
    /// `depth` is ND (>= 2), `bins` the published spectrum length.
    pub fn new(depth: usize, bins: usize) -> Self {
        assert!(depth >= 2, "ring depth must be >= 2");
        let slots = (0..depth)
            .map(|_| Slot {
                seq: AtomicU64::new(0),
                data: UnsafeCell::new(vec![Complex::new(0.0, 0.0); bins]),
            })
            .collect();
        FrameRing { slots, depth, bins }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Writer side: fill slot `blocknum % depth` with `frame`.
    ///
    /// Must only be called from the master thread, with strictly
    /// increasing block numbers.
    pub fn publish(&self, blocknum: u64, frame: &[Complex<f32>]) {
        debug_assert_eq!(frame.len(), self.bins);
        let slot = &self.slots[(blocknum % self.depth as u64) as usize];
        slot.seq.store(2 * blocknum + 1, Ordering::Release);
        // SAFETY: single writer; readers are fenced off by the odd seq.
        unsafe {
            (*slot.data.get()).copy_from_slice(frame);
        }
        slot.seq.store(2 * blocknum + 2, Ordering::Release);
    }

    /// Reader side: run `gather` over the frame for `blocknum` if it is
    /// still resident. Returns `None` when the slot has moved on (reader
    /// lagged more than depth-1 blocks) or is mid-write.
    ///
    /// `gather` may run over data being concurrently overwritten; its
    /// result is discarded in that case, so it must not have side effects
    /// beyond filling caller-owned buffers.
    pub fn with_frame<T>(
        &self,
        blocknum: u64,
        mut gather: impl FnMut(&[Complex<f32>]) -> T,
    ) -> Option<T> {
        let slot = &self.slots[(blocknum % self.depth as u64) as usize];
        let want = 2 * blocknum + 2;
        for _ in 0..2 {
            if slot.seq.load(Ordering::Acquire) != want {
                return None;
            }
            // SAFETY: data may be torn; validated by the seq re-check below.
            let result = unsafe { gather(&*slot.data.get()) };
            if slot.seq.load(Ordering::Acquire) == want {
                return Some(result);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(bins: usize, tag: f32) -> Vec<Complex<f32>> {
        (0..bins).map(|i| Complex::new(tag, i as f32)).collect()
    }

    #[test]
    fn publish_then_read() {
        let ring = FrameRing::new(4, 16);
        ring.publish(0, &frame(16, 7.0));
        let got = ring.with_frame(0, |f| f[3]).expect("frame 0 resident");
        assert_eq!(got, Complex::new(7.0, 3.0));
    }

    #[test]
    fn slot_reuse_invalidates_old_block() {
        let ring = FrameRing::new(4, 8);
        for k in 0..8u64 {
            ring.publish(k, &frame(8, k as f32));
        }
        // Block 3 was overwritten by block 7 (same slot)
        assert!(ring.with_frame(3, |f| f[0]).is_none());
        assert_eq!(ring.with_frame(7, |f| f[0]), Some(Complex::new(7.0, 0.0)));
        assert_eq!(ring.with_frame(4, |f| f[0]), Some(Complex::new(4.0, 0.0)));
    }

    #[test]
    fn unwritten_slot_reads_none() {
        let ring = FrameRing::new(4, 8);
        assert!(ring.with_frame(0, |f| f[0]).is_none());
        assert!(ring.with_frame(5, |f| f[0]).is_none());
    }

    #[test]
    fn concurrent_reader_never_sees_torn_frame() {
        let ring = Arc::new(FrameRing::new(2, 64));
        let writer_ring = Arc::clone(&ring);
        let writer = std::thread::spawn(move || {
            for k in 0..5000u64 {
                let f: Vec<Complex<f32>> =
                    (0..64).map(|_| Complex::new(k as f32, -(k as f32))).collect();
                writer_ring.publish(k, &f);
            }
        });
        let mut seen = 0u32;
        let mut k = 0u64;
        while k < 5000 {
            if let Some(ok) = ring.with_frame(k, |f| {
                // Every element must belong to the same block
                f.iter().all(|c| c.re == f[0].re && c.im == -c.re)
            }) {
                assert!(ok, "torn frame at block {k}");
                seen += 1;
                k += 1;
            } else {
                // Fell behind or not yet written; resync forward
                k += 1;
            }
        }
        writer.join().expect("writer join");
        assert!(seen > 0);
    }
}
