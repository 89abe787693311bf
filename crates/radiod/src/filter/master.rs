// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Master filter: the forward (time -> frequency) half of the fast
//! convolver, shared by every channel.
//!
//! The front-end reader hands sample chunks to the FFT worker over a
//! bounded channel; the worker accumulates L new samples on top of the
//! M-1 carried over, runs the N-point forward FFT, subtracts the spur
//! notches and publishes the spectrum into the frame ring, then wakes all
//! channel threads.

use super::ring::FrameRing;
use super::InType;
use num_complex::Complex;
use parking_lot::{Condvar, Mutex};
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use std::time::Duration;

/// Frequency-domain history depth (ND). Readers may lag up to ND-1 blocks.
pub const RING_DEPTH: usize = 8;

/// Block geometry, fixed once the front end reports its sample rate.
#[derive(Debug, Clone, Copy)]
pub struct MasterParams {
    pub samprate: f64,
    /// New input samples per block.
    pub l: usize,
    /// Impulse response length.
    pub m: usize,
    pub in_type: InType,
}

impl MasterParams {
    /// Derive geometry from the requested block time and overlap factor.
    ///
    /// L is rounded so the block holds an integral number of samples; the
    /// true block time may therefore differ slightly from the request.
    pub fn derive(samprate: f64, blocktime: f64, overlap: usize, in_type: InType) -> Self {
        let l = (samprate * blocktime).round().max(1.0) as usize;
        let m = l / (overlap.max(2) - 1) + 1;
        MasterParams {
            samprate,
            l,
            m,
            in_type,
        }
    }

    /// Forward FFT size N = L + M - 1.
    pub fn n(&self) -> usize {
        self.l + self.m - 1
    }

    /// Published spectrum length: N/2+1 for real input, N for complex.
    pub fn bins(&self) -> usize {
        match self.in_type {
            InType::Real => self.n() / 2 + 1,
            InType::Complex => self.n(),
        }
    }

    /// True block duration in seconds after sample rounding.
    pub fn blocktime(&self) -> f64 {
        self.l as f64 / self.samprate
    }

    /// Overlap factor V = 1 + L/(M-1).
    pub fn overlap(&self) -> usize {
        1 + self.l / (self.m - 1)
    }
}

/// Condvar broadcast fired after each published block.
pub struct BlockWake {
    count: Mutex<u64>,
    cond: Condvar,
}

impl BlockWake {
    pub fn new() -> Self {
        BlockWake {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    fn publish(&self, count: u64) {
        let mut c = self.count.lock();
        *c = count;
        self.cond.notify_all();
    }

    /// Number of blocks published so far.
    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    /// Wait until at least `min` blocks have been published, or the
    /// timeout expires. Returns the current count either way.
    pub fn wait_for(&self, min: u64, timeout: Duration) -> u64 {
        let mut c = self.count.lock();
        let deadline = std::time::Instant::now() + timeout;
        while *c < min {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            if self.cond.wait_for(&mut c, deadline - now).timed_out() {
                break;
            }
        }
        *c
    }
}

impl Default for BlockWake {
    fn default() -> Self {
        Self::new()
    }
}

/// Coherent spur suppression at a fixed bin. The complex bin value is
/// exponentially smoothed and the smoothed estimate subtracted, nulling a
/// persistent carrier while passing wideband energy.
#[derive(Debug, Clone)]
pub struct NotchState {
    pub bin: usize,
    pub alpha: f32,
    state: Complex<f32>,
}

impl NotchState {
    pub fn new(bin: usize, alpha: f32) -> Self {
        NotchState {
            bin,
            alpha,
            state: Complex::new(0.0, 0.0),
        }
    }

    #[inline]
    fn apply(&mut self, v: Complex<f32>) -> Complex<f32> {
        self.state += self.alpha * (v - self.state);
        v - self.state
    }
}

/// Shared, read-mostly half of the master filter.
pub struct MasterFilter {
    pub params: MasterParams,
    pub ring: FrameRing,
    pub wake: BlockWake,
}

impl MasterFilter {
    pub fn new(params: MasterParams) -> Arc<Self> {
        Arc::new(MasterFilter {
            ring: FrameRing::new(RING_DEPTH, params.bins()),
            wake: BlockWake::new(),
            params,
        })
    }

    /// Latest published block number, or None before the first block.
    pub fn latest_block(&self) -> Option<u64> {
        let c = self.wake.count();
        if c == 0 {
            None
        } else {
            Some(c - 1)
        }
    }
}

/// A batch of raw front-end samples on its way to the FFT worker.
pub enum SampleChunk {
    Real(Vec<f32>),
    Complex(Vec<Complex<f32>>),
}

impl SampleChunk {
    pub fn len(&self) -> usize {
        match self {
            SampleChunk::Real(v) => v.len(),
            SampleChunk::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writer half: owns the overlap window and the FFT plan. Exactly one
/// thread drives this.
pub struct MasterInput {
    shared: Arc<MasterFilter>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    /// N-sample window: M-1 history samples followed by the L accumulating.
    window: Vec<Complex<f32>>,
    /// New samples accumulated this block.
    filled: usize,
    /// FFT workspace reused every block.
    fdomain: Vec<Complex<f32>>,
    notches: Vec<NotchState>,
    blocknum: u64,
}

impl MasterInput {
    pub fn new(shared: Arc<MasterFilter>, notches: Vec<NotchState>) -> Self {
        let n = shared.params.n();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        MasterInput {
            fft,
            scratch,
            window: vec![Complex::new(0.0, 0.0); n],
            filled: 0,
            fdomain: vec![Complex::new(0.0, 0.0); n],
            notches,
            blocknum: 0,
            shared,
        }
    }

    pub fn shared(&self) -> &Arc<MasterFilter> {
        &self.shared
    }

    /// Append samples; runs the forward FFT and publishes whenever L new
    /// samples have accumulated. Returns the number of blocks published.
    pub fn write(&mut self, chunk: &SampleChunk) -> usize {
        match chunk {
            SampleChunk::Real(v) => self.write_iter(v.iter().map(|&x| Complex::new(x, 0.0))),
            SampleChunk::Complex(v) => self.write_iter(v.iter().copied()),
        }
    }

    fn write_iter(&mut self, samples: impl Iterator<Item = Complex<f32>>) -> usize {
        let p = self.shared.params;
        let history = p.m - 1;
        let mut published = 0;
        for s in samples {
            self.window[history + self.filled] = s;
            self.filled += 1;
            if self.filled == p.l {
                self.execute_block();
                published += 1;
            }
        }
        published
    }

    fn execute_block(&mut self) {
        let p = self.shared.params;
        let n = p.n();
        let history = p.m - 1;

        self.fdomain.copy_from_slice(&self.window);
        self.fft
            .process_with_scratch(&mut self.fdomain, &mut self.scratch);

        for notch in &mut self.notches {
            if notch.bin < self.shared.ring.bins() {
                self.fdomain[notch.bin] = notch.apply(self.fdomain[notch.bin]);
            }
        }

        self.shared
            .ring
            .publish(self.blocknum, &self.fdomain[..self.shared.ring.bins()]);
        self.blocknum += 1;
        self.shared.wake.publish(self.blocknum);

        // Slide the overlap: last M-1 samples become the next history
        self.window.copy_within(n - history..n, 0);
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_from_blocktime() {
        // 20 ms at 64 kHz real, overlap 5
        let p = MasterParams::derive(64_000.0, 0.020, 5, InType::Real);
        assert_eq!(p.l, 1280);
        assert_eq!(p.m, 321);
        assert_eq!(p.n(), 1600);
        assert_eq!(p.overlap(), 5);
        assert_eq!(p.bins(), 801);
        assert!((p.blocktime() - 0.020).abs() < 1e-12);
    }

    #[test]
    fn complex_input_publishes_full_spectrum() {
        let p = MasterParams::derive(1000.0, 0.064, 5, InType::Complex);
        assert_eq!(p.bins(), p.n());
    }

    #[test]
    fn block_published_after_l_samples() {
        let p = MasterParams::derive(1000.0, 0.064, 5, InType::Complex);
        let shared = MasterFilter::new(p);
        let mut input = MasterInput::new(Arc::clone(&shared), vec![NotchState::new(0, 0.01)]);
        assert_eq!(shared.latest_block(), None);
        let chunk = SampleChunk::Complex(vec![Complex::new(1.0, 0.0); p.l - 1]);
        assert_eq!(input.write(&chunk), 0);
        let chunk = SampleChunk::Complex(vec![Complex::new(1.0, 0.0); 1]);
        assert_eq!(input.write(&chunk), 1);
        assert_eq!(shared.latest_block(), Some(0));
    }

    #[test]
    fn cw_tone_lands_in_its_bin() {
        // Complex exponential at exactly bin 8 must concentrate there
        let p = MasterParams::derive(1000.0, 0.064, 5, InType::Complex);
        let n = p.n(); // 80
        let shared = MasterFilter::new(p);
        let mut input = MasterInput::new(Arc::clone(&shared), Vec::new());
        let samples: Vec<Complex<f32>> = (0..2 * p.l)
            .map(|i| {
                Complex::from_polar(1.0, 2.0 * std::f32::consts::PI * 8.0 * i as f32 / n as f32)
            })
            .collect();
        input.write(&SampleChunk::Complex(samples));
        // Second block: window fully coherent
        let peak = shared
            .ring
            .with_frame(1, |f| {
                let mut idx = 0;
                let mut best = 0.0f32;
                for (i, c) in f.iter().enumerate() {
                    if c.norm_sqr() > best {
                        best = c.norm_sqr();
                        idx = i;
                    }
                }
                (idx, best)
            })
            .expect("block 1 resident");
        assert_eq!(peak.0, 8);
        // Unnormalized FFT of a unit tone: |X| == N at the bin
        assert!((peak.1.sqrt() - n as f32).abs() < 1.0, "mag {}", peak.1.sqrt());
    }

    #[test]
    fn dc_notch_converges() {
        let p = MasterParams::derive(1000.0, 0.064, 5, InType::Complex);
        let shared = MasterFilter::new(p);
        let mut input = MasterInput::new(Arc::clone(&shared), vec![NotchState::new(0, 0.5)]);
        // Constant DC input; after several blocks the notch should have
        // absorbed most of the bin-0 energy
        for _ in 0..20 {
            input.write(&SampleChunk::Complex(vec![Complex::new(1.0, 0.0); p.l]));
        }
        let last = shared.latest_block().expect("published");
        let dc = shared
            .ring
            .with_frame(last, |f| f[0].norm())
            .expect("resident");
        assert!(dc < 1.0, "residual DC {dc}"); // raw would be N = 80
    }
}
