// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Consumer half of the fast convolver: one per channel.
//!
//! Selects the master bins around the channel's bin shift, applies a
//! Kaiser-windowed brickwall response and runs a small inverse FFT to
//! produce complex baseband at the channel's output rate. An optional
//! secondary stage re-filters the baseband with a tighter passband over a
//! larger block (the primary then acts as a roofing filter).

use super::ring::FrameRing;
use super::InType;
use crate::dsp::window::kaiser;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Build the frequency response for an overlap-save section.
///
/// `n` bins of width `binw` Hz; passband [low, high] Hz; the ideal
/// brickwall is shaped by windowing its impulse response with a Kaiser
/// window of `m` taps. `scale` multiplies the whole response (used to
/// absorb the upstream unnormalized FFT).
fn build_response(n: usize, m: usize, binw: f64, low: f64, high: f64, beta: f64, scale: f32) -> Vec<Complex<f32>> {
    let mut planner = FftPlanner::<f32>::new();
    let ifft = planner.plan_fft_inverse(n);
    let fft = planner.plan_fft_forward(n);

    let mut buf: Vec<Complex<f32>> = (0..n)
        .map(|i| {
            let fi = if i <= n / 2 { i as f64 } else { i as f64 - n as f64 };
            let f = fi * binw;
            if f >= low && f <= high {
                Complex::new(1.0, 0.0)
            } else {
                Complex::new(0.0, 0.0)
            }
        })
        .collect();

    // Ideal response -> impulse -> Kaiser window m taps (circularly
    // centered on zero delay) -> back to frequency domain
    ifft.process(&mut buf);
    let inv_n = 1.0 / n as f32;
    for c in buf.iter_mut() {
        *c *= inv_n;
    }
    let win = kaiser(m, beta);
    let mut windowed = vec![Complex::new(0.0, 0.0); n];
    let half = m / 2;
    for (t, &w) in win.iter().enumerate() {
        let idx = (n + t - half) % n;
        windowed[idx] = buf[idx] * w as f32;
    }
    fft.process(&mut windowed);
    for c in windowed.iter_mut() {
        *c *= scale;
    }
    windowed
}

/// Per-channel downconverting filter section.
pub struct ChannelFilter {
    /// Inverse FFT size.
    n_out: usize,
    /// Baseband samples produced per master block.
    olen: usize,
    master_n: usize,
    master_bins: usize,
    in_type: InType,
    /// Output sample rate in Hz.
    rs: f64,
    /// Independent-sideband mode: the output carries the upper sideband
    /// audio in the real part and the lower in the imaginary part.
    pub isb: bool,
    response: Vec<Complex<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    workspace: Vec<Complex<f32>>,
    /// Most recent baseband output (olen samples).
    pub output: Vec<Complex<f32>>,
    /// Blocks skipped because the ring had already recycled them.
    pub drops: u64,
}

impl ChannelFilter {
    /// `master_n`/`master_bins`/`in_type`/`master_l` describe the forward
    /// half; `samprate_out` must be an integral multiple of the block rate.
    pub fn new(
        master_n: usize,
        master_bins: usize,
        master_l: usize,
        in_type: InType,
        master_samprate: f64,
        samprate_out: f64,
    ) -> Self {
        let n_out = ((master_n as f64 * samprate_out / master_samprate).round() as usize).max(1);
        let olen = ((master_l as f64 * n_out as f64 / master_n as f64).round() as usize).max(1);
        let mut planner = FftPlanner::<f32>::new();
        let ifft = planner.plan_fft_inverse(n_out);
        let scratch = vec![Complex::new(0.0, 0.0); ifft.get_inplace_scratch_len()];
        ChannelFilter {
            n_out,
            olen,
            master_n,
            master_bins,
            in_type,
            rs: samprate_out,
            isb: false,
            response: vec![Complex::new(0.0, 0.0); n_out],
            ifft,
            scratch,
            workspace: vec![Complex::new(0.0, 0.0); n_out],
            output: vec![Complex::new(0.0, 0.0); olen],
            drops: 0,
        }
    }

    pub fn olen(&self) -> usize {
        self.olen
    }

    pub fn n_out(&self) -> usize {
        self.n_out
    }

    /// Output sample rate, Hz.
    pub fn rs(&self) -> f64 {
        self.rs
    }

    /// Impulse response length of this section (for status reporting).
    pub fn fir_length(&self) -> usize {
        self.n_out - self.olen + 1
    }

    /// Install a Kaiser-windowed brickwall over [low, high] Hz.
    ///
    /// The response includes the 1/N normalization of the master's
    /// unnormalized forward FFT, so a unit passband tone comes out at
    /// unit amplitude.
    pub fn set_filter(&mut self, low: f64, high: f64, beta: f64) {
        // Rs/n_out == Fs/N by construction, so slave bins line up with
        // master bins
        let binw = self.rs / self.n_out as f64;
        let m = self.fir_length();
        let scale = 1.0 / self.master_n as f32;
        self.response = build_response(self.n_out, m, binw, low, high, beta, scale);
    }

    /// Execute one block: gather shifted bins from `ring` at `blocknum`,
    /// apply the response, inverse transform. Returns false when the
    /// frame was already recycled (the caller should skip ahead).
    pub fn execute(&mut self, ring: &FrameRing, blocknum: u64, shift: i32) -> bool {
        let n_out = self.n_out;
        let master_bins = self.master_bins;
        let master_n = self.master_n;
        let in_type = self.in_type;
        let response = &self.response;
        let workspace = &mut self.workspace;

        let ok = ring.with_frame(blocknum, |fdomain| {
            for i in 0..n_out {
                let fi = if i <= n_out / 2 {
                    i as i64
                } else {
                    i as i64 - n_out as i64
                };
                let idx = shift as i64 + fi;
                let v = match in_type {
                    InType::Complex => {
                        let wrapped = idx.rem_euclid(master_n as i64) as usize;
                        fdomain[wrapped]
                    }
                    InType::Real => {
                        if idx >= 0 && (idx as usize) < master_bins {
                            fdomain[idx as usize]
                        } else if idx < 0 && ((-idx) as usize) < master_bins {
                            fdomain[(-idx) as usize].conj()
                        } else {
                            Complex::new(0.0, 0.0)
                        }
                    }
                };
                workspace[i] = v * response[i];
            }
        });
        if ok.is_none() {
            self.drops += 1;
            return false;
        }
        if self.isb {
            // Split sidebands so one inverse FFT yields the upper
            // sideband in I and the lower in Q: for each +/- bin pair,
            //   Y[+k] = (A + j*conj(B)) / 2,  Y[-k] = (conj(A) + j*B) / 2
            let n = self.n_out;
            let a0 = self.workspace[0];
            self.workspace[0] = 0.5 * (a0 + Complex::new(0.0, 1.0) * a0.conj());
            for k in 1..n.div_ceil(2) {
                let a = self.workspace[k];
                let b = self.workspace[n - k];
                let j = Complex::new(0.0, 1.0);
                self.workspace[k] = 0.5 * (a + j * b.conj());
                self.workspace[n - k] = 0.5 * (a.conj() + j * b);
            }
        }
        self.ifft
            .process_with_scratch(&mut self.workspace, &mut self.scratch);
        // Overlap-save: discard the first n_out-olen samples
        let start = self.n_out - self.olen;
        self.output
            .copy_from_slice(&self.workspace[start..]);
        true
    }
}

/// Secondary (inner) overlap-save filter applied to the primary's
/// baseband output. Runs at 1:1 sample rate with a blocking factor B:
/// output appears every B primary blocks.
pub struct SecondaryFilter {
    /// Primary blocks per inner block.
    pub blocking: usize,
    l2: usize,
    n2: usize,
    window: Vec<Complex<f32>>,
    filled: usize,
    response: Vec<Complex<f32>>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    workspace: Vec<Complex<f32>>,
    pub output: Vec<Complex<f32>>,
    samprate: f64,
}

/// Next power of two >= n.
fn round2(n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

impl SecondaryFilter {
    /// `olen` is the primary's per-block output length.
    pub fn new(blocking: usize, olen: usize, samprate: f64) -> Self {
        let l2 = blocking.max(1) * olen;
        let n2 = round2(2 * l2); // >= 50% overlap
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n2);
        let ifft = planner.plan_fft_inverse(n2);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        SecondaryFilter {
            blocking: blocking.max(1),
            l2,
            n2,
            window: vec![Complex::new(0.0, 0.0); n2],
            filled: 0,
            response: vec![Complex::new(0.0, 0.0); n2],
            fft,
            ifft,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            workspace: vec![Complex::new(0.0, 0.0); n2],
            output: vec![Complex::new(0.0, 0.0); l2],
            samprate,
        }
    }

    pub fn fir_length(&self) -> usize {
        self.n2 - self.l2 + 1
    }

    pub fn blocksize(&self) -> usize {
        self.l2
    }

    pub fn set_filter(&mut self, low: f64, high: f64, beta: f64) {
        let binw = self.samprate / self.n2 as f64;
        let m = self.fir_length();
        let scale = 1.0 / self.n2 as f32;
        self.response = build_response(self.n2, m, binw, low, high, beta, scale);
    }

    /// Accumulate one primary block of baseband. Returns true when an
    /// inner block completed and [`output`](Self::output) holds l2 fresh
    /// samples.
    pub fn write(&mut self, samples: &[Complex<f32>]) -> bool {
        let history = self.n2 - self.l2;
        for &s in samples {
            self.window[history + self.filled] = s;
            self.filled += 1;
            if self.filled == self.l2 {
                self.execute();
                return true;
            }
        }
        false
    }

    fn execute(&mut self) {
        self.workspace.copy_from_slice(&self.window);
        self.fft
            .process_with_scratch(&mut self.workspace, &mut self.scratch);
        for (w, r) in self.workspace.iter_mut().zip(self.response.iter()) {
            *w *= r;
        }
        self.ifft
            .process_with_scratch(&mut self.workspace, &mut self.scratch);
        let history = self.n2 - self.l2;
        self.output.copy_from_slice(&self.workspace[history..]);
        // Slide the overlap for the next inner block
        self.window.copy_within(self.l2.., 0);
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::master::{MasterFilter, MasterInput, MasterParams, SampleChunk};

    /// End-to-end law: a pure complex exponential at frequency f comes out
    /// of the downconverter as a DC phasor with the filter's passband gain
    /// (unity here), once the overlap window is fully charged.
    #[test]
    fn cw_tone_downconverts_to_dc() {
        let fs = 8000.0;
        let p = MasterParams::derive(fs, 0.020, 5, InType::Complex); // L=160 M=41 N=200
        let shared = MasterFilter::new(p);
        let mut input = MasterInput::new(std::sync::Arc::clone(&shared), Vec::new());

        let rs = 2000.0; // n_out = 50, olen = 40
        let mut slave = ChannelFilter::new(p.n(), p.bins(), p.l, InType::Complex, fs, rs);
        slave.set_filter(-800.0, 800.0, 11.0);

        // Tone exactly on a master bin: bin 10 of 200 -> 400 Hz
        let f = 10.0 * fs / p.n() as f64;
        let samples: Vec<Complex<f32>> = (0..4 * p.l)
            .map(|i| {
                Complex::from_polar(1.0, (2.0 * std::f64::consts::PI * f * i as f64 / fs) as f32)
            })
            .collect();
        input.write(&SampleChunk::Complex(samples));

        // Block 3: window fully charged with the tone
        assert!(slave.execute(&shared.ring, 3, 10));
        for (i, s) in slave.output.iter().enumerate() {
            let mag = s.norm();
            assert!((mag - 1.0).abs() < 0.02, "sample {i}: magnitude {mag}");
        }
        // Shifted exactly onto its bin, the output should be pure DC:
        // successive samples keep the same phase
        let d = (slave.output[1] * slave.output[0].conj()).arg();
        assert!(d.abs() < 0.02, "phase step {d}");
    }

    #[test]
    fn stopband_tone_is_rejected() {
        let fs = 8000.0;
        let p = MasterParams::derive(fs, 0.020, 5, InType::Complex);
        let shared = MasterFilter::new(p);
        let mut input = MasterInput::new(std::sync::Arc::clone(&shared), Vec::new());

        let mut slave = ChannelFilter::new(p.n(), p.bins(), p.l, InType::Complex, fs, 2000.0);
        slave.set_filter(-200.0, 200.0, 11.0);

        // Tone at bin 10 (400 Hz), but the channel is centered at bin 30:
        // 800 Hz away, far outside the 200 Hz passband
        let f = 10.0 * fs / p.n() as f64;
        let samples: Vec<Complex<f32>> = (0..4 * p.l)
            .map(|i| {
                Complex::from_polar(1.0, (2.0 * std::f64::consts::PI * f * i as f64 / fs) as f32)
            })
            .collect();
        input.write(&SampleChunk::Complex(samples));

        assert!(slave.execute(&shared.ring, 3, 30));
        let peak = slave.output.iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        assert!(peak < 0.1, "stopband leakage {peak}");
    }

    #[test]
    fn lagged_reader_reports_drop() {
        let fs = 8000.0;
        let p = MasterParams::derive(fs, 0.020, 5, InType::Complex);
        let shared = MasterFilter::new(p);
        let mut input = MasterInput::new(std::sync::Arc::clone(&shared), Vec::new());
        let mut slave = ChannelFilter::new(p.n(), p.bins(), p.l, InType::Complex, fs, 2000.0);
        slave.set_filter(-500.0, 500.0, 11.0);

        // Publish far more blocks than the ring holds
        for _ in 0..12 {
            input.write(&SampleChunk::Complex(vec![Complex::new(0.0, 0.0); p.l]));
        }
        assert!(!slave.execute(&shared.ring, 0, 0)); // long gone
        assert_eq!(slave.drops, 1);
        assert!(slave.execute(&shared.ring, 11, 0)); // latest is fine
    }

    #[test]
    fn secondary_filter_blocks_accumulate() {
        let mut f2 = SecondaryFilter::new(4, 40, 2000.0);
        f2.set_filter(-300.0, 300.0, 11.0);
        assert_eq!(f2.blocksize(), 160);
        let block = vec![Complex::new(0.5, 0.0); 40];
        assert!(!f2.write(&block));
        assert!(!f2.write(&block));
        assert!(!f2.write(&block));
        assert!(f2.write(&block)); // fourth primary block completes the inner one
        assert_eq!(f2.output.len(), 160);
    }

    #[test]
    fn secondary_filter_passes_dc() {
        let mut f2 = SecondaryFilter::new(2, 64, 1000.0);
        f2.set_filter(-100.0, 100.0, 11.0);
        let block = vec![Complex::new(1.0, 0.0); 64];
        // Charge history across several inner blocks
        let mut done = 0;
        for _ in 0..8 {
            if f2.write(&block) {
                done += 1;
            }
        }
        assert_eq!(done, 4);
        let mid = f2.output[f2.output.len() / 2];
        assert!((mid.re - 1.0).abs() < 1e-2, "dc gain {}", mid.re);
        assert!(mid.im.abs() < 1e-3);
    }
}
