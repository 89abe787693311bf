// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Spectrum pseudo-demodulator: periodic power summaries instead of
//! audio. Master-ring bins are re-binned into `bin_count` output bins of
//! `bin_bw` Hz, power-integrated with an exponential time constant, and
//! shipped as BIN_DATA in status responses. No RTP is emitted.

use crate::channel::{Channel, LoopCtl};
use crate::dsp::cnrm;
use crate::dsp::window::make_window;
use crate::filter::InType;

pub fn run(chan: &mut Channel) -> LoopCtl {
    let p = chan.deps.master.params;
    let bin_count = chan.cfg.spectrum.bin_count;
    let bin_bw = chan.cfg.spectrum.bin_bw.max(p.samprate / p.n() as f64);
    let master_binw = p.samprate / p.n() as f64;
    // Master bins contributing to one output bin
    let span = (bin_bw / master_binw).round().max(1.0) as usize;
    let window = make_window(
        chan.cfg.spectrum.window,
        span,
        chan.cfg.spectrum.window_shape,
    );
    let wsum: f64 = window.iter().sum();
    // Normalize out both the window mass and the unnormalized FFT
    let norm = 1.0 / (wsum.max(1e-30) * (p.n() as f64) * (p.n() as f64));
    // Integration: per-block smoothing toward the new power
    let tc = chan.cfg.spectrum.integrate_tc.max(p.blocktime());
    let alpha = (p.blocktime() / tc).min(1.0) as f32;

    let mut powers = vec![0.0f32; bin_count];
    let mut fresh = vec![0.0f32; bin_count];

    loop {
        match chan.downconvert() {
            LoopCtl::Run => {}
            other => return other,
        }
        let blocknum = chan.next_block - 1;
        let shift = chan.bin_shift;
        let master_bins = chan.deps.master.ring.bins();

        // Gather is idempotent (fills a scratch vector); smoothing is
        // applied only once the frame read validated
        let gathered = chan.deps.master.ring.with_frame(blocknum, |fdomain| {
            for (j, out) in fresh.iter_mut().enumerate() {
                // Output bins in FFT order: DC..+max, then -max..-1
                let fj = if j <= bin_count / 2 {
                    j as i64
                } else {
                    j as i64 - bin_count as i64
                };
                let center = f64::from(shift) + fj as f64 * (bin_bw / master_binw);
                let first = (center - span as f64 / 2.0).round() as i64;
                let mut acc = 0.0f64;
                for (t, w) in window.iter().enumerate() {
                    let idx = first + t as i64;
                    let v = match p.in_type {
                        InType::Complex => {
                            let wrapped = idx.rem_euclid(master_bins as i64) as usize;
                            f64::from(cnrm(fdomain[wrapped]))
                        }
                        InType::Real => {
                            let a = idx.unsigned_abs() as usize;
                            if a < master_bins {
                                f64::from(cnrm(fdomain[a]))
                            } else {
                                0.0
                            }
                        }
                    };
                    acc += w * v;
                }
                *out = (acc * norm) as f32;
            }
        });
        if gathered.is_none() {
            continue; // frame recycled; skip this block
        }
        for (out, &f) in powers.iter_mut().zip(fresh.iter()) {
            *out += alpha * (f - *out);
        }
        chan.spectrum_bins = Some(powers.clone());
        // Power summaries only; listeners poll for BIN_DATA
        chan.sig.output_level = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use crate::dsp::window::{make_window, WindowType};

    #[test]
    fn rectangular_window_mass_matches_span() {
        let w = make_window(WindowType::Rectangular, 5, 0.0);
        let sum: f64 = w.iter().sum();
        assert_eq!(sum, 5.0);
    }
}
