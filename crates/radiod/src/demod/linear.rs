// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Linear demodulator: coherent SSB/CW/AM/DSB/ISB with optional carrier
//! PLL, AGC and envelope detection.

use super::{baseband_snr, Squelch};
use crate::channel::{Channel, LoopCtl};
use crate::dsp::osc::{Osc, Pll};
use num_complex::Complex;

/// PLL damping: 1/sqrt(2), the usual critically-flat choice.
const PLL_DAMPING: f64 = std::f64::consts::FRAC_1_SQRT_2;
/// Coherent-to-total power ratio above which the PLL counts as locked.
const LOCK_THRESHOLD: f32 = 0.5;

pub fn run(chan: &mut Channel) -> LoopCtl {
    let rs = f64::from(chan.cfg.samprate);
    let mut pll = Pll::new();
    pll.set_params(chan.cfg.pll_bw / rs, PLL_DAMPING);
    let mut shift_osc = Osc::new();
    let mut squelch = Squelch::default();
    let mut hang_count = 0.0f32;
    let mut audio: Vec<f32> = Vec::new();

    loop {
        match chan.downconvert() {
            LoopCtl::Run => {}
            other => return other,
        }

        // Carrier tracking. Square mode squares the signal to strip DSB
        // modulation, so the tracked phase runs at twice the carrier.
        let mut snr = baseband_snr(chan);
        if chan.cfg.pll {
            let mut coherent = Complex::<f32>::new(0.0, 0.0);
            let mut total = 0.0f32;
            for z in chan.baseband.iter_mut() {
                let vco = pll.vco();
                let rot = Complex::new(vco.re as f32, vco.im as f32).conj();
                let y = if chan.cfg.square { *z * *z } else { *z };
                let mixed = y * if chan.cfg.square { rot * rot } else { rot };
                let err = f64::from(mixed.im.atan2(mixed.re)) / std::f64::consts::TAU;
                pll.run(if chan.cfg.square { err / 2.0 } else { err });
                *z *= rot;
                coherent += *z;
                total += z.norm_sqr();
            }
            let n = chan.baseband.len().max(1) as f32;
            let lock_metric = if total > 0.0 {
                coherent.norm_sqr() / (n * total)
            } else {
                0.0
            };
            chan.sig.pll_lock = lock_metric > LOCK_THRESHOLD;
            chan.sig.pll_phase = (pll.vco_phase() * std::f64::consts::TAU) as f32;
            chan.sig.pll_wraps = pll.wraps();
            chan.sig.foffset = (pll.freq() * rs) as f32;
            // Coherent energy against the incoherent remainder
            if lock_metric < 1.0 {
                snr = lock_metric / (1.0 - lock_metric);
            }
        } else {
            chan.sig.pll_lock = false;
        }
        chan.sig.snr = snr;

        let frames = chan.baseband.len() as u32;
        if !squelch.gate(chan, snr) {
            chan.sig.output_level = 0.0;
            chan.sender.send_silence(frames);
            continue;
        }

        // Post-demod frequency shift (CW offset and friends)
        if chan.cfg.shift != 0.0 {
            shift_osc.set(chan.cfg.shift / rs, 0.0);
            for z in chan.baseband.iter_mut() {
                let ph = shift_osc.step();
                *z *= Complex::new(ph.re as f32, ph.im as f32);
            }
        }

        // AGC: instant attack, hang, then geometric recovery, with the
        // gain ceiling held so the noise floor stays below threshold
        let peak = chan
            .baseband
            .iter()
            .map(|z| z.norm())
            .fold(0.0f32, f32::max);
        if chan.cfg.agc {
            let mut gain = chan.cfg.gain;
            if peak * gain > chan.cfg.headroom && peak > 0.0 {
                gain = chan.cfg.headroom / peak;
                hang_count = chan.cfg.hangtime;
            } else if hang_count > 0.0 {
                hang_count -= 1.0;
            } else {
                gain *= chan.cfg.recovery_rate;
            }
            let bw = (chan.cfg.high - chan.cfg.low).abs().max(1.0);
            let noise_amp = (chan.sig.n0.max(0.0) * bw).sqrt() as f32;
            if noise_amp > 0.0 {
                let max_gain = chan.cfg.threshold * chan.cfg.headroom / noise_amp;
                if gain > max_gain {
                    gain = max_gain;
                }
            }
            chan.cfg.gain = gain;
        }
        let gain = chan.cfg.gain;

        audio.clear();
        let stereo = chan.cfg.channels == 2;
        let mut energy = 0.0f64;
        for z in &chan.baseband {
            let (l, r) = if chan.cfg.isb {
                // Filter already split the sidebands into I and Q
                (z.re, z.im)
            } else if chan.cfg.env {
                let e = z.norm();
                if stereo {
                    (z.re, e)
                } else {
                    (e, e)
                }
            } else if stereo {
                (z.re, z.im)
            } else {
                (z.re, z.re)
            };
            let l = l * gain;
            let r = r * gain;
            energy += f64::from(l * l + r * r) / 2.0;
            audio.push(l);
            if stereo {
                audio.push(r);
            }
        }
        chan.sig.output_level = (energy / chan.baseband.len().max(1) as f64) as f32;
        chan.sender.send_audio(&audio);
    }
}

#[cfg(test)]
mod tests {
    use crate::dsp::osc::Pll;
    use num_complex::Complex;

    /// The carrier loop must pull in a small frequency offset and leave
    /// the rotated signal concentrated in the real part.
    #[test]
    fn pll_rotates_carrier_to_real_axis() {
        let rs = 12_000.0f64;
        let mut pll = Pll::new();
        pll.set_params(100.0 / rs, std::f64::consts::FRAC_1_SQRT_2);
        let offset = 5.0 / rs; // 5 Hz carrier offset
        let mut phase = 0.0f64;
        let mut coherent = Complex::<f32>::new(0.0, 0.0);
        let mut total = 0.0f32;
        let n = 48_000;
        for i in 0..n {
            phase = (phase + offset).fract();
            let z = Complex::new(
                (std::f64::consts::TAU * phase).cos() as f32,
                (std::f64::consts::TAU * phase).sin() as f32,
            );
            let vco = pll.vco();
            let rot = Complex::new(vco.re as f32, vco.im as f32).conj();
            let mixed = z * rot;
            let err = f64::from(mixed.im.atan2(mixed.re)) / std::f64::consts::TAU;
            pll.run(err);
            if i > n / 2 {
                let y = z * rot;
                coherent += y;
                total += y.norm_sqr();
            }
        }
        let lock = coherent.norm_sqr() / ((n / 2) as f32 * total.max(1e-9));
        assert!(lock > 0.9, "lock metric {lock}");
        assert!(
            (pll.freq() - offset).abs() < 1.0 / rs,
            "tracked {} want {offset}",
            pll.freq()
        );
    }
}
