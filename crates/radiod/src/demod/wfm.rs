// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Wideband broadcast FM with stereo pilot decode.
//!
//! The channel filter runs at a wide composite rate (~384 kHz); the
//! discriminator output is the multiplex signal. A PLL recovers the
//! 19 kHz pilot, its doubled reference demodulates the 38 kHz L-R
//! subcarrier, and the matrix plus a fractional resampler produce L/R
//! audio at the configured output rate (typically 48 kHz).

use super::{baseband_snr, Squelch};
use crate::channel::{Channel, LoopCtl};
use crate::dsp::osc::Pll;
use num_complex::Complex;

/// Pilot frequency, Hz.
const PILOT_FREQ: f64 = 19_000.0;
/// Pilot detection threshold: fraction of full deviation.
const PILOT_MIN: f32 = 0.002;
/// Broadcast peak deviation, Hz; normalizes the discriminator output.
const FULL_DEVIATION: f32 = 75_000.0;

/// Two-pole IIR lowpass (cascaded one-poles).
#[derive(Debug, Clone, Default)]
struct Lowpass2 {
    a: f32,
    s1: f32,
    s2: f32,
}

impl Lowpass2 {
    fn new(corner_hz: f32, samprate: f32) -> Self {
        Lowpass2 {
            a: (-std::f32::consts::TAU * corner_hz / samprate).exp(),
            s1: 0.0,
            s2: 0.0,
        }
    }

    #[inline]
    fn filter(&mut self, x: f32) -> f32 {
        self.s1 = x + self.a * (self.s1 - x);
        self.s2 = self.s1 + self.a * (self.s2 - self.s1);
        self.s2
    }
}

/// Linear-interpolation fractional resampler.
#[derive(Debug, Clone)]
struct Resampler {
    step: f64,
    pos: f64,
    last: (f32, f32),
}

impl Resampler {
    fn new(in_rate: f64, out_rate: f64) -> Self {
        Resampler {
            step: in_rate / out_rate,
            pos: 0.0,
            last: (0.0, 0.0),
        }
    }

    /// Push one input frame; emits zero or more output frames.
    #[inline]
    fn push(&mut self, l: f32, r: f32, mut emit: impl FnMut(f32, f32)) {
        // pos is the fractional input position of the next output frame,
        // measured back from the current input frame
        while self.pos < 1.0 {
            let frac = self.pos as f32;
            let ol = self.last.0 + frac * (l - self.last.0);
            let or = self.last.1 + frac * (r - self.last.1);
            emit(ol, or);
            self.pos += self.step;
        }
        self.pos -= 1.0;
        self.last = (l, r);
    }
}

pub fn run(chan: &mut Channel) -> LoopCtl {
    let composite_rate = chan
        .filter
        .as_ref()
        .map_or(384_000.0, |f| f.rs());
    let audio_rate = f64::from(chan.cfg.samprate);

    let mut squelch = Squelch::default();
    let mut prev = Complex::new(0.0f32, 0.0);
    let mut pilot_pll = Pll::new();
    let f_pilot = PILOT_FREQ / composite_rate;
    pilot_pll.set_params(50.0 / composite_rate, std::f64::consts::FRAC_1_SQRT_2);
    pilot_pll.set_limits(f_pilot * 0.98, f_pilot * 1.02);
    pilot_pll.set_freq(f_pilot);
    let mut pilot_level = 0.0f32;

    let mut lp_sum = Lowpass2::new(15_000.0, composite_rate as f32);
    let mut lp_diff = Lowpass2::new(15_000.0, composite_rate as f32);
    let mut lp_pilot = Lowpass2::new(500.0, composite_rate as f32);
    let mut resampler = Resampler::new(composite_rate, audio_rate);
    let mut deemph = (0.0f32, 0.0f32);
    let mut audio: Vec<f32> = Vec::new();

    loop {
        match chan.downconvert() {
            LoopCtl::Run => {}
            other => return other,
        }

        let snr = baseband_snr(chan);
        chan.sig.snr = snr;
        // Output frames this block at the audio rate
        let out_frames =
            (chan.baseband.len() as f64 * audio_rate / composite_rate).round() as u32;
        if !squelch.gate(chan, snr) {
            chan.sig.output_level = 0.0;
            chan.sender.send_silence(out_frames);
            continue;
        }

        audio.clear();
        let stereo = chan.cfg.channels == 2;
        let rate = chan.cfg.deemph_rate;
        let dgain = if rate > 0.0 { chan.cfg.deemph_gain } else { 1.0 };
        let mut peak = 0.0f32;
        let mut energy = 0.0f64;
        for &z in &chan.baseband {
            let d = z * prev.conj();
            prev = z;
            let cycles = d.im.atan2(d.re) / std::f32::consts::TAU;
            let freq_hz = cycles * composite_rate as f32;
            peak = peak.max(freq_hz.abs());
            let mpx = freq_hz / FULL_DEVIATION; // normalized composite

            // Pilot recovery: for a sine pilot the quadrature (cos)
            // product nulls at lock, the in-phase product peaks
            let vco = pilot_pll.vco();
            let err = lp_pilot.filter(mpx * vco.re as f32);
            pilot_pll.run(f64::from(err));
            pilot_level += 0.0001 * ((mpx * vco.im as f32).abs() - pilot_level);

            let (l, r) = if stereo && pilot_level > PILOT_MIN {
                let sum = lp_sum.filter(mpx);
                // Doubled pilot demodulates the 38 kHz DSB subcarrier
                let carrier38 = 2.0 * (vco.re * vco.re - vco.im * vco.im) as f32;
                let diff = lp_diff.filter(2.0 * mpx * carrier38);
                (sum + diff, sum - diff)
            } else {
                let m = lp_sum.filter(mpx);
                (m, m)
            };

            resampler.push(l, r, |ol, or| {
                let (mut ol, mut or) = (ol, or);
                if rate > 0.0 {
                    deemph.0 = ol + rate * (deemph.0 - ol);
                    deemph.1 = or + rate * (deemph.1 - or);
                    ol = deemph.0 * dgain;
                    or = deemph.1 * dgain;
                }
                energy += f64::from(ol * ol + or * or) / 2.0;
                audio.push(ol);
                if stereo {
                    audio.push(or);
                }
            });
        }
        chan.sig.peak_deviation = peak;
        chan.sig.pll_lock = pilot_level > PILOT_MIN;
        chan.sig.pl_tone = if chan.sig.pll_lock {
            PILOT_FREQ as f32
        } else {
            0.0
        };
        let frames = audio.len() / chan.cfg.channels.max(1) as usize;
        chan.sig.output_level = (energy / frames.max(1) as f64) as f32;
        chan.sender.send_audio(&audio);
    }
}
