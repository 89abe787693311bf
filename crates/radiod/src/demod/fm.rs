// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Narrowband FM demodulator: arctan-differential discriminator with
//! optional threshold extension, de-emphasis, subaudible tone detection
//! and SNR squelch.

use super::{baseband_snr, Squelch};
use crate::channel::{Channel, LoopCtl};
use crate::dsp::goertzel::ToneBank;
use num_complex::Complex;

/// Tone integration period, seconds.
const TONE_PERIOD: f32 = 0.24;
/// Below this SNR (power ratio, ~12 dB) the extended estimator kicks in.
const EXTEND_SNR: f32 = 16.0;

/// Classic discriminator: phase difference of successive samples, in
/// cycles per sample.
#[inline]
fn discriminate(prev: &mut Complex<f32>, z: Complex<f32>) -> f32 {
    let d = z * prev.conj();
    *prev = z;
    d.im.atan2(d.re) / std::f32::consts::TAU
}

/// Threshold-extended variant: weight each phase step by its amplitude
/// relative to the running average, shrinking the full-cycle clicks that
/// dominate below threshold (the Rice click model; impulses arrive with
/// deep amplitude nulls, so de-weighting nulls removes most clicks).
#[inline]
fn discriminate_extended(prev: &mut Complex<f32>, z: Complex<f32>, avg_mag2: f32) -> f32 {
    let d = z * prev.conj();
    *prev = z;
    let w = if avg_mag2 > 0.0 {
        (d.norm() / avg_mag2).min(1.0)
    } else {
        1.0
    };
    w * d.im.atan2(d.re) / std::f32::consts::TAU
}

pub fn run(chan: &mut Channel) -> LoopCtl {
    let rs = chan
        .filter
        .as_ref()
        .map_or(f64::from(chan.cfg.samprate), |f| f.rs()) as f32;
    let mut squelch = Squelch::default();
    let mut prev = Complex::new(0.0f32, 0.0);
    let mut deemph_state = 0.0f32;
    let mut tone_bank = ToneBank::new(rs);
    let mut tone_samples = 0usize;
    let tone_period_samples = (TONE_PERIOD * rs) as usize;
    let mut audio: Vec<f32> = Vec::new();
    let mut freq_hz: Vec<f32> = Vec::new();

    loop {
        match chan.downconvert() {
            LoopCtl::Run => {}
            other => return other,
        }

        let snr = baseband_snr(chan);
        chan.sig.snr = snr;
        let frames = chan.baseband.len() as u32;
        if !squelch.gate(chan, snr) {
            chan.sig.output_level = 0.0;
            chan.sender.send_silence(frames);
            continue;
        }

        // Discriminate into instantaneous frequency
        freq_hz.clear();
        let extend = chan.cfg.threshold_extend && snr < EXTEND_SNR;
        // |z*conj(prev)| averages to the mean squared magnitude
        let avg_mag2 = chan.sig.bb_power.max(1e-20);
        let mut sum = 0.0f32;
        let mut peak = 0.0f32;
        for &z in &chan.baseband {
            let cycles = if extend {
                discriminate_extended(&mut prev, z, avg_mag2)
            } else {
                discriminate(&mut prev, z)
            };
            let f = cycles * rs;
            sum += f;
            peak = peak.max(f.abs());
            freq_hz.push(f);
        }
        let n = chan.baseband.len().max(1) as f32;
        chan.sig.foffset = sum / n;
        chan.sig.peak_deviation = peak;

        // Subaudible tone bank, updated once per integration period
        for &f in &freq_hz {
            tone_bank.update(f);
        }
        tone_samples += freq_hz.len();
        if tone_samples >= tone_period_samples {
            let (tone, energy, total) = tone_bank.strongest();
            if energy > 0.5 * total {
                chan.sig.pl_tone = tone;
                // Goertzel magnitude of a sinusoid of amplitude a over n
                // samples is a*n/2; the input is Hz so this is deviation
                chan.sig.pl_deviation = 2.0 * energy.sqrt() / tone_samples as f32;
            } else {
                chan.sig.pl_tone = 0.0;
                chan.sig.pl_deviation = f32::NAN;
            }
            tone_bank.reset();
            tone_samples = 0;
        }

        // Tone squelch: when a specific tone is configured, audio passes
        // only while that tone is the one being received
        if chan.cfg.tone_freq > 0.0 {
            let detected = chan.sig.pl_tone;
            if (detected - chan.cfg.tone_freq).abs() > 1.0 {
                chan.sig.output_level = 0.0;
                chan.sender.send_silence(frames);
                continue;
            }
        }

        // Scale so full deviation (half the passband) hits full scale,
        // then de-emphasize
        let full_dev = ((chan.cfg.high - chan.cfg.low) as f32 / 2.0).max(1.0);
        let rate = chan.cfg.deemph_rate;
        let dgain = if rate > 0.0 { chan.cfg.deemph_gain } else { 1.0 };
        audio.clear();
        let stereo = chan.cfg.channels == 2;
        let mut energy = 0.0f64;
        for &f in &freq_hz {
            let mut s = f / full_dev;
            if rate > 0.0 {
                deemph_state = s + rate * (deemph_state - s);
                s = deemph_state * dgain;
            }
            energy += f64::from(s * s);
            audio.push(s);
            if stereo {
                audio.push(s);
            }
        }
        chan.sig.output_level = (energy / f64::from(n)) as f32;
        chan.sender.send_audio(&audio);
    }
}
