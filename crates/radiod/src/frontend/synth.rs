// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Built-in synthetic front end: CW tones plus white Gaussian noise at a
//! configurable density. Stands in for hardware in tests and demos, and
//! exercises the full driver contract including runtime retuning.
//!
//! Config keys in its hardware section:
//! - `samprate` (Hz, default 192000), `complex` (bool, default true)
//! - `frequency` (initial LO, default 10 MHz)
//! - `tone` / `tone0..9` (RF frequency list), `tone-level` (dBFS, default -20)
//! - `noise-density` (dB relative to full scale per Hz, default -160)
//! - `description`

use super::{Frontend, FrontendCtx, FrontendDriver, FrontendError, FrontendInfo, TunerState};
use crate::config::{parse_frequency, ConfigSection};
use crate::dsp::db2voltage;
use crate::filter::master::SampleChunk;
use crate::protocol::gps_time_ns;
use log::{debug, info};
use num_complex::Complex;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SynthDriver {
    samprate: f64,
    isreal: bool,
    tones: Vec<f64>,
    tone_amp: f32,
    /// Per-component standard deviation of the additive noise.
    noise_sigma: f32,
}

impl SynthDriver {
    pub fn from_config(
        section: &ConfigSection,
    ) -> Result<(Box<dyn FrontendDriver>, FrontendInfo, TunerState), FrontendError> {
        let samprate = section.get_f64("samprate", 192_000.0);
        if samprate <= 0.0 {
            return Err(FrontendError::Config(format!(
                "bad samprate {samprate}"
            )));
        }
        let isreal = !section.get_bool("complex", true);
        let frequency = match section.get("frequency") {
            Some(f) => {
                let v = parse_frequency(f, true);
                if v < 0.0 {
                    return Err(FrontendError::Config(format!("bad frequency '{f}'")));
                }
                v
            }
            None => 10.0e6,
        };
        let mut tones = Vec::new();
        for i in -1..10i32 {
            let key = if i < 0 {
                "tone".to_string()
            } else {
                format!("tone{i}")
            };
            let Some(list) = section.get(&key) else {
                continue;
            };
            for tok in list.split_ascii_whitespace() {
                let f = parse_frequency(tok, true);
                if f >= 0.0 {
                    tones.push(f);
                } else {
                    debug!("[synth] can't parse tone '{tok}'");
                }
            }
        }
        let tone_amp = db2voltage(section.get_f64("tone-level", -20.0) as f32);
        // noise-density is dBFS/Hz; per-sample variance spreads it over Fs
        let n0_db = section.get_f64("noise-density", -160.0);
        let variance = 10.0f64.powf(n0_db / 10.0) * samprate;
        let noise_sigma = if isreal {
            variance.sqrt() as f32
        } else {
            (variance / 2.0).sqrt() as f32 // split between I and Q
        };

        let info = FrontendInfo {
            description: section.get_string("description", "synthetic source"),
            samprate,
            isreal,
            bitspersample: 16,
            direct_conversion: false,
        };
        let tuner = TunerState {
            frequency,
            min_if: if isreal { 0.0 } else { -samprate / 2.0 },
            max_if: samprate / 2.0,
            rf_gain: 0.0,
            ..Default::default()
        };
        Ok((
            Box::new(SynthDriver {
                samprate,
                isreal,
                tones,
                tone_amp,
                noise_sigma,
            }),
            info,
            tuner,
        ))
    }
}

impl FrontendDriver for SynthDriver {
    fn start(&mut self, ctx: FrontendCtx) -> Result<(), FrontendError> {
        let samprate = self.samprate;
        let isreal = self.isreal;
        let tones = self.tones.clone();
        let tone_amp = self.tone_amp;
        let noise_sigma = self.noise_sigma;
        info!(
            "[synth] starting: {samprate} Hz {}, {} tones, sigma {noise_sigma:.3e}",
            if isreal { "real" } else { "complex" },
            tones.len()
        );
        std::thread::Builder::new()
            .name("fe-synth".into())
            .spawn(move || reader(&ctx, samprate, isreal, &tones, tone_amp, noise_sigma))
            .map_err(FrontendError::Io)?;
        Ok(())
    }

    fn tune(&mut self, hz: f64) -> Result<f64, FrontendError> {
        // Ideal oscillator: lands exactly where asked
        Ok(hz)
    }
}

fn reader(
    ctx: &FrontendCtx,
    samprate: f64,
    isreal: bool,
    tones: &[f64],
    tone_amp: f32,
    noise_sigma: f32,
) {
    let frontend: &Arc<Frontend> = &ctx.frontend;
    let chunk_len = (samprate / 100.0).round().max(1.0) as usize; // 10 ms
    let chunk_dur = Duration::from_secs_f64(chunk_len as f64 / samprate);
    let mut rng = rand::thread_rng();
    let mut phases = vec![0.0f64; tones.len()];
    let mut next_deadline = Instant::now();

    while !ctx.terminate.load(Ordering::Relaxed) {
        let lo = frontend.frequency();
        let chunk = if isreal {
            let mut v = vec![0.0f32; chunk_len];
            fill_real(&mut v, samprate, lo, tones, &mut phases, tone_amp, noise_sigma, &mut rng);
            SampleChunk::Real(v)
        } else {
            let mut v = vec![Complex::new(0.0f32, 0.0); chunk_len];
            fill_complex(&mut v, samprate, lo, tones, &mut phases, tone_amp, noise_sigma, &mut rng);
            SampleChunk::Complex(v)
        };
        frontend
            .samples
            .fetch_add(chunk_len as u64, Ordering::Relaxed);
        frontend
            .samples_since_over
            .fetch_add(chunk_len as u64, Ordering::Relaxed);
        frontend.timestamp.store(gps_time_ns(), Ordering::Relaxed);
        if ctx.chunks.send(chunk).is_err() {
            break; // engine went away
        }
        next_deadline += chunk_dur;
        let now = Instant::now();
        if next_deadline > now {
            std::thread::sleep(next_deadline - now);
        } else {
            // fell behind; resync rather than bursting
            next_deadline = now;
        }
    }
    debug!("[synth] reader exiting");
}

/// Box-Muller gaussian pair.
fn gaussian(rng: &mut impl Rng) -> (f32, f32) {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    let r = (-2.0 * u1.ln()).sqrt();
    let (s, c) = (2.0 * std::f32::consts::PI * u2).sin_cos();
    (r * c, r * s)
}

#[allow(clippy::too_many_arguments)]
fn fill_complex(
    out: &mut [Complex<f32>],
    samprate: f64,
    lo: f64,
    tones: &[f64],
    phases: &mut [f64],
    amp: f32,
    sigma: f32,
    rng: &mut impl Rng,
) {
    for s in out.iter_mut() {
        let (ni, nq) = gaussian(rng);
        *s = Complex::new(sigma * ni, sigma * nq);
    }
    for (tone, phase) in tones.iter().zip(phases.iter_mut()) {
        let step = (tone - lo) / samprate; // cycles/sample at IF
        for s in out.iter_mut() {
            let (im, re) = (2.0 * std::f64::consts::PI * *phase).sin_cos();
            *s += Complex::new(amp * re as f32, amp * im as f32);
            *phase = (*phase + step).fract();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_real(
    out: &mut [f32],
    samprate: f64,
    lo: f64,
    tones: &[f64],
    phases: &mut [f64],
    amp: f32,
    sigma: f32,
    rng: &mut impl Rng,
) {
    for s in out.iter_mut() {
        let (n, _) = gaussian(rng);
        *s = sigma * n;
    }
    for (tone, phase) in tones.iter().zip(phases.iter_mut()) {
        let step = (tone - lo) / samprate;
        for s in out.iter_mut() {
            *s += amp * (2.0 * std::f64::consts::PI * *phase).cos() as f32;
            *phase = (*phase + step).fract();
        }
    }
}
