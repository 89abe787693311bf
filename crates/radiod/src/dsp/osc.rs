// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Complex quadrature oscillator and second-order PLL.
//!
//! The oscillator is a rotating phasor stepped once per sample; roundoff
//! drift is bounded by renormalizing the phasor magnitude every
//! [`RENORM_RATE`] steps. Frequencies are in cycles/sample, sweep rates in
//! cycles/sample^2 so a Doppler rate folds into a second-order phase term.

use super::cispi;
use num_complex::Complex64;

/// Renormalize the phasor this often.
const RENORM_RATE: u32 = 16384;

/// Quadrature oscillator with optional linear frequency sweep.
#[derive(Debug, Clone)]
pub struct Osc {
    /// Current phase as a unit phasor. Multiplied externally by block
    /// phase corrections, so it is public.
    pub phasor: Complex64,
    freq: f64,
    rate: f64,
    phasor_step: Complex64,
    phasor_step_step: Complex64,
    steps: u32,
}

impl Osc {
    pub fn new() -> Self {
        Osc {
            phasor: Complex64::new(1.0, 0.0),
            freq: 0.0,
            rate: 0.0,
            phasor_step: Complex64::new(1.0, 0.0),
            phasor_step_step: Complex64::new(1.0, 0.0),
            steps: RENORM_RATE,
        }
    }

    /// Set frequency (cycles/sample) and sweep rate (cycles/sample^2).
    ///
    /// Phase is preserved; only the step phasors change.
    pub fn set(&mut self, freq: f64, rate: f64) {
        if freq != self.freq {
            self.freq = freq;
            self.phasor_step = cispi(2.0 * freq);
        }
        if rate != self.rate {
            self.rate = rate;
            self.phasor_step_step = cispi(2.0 * rate);
        }
    }

    pub fn freq(&self) -> f64 {
        self.freq
    }

    /// Advance one sample; returns the phasor *before* the step.
    #[inline]
    pub fn step(&mut self) -> Complex64 {
        self.steps -= 1;
        if self.steps == 0 {
            self.renorm();
        }
        let r = self.phasor;
        if self.rate != 0.0 {
            self.phasor_step *= self.phasor_step_step;
        }
        self.phasor *= self.phasor_step;
        r
    }

    fn renorm(&mut self) {
        self.steps = RENORM_RATE;
        self.phasor /= self.phasor.norm();
        if self.rate != 0.0 {
            self.phasor_step /= self.phasor_step.norm();
        }
    }
}

impl Default for Osc {
    fn default() -> Self {
        Self::new()
    }
}

/// Second-order digital phase-locked loop.
///
/// Proportional + integral loop filter with gains derived from the loop
/// bandwidth (cycles/sample) and damping factor. The VCO frequency is
/// clamped to configurable limits; phase wraps are counted so long-term
/// frequency offset can be reported.
#[derive(Debug, Clone)]
pub struct Pll {
    k1: f64,
    k2: f64,
    bw: f64,
    damping: f64,
    lower_limit: f64,
    upper_limit: f64,
    /// Integrator state: VCO frequency, cycles/sample.
    integrator: f64,
    /// VCO phase in cycles, wrapped to [-1, 1].
    vco_phase: f64,
    wraps: i64,
}

impl Pll {
    pub fn new() -> Self {
        let mut pll = Pll {
            k1: 0.0,
            k2: 0.0,
            bw: 0.0,
            damping: 0.0,
            lower_limit: -0.5,
            upper_limit: 0.5,
            integrator: 0.0,
            vco_phase: 0.0,
            wraps: 0,
        };
        pll.set_params(0.01, std::f64::consts::FRAC_1_SQRT_2);
        pll
    }

    /// Clamp VCO frequency to [low, high] cycles/sample.
    pub fn set_limits(&mut self, low: f64, high: f64) {
        let (low, high) = if low > high { (high, low) } else { (low, high) };
        self.lower_limit = low;
        self.upper_limit = high;
    }

    /// Set loop bandwidth (cycles/sample) and damping factor.
    pub fn set_params(&mut self, bw: f64, damping: f64) {
        if bw == 0.0 || (bw == self.bw && damping == self.damping) {
            return;
        }
        let denom = damping + 1.0 / (4.0 * damping);
        let theta = 4.0 * std::f64::consts::PI * bw.abs() / denom;
        let d = 1.0 + 2.0 * damping * theta + theta * theta;
        self.k1 = 4.0 * damping * theta / d;
        self.k2 = 4.0 * theta * theta / d;
        self.bw = bw;
        self.damping = damping;
    }

    /// Step the loop with a phase error in cycles; returns the integrated
    /// VCO frequency in cycles/sample.
    pub fn run(&mut self, phase: f64) -> f64 {
        let mut u_new = self.integrator + self.k2 * phase;
        let mut dphi = u_new + self.k1 * phase;

        if dphi > self.upper_limit {
            dphi = self.upper_limit;
            if phase > 0.0 {
                u_new = self.integrator; // freeze against windup
            }
        } else if dphi < self.lower_limit {
            dphi = self.lower_limit;
            if phase < 0.0 {
                u_new = self.integrator;
            }
        }
        self.integrator = u_new;

        self.vco_phase += dphi;
        if self.vco_phase > 1.0 {
            self.vco_phase -= 1.0;
            self.wraps += 1;
        } else if self.vco_phase < -1.0 {
            self.vco_phase += 1.0;
            self.wraps -= 1;
        }
        self.integrator
    }

    /// Unit phasor for the current VCO phase.
    pub fn vco(&self) -> Complex64 {
        cispi(2.0 * self.vco_phase)
    }

    pub fn vco_phase(&self) -> f64 {
        self.vco_phase
    }

    pub fn freq(&self) -> f64 {
        self.integrator
    }

    pub fn wraps(&self) -> i64 {
        self.wraps
    }

    pub fn reset(&mut self) {
        self.integrator = 0.0;
        self.vco_phase = 0.0;
        self.wraps = 0;
    }

    /// Preset the VCO frequency (cycles/sample), e.g. to start a pilot
    /// search at the nominal tone instead of DC.
    pub fn set_freq(&mut self, f: f64) {
        self.integrator = f.clamp(self.lower_limit, self.upper_limit);
    }
}

impl Default for Pll {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osc_tracks_frequency() {
        let mut osc = Osc::new();
        let f = 0.01; // cycles/sample
        osc.set(f, 0.0);
        let mut phase = 0.0f64;
        for n in 0..1000 {
            let p = osc.step();
            let expect = 2.0 * std::f64::consts::PI * f * n as f64;
            let got = p.arg();
            let diff = (got - expect).rem_euclid(2.0 * std::f64::consts::PI);
            let diff = diff.min(2.0 * std::f64::consts::PI - diff);
            phase = phase.max(diff);
        }
        assert!(phase < 1e-9, "max phase error {phase}");
    }

    #[test]
    fn osc_magnitude_stays_unity() {
        let mut osc = Osc::new();
        osc.set(0.12345, 0.0);
        for _ in 0..(3 * RENORM_RATE) {
            osc.step();
        }
        assert!((osc.phasor.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pll_locks_to_offset() {
        // Drive the loop with a fixed input frequency; the integrator
        // should converge to it.
        let fin = 0.003; // cycles/sample
        let mut pll = Pll::new();
        pll.set_params(0.001, std::f64::consts::FRAC_1_SQRT_2);
        let mut in_phase = 0.0f64;
        for _ in 0..50000 {
            in_phase = (in_phase + fin).fract();
            let mut err = in_phase - pll.vco_phase();
            err -= err.round(); // wrap error into [-0.5, 0.5]
            pll.run(err);
        }
        assert!((pll.freq() - fin).abs() < 3e-4, "pll freq {}", pll.freq());
    }

    #[test]
    fn pll_respects_limits() {
        let mut pll = Pll::new();
        pll.set_limits(-0.001, 0.001);
        for _ in 0..10000 {
            pll.run(0.5); // hard positive error
        }
        assert!(pll.freq() <= 0.001 + 1e-12);
    }
}
