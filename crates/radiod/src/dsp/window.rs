// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Window functions: Kaiser for the channel filters, plus the family
//! offered to the spectrum pseudo-demodulator.

/// Windows selectable for spectrum bin shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowType {
    #[default]
    Kaiser,
    Rectangular,
    Blackman,
    ExactBlackman,
    Gaussian,
    Hann,
    Hamming,
}

impl WindowType {
    /// Parse a config-file window name.
    pub fn parse(s: &str) -> Option<Self> {
        let w = match s.to_ascii_lowercase().as_str() {
            "kaiser" => WindowType::Kaiser,
            "rect" | "rectangular" | "none" => WindowType::Rectangular,
            "blackman" => WindowType::Blackman,
            "exact-blackman" | "exact_blackman" => WindowType::ExactBlackman,
            "gauss" | "gaussian" => WindowType::Gaussian,
            "hann" | "hanning" => WindowType::Hann,
            "hamming" => WindowType::Hamming,
            _ => return None,
        };
        Some(w)
    }
}

/// Modified Bessel function of the first kind, order zero.
///
/// Power series; converges quickly for the argument range Kaiser betas
/// produce (|z| < ~30).
pub fn i0(z: f64) -> f64 {
    let half = z / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

/// Kaiser window of length `n` with shape parameter `beta`.
pub fn kaiser(n: usize, beta: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let denom = i0(beta);
    let m = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = 2.0 * i as f64 / m - 1.0; // [-1, 1]
            i0(beta * (1.0 - x * x).sqrt()) / denom
        })
        .collect()
}

/// Build a window of length `n` for spectrum shaping.
///
/// `shape` is the Kaiser beta or the Gaussian sigma (in bins, relative to
/// the half-width); ignored by the fixed windows.
pub fn make_window(kind: WindowType, n: usize, shape: f64) -> Vec<f64> {
    use std::f64::consts::PI;
    if n == 0 {
        return Vec::new();
    }
    let m = if n > 1 { (n - 1) as f64 } else { 1.0 };
    match kind {
        WindowType::Kaiser => kaiser(n, shape),
        WindowType::Rectangular => vec![1.0; n],
        WindowType::Blackman => (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / m;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect(),
        WindowType::ExactBlackman => (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / m;
                let a0 = 7938.0 / 18608.0;
                let a1 = 9240.0 / 18608.0;
                let a2 = 1430.0 / 18608.0;
                a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
            })
            .collect(),
        WindowType::Gaussian => {
            let sigma = if shape > 0.0 { shape } else { 0.4 };
            (0..n)
                .map(|i| {
                    let x = (i as f64 - m / 2.0) / (sigma * m / 2.0);
                    (-0.5 * x * x).exp()
                })
                .collect()
        }
        WindowType::Hann => (0..n)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / m).cos())
            .collect(),
        WindowType::Hamming => (0..n)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / m).cos())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i0_reference_values() {
        // Abramowitz & Stegun table values
        assert!((i0(0.0) - 1.0).abs() < 1e-15);
        assert!((i0(1.0) - 1.2660658).abs() < 1e-6);
        assert!((i0(2.0) - 2.2795853).abs() < 1e-6);
        assert!((i0(5.0) - 27.239872).abs() < 1e-4);
    }

    #[test]
    fn kaiser_is_symmetric_and_peaked() {
        let w = kaiser(33, 11.0);
        assert_eq!(w.len(), 33);
        for i in 0..w.len() {
            assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-12);
        }
        let center = w[16];
        assert!((center - 1.0).abs() < 1e-12);
        assert!(w[0] < 0.01); // beta 11 has deep edge attenuation
    }

    #[test]
    fn window_names_parse() {
        assert_eq!(WindowType::parse("kaiser"), Some(WindowType::Kaiser));
        assert_eq!(WindowType::parse("Hann"), Some(WindowType::Hann));
        assert_eq!(
            WindowType::parse("exact-blackman"),
            Some(WindowType::ExactBlackman)
        );
        assert_eq!(WindowType::parse("bogus"), None);
    }

    #[test]
    fn hann_endpoints_zero() {
        let w = make_window(WindowType::Hann, 17, 0.0);
        assert!(w[0].abs() < 1e-12);
        assert!(w[16].abs() < 1e-12);
        assert!((w[8] - 1.0).abs() < 1e-12);
    }
}
