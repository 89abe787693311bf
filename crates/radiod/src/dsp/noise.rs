// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Noise-density (N0) estimation from FFT bin powers.
//!
//! Quantile-threshold method: take the 10th-percentile bin power, average
//! every bin below 1.5x that value, and correct for the truncation bias of
//! the exponential power distribution. Adapts in well under a second and
//! tolerates strong in-band signals as long as fewer than 90% of bins are
//! occupied.

/// Quantile probed for the noise floor.
const NQ: f64 = 0.10;
/// Bins up to this multiple of the quantile count as noise.
const N_CUTOFF: f64 = 1.5;
/// Per-block smoothing factor for the published estimate.
pub const POWER_ALPHA: f64 = 0.10;
/// Minimum bin population for reasonable statistics.
pub const MIN_NOISE_BINS: usize = 1000;

/// Hoare partition for quickselect.
fn partition(arr: &mut [f64], left: usize, right: usize, pivot: usize) -> usize {
    let pivot_value = arr[pivot];
    arr.swap(pivot, right);
    let mut store = left;
    for i in left..right {
        if arr[i] < pivot_value {
            arr.swap(store, i);
            store += 1;
        }
    }
    arr.swap(right, store);
    store
}

/// k-th smallest element (0-based), in-place.
fn quickselect(arr: &mut [f64], k: usize) -> f64 {
    let mut left = 0;
    let mut right = arr.len() - 1;
    while left < right {
        let pivot = left + (right - left) / 2;
        let p = partition(arr, left, right, pivot);
        if p == k {
            return arr[k];
        } else if k < p {
            right = p - 1;
        } else {
            left = p + 1;
        }
    }
    arr[left]
}

/// p-quantile (0 <= p <= 1) with linear interpolation. Scrambles `arr`.
pub fn quantile(arr: &mut [f64], p: f64) -> f64 {
    if arr.is_empty() {
        return f64::NAN;
    }
    let pos = p * (arr.len() - 1) as f64;
    let i = pos.floor() as usize;
    let frac = pos - i as f64;
    let q1 = quickselect(arr, i);
    if frac == 0.0 {
        q1
    } else {
        let q2 = quickselect(arr, i + 1);
        q1 + frac * (q2 - q1)
    }
}

/// Truncation bias correction for averaging an exponential distribution
/// below a threshold. Computed once; depends only on NQ and N_CUTOFF.
fn bias_correction() -> f64 {
    let z = N_CUTOFF * (-(1.0 - NQ).ln());
    1.0 / (1.0 - z * (-z).exp() / (1.0 - (-z).exp()))
}

/// Estimate noise density from a window of master-FFT bin energies.
///
/// `energies` are |X[k]|^2 values from the unnormalized forward FFT;
/// `fft_bins` is the full transform length N and `samprate` the input rate,
/// so the result is normalized to power per Hz at the A/D reference.
/// Returns 0 when no noise-only bins are found.
pub fn estimate_noise(energies: &mut [f64], fft_bins: usize, samprate: f64) -> f64 {
    if energies.is_empty() || fft_bins == 0 || samprate <= 0.0 {
        return 0.0;
    }
    let threshold = N_CUTOFF * quantile(energies, NQ);
    let mut energy = 0.0;
    let mut noisebins = 0usize;
    for &e in energies.iter() {
        if e <= threshold {
            energy += e;
            noisebins += 1;
        }
    }
    if noisebins == 0 {
        return 0.0;
    }
    let noise_bin_energy = (energy / noisebins as f64) * bias_correction();
    // Unnormalized FFT: bin energy scales with N, then reduce to 1 Hz
    noise_bin_energy / (fft_bins as f64 * samprate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg(state: &mut u64) -> f64 {
        // Deterministic uniform in [0, 1)
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((*state >> 11) as f64) / (1u64 << 53) as f64
    }

    #[test]
    fn quantile_of_known_sequence() {
        let mut v: Vec<f64> = (0..=100).map(f64::from).collect();
        assert!((quantile(&mut v.clone(), 0.0) - 0.0).abs() < 1e-12);
        assert!((quantile(&mut v.clone(), 0.5) - 50.0).abs() < 1e-12);
        assert!((quantile(&mut v, 0.10) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn quantile_interpolates() {
        let mut v = vec![0.0, 1.0];
        assert!((quantile(&mut v, 0.25) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn estimator_is_unbiased_on_exponential_noise() {
        // Exponential bin energies with mean m model complex Gaussian noise
        let m = 3.0e-6f64;
        let mut state = 12345u64;
        let n = 4096usize;
        let mut energies: Vec<f64> = (0..n)
            .map(|_| -m * (1.0 - lcg(&mut state)).ln())
            .collect();
        let n0 = estimate_noise(&mut energies, n, 1.0);
        let expect = m / n as f64;
        let ratio = n0 / expect;
        assert!((0.85..1.15).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn estimator_ignores_strong_signals() {
        let m = 1.0e-6f64;
        let mut state = 999u64;
        let n = 4096usize;
        let mut energies: Vec<f64> = (0..n)
            .map(|_| -m * (1.0 - lcg(&mut state)).ln())
            .collect();
        // Occupy a third of the bins with a signal 60 dB above the noise
        for e in energies.iter_mut().take(n / 3) {
            *e += 1.0;
        }
        let n0 = estimate_noise(&mut energies, n, 1.0);
        let expect = m / n as f64;
        let ratio = n0 / expect;
        assert!((0.8..1.25).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn empty_input_yields_zero() {
        assert_eq!(estimate_noise(&mut [], 1024, 48000.0), 0.0);
    }
}
