// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Front-end driver contract and shared tuner state.
//!
//! A driver owns the hardware and a reader thread that feeds sample
//! chunks to the master filter. Everything the channels need to know
//! about the front end lives here: sample rate, I/Q-ness, coverage
//! limits, the first LO frequency and the analog gain chain. Tuner
//! changes fire a condvar so out-of-coverage channels can re-evaluate.

pub mod synth;

use crate::config::ConfigSection;
use crate::filter::master::SampleChunk;
use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("unknown front-end device '{0}'")]
    UnknownDevice(String),
    #[error("front end config: {0}")]
    Config(String),
    #[error("front end cannot tune")]
    TuneUnsupported,
    #[error("front end i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable facts established at setup time.
#[derive(Debug, Clone)]
pub struct FrontendInfo {
    pub description: String,
    pub samprate: f64,
    pub isreal: bool,
    pub bitspersample: u32,
    pub direct_conversion: bool,
}

/// Tuner and gain state, mutable at runtime.
#[derive(Debug, Clone)]
pub struct TunerState {
    /// First LO frequency in Hz.
    pub frequency: f64,
    /// IF coverage relative to the LO; one side is zero for real inputs.
    pub min_if: f64,
    pub max_if: f64,
    /// When set, channels must not move the LO.
    pub lock: bool,
    pub rf_gain: f32,
    pub rf_atten: f32,
    pub rf_level_cal: f32,
    pub lna_gain: f32,
    pub mixer_gain: f32,
    pub if_gain: f32,
    pub rf_agc: bool,
}

impl Default for TunerState {
    fn default() -> Self {
        TunerState {
            frequency: 0.0,
            min_if: 0.0,
            max_if: 0.0,
            lock: false,
            rf_gain: 0.0,
            rf_atten: 0.0,
            rf_level_cal: f32::NAN,
            lna_gain: 0.0,
            mixer_gain: 0.0,
            if_gain: 0.0,
            rf_agc: false,
        }
    }
}

/// Shared front-end object: one per process.
pub struct Frontend {
    pub info: FrontendInfo,
    tuner: Mutex<TunerState>,
    status_cond: Condvar,
    /// Serializes channel-driven retunes (first failing channel wins).
    tune_mutex: Mutex<()>,
    driver: Mutex<Option<Box<dyn FrontendDriver>>>,
    /// Raw A/D samples delivered since startup.
    pub samples: AtomicU64,
    /// A/D overrange events and samples since the last one.
    pub overranges: AtomicU64,
    pub samples_since_over: AtomicU64,
    /// Smoothed input power, dBFS bits (f32 in an atomic).
    if_power_bits: AtomicU32,
    /// Last sample timestamp, ns since the GPS epoch.
    pub timestamp: AtomicI64,
}

impl Frontend {
    pub fn new(info: FrontendInfo, tuner: TunerState) -> Arc<Self> {
        Arc::new(Frontend {
            info,
            tuner: Mutex::new(tuner),
            status_cond: Condvar::new(),
            tune_mutex: Mutex::new(()),
            driver: Mutex::new(None),
            samples: AtomicU64::new(0),
            overranges: AtomicU64::new(0),
            samples_since_over: AtomicU64::new(0),
            if_power_bits: AtomicU32::new(0),
            timestamp: AtomicI64::new(0),
        })
    }

    pub fn tuner(&self) -> MutexGuard<'_, TunerState> {
        self.tuner.lock()
    }

    pub fn frequency(&self) -> f64 {
        self.tuner.lock().frequency
    }

    /// Driver side: record a completed retune (or other tuner change) and
    /// wake any channel waiting on coverage.
    pub fn update_tuner(&self, f: impl FnOnce(&mut TunerState)) {
        let mut t = self.tuner.lock();
        f(&mut t);
        drop(t);
        self.status_cond.notify_all();
    }

    /// Channel side: wait up to `timeout` for a tuner change.
    pub fn wait_status_change(&self, timeout: Duration) {
        let mut t = self.tuner.lock();
        let _ = self.status_cond.wait_for(&mut t, timeout);
    }

    pub fn set_driver(&self, driver: Box<dyn FrontendDriver>) {
        *self.driver.lock() = Some(driver);
    }

    /// Begin streaming: hands the sink to the installed driver, which
    /// spawns its own reader thread.
    pub fn start_driver(&self, ctx: FrontendCtx) -> Result<(), FrontendError> {
        let mut driver = self.driver.lock();
        match driver.as_mut() {
            Some(d) => d.start(ctx),
            None => Err(FrontendError::UnknownDevice("none installed".into())),
        }
    }

    /// Ask the hardware to move the first LO. Returns the frequency the
    /// hardware actually settled on. First failing channel wins; the
    /// request is serialized and skipped entirely when the tuner is
    /// locked.
    pub fn retune(&self, hz: f64) -> Result<f64, FrontendError> {
        let _guard = self.tune_mutex.lock();
        if self.tuner.lock().lock {
            return Err(FrontendError::TuneUnsupported);
        }
        let mut driver = self.driver.lock();
        let Some(driver) = driver.as_mut() else {
            return Err(FrontendError::TuneUnsupported);
        };
        let actual = driver.tune(hz)?;
        self.update_tuner(|t| t.frequency = actual);
        Ok(actual)
    }

    pub fn if_power(&self) -> f32 {
        f32::from_bits(self.if_power_bits.load(Ordering::Relaxed))
    }

    pub fn set_if_power(&self, p: f32) {
        self.if_power_bits.store(p.to_bits(), Ordering::Relaxed);
    }
}

/// Scale factor turning raw A/D power into dBFS-relative power.
///
/// Real signals get 3 dB so a rail-to-rail sine reads 0 dBFS instead of
/// -3; complex signals split their power between I and Q.
pub fn scale_ad_power2fs(info: &FrontendInfo) -> f64 {
    let mut scale = 1.0 / f64::from(1u32 << (info.bitspersample - 1));
    scale *= scale;
    if info.isreal {
        scale *= 2.0;
    }
    scale
}

/// Multiplier converting raw integer samples to floats with the analog
/// gain chain backed out, so 0 dBm in stays 0 dBFS out.
pub fn scale_ad(info: &FrontendInfo, tuner: &TunerState) -> f64 {
    let scale = f64::from(1u32 << (info.bitspersample - 1));
    let mut analog_gain = f64::from(tuner.rf_gain) - f64::from(tuner.rf_atten);
    if tuner.rf_level_cal.is_finite() {
        analog_gain -= f64::from(tuner.rf_level_cal);
    }
    if info.isreal {
        analog_gain -= 3.0;
    }
    10.0f64.powf(-analog_gain / 20.0) / scale
}

/// Context handed to a driver's reader thread.
pub struct FrontendCtx {
    pub frontend: Arc<Frontend>,
    /// Sample chunks travel this channel to the FFT worker.
    pub chunks: Sender<SampleChunk>,
    pub terminate: Arc<AtomicBool>,
}

/// A pluggable front-end device.
///
/// `start` begins streaming (spawning its own reader thread) and must
/// return promptly. `tune`/`set_gain`/`set_atten` are optional.
pub trait FrontendDriver: Send {
    fn start(&mut self, ctx: FrontendCtx) -> Result<(), FrontendError>;

    fn tune(&mut self, _hz: f64) -> Result<f64, FrontendError> {
        Err(FrontendError::TuneUnsupported)
    }

    fn set_gain(&mut self, _db: f32) {}

    fn set_atten(&mut self, _db: f32) {}
}

/// Instantiate a driver by device name.
///
/// Hardware drivers register here; the synthetic source is built in and
/// doubles as the test signal generator.
pub fn make_driver(
    device: &str,
    section: &ConfigSection,
) -> Result<(Box<dyn FrontendDriver>, FrontendInfo, TunerState), FrontendError> {
    match device {
        "synth" | "sig_gen" => synth::SynthDriver::from_config(section),
        other => Err(FrontendError::UnknownDevice(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(bits: u32, isreal: bool) -> FrontendInfo {
        FrontendInfo {
            description: "test".into(),
            samprate: 64_000.0,
            isreal,
            bitspersample: bits,
            direct_conversion: false,
        }
    }

    #[test]
    fn ad_power_scale_16bit() {
        let s = scale_ad_power2fs(&info(16, false));
        // (1/32768)^2
        assert!((s - 9.313_225_7e-10).abs() < 1e-15);
        let sr = scale_ad_power2fs(&info(16, true));
        assert!((sr / s - 2.0).abs() < 1e-12);
    }

    #[test]
    fn ad_scale_backs_out_gain() {
        let i = info(16, false);
        let mut t = TunerState::default();
        t.rf_gain = 20.0;
        let s = scale_ad(&i, &t);
        let s0 = scale_ad(&i, &TunerState::default());
        // 20 dB more analog gain means 10x smaller digital scale
        assert!((s0 / s - 10.0).abs() < 1e-9);
    }

    #[test]
    fn tuner_updates_wake_waiters() {
        let fe = Frontend::new(
            info(16, false),
            TunerState {
                frequency: 10_000_000.0,
                ..Default::default()
            },
        );
        let fe2 = Arc::clone(&fe);
        let waiter = std::thread::spawn(move || {
            let start = std::time::Instant::now();
            fe2.wait_status_change(Duration::from_secs(5));
            start.elapsed()
        });
        std::thread::sleep(Duration::from_millis(50));
        fe.update_tuner(|t| t.frequency = 10_100_000.0);
        let waited = waiter.join().expect("join");
        assert!(waited < Duration::from_secs(2), "woken early, not by timeout");
        assert_eq!(fe.frequency(), 10_100_000.0);
    }

    #[test]
    fn locked_tuner_refuses_retune() {
        let fe = Frontend::new(info(16, false), TunerState::default());
        fe.update_tuner(|t| t.lock = true);
        assert!(fe.retune(7_000_000.0).is_err());
    }
}
