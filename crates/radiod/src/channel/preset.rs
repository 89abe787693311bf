// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Channel defaults and preset loading.
//!
//! Parameter priority, high to low: the channel's own config section, the
//! named preset entry, the [global] section, compiled-in defaults. dB
//! values convert to linear units here; time constants convert to blocks
//! using the true block time.

use super::{ChannelConfig, OpusApplication, SpectrumParams};
use crate::config::{parse_frequency, ConfigSection, DEFAULT_LIFETIME, DEFAULT_UPDATE};
use crate::dsp::window::WindowType;
use crate::dsp::{db2power, db2voltage};
use crate::protocol::types::{DemodType, Encoding};
use log::warn;
use std::net::SocketAddr;

const DEFAULT_LINEAR_SAMPRATE: u32 = 12_000;
/// Reasonable tradeoff between skirt sharpness and sidelobe height.
const DEFAULT_KAISER_BETA: f64 = 11.0;
const DEFAULT_LOW: f64 = -5_000.0;
const DEFAULT_HIGH: f64 = 5_000.0;
/// Keep gaussian signals from clipping.
const DEFAULT_HEADROOM: f32 = -15.0;
const DEFAULT_SQUELCH_OPEN: f32 = 8.0;
const DEFAULT_SQUELCH_CLOSE: f32 = 7.0;
const DEFAULT_RECOVERY_RATE: f32 = 20.0; // dB/s
const DEFAULT_THRESHOLD: f32 = -15.0;
const DEFAULT_GAIN: f32 = 50.0;
const DEFAULT_HANGTIME: f32 = 1.1; // seconds
const DEFAULT_PLL_BW: f64 = 10.0;
const DEFAULT_SQUELCH_TAIL: u32 = 1;

impl ChannelConfig {
    /// Compiled-in defaults; `blocktime` is the true block time in
    /// seconds, `dest`/`status_dest` come from the engine's output setup.
    pub fn defaults(blocktime: f64, dest: SocketAddr, status_dest: SocketAddr) -> Self {
        ChannelConfig {
            demod_type: DemodType::Linear,
            preset: String::new(),
            freq: 0.0,
            shift: 0.0,
            doppler: 0.0,
            doppler_rate: 0.0,
            freq_lock: false,
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
            kaiser_beta: DEFAULT_KAISER_BETA,
            isb: false,
            filter2_blocking: 0,
            filter2_beta: -1.0,
            agc: true,
            headroom: db2voltage(DEFAULT_HEADROOM),
            recovery_rate: db2voltage(DEFAULT_RECOVERY_RATE * blocktime as f32),
            hangtime: DEFAULT_HANGTIME / blocktime as f32,
            threshold: db2voltage(DEFAULT_THRESHOLD),
            gain: db2voltage(DEFAULT_GAIN),
            env: false,
            pll: false,
            square: false,
            pll_bw: DEFAULT_PLL_BW,
            squelch_open: db2power(DEFAULT_SQUELCH_OPEN),
            squelch_close: db2power(DEFAULT_SQUELCH_CLOSE),
            squelch_tail: DEFAULT_SQUELCH_TAIL,
            threshold_extend: false,
            deemph_rate: 0.0,
            deemph_gain: 1.0,
            tone_freq: 0.0,
            spectrum: SpectrumParams::default(),
            samprate: round_samprate(DEFAULT_LINEAR_SAMPRATE, blocktime),
            channels: 1,
            encoding: Encoding::S16be,
            pacing: false,
            minpacket: 0,
            ttl: 1,
            dest,
            dest_name: String::new(),
            status_dest,
            opus: super::OpusParams::default(),
            update_interval: DEFAULT_UPDATE,
            lifetime_blocks: (DEFAULT_LIFETIME / blocktime).round() as u32,
        }
    }
}

/// Force an output sample rate to a nonzero multiple of the block rate;
/// minimum one IFFT bin.
pub fn round_samprate(x: u32, blocktime: f64) -> u32 {
    let blockrate = 1.0 / blocktime;
    if f64::from(x) < blockrate {
        return blockrate.round() as u32;
    }
    (blockrate * (f64::from(x) / blockrate).round()).round() as u32
}

/// Apply one config/preset section on top of `cfg`.
///
/// Unrecognized keys are the caller's concern (validation is separate);
/// values that fail to parse keep the previous setting with a warning.
pub fn loadpreset(cfg: &mut ChannelConfig, section: &ConfigSection, blocktime: f64) {
    if let Some(name) = section.get("demod") {
        match DemodType::parse(name) {
            Some(d) => cfg.demod_type = d,
            None => warn!("[preset] unknown demod '{name}'"),
        }
    }
    if let Some(s) = section.get("samprate") {
        let v = parse_frequency(s, false);
        if v > 0.0 {
            cfg.samprate = round_samprate(v.round() as u32, blocktime);
        } else {
            warn!("[preset] bad samprate '{s}'");
        }
    }
    cfg.channels = section.get_int("channels", i64::from(cfg.channels)).clamp(1, 2) as u8;
    if section.get_bool("mono", false) {
        cfg.channels = 1;
    }
    if section.get_bool("stereo", false) {
        cfg.channels = 2;
    }
    cfg.kaiser_beta = section.get_f64("kaiser-beta", cfg.kaiser_beta);

    if let Some(s) = section.get("low") {
        cfg.low = parse_frequency(s, false);
    }
    if let Some(s) = section.get("high") {
        cfg.high = parse_frequency(s, false);
    }
    if cfg.low > cfg.high {
        std::mem::swap(&mut cfg.low, &mut cfg.high);
    }
    if let Some(s) = section.get("shift") {
        cfg.shift = parse_frequency(s, false);
    }

    if let Some(v) = section.get("squelch-open") {
        if let Ok(db) = v.trim().parse::<f32>() {
            cfg.squelch_open = db2power(db);
        }
    }
    if let Some(v) = section.get("squelch-close") {
        if let Ok(db) = v.trim().parse::<f32>() {
            cfg.squelch_close = db2power(db);
        }
    }
    cfg.squelch_tail = section
        .get_int("squelchtail", i64::from(cfg.squelch_tail))
        .max(0) as u32;
    cfg.squelch_tail = section
        .get_int("squelch-tail", i64::from(cfg.squelch_tail))
        .max(0) as u32;

    if let Some(v) = section.get("headroom") {
        if let Ok(db) = v.trim().parse::<f32>() {
            cfg.headroom = db2voltage(-db.abs()); // always below clip
        }
    }
    if let Some(v) = section.get("recovery-rate") {
        if let Ok(db_per_sec) = v.trim().parse::<f32>() {
            cfg.recovery_rate = db2voltage(db_per_sec.abs() * blocktime as f32);
        }
    }
    if let Some(v) = section.get("hang-time") {
        if let Ok(secs) = v.trim().parse::<f32>() {
            cfg.hangtime = secs.abs() / blocktime as f32;
        }
    }
    if let Some(v) = section.get("threshold") {
        if let Ok(db) = v.trim().parse::<f32>() {
            cfg.threshold = db2voltage(-db.abs()); // always below unity
        }
    }
    if let Some(v) = section.get("gain") {
        if let Ok(db) = v.trim().parse::<f32>() {
            cfg.gain = db2voltage(db);
        }
    }
    cfg.env = section.get_bool("envelope", cfg.env);
    cfg.pll = section.get_bool("pll", cfg.pll);
    cfg.square = section.get_bool("square", cfg.square);
    if cfg.square {
        cfg.pll = true; // square implies PLL
    }
    cfg.isb = section.get_bool("conj", cfg.isb);
    cfg.pll_bw = section.get_f64("pll-bw", cfg.pll_bw);
    cfg.agc = section.get_bool("agc", cfg.agc);
    cfg.threshold_extend = section.get_bool("extend", cfg.threshold_extend);
    cfg.threshold_extend = section.get_bool("threshold-extend", cfg.threshold_extend);

    if let Some(v) = section.get("deemph-tc") {
        if let Ok(us) = v.trim().parse::<f32>() {
            let tc = us * 1e-6;
            cfg.deemph_rate = (-1.0 / (tc * cfg.samprate as f32)).exp();
        }
    }
    if let Some(v) = section.get("deemph-gain") {
        if let Ok(db) = v.trim().parse::<f32>() {
            cfg.deemph_gain = db2voltage(db);
        }
    }
    // "tone", "pl" and "ctcss" are synonyms
    for key in ["tone", "pl", "ctcss"] {
        if let Some(v) = section.get(key) {
            if let Ok(f) = v.trim().parse::<f32>() {
                let f = f.abs();
                if f <= 3000.0 {
                    cfg.tone_freq = f;
                } else {
                    warn!("[preset] PL tone {f} out of range");
                }
            }
        }
    }

    cfg.pacing = section.get_bool("pacing", cfg.pacing);
    cfg.minpacket = section
        .get_int("minpacket", i64::from(cfg.minpacket))
        .clamp(0, 4) as u8;
    cfg.ttl = section.get_int("ttl", i64::from(cfg.ttl)).max(0) as u32;
    cfg.update_interval = section
        .get_int("update", i64::from(cfg.update_interval))
        .max(0) as u32;

    if let Some(s) = section.get("encoding") {
        match Encoding::parse(s) {
            Some(e) => cfg.encoding = e,
            None => warn!("[preset] unknown encoding '{s}'"),
        }
    }
    cfg.opus.bitrate = section.get_int("opus-bitrate", i64::from(cfg.opus.bitrate)) as i32;
    if let Some(s) = section.get("opus-application") {
        match OpusApplication::parse(s) {
            Some(a) => cfg.opus.application = a,
            None => warn!("[preset] unknown opus application '{s}'"),
        }
    }
    cfg.opus.dtx = section.get_bool("opus-dtx", cfg.opus.dtx);
    cfg.opus.fec = section.get_bool("opus-fec", cfg.opus.fec);

    cfg.filter2_blocking = section
        .get_int("filter2", cfg.filter2_blocking as i64)
        .max(0) as usize;
    cfg.filter2_beta = section.get_f64("filter2-beta", cfg.filter2_beta);

    // Spectrum shaping
    cfg.spectrum.bin_count = section
        .get_int("bin-count", cfg.spectrum.bin_count as i64)
        .max(1) as usize;
    cfg.spectrum.bin_bw = section.get_f64("bin-bw", cfg.spectrum.bin_bw).abs();
    cfg.spectrum.crossover = section.get_f64("crossover", cfg.spectrum.crossover);
    if let Some(s) = section.get("spectrum-window") {
        match WindowType::parse(s) {
            Some(w) => cfg.spectrum.window = w,
            None => warn!("[preset] unknown window '{s}'"),
        }
    }
    cfg.spectrum.window_shape = section.get_f64("window-shape", cfg.spectrum.window_shape);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;

    fn dest() -> SocketAddr {
        "239.1.2.3:5004".parse().expect("addr")
    }

    fn base() -> ChannelConfig {
        ChannelConfig::defaults(0.020, dest(), dest())
    }

    fn section(text: &str) -> crate::config::ConfigSection {
        ConfigFile::parse(text)
            .expect("parse")
            .section("x")
            .expect("section")
            .clone()
    }

    #[test]
    fn defaults_follow_block_time() {
        let cfg = base();
        assert_eq!(cfg.samprate, 12_000);
        assert_eq!(cfg.lifetime_blocks, 1000); // 20 s of 20 ms blocks
        assert_eq!(cfg.update_interval, DEFAULT_UPDATE);
        // 20 dB/s over a 20 ms block is 0.4 dB
        assert!((cfg.recovery_rate - db2voltage(0.4)).abs() < 1e-6);
        assert!((cfg.hangtime - 55.0).abs() < 1e-3);
    }

    #[test]
    fn round_samprate_to_block_rate() {
        // 50 Hz block rate
        assert_eq!(round_samprate(12_000, 0.020), 12_000);
        assert_eq!(round_samprate(12_020, 0.020), 12_000);
        assert_eq!(round_samprate(11_980, 0.020), 12_000);
        assert_eq!(round_samprate(10, 0.020), 50); // minimum one bin
    }

    #[test]
    fn usb_style_preset() {
        let mut cfg = base();
        loadpreset(
            &mut cfg,
            &section("[x]\ndemod = linear\nlow = 100\nhigh = 3000\nsamprate = 12000\n"),
            0.020,
        );
        assert_eq!(cfg.demod_type, DemodType::Linear);
        assert_eq!(cfg.low, 100.0);
        assert_eq!(cfg.high, 3000.0);
    }

    #[test]
    fn swapped_edges_are_fixed() {
        let mut cfg = base();
        loadpreset(&mut cfg, &section("[x]\nlow = 3000\nhigh = -3000\n"), 0.020);
        assert!(cfg.low < cfg.high);
    }

    #[test]
    fn square_implies_pll() {
        let mut cfg = base();
        loadpreset(&mut cfg, &section("[x]\nsquare = yes\n"), 0.020);
        assert!(cfg.pll);
        assert!(cfg.square);
    }

    #[test]
    fn squelch_converts_to_power() {
        let mut cfg = base();
        loadpreset(
            &mut cfg,
            &section("[x]\nsquelch-open = 10\nsquelch-close = 9\n"),
            0.020,
        );
        assert!((cfg.squelch_open - 10.0).abs() < 1e-3); // 10 dB = 10x power
        assert!((cfg.squelch_close - db2power(9.0)).abs() < 1e-3);
    }

    #[test]
    fn headroom_is_always_negative_db() {
        let mut cfg = base();
        loadpreset(&mut cfg, &section("[x]\nheadroom = 15\n"), 0.020);
        assert!(cfg.headroom < 1.0);
        let again = cfg.headroom;
        loadpreset(&mut cfg, &section("[x]\nheadroom = -15\n"), 0.020);
        assert_eq!(cfg.headroom, again);
    }

    #[test]
    fn layering_overrides() {
        let mut cfg = base();
        loadpreset(&mut cfg, &section("[x]\ngain = 30\nchannels = 2\n"), 0.020);
        let first_gain = cfg.gain;
        loadpreset(&mut cfg, &section("[x]\ngain = 10\n"), 0.020);
        assert!(cfg.gain < first_gain);
        assert_eq!(cfg.channels, 2); // untouched keys persist
    }

    #[test]
    fn tone_synonyms() {
        let mut cfg = base();
        loadpreset(&mut cfg, &section("[x]\nctcss = 103.5\n"), 0.020);
        assert_eq!(cfg.tone_freq, 103.5);
        loadpreset(&mut cfg, &section("[x]\npl = 9000\n"), 0.020);
        assert_eq!(cfg.tone_freq, 103.5); // out of range rejected
    }
}
