// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Command application: TLVs from the control channel mutate channel
//! settings one field at a time.
//!
//! Every TLV is idempotent; unknown types are ignored. Numeric values are
//! clamped because the control group is open to anyone who can send
//! multicast. Structural changes (sample rate, encoding, filter
//! geometry, demod type) make the demod thread restart its loop so the
//! new configuration lands atomically at a block boundary.

use crate::channel::preset::{loadpreset, round_samprate};
use crate::channel::{Channel, OpusApplication};
use crate::dsp::{db2power, db2voltage};
use crate::protocol::tlv::TlvIter;
use crate::protocol::types::{DemodType, Encoding, StatusType as T};
use log::debug;

/// Option bits for SETOPTS/CLEAROPTS.
pub const OPT_PACING: u64 = 1 << 0;
pub const OPT_FREQ_LOCK: u64 = 1 << 1;
pub const OPT_THRESH_EXTEND: u64 = 1 << 2;
pub const OPT_SQUELCH_TAIL_DISABLE: u64 = 1 << 3;

fn type_of(x: u8) -> Option<T> {
    // Only the command-settable subset needs mapping here
    Some(match x {
        x if x == T::RadioFrequency as u8 => T::RadioFrequency,
        x if x == T::FirstLoFrequency as u8 => T::FirstLoFrequency,
        x if x == T::ShiftFrequency as u8 => T::ShiftFrequency,
        x if x == T::DopplerFrequency as u8 => T::DopplerFrequency,
        x if x == T::DopplerFrequencyRate as u8 => T::DopplerFrequencyRate,
        x if x == T::FreqLock as u8 => T::FreqLock,
        x if x == T::LowEdge as u8 => T::LowEdge,
        x if x == T::HighEdge as u8 => T::HighEdge,
        x if x == T::KaiserBeta as u8 => T::KaiserBeta,
        x if x == T::Filter2 as u8 => T::Filter2,
        x if x == T::Filter2KaiserBeta as u8 => T::Filter2KaiserBeta,
        x if x == T::OutputSamprate as u8 => T::OutputSamprate,
        x if x == T::OutputChannels as u8 => T::OutputChannels,
        x if x == T::OutputEncoding as u8 => T::OutputEncoding,
        x if x == T::OutputTtl as u8 => T::OutputTtl,
        x if x == T::OutputDataDestSocket as u8 => T::OutputDataDestSocket,
        x if x == T::MinPacket as u8 => T::MinPacket,
        x if x == T::StatusInterval as u8 => T::StatusInterval,
        x if x == T::Preset as u8 => T::Preset,
        x if x == T::DemodType as u8 => T::DemodType,
        x if x == T::SquelchOpen as u8 => T::SquelchOpen,
        x if x == T::SquelchClose as u8 => T::SquelchClose,
        x if x == T::Headroom as u8 => T::Headroom,
        x if x == T::AgcEnable as u8 => T::AgcEnable,
        x if x == T::AgcHangtime as u8 => T::AgcHangtime,
        x if x == T::AgcRecoveryRate as u8 => T::AgcRecoveryRate,
        x if x == T::AgcThreshold as u8 => T::AgcThreshold,
        x if x == T::Gain as u8 => T::Gain,
        x if x == T::PllEnable as u8 => T::PllEnable,
        x if x == T::PllSquare as u8 => T::PllSquare,
        x if x == T::PllBw as u8 => T::PllBw,
        x if x == T::Envelope as u8 => T::Envelope,
        x if x == T::IndependentSideband as u8 => T::IndependentSideband,
        x if x == T::ThreshExtend as u8 => T::ThreshExtend,
        x if x == T::DeemphTc as u8 => T::DeemphTc,
        x if x == T::DeemphGain as u8 => T::DeemphGain,
        x if x == T::ToneFreq as u8 => T::ToneFreq,
        x if x == T::BinCount as u8 => T::BinCount,
        x if x == T::NoncoherentBinBw as u8 => T::NoncoherentBinBw,
        x if x == T::OpusBitRate as u8 => T::OpusBitRate,
        x if x == T::OpusApplication as u8 => T::OpusApplication,
        x if x == T::OpusDtx as u8 => T::OpusDtx,
        x if x == T::OpusFec as u8 => T::OpusFec,
        x if x == T::SetOpts as u8 => T::SetOpts,
        x if x == T::ClearOpts as u8 => T::ClearOpts,
        _ => return None,
    })
}

/// Apply one command packet body to the channel. Returns true when a
/// structural parameter changed and the demod loop must restart.
pub fn apply_commands(chan: &mut Channel, body: &[u8]) -> bool {
    let mut restart = false;
    let mut new_freq: Option<f64> = None;
    let blocktime = chan.deps.blocktime;

    for t in TlvIter::new(body) {
        let Some(ty) = type_of(t.ty) else {
            continue; // COMMAND_TAG/OUTPUT_SSRC handled upstream; rest ignored
        };
        match ty {
            T::RadioFrequency => {
                let f = t.as_f64();
                if f.is_finite() && (0.0..=100e9).contains(&f) {
                    new_freq = Some(f);
                }
            }
            T::FirstLoFrequency => {
                let f = t.as_f64();
                if f.is_finite() && f > 0.0 {
                    if let Err(e) = chan.deps.frontend.retune(f) {
                        debug!("[chan {}] first LO command refused: {e}", chan.ssrc());
                    }
                }
            }
            T::ShiftFrequency => {
                let f = t.as_f64();
                if f.is_finite() && f.abs() <= f64::from(chan.cfg.samprate) / 2.0 {
                    chan.cfg.shift = f;
                }
            }
            T::DopplerFrequency => {
                let f = t.as_f64();
                if f.is_finite() {
                    chan.cfg.doppler = f;
                }
            }
            T::DopplerFrequencyRate => {
                let f = t.as_f64();
                if f.is_finite() {
                    chan.cfg.doppler_rate = f;
                }
            }
            T::FreqLock => chan.cfg.freq_lock = t.as_bool(),
            T::LowEdge => {
                let f = t.as_f64();
                if f.is_finite() {
                    chan.cfg.low = f;
                    restart = true;
                }
            }
            T::HighEdge => {
                let f = t.as_f64();
                if f.is_finite() {
                    chan.cfg.high = f;
                    restart = true;
                }
            }
            T::KaiserBeta => {
                let b = f64::from(t.as_f32());
                if b.is_finite() && (0.0..=100.0).contains(&b) {
                    chan.cfg.kaiser_beta = b;
                    restart = true;
                }
            }
            T::Filter2 => {
                chan.cfg.filter2_blocking = (t.as_u64().min(16)) as usize;
                restart = true;
            }
            T::Filter2KaiserBeta => {
                let b = f64::from(t.as_f32());
                if b.is_finite() && (0.0..=100.0).contains(&b) {
                    chan.cfg.filter2_beta = b;
                    restart = true;
                }
            }
            T::OutputSamprate => {
                let r = t.as_u32().clamp(1, 10_000_000);
                let r = round_samprate(r, blocktime);
                if r != chan.cfg.samprate {
                    chan.cfg.samprate = r;
                    restart = true;
                }
            }
            T::OutputChannels => {
                let c = t.as_u32().clamp(1, 2) as u8;
                if c != chan.cfg.channels {
                    chan.cfg.channels = c;
                    restart = true;
                }
            }
            T::OutputEncoding => {
                if let Some(e) = Encoding::from_wire(t.as_u32() as u8) {
                    if e != chan.cfg.encoding {
                        chan.cfg.encoding = e;
                        restart = true;
                    }
                }
            }
            T::OutputTtl => {
                let ttl = t.as_u32().min(255);
                if ttl != chan.cfg.ttl {
                    chan.cfg.ttl = ttl;
                    restart = true;
                }
            }
            T::OutputDataDestSocket => {
                if let Some(sock) = t.as_socket() {
                    let mut status = sock;
                    status.set_port(crate::rtp::DEFAULT_STAT_PORT);
                    chan.cfg.dest = sock;
                    chan.cfg.status_dest = status;
                    restart = true;
                }
            }
            T::MinPacket => {
                chan.sender.minpacket = t.as_u32().min(4) as u8;
                chan.cfg.minpacket = chan.sender.minpacket;
            }
            T::StatusInterval => {
                chan.cfg.update_interval = t.as_u32().min(1_000_000);
                chan.status.output_interval = chan.cfg.update_interval;
            }
            T::Preset => {
                if let Some(name) = t.as_str() {
                    let name = name.trim().to_string();
                    if let Some(section) = chan.deps.presets.section(&name) {
                        let section = section.clone();
                        loadpreset(&mut chan.cfg, &section, blocktime);
                        chan.cfg.preset = name;
                        restart = true;
                    } else {
                        debug!("[chan {}] unknown preset '{name}'", chan.ssrc());
                    }
                }
            }
            T::DemodType => {
                if let Some(d) = DemodType::from_wire(t.as_u32() as u8) {
                    if d != chan.cfg.demod_type {
                        chan.cfg.demod_type = d;
                        restart = true;
                    }
                }
            }
            T::SquelchOpen => {
                let db = t.as_f32();
                if db.is_finite() && (-50.0..=100.0).contains(&db) {
                    chan.cfg.squelch_open = db2power(db);
                }
            }
            T::SquelchClose => {
                let db = t.as_f32();
                if db.is_finite() && (-50.0..=100.0).contains(&db) {
                    chan.cfg.squelch_close = db2power(db);
                }
            }
            T::Headroom => {
                let db = t.as_f32();
                if db.is_finite() {
                    chan.cfg.headroom = db2voltage(-db.abs());
                }
            }
            T::AgcEnable => chan.cfg.agc = t.as_bool(),
            T::AgcHangtime => {
                let secs = t.as_f32();
                if secs.is_finite() && (0.0..=60.0).contains(&secs) {
                    chan.cfg.hangtime = secs / blocktime as f32;
                }
            }
            T::AgcRecoveryRate => {
                let db_per_sec = t.as_f32();
                if db_per_sec.is_finite() {
                    chan.cfg.recovery_rate = db2voltage(db_per_sec.abs() * blocktime as f32);
                }
            }
            T::AgcThreshold => {
                let db = t.as_f32();
                if db.is_finite() {
                    chan.cfg.threshold = db2voltage(-db.abs());
                }
            }
            T::Gain => {
                let db = t.as_f32();
                if db.is_finite() && (-100.0..=200.0).contains(&db) {
                    chan.cfg.gain = db2voltage(db);
                }
            }
            T::PllEnable => chan.cfg.pll = t.as_bool(),
            T::PllSquare => {
                chan.cfg.square = t.as_bool();
                if chan.cfg.square {
                    chan.cfg.pll = true;
                }
            }
            T::PllBw => {
                let bw = f64::from(t.as_f32());
                if bw.is_finite() && (0.0..=1000.0).contains(&bw) {
                    chan.cfg.pll_bw = bw;
                    restart = true; // loop gains are derived at setup
                }
            }
            T::Envelope => chan.cfg.env = t.as_bool(),
            T::IndependentSideband => {
                chan.cfg.isb = t.as_bool();
                restart = true; // sideband split happens in the filter
            }
            T::ThreshExtend => chan.cfg.threshold_extend = t.as_bool(),
            T::DeemphTc => {
                let usec = t.as_f32();
                if usec.is_finite() && (0.0..=10_000.0).contains(&usec) {
                    chan.cfg.deemph_rate = if usec > 0.0 {
                        (-1.0 / (usec * 1e-6 * chan.cfg.samprate as f32)).exp()
                    } else {
                        0.0
                    };
                }
            }
            T::DeemphGain => {
                let db = t.as_f32();
                if db.is_finite() && db.abs() <= 60.0 {
                    chan.cfg.deemph_gain = db2voltage(db);
                }
            }
            T::ToneFreq => {
                let f = t.as_f32();
                if f.is_finite() && (0.0..=3000.0).contains(&f) {
                    chan.cfg.tone_freq = f;
                }
            }
            T::BinCount => {
                let n = t.as_u64().clamp(1, 1 << 20) as usize;
                if n != chan.cfg.spectrum.bin_count {
                    chan.cfg.spectrum.bin_count = n;
                    restart = true;
                }
            }
            T::NoncoherentBinBw => {
                let bw = f64::from(t.as_f32());
                if bw.is_finite() && bw > 0.0 {
                    chan.cfg.spectrum.bin_bw = bw;
                    restart = true;
                }
            }
            T::OpusBitRate => {
                chan.cfg.opus.bitrate = t.as_u64().min(510_000) as i32;
                restart = true;
            }
            T::OpusApplication => {
                if let Some(a) = OpusApplication::from_wire(t.as_u32() as u8) {
                    chan.cfg.opus.application = a;
                    restart = true;
                }
            }
            T::OpusDtx => {
                chan.cfg.opus.dtx = t.as_bool();
                restart = true;
            }
            T::OpusFec => {
                chan.cfg.opus.fec = t.as_bool();
                restart = true;
            }
            T::SetOpts => {
                let bits = t.as_u64();
                apply_opts(chan, bits, true);
            }
            T::ClearOpts => {
                let bits = t.as_u64();
                apply_opts(chan, bits, false);
            }
            _ => {}
        }
    }

    if let Some(f) = new_freq {
        if chan.cfg.freq_lock {
            debug!("[chan {}] frequency locked, ignoring retune", chan.ssrc());
        } else {
            chan.set_freq(f);
        }
    }
    restart
}

fn apply_opts(chan: &mut Channel, bits: u64, set: bool) {
    if bits & OPT_PACING != 0 {
        chan.cfg.pacing = set;
    }
    if bits & OPT_FREQ_LOCK != 0 {
        chan.cfg.freq_lock = set;
    }
    if bits & OPT_THRESH_EXTEND != 0 {
        chan.cfg.threshold_extend = set;
    }
    if bits & OPT_SQUELCH_TAIL_DISABLE != 0 {
        chan.cfg.squelch_tail = if set { 0 } else { 1 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tlv::{TlvWriter, PKT_COMMAND};

    // Channel construction needs a full engine; the apply path gets its
    // end-to-end coverage in tests/daemon.rs. Pure helpers are tested
    // here.

    #[test]
    fn opts_bits_are_disjoint() {
        let all = [
            OPT_PACING,
            OPT_FREQ_LOCK,
            OPT_THRESH_EXTEND,
            OPT_SQUELCH_TAIL_DISABLE,
        ];
        let mut acc = 0u64;
        for b in all {
            assert_eq!(acc & b, 0);
            acc |= b;
        }
    }

    #[test]
    fn unknown_types_map_to_none() {
        assert!(type_of(0xfe).is_none());
        assert!(type_of(T::RadioFrequency as u8).is_some());
    }

    #[test]
    fn command_body_iterates() {
        let mut w = TlvWriter::new(PKT_COMMAND);
        w.double(T::RadioFrequency as u8, 14_074_000.0)
            .int(T::OutputSamprate as u8, 12_000);
        let pkt = w.finish();
        let types: Vec<u8> = TlvIter::new(&pkt[1..]).map(|t| t.ty).collect();
        assert_eq!(
            types,
            vec![T::RadioFrequency as u8, T::OutputSamprate as u8]
        );
    }
}
