// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Status packet composition.
//!
//! One status packet carries everything a monitor needs: front-end
//! facts, tuning, filter geometry, signal estimates, demodulator state
//! and the RTP output description. Values travel in the units the
//! protocol defines (dB for gains and thresholds, Hz for frequencies,
//! linear power only for the raw estimates).

use crate::channel::Channel;
use crate::dsp::{power2db, voltage2db};
use crate::frontend::scale_ad_power2fs;
use crate::protocol::gps_time_ns;
use crate::protocol::tlv::{TlvWriter, PKT_STATUS};
use crate::protocol::types::{DemodType, StatusType as T};
use log::debug;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;

/// Compose and transmit one status packet for `chan` to `dest`.
///
/// Status always goes out the TTL>0 socket so monitors beyond the local
/// host can see it, regardless of the data stream's TTL.
pub fn send_status(chan: &mut Channel, dest: SocketAddr) {
    let pkt = build_status(chan);
    match chan.deps.output_sock.send_to(&pkt, dest) {
        Ok(_) => {
            chan.status_packets_sent = chan.status_packets_sent.wrapping_add(1);
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => {
            debug!("[status {}] send to {dest} failed: {e}", chan.ssrc());
        }
    }
}

fn build_status(chan: &Channel) -> Vec<u8> {
    let deps = &chan.deps;
    let fe = &deps.frontend;
    let cfg = &chan.cfg;
    let mut w = TlvWriter::new(PKT_STATUS);

    w.int(T::CommandTag as u8, u64::from(chan.status.tag))
        .int(T::CmdCnt as u8, u64::from(chan.status.cmd_cnt))
        .int(T::GpsTime as u8, gps_time_ns() as u64)
        .string(T::Description as u8, &fe.info.description)
        .int(
            T::BlocksSincePoll as u8,
            u64::from(chan.status.blocks_since_poll),
        )
        .int(T::StatusInterval as u8, u64::from(chan.status.output_interval));

    // Front end
    {
        let t = fe.tuner();
        let ad_scale = scale_ad_power2fs(&fe.info);
        w.double(T::InputSamprate as u8, fe.info.samprate)
            .int(T::InputSamples as u8, fe.samples.load(Ordering::Relaxed))
            .int(T::AdOver as u8, fe.overranges.load(Ordering::Relaxed))
            .int(
                T::SamplesSinceOver as u8,
                fe.samples_since_over.load(Ordering::Relaxed),
            )
            .int(T::AdBitsPerSample as u8, u64::from(fe.info.bitspersample))
            .float(
                T::IfPower as u8,
                power2db(fe.if_power() * ad_scale as f32),
            )
            .float(T::LnaGain as u8, t.lna_gain)
            .float(T::MixerGain as u8, t.mixer_gain)
            .float(T::IfGain as u8, t.if_gain)
            .float(T::RfAtten as u8, t.rf_atten)
            .float(T::RfGain as u8, t.rf_gain)
            .float(T::RfLevelCal as u8, t.rf_level_cal)
            .bool(T::RfAgc as u8, t.rf_agc)
            .bool(T::DirectConversion as u8, fe.info.direct_conversion)
            .float(T::FeLowEdge as u8, t.min_if as f32)
            .float(T::FeHighEdge as u8, t.max_if as f32)
            .bool(T::FeIsreal as u8, fe.info.isreal)
            .double(T::FirstLoFrequency as u8, t.frequency);
    }

    // Tuning
    w.double(T::RadioFrequency as u8, cfg.freq)
        .double(T::SecondLoFrequency as u8, chan.second_lo)
        .double(T::ShiftFrequency as u8, cfg.shift)
        .double(T::DopplerFrequency as u8, cfg.doppler)
        .double(T::DopplerFrequencyRate as u8, cfg.doppler_rate)
        .bool(T::FreqLock as u8, cfg.freq_lock);

    // Filtering
    w.float(T::LowEdge as u8, cfg.low as f32)
        .float(T::HighEdge as u8, cfg.high as f32)
        .float(T::KaiserBeta as u8, cfg.kaiser_beta as f32);
    if let Some(filter) = &chan.filter {
        w.int(T::FilterBlocksize as u8, filter.olen() as u64)
            .int(T::FilterFirLength as u8, filter.fir_length() as u64)
            .int(T::FilterDrops as u8, filter.drops);
    }
    if let Some(f2) = &chan.filter2 {
        w.int(T::Filter2 as u8, f2.blocking as u64)
            .float(T::Filter2KaiserBeta as u8, cfg.filter2_beta as f32)
            .int(T::Filter2Blocksize as u8, f2.blocksize() as u64)
            .int(T::Filter2FirLength as u8, f2.fir_length() as u64);
    }

    // Signal estimates
    w.float(T::BasebandPower as u8, power2db(chan.sig.bb_power))
        .float(T::NoiseDensity as u8, power2db(chan.sig.n0 as f32))
        .float(T::DemodSnr as u8, power2db(chan.sig.snr))
        .float(T::FreqOffset as u8, chan.sig.foffset)
        .int(T::DemodType as u8, cfg.demod_type as u64);

    match cfg.demod_type {
        DemodType::Linear => {
            w.bool(T::PllEnable as u8, cfg.pll)
                .bool(T::Envelope as u8, cfg.env)
                .bool(T::IndependentSideband as u8, cfg.isb);
            if cfg.pll {
                w.bool(T::PllLock as u8, chan.sig.pll_lock)
                    .bool(T::PllSquare as u8, cfg.square)
                    .float(T::PllPhase as u8, chan.sig.pll_phase)
                    .float(T::PllBw as u8, cfg.pll_bw as f32)
                    .int(T::PllWraps as u8, chan.sig.pll_wraps as u64);
            }
            w.bool(T::AgcEnable as u8, cfg.agc)
                .float(T::Headroom as u8, voltage2db(cfg.headroom))
                .float(
                    T::AgcHangtime as u8,
                    cfg.hangtime * deps.blocktime as f32,
                )
                .float(
                    T::AgcRecoveryRate as u8,
                    voltage2db(cfg.recovery_rate) / deps.blocktime as f32,
                )
                .float(T::AgcThreshold as u8, voltage2db(cfg.threshold))
                .float(T::Gain as u8, voltage2db(cfg.gain));
        }
        DemodType::Fm | DemodType::Wfm => {
            w.bool(T::ThreshExtend as u8, cfg.threshold_extend)
                .float(T::PeakDeviation as u8, chan.sig.peak_deviation)
                .float(T::PlTone as u8, chan.sig.pl_tone)
                .float(T::PlDeviation as u8, chan.sig.pl_deviation)
                .float(T::ToneFreq as u8, cfg.tone_freq)
                .float(T::DeemphTc as u8, deemph_tc_usec(cfg.deemph_rate, cfg.samprate))
                .float(T::DeemphGain as u8, voltage2db(cfg.deemph_gain));
            if cfg.demod_type == DemodType::Wfm {
                w.bool(T::PllLock as u8, chan.sig.pll_lock);
            }
        }
        DemodType::Spectrum => {
            w.int(T::BinCount as u8, cfg.spectrum.bin_count as u64)
                .float(T::NoncoherentBinBw as u8, cfg.spectrum.bin_bw as f32)
                .float(
                    T::CoherentBinSpacing as u8,
                    (deps.master.params.samprate / deps.master.params.n() as f64) as f32,
                );
            if let Some(bins) = &chan.spectrum_bins {
                w.vector(T::BinData as u8, bins);
            }
        }
    }

    w.float(T::SquelchOpen as u8, power2db(cfg.squelch_open))
        .float(T::SquelchClose as u8, power2db(cfg.squelch_close));

    // Output / RTP
    w.string(T::Preset as u8, &cfg.preset)
        .socket(T::OutputDataDestSocket as u8, &cfg.dest)
        .int(T::OutputSsrc as u8, u64::from(chan.ssrc()))
        .int(T::OutputTtl as u8, u64::from(cfg.ttl))
        .int(T::OutputSamprate as u8, u64::from(cfg.samprate))
        .int(T::OutputChannels as u8, u64::from(cfg.channels))
        .int(T::OutputEncoding as u8, cfg.encoding as u64)
        .int(T::RtpPt as u8, u64::from(chan.sender.pt))
        .int(T::OutputDataPackets as u8, chan.sender.rtp.packets)
        .int(T::OutputMetadataPackets as u8, chan.status_packets_sent)
        .int(T::OutputErrors as u8, chan.sender.errors)
        .int(T::MinPacket as u8, u64::from(cfg.minpacket))
        .float(T::OutputLevel as u8, power2db(chan.sig.output_level));
    if cfg.encoding == crate::protocol::types::Encoding::Opus {
        w.int(T::OpusBitRate as u8, cfg.opus.bitrate.max(0) as u64)
            .int(T::OpusApplication as u8, cfg.opus.application as u64)
            .bool(T::OpusDtx as u8, cfg.opus.dtx)
            .bool(T::OpusFec as u8, cfg.opus.fec);
    }

    w.finish()
}

/// Back-convert the de-emphasis IIR pole to the time constant in
/// microseconds for reporting.
fn deemph_tc_usec(rate: f32, samprate: u32) -> f32 {
    if rate <= 0.0 || rate >= 1.0 {
        return 0.0;
    }
    let tc = -1.0 / (rate.ln() * samprate as f32);
    tc * 1e6
}
