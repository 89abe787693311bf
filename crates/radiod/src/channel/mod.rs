// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Channel objects and the per-block downconversion loop shared by all
//! demodulators.
//!
//! A channel is identified by its RTP SSRC. The demod thread owns all
//! DSP and output state; only the command mailbox is shared. Every block
//! the loop drains commands, emits due status, waits for front-end
//! coverage and the next master frame, then translates/filters/fine-tunes
//! into complex baseband for the demodulator proper.

pub mod preset;
pub mod registry;

pub use registry::{ChannelShared, ChannelTable, CreateError, Mailbox};

use crate::dsp::noise::{estimate_noise, MIN_NOISE_BINS, POWER_ALPHA};
use crate::dsp::osc::Osc;
use crate::dsp::window::WindowType;
use crate::dsp::{cispi, cnrm};
use crate::engine::Deps;
use crate::filter::slave::{ChannelFilter, SecondaryFilter};
use crate::filter::{compute_tuning, InType};
use crate::protocol::types::{DemodType, Encoding};
use crate::protocol::{command, status};
use crate::rtp::sender::{RtpSender, SenderConfig};
use log::debug;
use num_complex::Complex64;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Opus encoder application mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OpusApplication {
    Voip = 0,
    #[default]
    Audio = 1,
    LowDelay = 2,
}

impl OpusApplication {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "voip" => OpusApplication::Voip,
            "audio" => OpusApplication::Audio,
            "lowdelay" => OpusApplication::LowDelay,
            _ => return None,
        })
    }

    pub fn from_wire(x: u8) -> Option<Self> {
        Some(match x {
            0 => OpusApplication::Voip,
            1 => OpusApplication::Audio,
            2 => OpusApplication::LowDelay,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpusParams {
    /// Bits/second; 0 = codec default.
    pub bitrate: i32,
    pub application: OpusApplication,
    pub dtx: bool,
    pub fec: bool,
}

/// Spectrum pseudo-demodulator parameters.
#[derive(Debug, Clone)]
pub struct SpectrumParams {
    pub bin_count: usize,
    /// Output bin width, Hz.
    pub bin_bw: f64,
    /// Power integration time constant, seconds.
    pub integrate_tc: f64,
    pub window: WindowType,
    pub window_shape: f64,
    pub crossover: f64,
}

impl Default for SpectrumParams {
    fn default() -> Self {
        SpectrumParams {
            bin_count: 64,
            bin_bw: 1000.0,
            integrate_tc: 1.0,
            window: WindowType::Kaiser,
            window_shape: 11.0,
            crossover: 0.0,
        }
    }
}

/// Complete channel configuration; the template for dynamic channels is
/// one of these. Gains and thresholds are stored in linear units, rates
/// already converted to per-block terms.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub demod_type: DemodType,
    pub preset: String,

    // Tuning
    pub freq: f64,
    pub shift: f64,
    pub doppler: f64,
    pub doppler_rate: f64,
    pub freq_lock: bool,

    // Primary filter, Hz relative to the channel IF
    pub low: f64,
    pub high: f64,
    pub kaiser_beta: f64,
    pub isb: bool,

    // Secondary filter; blocking 0 disables
    pub filter2_blocking: usize,
    /// Negative inherits the primary's beta.
    pub filter2_beta: f64,

    // Linear demod / AGC (linear voltage and per-block units)
    pub agc: bool,
    pub headroom: f32,
    pub recovery_rate: f32,
    pub hangtime: f32,
    pub threshold: f32,
    pub gain: f32,
    pub env: bool,
    pub pll: bool,
    pub square: bool,
    /// PLL loop bandwidth, Hz.
    pub pll_bw: f64,

    // Squelch (power ratios) and FM
    pub squelch_open: f32,
    pub squelch_close: f32,
    pub squelch_tail: u32,
    pub threshold_extend: bool,
    /// De-emphasis IIR pole; 0 disables.
    pub deemph_rate: f32,
    pub deemph_gain: f32,
    pub tone_freq: f32,

    pub spectrum: SpectrumParams,

    // Output
    pub samprate: u32,
    pub channels: u8,
    pub encoding: Encoding,
    pub pacing: bool,
    pub minpacket: u8,
    pub ttl: u32,
    pub dest: SocketAddr,
    pub dest_name: String,
    pub status_dest: SocketAddr,
    pub opus: OpusParams,

    /// Periodic status interval in blocks; 0 disables.
    pub update_interval: u32,
    /// Idle lifetime in blocks for channels tuned to 0 Hz.
    pub lifetime_blocks: u32,
}

/// Signal estimates reported in status.
#[derive(Debug, Clone)]
pub struct SigEstimates {
    /// Average baseband power this block.
    pub bb_power: f32,
    /// Smoothed noise density, power/Hz at the A/D reference.
    pub n0: f64,
    pub snr: f32,
    /// Frequency offset measured by the PLL or FM discriminator, Hz.
    pub foffset: f32,
    pub peak_deviation: f32,
    pub pl_tone: f32,
    pub pl_deviation: f32,
    /// Output audio power after gain.
    pub output_level: f32,
    pub pll_lock: bool,
    /// PLL phase in radians.
    pub pll_phase: f32,
    pub pll_wraps: i64,
}

impl Default for SigEstimates {
    fn default() -> Self {
        SigEstimates {
            bb_power: 0.0,
            n0: f64::NAN,
            snr: f32::NAN,
            foffset: f32::NAN,
            peak_deviation: f32::NAN,
            pl_tone: 0.0,
            pl_deviation: f32::NAN,
            output_level: 0.0,
            pll_lock: false,
            pll_phase: 0.0,
            pll_wraps: 0,
        }
    }
}

/// Status cadence bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ChannelStatus {
    pub output_interval: u32,
    pub output_timer: u32,
    pub blocks_since_poll: u32,
    pub tag: u32,
    pub cmd_cnt: u32,
}

/// What the downconverter tells the demod loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCtl {
    /// Fresh baseband is ready.
    Run,
    /// A command changed structural parameters; re-enter setup.
    Restart,
    /// Channel is done (idle timeout, engine shutdown).
    Terminate,
}

/// Sentinel forcing first-block initialization of the tuning state.
const UNINIT_SHIFT: i32 = -1_000_999;

pub struct Channel {
    pub shared: Arc<ChannelShared>,
    pub deps: Arc<Deps>,
    pub cfg: ChannelConfig,
    pub status: ChannelStatus,
    pub sig: SigEstimates,
    pub sender: RtpSender,

    pub filter: Option<ChannelFilter>,
    pub filter2: Option<SecondaryFilter>,
    fine: Osc,
    phase_adjust: Complex64,
    pub bin_shift: i32,
    remainder: f64,
    /// Current second-LO frequency (front end minus channel RF).
    pub second_lo: f64,
    /// Next master block this channel expects.
    pub next_block: u64,
    /// Complex baseband for the demodulator, one block (or one
    /// secondary-filter block) at a time.
    pub baseband: Vec<num_complex::Complex<f32>>,
    pub lifetime: u32,
    /// Status packets emitted (metadata counter in status).
    pub status_packets_sent: u64,
    /// Smoothed spectrum bins, present only in spectrum mode.
    pub spectrum_bins: Option<Vec<f32>>,
    /// Scratch for the noise estimator.
    noise_scratch: Vec<f64>,
}

impl Channel {
    pub fn new(shared: Arc<ChannelShared>, deps: Arc<Deps>, cfg: ChannelConfig) -> Self {
        let sender = Self::build_sender(&deps, &cfg, shared.ssrc);
        let mut chan = Channel {
            shared,
            deps,
            status: ChannelStatus {
                output_interval: cfg.update_interval,
                ..Default::default()
            },
            sig: SigEstimates::default(),
            sender,
            filter: None,
            filter2: None,
            fine: Osc::new(),
            phase_adjust: Complex64::new(1.0, 0.0),
            bin_shift: UNINIT_SHIFT,
            remainder: f64::NAN,
            second_lo: 0.0,
            next_block: 0,
            baseband: Vec::new(),
            lifetime: cfg.lifetime_blocks,
            status_packets_sent: 0,
            spectrum_bins: None,
            noise_scratch: Vec::new(),
            cfg,
        };
        chan.rebuild();
        chan
    }

    fn build_sender(deps: &Deps, cfg: &ChannelConfig, ssrc: u32) -> RtpSender {
        let sock = if cfg.ttl > 0 {
            Arc::clone(&deps.output_sock)
        } else {
            Arc::clone(&deps.output_sock0)
        };
        RtpSender::new(
            &SenderConfig {
                encoding: cfg.encoding,
                samprate: cfg.samprate,
                channels: cfg.channels,
                dest: cfg.dest,
                pacing: cfg.pacing,
                minpacket: cfg.minpacket,
                blocktime: deps.blocktime,
            },
            ssrc,
            sock,
            &deps.pt_table,
        )
    }

    pub fn ssrc(&self) -> u32 {
        self.shared.ssrc
    }

    /// Rebuild filters and the RTP sender after structural changes.
    /// RTP sequence/timestamp state survives so streams stay continuous;
    /// the next packet carries a marker.
    pub fn rebuild(&mut self) {
        let p = self.deps.master.params;
        // WFM filters a wide composite band; audio is resampled down later
        let rs = if self.cfg.demod_type == DemodType::Wfm {
            f64::from(preset::round_samprate(384_000, p.blocktime()))
        } else {
            f64::from(self.cfg.samprate)
        };
        // Clamp the passband to the Nyquist interval
        let mut lower = self.cfg.low.max(-rs / 2.0);
        let mut upper = self.cfg.high.min(rs / 2.0);

        if self.cfg.demod_type == DemodType::Spectrum {
            self.filter = None;
            self.filter2 = None;
        } else {
            if self.cfg.filter2_blocking > 0 {
                // The primary becomes a roofing filter: widen it by four
                // inner bin widths so its skirts clear the inner passband
                let olen = (rs * p.blocktime()).round().max(1.0) as usize;
                let mut f2 = SecondaryFilter::new(self.cfg.filter2_blocking, olen, rs);
                let beta = if self.cfg.filter2_beta >= 0.0 {
                    self.cfg.filter2_beta
                } else {
                    self.cfg.kaiser_beta
                };
                f2.set_filter(lower, upper, beta);
                let binsize = (1.0 / p.blocktime()) * ((p.overlap() - 1) as f64 / p.overlap() as f64);
                let margin = 4.0 * binsize;
                lower = (lower - margin).max(-rs / 2.0);
                upper = (upper + margin).min(rs / 2.0);
                self.filter2 = Some(f2);
            } else {
                self.filter2 = None;
            }
            let mut filter =
                ChannelFilter::new(p.n(), p.bins(), p.l, p.in_type, p.samprate, rs);
            filter.isb = self.cfg.isb && self.cfg.demod_type == DemodType::Linear;
            filter.set_filter(lower, upper, self.cfg.kaiser_beta);
            self.filter = Some(filter);
        }

        let old_rtp = self.sender.rtp.clone();
        let old_errors = self.sender.errors;
        self.sender = Self::build_sender(&self.deps, &self.cfg, self.shared.ssrc);
        self.sender.rtp = old_rtp;
        self.sender.errors = old_errors;
        self.sender.stats = Some(Arc::clone(&self.shared.rtp_stats));
        #[cfg(feature = "opus")]
        if self.cfg.encoding == Encoding::Opus {
            match crate::rtp::opus::OpusEncoder::new(
                self.cfg.samprate,
                self.cfg.channels,
                &self.cfg.opus,
            ) {
                Ok(enc) => self.sender.set_opus(enc),
                Err(e) => debug!("[chan {}] opus setup failed: {e}", self.ssrc()),
            }
        }

        self.status.output_interval = self.cfg.update_interval;
        self.remainder = f64::NAN;
        self.bin_shift = UNINIT_SHIFT;
        // Stale bins must not ride along in the next status response
        self.spectrum_bins = None;
    }

    /// Baseband frames per block at the output rate.
    pub fn frames_per_block(&self) -> u32 {
        self.filter.as_ref().map_or(0, |f| f.olen() as u32)
    }

    /// Set the channel RF frequency; retunes the front end when the
    /// required IF falls outside coverage (minimum movement, 1 kHz fudge
    /// for hardware rounding). Tuning to 0 Hz parks the channel.
    pub fn set_freq(&mut self, f: f64) {
        self.cfg.freq = f;
        if f == 0.0 {
            return;
        }
        let fe = &self.deps.frontend;
        let (new_if, min_if, max_if) = {
            let t = fe.tuner();
            (f - t.frequency, t.min_if, t.max_if)
        };
        const FUDGE: f64 = 1000.0;
        if new_if > max_if - self.cfg.high {
            let target_if = max_if - self.cfg.high - FUDGE;
            if let Err(e) = fe.retune(f - target_if) {
                debug!("[chan {}] front end retune refused: {e}", self.ssrc());
            }
        } else if new_if < min_if - self.cfg.low {
            let target_if = min_if - self.cfg.low + FUDGE;
            if let Err(e) = fe.retune(f - target_if) {
                debug!("[chan {}] front end retune refused: {e}", self.ssrc());
            }
        }
    }

    /// Top-of-loop work common to every demodulator. Returns with fresh
    /// baseband in `self.baseband` (except for spectrum channels, which
    /// read the master ring directly after this returns `Run`).
    pub fn downconvert(&mut self) -> LoopCtl {
        loop {
            if self.deps.terminate.load(Ordering::Relaxed) {
                return LoopCtl::Terminate;
            }
            // Idle aging: channels parked at 0 Hz eventually go away
            if self.cfg.freq == 0.0 && self.lifetime > 0 {
                self.lifetime -= 1;
                if self.lifetime == 0 {
                    debug!("[chan {}] idle timeout", self.ssrc());
                    return LoopCtl::Terminate;
                }
            }
            match self.run_status_pass() {
                LoopCtl::Run => {}
                other => return other,
            }

            // Evaluate tuning every block: the front end moves under us
            let fe_freq = self.deps.frontend.frequency();
            self.second_lo = fe_freq - self.cfg.freq;
            let freq = -(self.cfg.doppler + self.second_lo);
            let p = self.deps.master.params;
            let Some((shift, remainder)) = compute_tuning(p.n(), p.samprate, freq) else {
                // No coverage; wait one block for the front end to move
                self.sig.bb_power = 0.0;
                self.sig.output_level = 0.0;
                self.deps
                    .frontend
                    .wait_status_change(Duration::from_secs_f64(p.blocktime()));
                continue;
            };

            // Block until the master publishes the frame we need
            let wanted = self.next_block + 1;
            let mut published = self.deps.master.wake.wait_for(
                wanted,
                Duration::from_secs_f64(4.0 * p.blocktime()),
            );
            while published < wanted {
                if self.deps.terminate.load(Ordering::Relaxed) {
                    return LoopCtl::Terminate;
                }
                published = self
                    .deps
                    .master
                    .wake
                    .wait_for(wanted, Duration::from_millis(100));
            }
            // Catch up silently if we lagged out of the ring
            if published - self.next_block >= self.deps.master.ring.depth() as u64 {
                self.next_block = published - 1;
            }
            let blocknum = self.next_block;
            self.next_block += 1;
            self.status.blocks_since_poll = self.status.blocks_since_poll.wrapping_add(1);

            if self.filter.is_none() {
                // Spectrum mode: no time-domain output, bins read directly
                self.bin_shift = shift;
                return LoopCtl::Run;
            }

            {
                let Some(filter) = self.filter.as_mut() else {
                    continue;
                };
                if !filter.execute(&self.deps.master.ring, blocknum, shift) {
                    // Frame recycled under us; jump forward and retry
                    self.next_block = self.deps.master.wake.count();
                    continue;
                }
            }

            self.update_noise_estimate(shift, blocknum);
            self.apply_fine_tuning(shift, remainder);

            // Optional secondary filter accumulates B primary blocks
            let Some(filter) = self.filter.as_ref() else {
                continue;
            };
            if let Some(f2) = self.filter2.as_mut() {
                if !f2.write(&filter.output) {
                    continue; // inner block not complete yet
                }
                self.baseband.clear();
                self.baseband.extend_from_slice(&f2.output);
            } else {
                self.baseband.clear();
                self.baseband.extend_from_slice(&filter.output);
            }

            let energy: f64 = self.baseband.iter().map(|&z| f64::from(cnrm(z))).sum();
            self.sig.bb_power = (energy / self.baseband.len().max(1) as f64) as f32;
            return LoopCtl::Run;
        }
    }

    /// Drain the mailbox and emit any due status packets.
    fn run_status_pass(&mut self) -> LoopCtl {
        let mut restart_needed = false;
        let mailbox = Arc::clone(&self.shared);
        let mut mb = mailbox.mailbox.lock();

        if self.status.output_interval != 0 && self.status.output_timer == 0 && !self.sender.silent
        {
            // Channel just became active; refresh listeners promptly
            self.status.output_timer = 1;
        }

        if let Some(cmd) = mb.command.take() {
            self.status.tag = mb.tag;
            self.status.cmd_cnt = self.status.cmd_cnt.wrapping_add(1);
            self.lifetime = self.cfg.lifetime_blocks; // any command resets aging
            restart_needed = command::apply_commands(self, &cmd);
            status::send_status(self, self.deps.status_dest);
            mb.global_timer = 0;
            if self.cfg.demod_type != DemodType::Spectrum {
                // Spectrum data goes only to the status group on poll
                status::send_status(self, self.cfg.status_dest);
            }
            self.status.output_timer = self.status.output_interval;
            self.status.blocks_since_poll = 0;
        } else if mb.global_timer > 0 {
            mb.global_timer -= 1;
            if mb.global_timer == 0 {
                // Deferred reply to an all-channel poll
                self.status.tag = mb.tag;
                status::send_status(self, self.deps.status_dest);
                self.status.blocks_since_poll = 0;
            }
        } else if self.status.output_interval != 0 && self.status.output_timer > 0 {
            self.status.output_timer -= 1;
            if self.status.output_timer == 0 {
                status::send_status(self, self.cfg.status_dest);
                self.status.blocks_since_poll = 0;
                if !self.sender.silent {
                    self.status.output_timer = self.status.output_interval;
                }
            }
        }
        drop(mb);
        if restart_needed {
            debug!("[chan {}] restart needed", self.ssrc());
            return LoopCtl::Restart;
        }
        LoopCtl::Run
    }

    /// Estimate and smooth N0 from master bins around the channel.
    fn update_noise_estimate(&mut self, shift: i32, blocknum: u64) {
        let p = self.deps.master.params;
        let master_bins = self.deps.master.ring.bins();
        let chan_bins = self.filter.as_ref().map_or(0, ChannelFilter::n_out);
        let mut nbins = chan_bins.max(MIN_NOISE_BINS);
        if nbins > master_bins {
            nbins = master_bins; // low-Fs front end: degrade gracefully
        }
        self.noise_scratch.clear();
        self.noise_scratch.resize(nbins, 0.0);
        let scratch = &mut self.noise_scratch;

        let filled = self
            .deps
            .master
            .ring
            .with_frame(blocknum, |fdomain| match p.in_type {
                InType::Real => {
                    let mut mbin = (shift.unsigned_abs() as usize).saturating_sub(nbins / 2);
                    if mbin + nbins > master_bins {
                        mbin = master_bins - nbins;
                    }
                    for (i, e) in scratch.iter_mut().enumerate() {
                        *e = f64::from(cnrm(fdomain[mbin + i]));
                    }
                    nbins
                }
                InType::Complex => {
                    let n = master_bins as i64;
                    let mut mbin = (i64::from(shift) - nbins as i64 / 2).rem_euclid(n);
                    let mut filled = 0usize;
                    for e in scratch.iter_mut() {
                        *e = f64::from(cnrm(fdomain[mbin as usize]));
                        filled += 1;
                        mbin += 1;
                        if mbin == n {
                            mbin = 0; // wrap from most-negative to DC
                        }
                        if mbin == n / 2 {
                            break; // fell off the aliasing edge
                        }
                    }
                    filled
                }
            });
        let Some(filled) = filled else {
            return; // frame recycled; keep the previous estimate
        };
        let est = estimate_noise(&mut self.noise_scratch[..filled], p.n(), p.samprate);
        if self.sig.n0.is_nan() {
            self.sig.n0 = est;
        } else {
            self.sig.n0 += POWER_ALPHA * (est - self.sig.n0);
        }
    }

    /// Fine-tune the filter output: remove the sub-bin remainder and keep
    /// the block phase continuous across bin-shift changes (Renfors /
    /// Yli-Kaakinen / Harris correction, eq. 12).
    fn apply_fine_tuning(&mut self, shift: i32, remainder: f64) {
        let rs = self.filter.as_ref().map_or(f64::from(self.cfg.samprate), |f| f.rs());
        if shift != self.bin_shift || remainder != self.remainder {
            self.fine
                .set(-remainder / rs, self.cfg.doppler_rate / (rs * rs));
            self.remainder = remainder;
        }
        if shift != self.bin_shift {
            let p = self.deps.master.params;
            let v = p.overlap() as i32;
            self.phase_adjust = cispi(2.0 * f64::from(shift.rem_euclid(v)) / f64::from(v));
            self.fine.phasor *= cispi(f64::from(shift - self.bin_shift) / (-2.0 * f64::from(v - 1)));
            self.bin_shift = shift;
        }
        self.fine.phasor *= self.phase_adjust;

        let Some(filter) = self.filter.as_mut() else {
            return;
        };
        for s in filter.output.iter_mut() {
            let ph = self.fine.step();
            let rot = num_complex::Complex::new(ph.re as f32, ph.im as f32);
            *s *= rot;
        }
    }
}

/// Demodulator dispatch loop: run until the channel dies, re-entering
/// the active demodulator after every structural change.
pub fn demod_loop(mut chan: Channel) {
    loop {
        let ctl = match chan.cfg.demod_type {
            DemodType::Linear => crate::demod::linear::run(&mut chan),
            DemodType::Fm => crate::demod::fm::run(&mut chan),
            DemodType::Wfm => crate::demod::wfm::run(&mut chan),
            DemodType::Spectrum => crate::demod::spectrum::run(&mut chan),
        };
        match ctl {
            LoopCtl::Restart => {
                chan.rebuild();
            }
            LoopCtl::Terminate => break,
            LoopCtl::Run => unreachable!("demods return only Restart or Terminate"),
        }
    }
    let ssrc = chan.ssrc();
    let deps = Arc::clone(&chan.deps);
    drop(chan); // free filters, encoder, bins before the slot clears
    deps.registry.remove(ssrc);
    debug!("[chan {ssrc}] closed, {} active", deps.registry.active_count());
}
