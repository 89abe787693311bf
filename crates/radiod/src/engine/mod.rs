// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Process assembly: configuration to running daemon.
//!
//! The engine owns the front end, the master filter, the channel table
//! and the sockets. It spawns the front-end reader (driver-owned), the
//! FFT worker, the status/command receiver, one demod thread per channel
//! and the optional per-channel RTCP/SAP senders.

use crate::channel::preset::loadpreset;
use crate::channel::{demod_loop, Channel, ChannelConfig, ChannelShared, ChannelTable};
use crate::config::{
    parse_frequency, ConfigError, ConfigFile, ConfigSection, DEFAULT_BLOCKTIME, DEFAULT_IP_TOS,
    DEFAULT_OVERLAP, DEFAULT_PRESET, DEFAULT_UPDATE, GLOBAL, GLOBAL_KEYS,
};
use crate::filter::master::{MasterFilter, MasterInput, MasterParams, NotchState, SampleChunk};
use crate::filter::{compute_tuning, InType};
use crate::frontend::{make_driver, Frontend, FrontendCtx, FrontendError};
use crate::protocol::tlv::{get_ssrc, get_tag, PKT_COMMAND};
use crate::rtp::pt::PtTable;
use crate::rtp::rtcp::{gen_sdes, gen_sr, ntp_now, SdesType, SenderReport};
use crate::rtp::{DEFAULT_RTCP_PORT, DEFAULT_RTP_PORT, DEFAULT_STAT_PORT};
use crate::transport::{join_group, listen_mcast, output_mcast, resolve_dest};
use crossbeam::channel::{bounded, Receiver};
use log::{debug, error, info, warn};
use rand::Rng;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Frontend(#[from] FrontendError),
    #[error("presets file: {0}")]
    Presets(ConfigError),
    #[error("multicast setup: {0}")]
    Multicast(#[from] std::io::Error),
}

/// Everything a channel thread needs from the rest of the process.
pub struct Deps {
    pub frontend: Arc<Frontend>,
    pub master: Arc<MasterFilter>,
    pub registry: ChannelTable,
    pub pt_table: PtTable,
    /// Output socket for TTL > 0 streams, and the TTL 0 loopback twin.
    pub output_sock: Arc<UdpSocket>,
    pub output_sock0: Arc<UdpSocket>,
    /// Global status/command group.
    pub status_dest: SocketAddr,
    pub terminate: Arc<AtomicBool>,
    /// True block time, seconds.
    pub blocktime: f64,
    pub presets: ConfigFile,
    pub rtcp_enable: bool,
    pub sap_enable: bool,
    pub hostname: String,
}

pub struct Engine {
    pub deps: Arc<Deps>,
    template: ChannelConfig,
    config: ConfigFile,
    hardware_section: String,
    ctl_sock: Option<UdpSocket>,
    chunk_rx: Option<Receiver<SampleChunk>>,
    notches: Vec<NotchState>,
    iface: Option<String>,
    use_dns: bool,
    update_interval: u32,
    threads: Vec<JoinHandle<()>>,
    total_channels: usize,
}

fn hostname() -> String {
    if let Ok(h) = std::env::var("HOSTNAME") {
        if !h.is_empty() {
            return h.split('.').next().unwrap_or(&h).to_string();
        }
    }
    if let Ok(out) = std::process::Command::new("hostname").output() {
        let h = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !h.is_empty() {
            return h.split('.').next().unwrap_or(&h).to_string();
        }
    }
    "radiod".to_string()
}

fn ensure_suffix(name: &str, suffix: &str) -> String {
    if name.parse::<std::net::IpAddr>().is_ok()
        || name.parse::<SocketAddr>().is_ok()
        || name.ends_with(suffix)
    {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

impl Engine {
    /// Build the whole engine from a loaded config file. `instance` names
    /// this daemon (usually the config file stem) and seeds the default
    /// stream names.
    pub fn from_config(config: ConfigFile, instance: &str) -> Result<Engine, EngineError> {
        config.validate_section(GLOBAL, &[GLOBAL_KEYS], true)?;
        let global = config.section(GLOBAL).cloned().unwrap_or_default();

        let user_blocktime = (global.get_f64("blocktime", DEFAULT_BLOCKTIME * 1e3) / 1e3).abs();
        let overlap = global.get_int("overlap", DEFAULT_OVERLAP as i64).unsigned_abs() as usize;
        let update_interval = global.get_int("update", i64::from(DEFAULT_UPDATE)).max(0) as u32;
        let tos = global.get_int("tos", i64::from(DEFAULT_IP_TOS)).max(0) as u32;
        let ttl = global.get_int("ttl", 1).clamp(0, 255) as u32;
        let use_dns = global.get_bool("dns", false);
        let rtcp_enable = global.get_bool("rtcp", false);
        let sap_enable = global.get_bool("sap", false);
        let fft_threads = global.get_int("fft-threads", 1);
        if fft_threads > 1 {
            // One FFT worker keeps blocks strictly ordered; more would
            // need a resequencer that nothing currently justifies
            debug!("[engine] fft-threads={fft_threads} requested, running 1 worker");
        }
        if let Some(level) = global.get("fft-plan-level") {
            debug!("[engine] fft-plan-level '{level}' noted; plans are cached in-process");
        }
        if let Some(w) = global.get("wisdom-file") {
            debug!("[engine] wisdom-file '{w}' noted; no on-disk plan cache");
        }

        // Presets database
        let presets_path = global.get_string(
            "presets-file",
            &global.get_string("mode-file", "presets.conf"),
        );
        let presets = ConfigFile::load(std::path::Path::new(&presets_path))
            .map_err(EngineError::Presets)?;

        // Hardware section and driver
        let Some(hardware) = global.get("hardware") else {
            return Err(ConfigError::NoHardware.into());
        };
        let hardware = hardware.to_string();
        let Some(hw_section) = config.section(&hardware) else {
            return Err(ConfigError::NoHardwareSection(hardware.clone()).into());
        };
        let device = hw_section.get_string("device", &hardware);
        let (driver, mut info, tuner) = make_driver(&device, hw_section)?;
        if info.description.is_empty() {
            info.description = instance.to_string();
        }
        let description = global.get_string("description", &info.description);
        info.description = description;

        // Master filter geometry from the true sample rate
        let in_type = if info.isreal {
            InType::Real
        } else {
            InType::Complex
        };
        let params = MasterParams::derive(info.samprate, user_blocktime, overlap, in_type);
        if (params.blocktime() - user_blocktime).abs() > 1e-6 {
            warn!(
                "[engine] block time {:.3} ms adjusted to {:.3} ms for integral block size {}",
                user_blocktime * 1e3,
                params.blocktime() * 1e3,
                params.l
            );
        }
        info!(
            "[engine] block time {:.3} ms, overlap {}, forward FFT size {} {}",
            params.blocktime() * 1e3,
            params.overlap(),
            params.n(),
            if info.isreal { "real" } else { "complex" }
        );
        let master = MasterFilter::new(params);

        // Experimental coherent spur notches; DC is always notched
        let mut notches = Vec::new();
        if let Some(list) = hw_section.get("spurs") {
            for tok in list.split_ascii_whitespace() {
                let f = parse_frequency(tok, true);
                if f < 0.0 {
                    warn!("[engine] can't parse spur '{tok}'");
                    continue;
                }
                if let Some((shift, _)) = compute_tuning(params.n(), params.samprate, f) {
                    notches.push(NotchState::new(shift.unsigned_abs() as usize, 0.01));
                }
            }
        }
        notches.push(NotchState::new(0, 0.01));

        let frontend = Frontend::new(info, tuner);
        frontend.set_driver(driver);

        // Stream names: data + status groups
        let host = hostname();
        let data_name = ensure_suffix(
            &global.get_string("data", &format!("{instance}-pcm.local")),
            ".local",
        );
        let status_name = ensure_suffix(
            &global.get_string("status", &format!("{host}-{instance}.local")),
            ".local",
        );
        if data_name == status_name {
            return Err(ConfigError::DuplicateStreams(data_name).into());
        }
        let data_dest = resolve_dest(&data_name, DEFAULT_RTP_PORT, use_dns);
        let mut data_status_dest = data_dest;
        data_status_dest.set_port(DEFAULT_STAT_PORT);
        let status_dest = resolve_dest(&status_name, DEFAULT_STAT_PORT, use_dns);

        let iface = global.get("iface").map(str::to_string);
        let output_sock = Arc::new(output_mcast(iface.as_deref(), ttl.max(1), tos)?);
        let output_sock0 = Arc::new(output_mcast(iface.as_deref(), 0, tos)?);
        // Join our own groups so snooping switches keep forwarding them
        join_group(&output_sock, &data_dest, iface.as_deref())?;
        join_group(&output_sock, &status_dest, iface.as_deref())?;

        let ctl_sock = match listen_mcast(&status_dest, iface.as_deref()) {
            Ok(s) => Some(s),
            Err(e) => {
                // Not fatal: static channels still run, control is dead
                error!("[engine] can't listen for commands on {status_dest}: {e}");
                None
            }
        };

        // Template for dynamically created channels
        let mut template =
            ChannelConfig::defaults(params.blocktime(), data_dest, data_status_dest);
        template.ttl = ttl;
        template.update_interval = update_interval;
        template.dest_name = data_name;
        let preset = global.get_string("preset", &global.get_string("mode", DEFAULT_PRESET));
        if let Some(entry) = presets.section(&preset) {
            loadpreset(&mut template, entry, params.blocktime());
            template.preset = preset;
        } else {
            warn!("[engine] default preset '{preset}' not found in {presets_path}");
        }
        loadpreset(&mut template, &global, params.blocktime());

        let (chunk_tx, chunk_rx) = bounded::<SampleChunk>(8);
        let terminate = Arc::new(AtomicBool::new(false));

        let deps = Arc::new(Deps {
            frontend: Arc::clone(&frontend),
            master: Arc::clone(&master),
            registry: ChannelTable::new(),
            pt_table: PtTable::new(),
            output_sock,
            output_sock0,
            status_dest,
            terminate: Arc::clone(&terminate),
            blocktime: params.blocktime(),
            presets,
            rtcp_enable,
            sap_enable,
            hostname: host,
        });

        // The driver starts streaming as soon as we hand it the sink
        frontend.start_driver(FrontendCtx {
            frontend: Arc::clone(&frontend),
            chunks: chunk_tx,
            terminate: Arc::clone(&terminate),
        })?;

        Ok(Engine {
            deps,
            template,
            config,
            hardware_section: hardware,
            ctl_sock,
            chunk_rx: Some(chunk_rx),
            notches,
            iface,
            use_dns,
            update_interval,
            threads: Vec::new(),
            total_channels: 0,
        })
    }

    /// Spawn the worker threads and the static channels. Returns the
    /// static channel count.
    pub fn start(&mut self) -> usize {
        // FFT worker: drains the driver's chunks into the master filter
        if let Some(rx) = self.chunk_rx.take() {
            let mut input = MasterInput::new(
                Arc::clone(&self.deps.master),
                std::mem::take(&mut self.notches),
            );
            let terminate = Arc::clone(&self.deps.terminate);
            self.threads.push(
                std::thread::Builder::new()
                    .name("fft-master".into())
                    .spawn(move || {
                        while !terminate.load(Ordering::Relaxed) {
                            match rx.recv_timeout(Duration::from_millis(100)) {
                                Ok(chunk) => {
                                    input.write(&chunk);
                                }
                                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        debug!("[master] fft worker exiting");
                    })
                    .expect("spawn fft worker"),
            );
        }

        // Status/command receiver
        if let Some(sock) = self.ctl_sock.take() {
            let deps = Arc::clone(&self.deps);
            let template = self.template.clone();
            let update = self.update_interval.max(1);
            self.threads.push(
                std::thread::Builder::new()
                    .name("radio-status".into())
                    .spawn(move || status_thread(&deps, &sock, &template, update))
                    .expect("spawn status thread"),
            );
        }

        // Static channels from the remaining config sections
        let sections: Vec<(String, ConfigSection)> = self
            .config
            .sections()
            .filter(|(name, section)| {
                !name.eq_ignore_ascii_case(GLOBAL)
                    && !name.eq_ignore_ascii_case(&self.hardware_section)
                    && section.get("device").is_none()
                    && !section.get_bool("disable", false)
            })
            .map(|(n, s)| (n.to_string(), s.clone()))
            .collect();
        for (name, section) in sections {
            let started = self.process_section(&name, &section);
            info!("[engine] [{name}] {started} channels started");
            self.total_channels += started;
        }
        if self.ctl_sock.is_none() && self.total_channels == 0 {
            warn!("[engine] no control channel and no static channels, nothing to do");
        }
        self.total_channels
    }

    /// Start every channel a config section defines: explicit frequency
    /// lists, rasters, exceptions, with SSRCs derived from the kHz value.
    fn process_section(&self, sname: &str, section: &ConfigSection) -> usize {
        if let Err(e) = self
            .config
            .validate_section(sname, &[crate::config::CHANNEL_KEYS], false)
        {
            warn!("[engine] [{sname}]: {e}");
        }
        let blocktime = self.deps.blocktime;
        let mut cfg = self.template.clone();
        let preset = section
            .get("preset")
            .or_else(|| section.get("mode"))
            .unwrap_or(&self.template.preset)
            .to_string();
        if let Some(entry) = self.deps.presets.section(&preset) {
            loadpreset(&mut cfg, entry, blocktime);
            cfg.preset = preset;
        } else if !preset.is_empty() {
            warn!("[engine] [{sname}] preset '{preset}' not found; template settings used");
        }
        loadpreset(&mut cfg, section, blocktime);

        // Per-section output stream override
        if let Some(data) = section.get("data") {
            let data = ensure_suffix(data, ".local");
            let use_dns = section.get_bool("dns", self.use_dns);
            cfg.dest = resolve_dest(&data, DEFAULT_RTP_PORT, use_dns);
            cfg.status_dest = cfg.dest;
            cfg.status_dest.set_port(DEFAULT_STAT_PORT);
            cfg.dest_name = data;
        }
        if cfg.ttl != 0 && self.template.ttl != 0 {
            cfg.ttl = self.template.ttl; // one shared socket, one real TTL
        }
        if cfg.ttl != 0 {
            let iface = section.get("iface").map(str::to_string).or_else(|| self.iface.clone());
            if let Err(e) = join_group(&self.deps.output_sock, &cfg.dest, iface.as_deref()) {
                warn!("[engine] [{sname}] join {} failed: {e}", cfg.dest);
            }
        }

        // Collect the frequency plan
        struct Entry {
            freq: f64,
            tone: f32,
            valid: bool,
        }
        let mut table: Vec<Entry> = Vec::new();
        for i in -1..10i32 {
            let key = numbered("raster", i);
            let Some(spec) = section.get(&key) else {
                continue;
            };
            let parts: Vec<f64> = spec
                .split_ascii_whitespace()
                .map(|t| parse_frequency(t, true))
                .collect();
            let &[start, stop, step] = parts.as_slice() else {
                warn!("[engine] [{sname}] can't parse raster '{spec}'");
                continue;
            };
            if start <= 0.0 || stop <= 0.0 || step <= 0.0 {
                warn!("[engine] [{sname}] can't parse raster '{spec}'");
                continue;
            }
            let (start, stop) = if start > stop { (stop, start) } else { (start, stop) };
            let tone = section_tone(section, i);
            let mut f = start;
            while f < stop {
                table.push(Entry {
                    freq: f,
                    tone,
                    valid: true,
                });
                f += step;
            }
        }
        for i in -1..10i32 {
            let key = numbered("freq", i);
            let Some(list) = section.get(&key) else {
                continue;
            };
            let tone = section_tone(section, i);
            for tok in list.split_ascii_whitespace() {
                let f = parse_frequency(tok, true);
                if f < 0.0 {
                    warn!("[engine] [{sname}] can't parse frequency '{tok}'");
                    continue;
                }
                table.push(Entry {
                    freq: f,
                    tone,
                    valid: true,
                });
            }
        }
        for i in -1..10i32 {
            let key = numbered("except", i);
            let Some(list) = section.get(&key) else {
                continue;
            };
            for tok in list.split_ascii_whitespace() {
                let f = parse_frequency(tok, true);
                for e in table.iter_mut().filter(|e| e.freq == f) {
                    e.valid = false;
                }
            }
        }

        let mut started = 0;
        for e in table.iter().filter(|e| e.valid) {
            let mut chan_cfg = cfg.clone();
            chan_cfg.tone_freq = if e.tone > 0.0 { e.tone } else { cfg.tone_freq };
            // SSRC from the frequency in kHz, bumping on collision
            let base_ssrc = (e.freq / 1000.0).round() as u32;
            let mut shared = None;
            for probe in 0..100u32 {
                match self.deps.registry.create(base_ssrc.wrapping_add(probe)) {
                    Ok(s) => {
                        shared = Some(s);
                        break;
                    }
                    Err(crate::channel::CreateError::Taken(_)) => continue,
                    Err(err) => {
                        warn!("[engine] [{sname}] {err}");
                        break;
                    }
                }
            }
            let Some(shared) = shared else {
                warn!(
                    "[engine] [{sname}] can't allocate ssrc near {base_ssrc} for {} Hz",
                    e.freq
                );
                continue;
            };
            let mut chan = Channel::new(shared, Arc::clone(&self.deps), chan_cfg);
            chan.set_freq(e.freq);
            start_demod(chan);
            started += 1;
        }
        started
    }

    /// Park until the terminate flag trips (set by signal handling in
    /// the binary, or by tests).
    pub fn run(&mut self) {
        while !self.deps.terminate.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(200));
        }
        self.shutdown();
    }

    pub fn stop(&mut self) {
        self.deps.terminate.store(true, Ordering::Relaxed);
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.deps.terminate.store(true, Ordering::Relaxed);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

fn numbered(base: &str, i: i32) -> String {
    if i < 0 {
        base.to_string()
    } else {
        format!("{base}{i}")
    }
}

/// Resolve the PL tone for one numbered frequency list. "tone", "pl"
/// and "ctcss" are synonyms.
fn section_tone(section: &ConfigSection, i: i32) -> f32 {
    let mut tone = 0.0f64;
    for base in ["tone", "pl", "ctcss"] {
        tone = section.get_f64(&numbered(base, i), tone);
    }
    let tone = tone.abs();
    if tone > 3000.0 {
        warn!("[engine] PL tone {tone} out of range");
        return 0.0;
    }
    tone as f32
}

/// Spawn the demodulator thread for an initialized channel, plus its
/// optional RTCP sender.
pub fn start_demod(chan: Channel) {
    let ssrc = chan.ssrc();
    let deps = Arc::clone(&chan.deps);
    if deps.rtcp_enable {
        let mut rtcp_dest = chan.cfg.dest;
        rtcp_dest.set_port(DEFAULT_RTCP_PORT);
        let weak = Arc::downgrade(&chan.shared);
        let deps2 = Arc::clone(&deps);
        let _ = std::thread::Builder::new()
            .name(format!("rtcp-{ssrc}"))
            .spawn(move || rtcp_thread(&deps2, &weak, ssrc, rtcp_dest));
    }
    #[cfg(feature = "sap")]
    if deps.sap_enable {
        crate::rtp::sap::start_sap(&chan);
    }
    debug!(
        "[engine] start demod: ssrc {ssrc}, demod {:?}, freq {:.0}, preset '{}', filter ({:+.0},{:+.0})",
        chan.cfg.demod_type, chan.cfg.freq, chan.cfg.preset, chan.cfg.low, chan.cfg.high
    );
    let _ = std::thread::Builder::new()
        .name(format!("demod-{ssrc}"))
        .spawn(move || demod_loop(chan));
}

/// Once-a-second RTCP sender reports with SDES, per channel.
fn rtcp_thread(
    deps: &Arc<Deps>,
    shared: &Weak<ChannelShared>,
    ssrc: u32,
    dest: SocketAddr,
) {
    while !deps.terminate.load(Ordering::Relaxed) {
        let Some(chan) = shared.upgrade() else {
            break; // channel closed
        };
        let mut buf = Vec::with_capacity(256);
        gen_sr(
            &mut buf,
            &SenderReport {
                ssrc,
                ntp_timestamp: ntp_now(),
                rtp_timestamp: chan.rtp_stats.timestamp.load(Ordering::Relaxed),
                packet_count: chan.rtp_stats.packets.load(Ordering::Relaxed) as u32,
                byte_count: chan.rtp_stats.bytes.load(Ordering::Relaxed) as u32,
            },
        );
        let cname = format!("radio@{}", deps.hostname);
        gen_sdes(
            &mut buf,
            ssrc,
            &[
                (SdesType::Cname, &cname),
                (SdesType::Name, "Multichannel SDR"),
                (SdesType::Tool, "radiod"),
            ],
        );
        if let Err(e) = deps.output_sock.send_to(&buf, dest) {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                debug!("[rtcp {ssrc}] send failed: {e}");
            }
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Status/command receiver: one per process.
///
/// Commands for unknown SSRCs create a channel from the template, so a
/// monitor can conjure receivers on demand. Broadcast polls fan out with
/// randomized per-channel delays to avoid response bursts.
fn status_thread(deps: &Arc<Deps>, sock: &UdpSocket, template: &ChannelConfig, update: u32) {
    let mut buf = [0u8; 65_536];
    let mut rng = rand::thread_rng();
    while !deps.terminate.load(Ordering::Relaxed) {
        let n = match sock.recv_from(&mut buf) {
            Ok((n, _src)) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                debug!("[status] recv error: {e}");
                continue;
            }
        };
        if n < 2 || buf[0] != PKT_COMMAND {
            continue; // our own status multicasts loop back here
        }
        let body = &buf[1..n];
        let tag = get_tag(body).unwrap_or(0);
        let Some(ssrc) = get_ssrc(body) else {
            continue;
        };
        match ssrc {
            0 => {} // reserved
            u32::MAX => {
                // Every channel answers, staggered across a poll interval
                deps.registry.for_each(|shared| {
                    shared.post_poll(tag, rng.gen_range(1..=update));
                });
            }
            ssrc => {
                if let Some(shared) = deps.registry.lookup(ssrc) {
                    shared.post_command(body.to_vec(), tag);
                } else {
                    match deps.registry.create(ssrc) {
                        Ok(shared) => {
                            info!("[status] creating channel {ssrc} on request");
                            shared.post_command(body.to_vec(), tag);
                            let chan =
                                Channel::new(shared, Arc::clone(deps), template.clone());
                            start_demod(chan);
                        }
                        Err(e) => debug!("[status] can't create {ssrc}: {e}"),
                    }
                }
            }
        }
    }
    debug!("[status] receiver exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_keys() {
        assert_eq!(numbered("freq", -1), "freq");
        assert_eq!(numbered("freq", 0), "freq0");
        assert_eq!(numbered("raster", 9), "raster9");
    }

    #[test]
    fn suffix_only_added_to_names() {
        assert_eq!(ensure_suffix("radio-pcm", ".local"), "radio-pcm.local");
        assert_eq!(ensure_suffix("radio-pcm.local", ".local"), "radio-pcm.local");
        // IP literals pass through untouched
        assert_eq!(ensure_suffix("239.1.2.3", ".local"), "239.1.2.3");
        assert_eq!(ensure_suffix("239.1.2.3:5004", ".local"), "239.1.2.3:5004");
    }

    #[test]
    fn tone_synonyms_and_range() {
        let cfg = crate::config::ConfigFile::parse("[x]\npl3 = 103.5\nctcss = 67.0\ntone1 = 9999\n")
            .expect("parse");
        let s = cfg.section("x").expect("section");
        assert_eq!(section_tone(s, 3), 103.5);
        assert_eq!(section_tone(s, -1), 67.0);
        assert_eq!(section_tone(s, 1), 0.0); // out of range rejected
        assert_eq!(section_tone(s, 7), 0.0); // absent
    }
}
