// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! End-to-end scenarios through the real channel pipeline: master
//! filter, downconverter, command mailbox and status emission, driven
//! deterministically on one thread with unicast sockets.

use num_complex::Complex;
use radiod::channel::{Channel, ChannelConfig, ChannelTable, LoopCtl};
use radiod::config::ConfigFile;
use radiod::engine::Deps;
use radiod::filter::master::{MasterFilter, MasterInput, MasterParams, SampleChunk};
use radiod::filter::InType;
use radiod::frontend::{Frontend, FrontendInfo, TunerState};
use radiod::protocol::tlv::{TlvIter, TlvWriter, PKT_COMMAND, PKT_STATUS};
use radiod::protocol::types::StatusType as T;
use radiod::protocol::make_poll;
use radiod::rtp::pt::PtTable;
use std::net::UdpSocket;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    deps: Arc<Deps>,
    input: MasterInput,
    status_rx: UdpSocket,
    params: MasterParams,
}

fn harness() -> Harness {
    let status_rx = UdpSocket::bind("127.0.0.1:0").expect("bind status rx");
    status_rx
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("timeout");
    let output_sock = UdpSocket::bind("127.0.0.1:0").expect("bind output");
    output_sock.set_nonblocking(true).expect("nonblocking");
    let output_sock0 = UdpSocket::bind("127.0.0.1:0").expect("bind output0");
    output_sock0.set_nonblocking(true).expect("nonblocking");

    // 64 kHz complex front end, LO at 7.05 MHz, 20 ms blocks
    let params = MasterParams::derive(64_000.0, 0.020, 5, InType::Complex);
    let master = MasterFilter::new(params);
    let input = MasterInput::new(Arc::clone(&master), Vec::new());
    let frontend = Frontend::new(
        FrontendInfo {
            description: "test harness".into(),
            samprate: params.samprate,
            isreal: false,
            bitspersample: 16,
            direct_conversion: false,
        },
        TunerState {
            frequency: 7_050_000.0,
            min_if: -32_000.0,
            max_if: 32_000.0,
            ..Default::default()
        },
    );
    let presets = ConfigFile::parse(
        "[usb]\ndemod = linear\nlow = 100\nhigh = 3000\nsamprate = 12000\nagc = yes\n",
    )
    .expect("presets");

    let deps = Arc::new(Deps {
        frontend,
        master,
        registry: ChannelTable::new(),
        pt_table: PtTable::new(),
        output_sock: Arc::new(output_sock),
        output_sock0: Arc::new(output_sock0),
        status_dest: status_rx.local_addr().expect("addr"),
        terminate: Arc::new(AtomicBool::new(false)),
        blocktime: params.blocktime(),
        presets,
        rtcp_enable: false,
        sap_enable: false,
        hostname: "testhost".into(),
    });
    Harness {
        deps,
        input,
        status_rx,
        params,
    }
}

fn usb_channel(h: &Harness, ssrc: u32) -> Channel {
    let shared = h.deps.registry.create(ssrc).expect("create");
    let data_dest = h.deps.status_dest; // unicast sink for everything
    let mut cfg = ChannelConfig::defaults(h.params.blocktime(), data_dest, data_dest);
    cfg.low = 100.0;
    cfg.high = 3000.0;
    cfg.samprate = 12_000;
    cfg.preset = "usb".into();
    Channel::new(shared, Arc::clone(&h.deps), cfg)
}

fn feed_block(h: &mut Harness) {
    let chunk = SampleChunk::Complex(vec![Complex::new(0.0, 0.0); h.params.l]);
    assert_eq!(h.input.write(&chunk), 1);
}

fn recv_status(rx: &UdpSocket) -> Vec<(u8, Vec<u8>)> {
    let mut buf = [0u8; 65_536];
    loop {
        let n = rx.recv(&mut buf).expect("status packet");
        let (kind, iter) = TlvIter::packet(&buf[..n]).expect("framed");
        if kind != PKT_STATUS {
            continue; // not expected on this socket, but be safe
        }
        return iter.map(|t| (t.ty, t.value.to_vec())).collect();
    }
}

fn field_u64(items: &[(u8, Vec<u8>)], ty: T) -> Option<u64> {
    items.iter().find(|(t, _)| *t == ty as u8).map(|(_, v)| {
        v.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    })
}

fn field_f64(items: &[(u8, Vec<u8>)], ty: T) -> Option<f64> {
    items.iter().find(|(t, _)| *t == ty as u8).map(|(_, v)| {
        let bits = v.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        if v.len() == 4 {
            f64::from(f32::from_bits(bits as u32))
        } else {
            f64::from_bits(bits)
        }
    })
}

/// Scenario: startup and poll. A USB channel at 7.05 MHz answers a poll
/// with its tag, frequency, rate, demod type and filter edges.
#[test]
fn startup_and_poll() {
    let mut h = harness();
    let mut chan = usb_channel(&h, 7050);
    chan.set_freq(7_050_000.0);

    chan.shared.post_command(make_poll(7050, 0xdead_beef)[1..].to_vec(), 0xdead_beef);
    feed_block(&mut h);
    assert_eq!(chan.downconvert(), LoopCtl::Run);

    let items = recv_status(&h.status_rx);
    assert_eq!(field_u64(&items, T::CommandTag), Some(0xdead_beef));
    let freq = field_f64(&items, T::RadioFrequency).expect("freq");
    assert!((freq - 7_050_000.0).abs() < 1.0);
    assert_eq!(field_u64(&items, T::OutputSamprate), Some(12_000));
    assert_eq!(field_u64(&items, T::DemodType), Some(0));
    let low = field_f64(&items, T::LowEdge).expect("low");
    let high = field_f64(&items, T::HighEdge).expect("high");
    assert_eq!(low, 100.0);
    assert_eq!(high, 3000.0);
    assert_eq!(field_u64(&items, T::OutputSsrc), Some(7050));
}

/// Scenario: dynamic retune beyond front-end coverage drags the first LO
/// along, with the 1 kHz margin.
#[test]
fn dynamic_retune_moves_first_lo() {
    let mut h = harness();
    // Install a driver so retunes can land
    let section = ConfigFile::parse("[rig]\ndevice = synth\nfrequency = 7050k\n")
        .expect("cfg")
        .section("rig")
        .expect("rig")
        .clone();
    let (driver, _info, _tuner) =
        radiod::frontend::make_driver("synth", &section).expect("driver");
    h.deps.frontend.set_driver(driver);

    let mut chan = usb_channel(&h, 7050);
    chan.set_freq(7_050_000.0);

    let mut w = TlvWriter::new(PKT_COMMAND);
    w.int(T::CommandTag as u8, 1).int(T::OutputSsrc as u8, 7050);
    w.double(T::RadioFrequency as u8, 14_074_000.0);
    let pkt = w.finish();
    chan.shared.post_command(pkt[1..].to_vec(), 1);

    feed_block(&mut h);
    assert_eq!(chan.downconvert(), LoopCtl::Run);

    let items = recv_status(&h.status_rx);
    let freq = field_f64(&items, T::RadioFrequency).expect("freq");
    assert!((freq - 14_074_000.0).abs() < 1.0);
    let lo = field_f64(&items, T::FirstLoFrequency).expect("lo");
    // Required IF span is [100, 3000]; the LO lands so the high edge
    // sits 1 kHz inside max_if
    let expected = 14_074_000.0 - (32_000.0 - 3000.0 - 1000.0);
    assert!((lo - expected).abs() < 1.0, "lo {lo} expected {expected}");
}

/// Scenario: broadcast poll. Every channel gets a deferred response
/// with the same tag.
#[test]
fn broadcast_poll_defers_responses() {
    let mut h = harness();
    let mut a = usb_channel(&h, 1001);
    a.set_freq(7_050_000.0);
    let mut b = usb_channel(&h, 1002);
    b.set_freq(7_051_000.0);

    h.deps.registry.for_each(|shared| shared.post_poll(0x42, 2));

    // Two blocks: the timers run down, then both respond
    for _ in 0..2 {
        feed_block(&mut h);
        assert_eq!(a.downconvert(), LoopCtl::Run);
        assert_eq!(b.downconvert(), LoopCtl::Run);
    }
    let first = recv_status(&h.status_rx);
    let second = recv_status(&h.status_rx);
    for items in [first, second] {
        assert_eq!(field_u64(&items, T::CommandTag), Some(0x42));
    }
}

/// Scenario: a channel parked at 0 Hz ages out after its lifetime and
/// the registry slot frees.
#[test]
fn idle_channel_dies() {
    let mut h = harness();
    // A 0 Hz channel only consumes blocks while 0 Hz is in coverage
    h.deps.frontend.update_tuner(|t| t.frequency = 0.0);
    let shared = h.deps.registry.create(999).expect("create");
    let data_dest = h.deps.status_dest;
    let mut cfg = ChannelConfig::defaults(h.params.blocktime(), data_dest, data_dest);
    cfg.lifetime_blocks = 10;
    cfg.update_interval = 0; // keep the status socket quiet
    let mut chan = Channel::new(shared, Arc::clone(&h.deps), cfg);
    assert_eq!(chan.cfg.freq, 0.0);
    assert_eq!(h.deps.registry.active_count(), 1);

    let mut blocks = 0;
    loop {
        feed_block(&mut h);
        match chan.downconvert() {
            LoopCtl::Run => blocks += 1,
            LoopCtl::Terminate => break,
            LoopCtl::Restart => panic!("unexpected restart"),
        }
        assert!(blocks < 100, "channel never timed out");
    }
    assert_eq!(blocks, 9); // lifetime 10: nine blocks, then the tenth kills it
    // The demod loop owns slot cleanup; emulate its close path
    let ssrc = chan.ssrc();
    drop(chan);
    h.deps.registry.remove(ssrc);
    assert!(h.deps.registry.lookup(999).is_none());
    assert_eq!(h.deps.registry.active_count(), 0);
}

/// A command before the lifetime expires resets the clock.
#[test]
fn command_resets_idle_lifetime() {
    let mut h = harness();
    h.deps.frontend.update_tuner(|t| t.frequency = 0.0);
    let shared = h.deps.registry.create(998).expect("create");
    let data_dest = h.deps.status_dest;
    let mut cfg = ChannelConfig::defaults(h.params.blocktime(), data_dest, data_dest);
    cfg.lifetime_blocks = 6;
    cfg.update_interval = 0;
    let mut chan = Channel::new(shared, Arc::clone(&h.deps), cfg);

    for i in 0..10 {
        if i == 4 {
            // Any command rewinds the countdown
            chan.shared
                .post_command(make_poll(998, 7)[1..].to_vec(), 7);
        }
        feed_block(&mut h);
        assert_eq!(chan.downconvert(), LoopCtl::Run, "died early at block {i}");
    }
}

/// Structural commands restart the demod loop; cosmetic ones do not.
#[test]
fn structural_change_requests_restart() {
    let mut h = harness();
    let mut chan = usb_channel(&h, 7055);
    chan.set_freq(7_055_000.0);

    // Gain change: applied in place
    let mut w = TlvWriter::new(PKT_COMMAND);
    w.int(T::CommandTag as u8, 2)
        .int(T::OutputSsrc as u8, 7055)
        .float(T::Gain as u8, 30.0);
    chan.shared.post_command(w.finish()[1..].to_vec(), 2);
    feed_block(&mut h);
    assert_eq!(chan.downconvert(), LoopCtl::Run);
    let _ = recv_status(&h.status_rx);

    // Sample rate change: must restart at a block boundary
    let mut w = TlvWriter::new(PKT_COMMAND);
    w.int(T::CommandTag as u8, 3)
        .int(T::OutputSsrc as u8, 7055)
        .int(T::OutputSamprate as u8, 24_000);
    chan.shared.post_command(w.finish()[1..].to_vec(), 3);
    feed_block(&mut h);
    assert_eq!(chan.downconvert(), LoopCtl::Restart);
    assert_eq!(chan.cfg.samprate, 24_000);

    chan.rebuild();
    feed_block(&mut h);
    assert_eq!(chan.downconvert(), LoopCtl::Run);
}

/// The preset command reloads a named bundle from the presets table.
#[test]
fn preset_command_applies_bundle() {
    let mut h = harness();
    let shared = h.deps.registry.create(7060).expect("create");
    let data_dest = h.deps.status_dest;
    let mut cfg = ChannelConfig::defaults(h.params.blocktime(), data_dest, data_dest);
    cfg.low = -5000.0;
    cfg.high = 5000.0;
    let mut chan = Channel::new(shared, Arc::clone(&h.deps), cfg);
    chan.set_freq(7_060_000.0);

    let mut w = TlvWriter::new(PKT_COMMAND);
    w.int(T::CommandTag as u8, 4)
        .int(T::OutputSsrc as u8, 7060)
        .string(T::Preset as u8, "usb");
    chan.shared.post_command(w.finish()[1..].to_vec(), 4);
    feed_block(&mut h);
    assert_eq!(chan.downconvert(), LoopCtl::Restart);
    assert_eq!(chan.cfg.low, 100.0);
    assert_eq!(chan.cfg.high, 3000.0);
    assert_eq!(chan.cfg.preset, "usb");
}

/// White noise at a configured density is reported as N0 within 1 dB
/// after the estimator settles.
#[test]
fn noise_density_estimate_converges() {
    let mut h = harness();
    let mut chan = usb_channel(&h, 7070);
    chan.set_freq(7_050_000.0);
    chan.cfg.update_interval = 0;
    chan.status.output_interval = 0;

    // Complex white noise: per-sample variance sigma2 spread over Fs
    let n0 = 1e-8f64; // power per Hz, A/D relative
    let sigma = ((n0 * h.params.samprate) / 2.0).sqrt() as f32;
    let mut state = 0x1234_5678_9abc_def0u64;
    let mut gauss = || {
        // Box-Muller on a 64-bit LCG
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let u1 = ((state >> 11) as f64 / (1u64 << 53) as f64).max(1e-12);
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let u2 = (state >> 11) as f64 / (1u64 << 53) as f64;
        let r = (-2.0 * u1.ln()).sqrt();
        (
            (r * (std::f64::consts::TAU * u2).cos()) as f32,
            (r * (std::f64::consts::TAU * u2).sin()) as f32,
        )
    };

    for _ in 0..60 {
        let samples: Vec<Complex<f32>> = (0..h.params.l)
            .map(|_| {
                let (a, b) = gauss();
                Complex::new(sigma * a, sigma * b)
            })
            .collect();
        h.input.write(&SampleChunk::Complex(samples));
        assert_eq!(chan.downconvert(), LoopCtl::Run);
    }
    let est = chan.sig.n0;
    let err_db = 10.0 * (est / n0).log10();
    assert!(err_db.abs() < 1.0, "N0 {est:.3e} vs {n0:.3e} ({err_db:.2} dB)");
}

/// A CW tone through the whole pipeline lands at its baseband offset
/// with unit gain.
#[test]
fn cw_tone_through_pipeline() {
    let mut h = harness();
    let mut chan = usb_channel(&h, 7050);
    chan.cfg.low = -5000.0;
    chan.cfg.high = 5000.0;
    chan.cfg.update_interval = 0;
    chan.status.output_interval = 0;
    chan.rebuild();
    chan.set_freq(7_050_000.0);

    // RF tone 1 kHz above the channel: IF = +1 kHz
    let f_if = 1000.0;
    let fs = h.params.samprate;
    let mut t = 0usize;
    for _ in 0..6 {
        let samples: Vec<Complex<f32>> = (0..h.params.l)
            .map(|_| {
                let ph = std::f64::consts::TAU * f_if * t as f64 / fs;
                t += 1;
                Complex::new(ph.cos() as f32, ph.sin() as f32)
            })
            .collect();
        h.input.write(&SampleChunk::Complex(samples));
        assert_eq!(chan.downconvert(), LoopCtl::Run);
    }
    // Steady state: baseband power of a unit tone is 1
    assert!(
        (chan.sig.bb_power - 1.0).abs() < 0.05,
        "bb power {}",
        chan.sig.bb_power
    );
    // And it spins at the IF offset: phase step of 1 kHz at 12 kHz
    let d = (chan.baseband[1] * chan.baseband[0].conj()).arg();
    let f_meas = f64::from(d) * 12_000.0 / std::f64::consts::TAU;
    assert!((f_meas - 1000.0).abs() < 20.0, "baseband offset {f_meas}");
}
