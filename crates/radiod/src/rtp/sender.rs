// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Per-channel RTP packetization.
//!
//! PCM encodings pack as many whole frames as fit a 960-byte payload
//! budget; Opus sends one packet per encoder call. The marker bit flags a
//! discontinuity: first packet after squelch/mute, or an encoding change.
//! While squelched the timestamp still advances so listeners can
//! reconstruct the gap.

use super::pt::PtTable;
use super::{RtpHeader, RtpState, RTP_HEADER_LEN};
use crate::dsp::{f32_to_f16_bits, scaleclip};
use crate::protocol::types::Encoding;
use crate::rtp::g711;
use log::{debug, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

/// Payload byte budget per packet for PCM encodings.
const PAYLOAD_BUDGET: usize = 960;

/// Configuration needed to (re)build a sender.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub encoding: Encoding,
    pub samprate: u32,
    pub channels: u8,
    pub dest: SocketAddr,
    pub pacing: bool,
    /// Aggregate this many blocks per packet (0 or 1 = one block).
    pub minpacket: u8,
    pub blocktime: f64,
}

pub struct RtpSender {
    pub rtp: RtpState,
    pub encoding: Encoding,
    pub samprate: u32,
    pub channels: u8,
    pub pt: u8,
    pub dest: SocketAddr,
    sock: Arc<UdpSocket>,
    pacing: bool,
    blocktime: f64,
    pub minpacket: u8,
    /// Blocks accumulated toward minpacket aggregation.
    pending: Vec<f32>,
    pending_blocks: u8,
    /// Previous block produced no packets (squelch/mute).
    pub silent: bool,
    /// Send errors other than EAGAIN.
    pub errors: u64,
    eagain_logged: bool,
    marker_pending: bool,
    /// Mirror of the traffic counters for the RTCP side thread.
    pub stats: Option<Arc<super::RtpStatsAtomic>>,
    packet: Vec<u8>,
    #[cfg(feature = "opus")]
    opus: Option<super::opus::OpusEncoder>,
}

impl RtpSender {
    pub fn new(cfg: &SenderConfig, ssrc: u32, sock: Arc<UdpSocket>, pt_table: &PtTable) -> Self {
        let pt = pt_table
            .pt_from_info(cfg.samprate, cfg.channels, cfg.encoding)
            .unwrap_or(127);
        RtpSender {
            rtp: RtpState {
                ssrc,
                ..Default::default()
            },
            encoding: cfg.encoding,
            samprate: cfg.samprate,
            channels: cfg.channels,
            pt,
            dest: cfg.dest,
            sock,
            pacing: cfg.pacing,
            blocktime: cfg.blocktime,
            minpacket: cfg.minpacket,
            pending: Vec::new(),
            pending_blocks: 0,
            silent: true, // suppress a status burst at startup
            errors: 0,
            eagain_logged: false,
            marker_pending: false,
            stats: None,
            packet: vec![0u8; RTP_HEADER_LEN + PAYLOAD_BUDGET + 64],
            #[cfg(feature = "opus")]
            opus: None,
        }
    }

    #[cfg(feature = "opus")]
    pub fn set_opus(&mut self, enc: super::opus::OpusEncoder) {
        self.opus = Some(enc);
    }

    /// Advance the timestamp without emitting packets (squelch closed or
    /// channel muted). The next audible packet carries the marker bit.
    pub fn send_silence(&mut self, frames: u32) {
        let frames = if self.encoding == Encoding::Opus {
            frames * (48_000 / self.samprate.max(1))
        } else {
            frames
        };
        self.rtp.timestamp = self.rtp.timestamp.wrapping_add(frames);
        self.silent = true;
        self.pending.clear();
        self.pending_blocks = 0;
    }

    /// Emit one block of interleaved audio frames.
    pub fn send_audio(&mut self, audio: &[f32]) {
        if audio.is_empty() {
            return;
        }
        if self.silent {
            self.marker_pending = true;
            self.silent = false;
        }
        if self.minpacket > 1 {
            self.pending.extend_from_slice(audio);
            self.pending_blocks += 1;
            if self.pending_blocks < self.minpacket {
                return;
            }
            let pending = std::mem::take(&mut self.pending);
            self.pending_blocks = 0;
            self.emit(&pending);
            return;
        }
        self.emit(audio);
    }

    fn emit(&mut self, audio: &[f32]) {
        match self.encoding {
            Encoding::Opus => self.emit_opus(audio),
            Encoding::None | Encoding::Ax25 => {
                // No framer for these; drop audio silently (status still
                // reports the configured encoding)
            }
            _ => self.emit_pcm(audio),
        }
    }

    fn emit_pcm(&mut self, audio: &[f32]) {
        let bytes_per_sample = match self.encoding.bytes_per_sample() {
            Some(b) => b,
            None => return,
        };
        let frame_bytes = bytes_per_sample * self.channels as usize;
        let frames_per_packet = (PAYLOAD_BUDGET / frame_bytes).max(1);
        let samples_per_packet = frames_per_packet * self.channels as usize;

        let total_frames = audio.len() / self.channels as usize;
        let npackets = total_frames.div_ceil(frames_per_packet);
        let pace = if self.pacing && npackets > 1 {
            Some(Duration::from_secs_f64(self.blocktime / npackets as f64))
        } else {
            None
        };

        for chunk in audio.chunks(samples_per_packet) {
            let frames = chunk.len() / self.channels as usize;
            let mut hdr = RtpHeader::new(self.pt, self.rtp.ssrc);
            hdr.seq = self.rtp.seq;
            hdr.timestamp = self.rtp.timestamp;
            hdr.marker = self.marker_pending;
            self.marker_pending = false;
            let mut len = hdr.write(&mut self.packet);
            for &s in chunk {
                match self.encoding {
                    Encoding::S16be => {
                        self.packet[len..len + 2]
                            .copy_from_slice(&scaleclip(s).to_be_bytes());
                        len += 2;
                    }
                    Encoding::S16le => {
                        self.packet[len..len + 2]
                            .copy_from_slice(&scaleclip(s).to_le_bytes());
                        len += 2;
                    }
                    Encoding::F32le => {
                        self.packet[len..len + 4].copy_from_slice(&s.to_le_bytes());
                        len += 4;
                    }
                    Encoding::F16le => {
                        self.packet[len..len + 2]
                            .copy_from_slice(&f32_to_f16_bits(s).to_le_bytes());
                        len += 2;
                    }
                    Encoding::Mulaw => {
                        self.packet[len] = g711::float_to_mulaw(s);
                        len += 1;
                    }
                    Encoding::Alaw => {
                        self.packet[len] = g711::float_to_alaw(s);
                        len += 1;
                    }
                    _ => unreachable!("non-PCM encodings handled by caller"),
                }
            }
            self.transmit(len);
            self.rtp.seq = self.rtp.seq.wrapping_add(1);
            self.rtp.timestamp = self.rtp.timestamp.wrapping_add(frames as u32);
            if let Some(d) = pace {
                std::thread::sleep(d);
            }
        }
    }

    #[cfg(feature = "opus")]
    fn emit_opus(&mut self, audio: &[f32]) {
        let Some(opus) = self.opus.as_mut() else {
            return;
        };
        let (payload, ts_incr) = match opus.encode(audio) {
            Ok(r) => r,
            Err(e) => {
                debug!("[rtp {}] opus encode failed: {e}", self.rtp.ssrc);
                return;
            }
        };
        let mut hdr = RtpHeader::new(self.pt, self.rtp.ssrc);
        hdr.seq = self.rtp.seq;
        hdr.timestamp = self.rtp.timestamp;
        hdr.marker = self.marker_pending;
        self.marker_pending = false;
        if RTP_HEADER_LEN + payload.len() > self.packet.len() {
            self.packet.resize(RTP_HEADER_LEN + payload.len(), 0);
        }
        let mut len = hdr.write(&mut self.packet);
        self.packet[len..len + payload.len()].copy_from_slice(payload);
        len += payload.len();
        self.transmit(len);
        self.rtp.seq = self.rtp.seq.wrapping_add(1);
        self.rtp.timestamp = self.rtp.timestamp.wrapping_add(ts_incr);
    }

    #[cfg(not(feature = "opus"))]
    fn emit_opus(&mut self, _audio: &[f32]) {
        // Rejected at configuration time; nothing to do here
    }

    fn transmit(&mut self, len: usize) {
        match self.sock.send_to(&self.packet[..len], self.dest) {
            Ok(n) => {
                self.rtp.packets += 1;
                self.rtp.bytes += n as u64;
                if let Some(stats) = &self.stats {
                    stats.update(&self.rtp);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if !self.eagain_logged {
                    warn!(
                        "[rtp {}] output socket buffer full, dropping (logged once)",
                        self.rtp.ssrc
                    );
                    self.eagain_logged = true;
                }
            }
            Err(e) => {
                self.errors += 1;
                debug!("[rtp {}] send_to {} failed: {e}", self.rtp.ssrc, self.dest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sender(encoding: Encoding, channels: u8) -> (RtpSender, UdpSocket) {
        let rx = UdpSocket::bind("127.0.0.1:0").expect("bind rx");
        rx.set_read_timeout(Some(Duration::from_millis(500)))
            .expect("timeout");
        let tx = UdpSocket::bind("127.0.0.1:0").expect("bind tx");
        let cfg = SenderConfig {
            encoding,
            samprate: 12_000,
            channels,
            dest: rx.local_addr().expect("addr"),
            pacing: false,
            minpacket: 0,
            blocktime: 0.020,
        };
        let table = PtTable::new();
        let sender = RtpSender::new(&cfg, 7050, Arc::new(tx), &table);
        (sender, rx)
    }

    fn recv(rx: &UdpSocket) -> (RtpHeader, Vec<u8>) {
        let mut buf = [0u8; 2048];
        let n = rx.recv(&mut buf).expect("packet");
        let (hdr, off) = RtpHeader::parse(&buf[..n]).expect("header");
        (hdr, buf[off..n].to_vec())
    }

    #[test]
    fn s16be_block_fits_one_packet() {
        let (mut sender, rx) = test_sender(Encoding::S16be, 1);
        let audio = vec![0.5f32; 240]; // 480 bytes < 960 budget
        sender.send_audio(&audio);
        let (hdr, payload) = recv(&rx);
        assert_eq!(payload.len(), 480);
        assert!(hdr.marker, "first packet after startup silence");
        assert_eq!(hdr.ssrc, 7050);
        assert_eq!(hdr.pt, 122); // 12 kHz mono S16BE
        let s = i16::from_be_bytes([payload[0], payload[1]]);
        assert_eq!(s, scaleclip(0.5));
    }

    #[test]
    fn oversize_block_splits_with_monotonic_seq() {
        let (mut sender, rx) = test_sender(Encoding::S16be, 1);
        let audio = vec![0.1f32; 1000]; // 2000 bytes -> 3 packets (480+480+40 frames)
        sender.send_audio(&audio);
        let (h1, p1) = recv(&rx);
        let (h2, p2) = recv(&rx);
        let (h3, p3) = recv(&rx);
        assert_eq!(p1.len(), 960);
        assert_eq!(p2.len(), 960);
        assert_eq!(p3.len(), 80);
        assert_eq!(h2.seq, h1.seq.wrapping_add(1));
        assert_eq!(h3.seq, h2.seq.wrapping_add(1));
        // timestamp increment equals frames in the preceding packet
        assert_eq!(h2.timestamp, h1.timestamp + 480);
        assert_eq!(h3.timestamp, h2.timestamp + 480);
        assert!(h1.marker && !h2.marker && !h3.marker);
    }

    #[test]
    fn marker_set_after_silence_and_timestamp_advances() {
        let (mut sender, rx) = test_sender(Encoding::S16be, 1);
        sender.send_audio(&vec![0.0f32; 240]);
        let (h1, _) = recv(&rx);
        sender.send_silence(240);
        sender.send_silence(240);
        sender.send_audio(&vec![0.0f32; 240]);
        let (h2, _) = recv(&rx);
        assert!(h1.marker);
        assert!(h2.marker, "resumption after squelch sets marker");
        // 240 sent + 480 silent frames elapsed
        assert_eq!(h2.timestamp, h1.timestamp + 720);
    }

    #[test]
    fn f32le_payload_format() {
        let (mut sender, rx) = test_sender(Encoding::F32le, 2);
        let audio = vec![0.25f32; 60]; // 30 stereo frames, 240 bytes
        sender.send_audio(&audio);
        let (_, payload) = recv(&rx);
        assert_eq!(payload.len(), 240);
        let v = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert_eq!(v, 0.25);
    }

    #[test]
    fn minpacket_aggregates_blocks() {
        let (mut sender, rx) = test_sender(Encoding::S16be, 1);
        sender.minpacket = 2;
        sender.send_audio(&vec![0.0f32; 100]);
        sender.send_audio(&vec![0.0f32; 100]);
        let (_, payload) = recv(&rx);
        assert_eq!(payload.len(), 400); // both blocks in one packet
    }

    #[test]
    fn mulaw_frames_are_single_bytes() {
        let (mut sender, rx) = test_sender(Encoding::Mulaw, 1);
        sender.send_audio(&vec![0.0f32; 160]);
        let (_, payload) = recv(&rx);
        assert_eq!(payload.len(), 160);
        assert_eq!(payload[0], 0xff); // companded zero
    }
}
