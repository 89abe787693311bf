// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Narrow adapter over the Opus encoder capability.
//!
//! The RTP layer sees only `encode(frames) -> bytes`; the one protocol
//! wrinkle it must still know about is that Opus RTP timestamps always
//! tick at 48 kHz regardless of the channel's actual sample rate.

use crate::channel::OpusParams;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpusError {
    #[error("unsupported opus sample rate {0}")]
    BadSamprate(u32),
    #[error("opus block of {0} frames is not a legal opus frame size")]
    BadBlocksize(usize),
    #[error("opus encoder: {0}")]
    Codec(#[from] opus::Error),
}

/// Sample rates the codec accepts natively.
pub fn legal_samprate(rate: u32) -> bool {
    matches!(rate, 8_000 | 12_000 | 16_000 | 24_000 | 48_000)
}

/// Legal frame durations in samples at 48 kHz: 2.5 to 120 ms.
pub fn legal_blocksize(frames_48k: usize) -> bool {
    matches!(frames_48k, 120 | 240 | 480 | 960 | 1920 | 2880 | 3840 | 4800 | 5760)
}

pub struct OpusEncoder {
    enc: opus::Encoder,
    channels: u8,
    samprate: u32,
    buf: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(samprate: u32, channels: u8, params: &OpusParams) -> Result<Self, OpusError> {
        if !legal_samprate(samprate) {
            return Err(OpusError::BadSamprate(samprate));
        }
        let ch = if channels >= 2 {
            opus::Channels::Stereo
        } else {
            opus::Channels::Mono
        };
        let app = match params.application {
            crate::channel::OpusApplication::Voip => opus::Application::Voip,
            crate::channel::OpusApplication::Audio => opus::Application::Audio,
            crate::channel::OpusApplication::LowDelay => opus::Application::LowDelay,
        };
        let mut enc = opus::Encoder::new(samprate, ch, app)?;
        if params.bitrate > 0 {
            enc.set_bitrate(opus::Bitrate::Bits(params.bitrate))?;
        } else {
            enc.set_bitrate(opus::Bitrate::Auto)?;
        }
        enc.set_inband_fec(params.fec)?;
        Ok(OpusEncoder {
            enc,
            channels: if channels >= 2 { 2 } else { 1 },
            samprate,
            buf: vec![0u8; 4096],
        })
    }

    /// Encode one block of interleaved PCM. Returns the packet bytes and
    /// the RTP timestamp increment (frames at the 48 kHz virtual rate).
    pub fn encode(&mut self, pcm: &[f32]) -> Result<(&[u8], u32), OpusError> {
        let frames = pcm.len() / self.channels as usize;
        let frames_48k = frames * (48_000 / self.samprate) as usize;
        if !legal_blocksize(frames_48k) {
            return Err(OpusError::BadBlocksize(frames_48k));
        }
        let n = self.enc.encode_float(pcm, &mut self.buf)?;
        Ok((&self.buf[..n], frames_48k as u32))
    }
}
