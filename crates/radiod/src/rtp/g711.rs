// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! G.711 companding for the µ-law and A-law output encodings.

const BIAS: i32 = 0x84; // 132
const CLIP: i32 = 32635;

pub fn float_to_mulaw(fsample: f32) -> u8 {
    let f = fsample.clamp(-1.0, 1.0);
    let sample = (f * 32768.0).round() as i32;
    let sign = sample < 0;
    let mut pcm = if sign { -sample } else { sample };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let exponent = (31 - (pcm as u32).leading_zeros() as i32 - 7).clamp(0, 7);
    let mantissa = (pcm >> (exponent + 3)) & 0x0f;

    !(((exponent as u8) << 4) | (mantissa as u8) | (u8::from(sign) << 7))
}

pub fn mulaw_to_float(ulaw: u8) -> f32 {
    let ulaw = !ulaw;
    let sign = ulaw & 0x80 != 0;
    let exponent = i32::from((ulaw >> 4) & 0x07);
    let mantissa = i32::from(ulaw & 0x0f);

    let mut pcm = ((mantissa << 3) + BIAS) << exponent;
    pcm -= BIAS;
    let v = if sign { -pcm } else { pcm };
    v as f32 / 32768.0
}

pub fn float_to_alaw(fsample: f32) -> u8 {
    let f = fsample.clamp(-1.0, 1.0);
    let sample = ((f * 32768.0).round() as i32).clamp(-32768, 32767);
    let sign = sample < 0;
    let mut pcm = if sign { -sample } else { sample };
    if pcm > CLIP {
        pcm = CLIP;
    }

    let exponent = if pcm >= 256 {
        (31 - (pcm as u32).leading_zeros() as i32 - 7).clamp(0, 7)
    } else {
        0
    };
    let mantissa = if exponent == 0 {
        (pcm >> 4) & 0x0f
    } else {
        (pcm >> (exponent + 3)) & 0x0f
    };

    let a = ((exponent as u8) << 4) | mantissa as u8;
    a ^ if sign { 0xd5 } else { 0x55 }
}

pub fn alaw_to_float(alaw: u8) -> f32 {
    let alaw = alaw ^ 0x55;
    let sign = alaw & 0x80 != 0;
    let exponent = i32::from((alaw >> 4) & 0x07);
    let mantissa = i32::from(alaw & 0x0f);

    let pcm = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };
    let v = if sign { -pcm } else { pcm };
    v as f32 / 32768.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_silence() {
        // Encoded zero is 0xFF in µ-law
        assert_eq!(float_to_mulaw(0.0), 0xff);
        assert!(mulaw_to_float(0xff).abs() < 1e-3);
    }

    #[test]
    fn mulaw_roundtrip_error_is_small() {
        for i in -100..=100 {
            let x = i as f32 / 100.0;
            let y = mulaw_to_float(float_to_mulaw(x));
            // µ-law SNR is roughly 38 dB; allow generous quantization room
            assert!((x - y).abs() < 0.05, "x={x} y={y}");
        }
    }

    #[test]
    fn alaw_roundtrip_error_is_small() {
        for i in -100..=100 {
            let x = i as f32 / 100.0;
            let y = alaw_to_float(float_to_alaw(x));
            assert!((x - y).abs() < 0.05, "x={x} y={y}");
        }
    }

    #[test]
    fn companding_is_monotonic() {
        let mut prev = mulaw_to_float(float_to_mulaw(-1.0));
        for i in -99..=100 {
            let x = i as f32 / 100.0;
            let y = mulaw_to_float(float_to_mulaw(x));
            assert!(y >= prev - 1e-6, "non-monotonic at {x}");
            prev = y;
        }
    }

    #[test]
    fn extremes_clip_cleanly() {
        let top = mulaw_to_float(float_to_mulaw(10.0));
        assert!(top > 0.9 && top <= 1.0);
        let bot = alaw_to_float(float_to_alaw(-10.0));
        assert!(bot < -0.9 && bot >= -1.0);
    }
}
