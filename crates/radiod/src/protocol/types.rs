// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Wire enumerations for the status/command protocol.

/// TLV field types. Values are the wire protocol; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusType {
    Eol = 0,
    CommandTag = 1,
    CmdCnt = 2,
    GpsTime = 3,
    Description = 4,
    StatusDestSocket = 5,
    StatusInterval = 6,

    // Front end
    InputSamprate = 10,
    InputSamples = 11,
    AdOver = 12,
    SamplesSinceOver = 13,
    AdBitsPerSample = 14,
    IfPower = 15,
    LnaGain = 16,
    MixerGain = 17,
    IfGain = 18,
    RfAtten = 19,
    RfGain = 20,
    RfAgc = 21,
    RfLevelCal = 22,
    DirectConversion = 23,
    FeLowEdge = 24,
    FeHighEdge = 25,
    FeIsreal = 26,
    BlocksSincePoll = 27,

    // Output / RTP
    OutputDataSourceSocket = 30,
    OutputDataDestSocket = 31,
    OutputSsrc = 32,
    OutputTtl = 33,
    OutputSamprate = 34,
    OutputMetadataPackets = 35,
    OutputDataPackets = 36,
    OutputErrors = 37,
    OutputChannels = 38,
    OutputEncoding = 39,
    OutputLevel = 40,
    OutputSamples = 41,
    MinPacket = 42,
    RtpPt = 43,

    // Tuning
    RadioFrequency = 50,
    FirstLoFrequency = 51,
    SecondLoFrequency = 52,
    ShiftFrequency = 53,
    DopplerFrequency = 54,
    DopplerFrequencyRate = 55,
    FreqLock = 56,

    // Filtering
    LowEdge = 60,
    HighEdge = 61,
    KaiserBeta = 62,
    FilterBlocksize = 63,
    FilterFirLength = 64,
    FilterDrops = 65,
    Filter2 = 66,
    Filter2KaiserBeta = 67,
    Filter2Blocksize = 68,
    Filter2FirLength = 69,

    // Signal estimates
    BasebandPower = 70,
    NoiseDensity = 71,
    DemodSnr = 72,
    FreqOffset = 73,
    PeakDeviation = 74,
    PlTone = 75,
    PlDeviation = 76,

    // Demodulator
    DemodType = 80,
    IndependentSideband = 81,
    ThreshExtend = 82,
    Envelope = 83,
    SnrSquelch = 84,

    // PLL
    PllEnable = 90,
    PllLock = 91,
    PllSquare = 92,
    PllPhase = 93,
    PllBw = 94,
    PllWraps = 95,

    // Gain / squelch / de-emphasis
    AgcEnable = 100,
    Headroom = 101,
    AgcHangtime = 102,
    AgcRecoveryRate = 103,
    AgcThreshold = 104,
    Gain = 105,
    SquelchOpen = 106,
    SquelchClose = 107,
    DeemphTc = 108,
    DeemphGain = 109,
    ToneFreq = 110,
    Preset = 111,

    // Spectrum
    CoherentBinSpacing = 120,
    NoncoherentBinBw = 121,
    BinCount = 122,
    BinData = 123,

    // Opus
    OpusBitRate = 130,
    OpusApplication = 131,
    OpusDtx = 132,
    OpusFec = 133,

    // Option bitmasks
    SetOpts = 140,
    ClearOpts = 141,
}

/// Audio encodings on the wire. First seven values are fixed by the
/// protocol; the G.711 pair follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Encoding {
    #[default]
    None = 0,
    S16le = 1,
    S16be = 2,
    Opus = 3,
    F32le = 4,
    Ax25 = 5,
    F16le = 6,
    Mulaw = 7,
    Alaw = 8,
}

impl Encoding {
    pub fn from_wire(x: u8) -> Option<Self> {
        Some(match x {
            0 => Encoding::None,
            1 => Encoding::S16le,
            2 => Encoding::S16be,
            3 => Encoding::Opus,
            4 => Encoding::F32le,
            5 => Encoding::Ax25,
            6 => Encoding::F16le,
            7 => Encoding::Mulaw,
            8 => Encoding::Alaw,
            _ => return None,
        })
    }

    /// Parse a config-file encoding name, with the usual aliases.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "s16be" | "s16" | "int" => Encoding::S16be,
            "s16le" => Encoding::S16le,
            "f32" | "float" | "f32le" => Encoding::F32le,
            "f16" | "f16le" => Encoding::F16le,
            "opus" => Encoding::Opus,
            "ax25" | "ax.25" => Encoding::Ax25,
            "ulaw" | "mulaw" | "pcmu" => Encoding::Mulaw,
            "alaw" => Encoding::Alaw,
            "none" => Encoding::None,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::None => "none",
            Encoding::S16le => "s16le",
            Encoding::S16be => "s16be",
            Encoding::Opus => "opus",
            Encoding::F32le => "f32le",
            Encoding::Ax25 => "ax.25",
            Encoding::F16le => "f16le",
            Encoding::Mulaw => "ulaw",
            Encoding::Alaw => "alaw",
        }
    }

    /// Bytes per PCM frame for one channel; None for non-PCM encodings.
    pub fn bytes_per_sample(self) -> Option<usize> {
        match self {
            Encoding::S16le | Encoding::S16be => Some(2),
            Encoding::F32le => Some(4),
            Encoding::F16le => Some(2),
            Encoding::Mulaw | Encoding::Alaw => Some(1),
            Encoding::Opus | Encoding::Ax25 | Encoding::None => None,
        }
    }
}

/// Demodulator discriminant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DemodType {
    #[default]
    Linear = 0,
    Fm = 1,
    Wfm = 2,
    Spectrum = 3,
}

impl DemodType {
    pub fn from_wire(x: u8) -> Option<Self> {
        Some(match x {
            0 => DemodType::Linear,
            1 => DemodType::Fm,
            2 => DemodType::Wfm,
            3 => DemodType::Spectrum,
            _ => return None,
        })
    }

    /// Parse a preset-file demod name.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "linear" => DemodType::Linear,
            "fm" => DemodType::Fm,
            "wfm" => DemodType::Wfm,
            "spectrum" => DemodType::Spectrum,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            DemodType::Linear => "Linear",
            DemodType::Fm => "FM",
            DemodType::Wfm => "WFM",
            DemodType::Spectrum => "Spectrum",
        }
    }
}
