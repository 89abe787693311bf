// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! RTP payload type registry for the sending side.
//!
//! Well-known PTs get fixed assignments; new (samprate, channels,
//! encoding) combinations are allocated from the dynamic range. 77-95 is
//! unassigned space we squat on when 96-127 fills up during testing with
//! many formats; 100 is avoided (de-facto RTP Event). Opus is pinned to
//! PT 111 and always advertised as 48 kHz stereo regardless of content.

use crate::protocol::types::Encoding;
use dashmap::DashMap;

/// Opus always uses a 48 kHz virtual clock.
pub const OPUS_SAMPRATE: u32 = 48_000;
pub const OPUS_PT: u8 = 111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtInfo {
    pub samprate: u32,
    pub channels: u8,
    pub encoding: Encoding,
}

/// Process-wide table; channel threads allocate concurrently.
pub struct PtTable {
    by_pt: DashMap<u8, PtInfo>,
    /// Serializes dynamic allocation so a racing pair of threads cannot
    /// hand the same triple two PTs. Lookups stay lock-free.
    alloc_lock: parking_lot::Mutex<()>,
}

impl PtTable {
    pub fn new() -> Self {
        let by_pt = DashMap::new();
        let fixed: &[(u8, u32, u8, Encoding)] = &[
            (0, 8_000, 1, Encoding::Mulaw),
            (8, 8_000, 1, Encoding::Alaw),
            (10, 44_100, 2, Encoding::S16be),
            (11, 44_100, 1, Encoding::S16be),
            (OPUS_PT, OPUS_SAMPRATE, 2, Encoding::Opus),
            (112, 48_000, 1, Encoding::S16be),
            (113, 48_000, 2, Encoding::S16be),
            (116, 24_000, 1, Encoding::S16be),
            (117, 24_000, 2, Encoding::S16be),
            (119, 16_000, 1, Encoding::S16be),
            (120, 16_000, 2, Encoding::S16be),
            (122, 12_000, 1, Encoding::S16be),
            (123, 12_000, 2, Encoding::S16be),
            (125, 8_000, 1, Encoding::S16be),
            (126, 8_000, 2, Encoding::S16be),
        ];
        for &(pt, samprate, channels, encoding) in fixed {
            by_pt.insert(
                pt,
                PtInfo {
                    samprate,
                    channels,
                    encoding,
                },
            );
        }
        PtTable {
            by_pt,
            alloc_lock: parking_lot::Mutex::new(()),
        }
    }

    /// Look up or allocate the PT for an output format.
    ///
    /// Idempotent: the same triple always maps to the same PT. Returns
    /// None when the arguments are unusable or the dynamic space is full.
    pub fn pt_from_info(&self, samprate: u32, channels: u8, encoding: Encoding) -> Option<u8> {
        if samprate == 0 || channels == 0 || channels > 2 {
            return None;
        }
        if matches!(encoding, Encoding::None) {
            return None;
        }
        // Opus merges every variation into the single pinned PT
        let (samprate, channels) = if encoding == Encoding::Opus {
            (OPUS_SAMPRATE, 2)
        } else {
            (samprate, channels)
        };
        let want = PtInfo {
            samprate,
            channels,
            encoding,
        };
        if let Some(pt) = self.find(want) {
            return Some(pt);
        }
        let _guard = self.alloc_lock.lock();
        if let Some(pt) = self.find(want) {
            return Some(pt); // raced with another allocator
        }
        // Allocate from the dynamic range, skipping the RTP Event squat
        for pt in 77u8..128 {
            if pt == 100 || self.by_pt.contains_key(&pt) {
                continue;
            }
            self.by_pt.insert(pt, want);
            return Some(pt);
        }
        None
    }

    fn find(&self, want: PtInfo) -> Option<u8> {
        self.by_pt
            .iter()
            .find(|e| *e.value() == want)
            .map(|e| *e.key())
    }

    pub fn info_from_pt(&self, pt: u8) -> Option<PtInfo> {
        self.by_pt.get(&pt).map(|e| *e.value())
    }
}

impl Default for PtTable {
    fn default() -> Self {
        Self::new()
    }
}
