// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! The TLV status/command protocol: wire codec, status packet
//! composition and command application.

pub mod command;
pub mod status;
pub mod tlv;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

/// GPS epoch on the Unix time scale.
const GPS_UNIX_EPOCH: i64 = 315_964_800;
/// GPS is ahead of UTC by the accumulated leap seconds.
const GPS_UTC_OFFSET: i64 = 18;

/// Nanoseconds since the GPS epoch (fixed leap-second offset).
pub fn gps_time_ns() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_nanos() as i64 - 1_000_000_000 * (GPS_UNIX_EPOCH - GPS_UTC_OFFSET)
}

/// Build an empty poll command for a specific SSRC (or 0xFFFFFFFF for
/// every channel). Used by tests and monitoring clients.
pub fn make_poll(ssrc: u32, tag: u32) -> Vec<u8> {
    let mut w = tlv::TlvWriter::new(tlv::PKT_COMMAND);
    w.int(types::StatusType::CommandTag as u8, u64::from(tag))
        .int(types::StatusType::OutputSsrc as u8, u64::from(ssrc));
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_time_is_ahead_of_unix() {
        let unix_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos() as i64;
        let gps = gps_time_ns();
        let diff_s = (unix_ns - gps) / 1_000_000_000;
        assert_eq!(diff_s, GPS_UNIX_EPOCH - GPS_UTC_OFFSET);
    }

    #[test]
    fn poll_packet_shape() {
        let pkt = make_poll(u32::MAX, 0x1234);
        assert_eq!(pkt[0], tlv::PKT_COMMAND);
        assert_eq!(tlv::get_ssrc(&pkt[1..]), Some(u32::MAX));
        assert_eq!(tlv::get_tag(&pkt[1..]), Some(0x1234));
    }
}
