// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Session Announcement Protocol sender. Experimental and off by
//! default: common players either skip SAP entirely or implement a vague
//! subset, so this exists mainly for interop experiments. The SDP
//! snapshot is taken at channel start and not updated midstream.

use crate::channel::Channel;
use log::debug;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// sap.mcast.net
const SAP_DEST: &str = "224.2.127.254:9875";
const SAP_PERIOD: Duration = Duration::from_secs(5);

pub fn start_sap(chan: &Channel) {
    let ssrc = chan.ssrc();
    let deps = Arc::clone(&chan.deps);
    let shared = Arc::downgrade(&chan.shared);
    let dest: SocketAddr = SAP_DEST.parse().expect("literal address");
    let msg = build_announcement(chan);
    let _ = std::thread::Builder::new()
        .name(format!("sap-{ssrc}"))
        .spawn(move || {
            while !deps.terminate.load(Ordering::Relaxed) {
                if shared.upgrade().is_none() {
                    break;
                }
                if let Err(e) = deps.output_sock.send_to(&msg, dest) {
                    if e.kind() != std::io::ErrorKind::WouldBlock {
                        debug!("[sap {ssrc}] send failed: {e}");
                    }
                }
                std::thread::sleep(SAP_PERIOD);
            }
        });
}

fn build_announcement(chan: &Channel) -> Vec<u8> {
    let mut msg = Vec::with_capacity(512);
    let id: u16 = rand::thread_rng().gen();
    // SAP v1, ipv4 origin, announce, no auth, not compressed
    msg.push(0x20);
    msg.push(0);
    msg.extend_from_slice(&id.to_be_bytes());
    // Origin address: we do not know our own unicast source here, the
    // listener only uses it for dedup
    msg.extend_from_slice(&[0, 0, 0, 0]);
    msg.extend_from_slice(b"application/sdp\0");

    let dest_ip = chan.cfg.dest.ip();
    let now = crate::rtp::rtcp::ntp_now() >> 32;
    let sdp = format!(
        "v=0\r\n\
         o=- {now} 1 IN IP4 {host}\r\n\
         s=radio {desc}\r\n\
         i=PCM output stream from radiod on {desc}\r\n\
         c=IN IP4 {ip}/{ttl}\r\n\
         t={now} 0\r\n\
         m=audio {port}/1 RTP/AVP {pt}\r\n\
         a=rtpmap:{pt} {enc}/{rate}/{ch}\r\n",
        host = chan.deps.hostname,
        desc = chan.deps.frontend.info.description,
        ip = dest_ip,
        ttl = chan.cfg.ttl,
        port = chan.cfg.dest.port(),
        pt = chan.sender.pt,
        enc = chan.cfg.encoding.name(),
        rate = chan.cfg.samprate,
        ch = chan.cfg.channels,
    );
    msg.extend_from_slice(sdp.as_bytes());
    msg
}
