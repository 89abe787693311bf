// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Multicast group management.
//!
//! Stream names resolve to deterministic IPv4 groups in the 239.0.0.0/8
//! administratively scoped block. Group joins are issued on every
//! non-loopback interface; snooping switches otherwise drop traffic for
//! groups nobody on the segment has joined.

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// 32-bit FNV-1 hash (multiply then xor).
fn fnv1(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash = hash.wrapping_mul(0x0100_0193);
        hash ^= u32::from(b);
    }
    hash
}

/// Hash a stream name into a multicast address in 239.0.0.0/8.
///
/// 239.0.0.0/24 and 239.128.0.0/24 are avoided: they alias to the same
/// Ethernet MAC range as the 224.0.0.0/24 control block, which switches
/// do not snoop. The dodge raises the collision odds slightly (512 of
/// 16M addresses are remapped).
pub fn make_maddr(name: &str) -> Ipv4Addr {
    let mut addr: u32 = (239u32 << 24) | (fnv1(name.as_bytes()) & 0x00ff_ffff);
    if addr & 0x007f_ff00 == 0 {
        addr |= (addr & 0xff) << 8;
    }
    if addr & 0x007f_ff00 == 0 {
        addr |= 0x0010_0000; // small chance even after the first fix
    }
    Ipv4Addr::from(addr)
}

/// Resolve a destination name to a socket address.
///
/// Accepts IP literals (with or without port), DNS names when `use_dns`
/// is set, and otherwise falls back to the deterministic hashed group.
pub fn resolve_dest(name: &str, default_port: u16, use_dns: bool) -> SocketAddr {
    if let Ok(sock) = name.parse::<SocketAddr>() {
        return sock;
    }
    if let Ok(ip) = name.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port);
    }
    if use_dns {
        if let Ok(mut addrs) = (name, default_port).to_socket_addrs() {
            if let Some(sock) = addrs.next() {
                debug!("[mcast] {name} resolved via DNS to {sock}");
                return sock;
            }
        }
    }
    SocketAddr::new(IpAddr::V4(make_maddr(name)), default_port)
}

/// Non-loopback IPv4 interface addresses, for multicast membership.
fn multicast_interfaces() -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => {
            for (_name, ip) in ifs {
                if let IpAddr::V4(v4) = ip {
                    if !v4.is_loopback() {
                        addrs.push(v4);
                    }
                }
            }
        }
        Err(e) => {
            debug!("[mcast] interface enumeration failed: {e}");
        }
    }
    addrs
}

/// Create an unconnected output socket for multicast sends.
///
/// Non-blocking so a full socket buffer surfaces as `WouldBlock` instead
/// of stalling the demodulator.
pub fn output_mcast(iface: Option<&str>, ttl: u32, tos: u32) -> io::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.set_multicast_ttl_v4(ttl)?;
    sock.set_multicast_loop_v4(true)?;
    if let Err(e) = sock.set_tos(tos) {
        debug!("[mcast] set_tos({tos}) failed (non-fatal): {e}");
    }
    if let Some(iface) = iface {
        if let Ok(ip) = iface.parse::<Ipv4Addr>() {
            sock.set_multicast_if_v4(&ip)?;
        } else {
            debug!("[mcast] iface '{iface}' is not an IPv4 address, using default");
        }
    }
    sock.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into())?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

/// Join `group` on every available interface.
///
/// Per-interface failures are non-fatal: an adapter without multicast
/// support or an already-joined physical NIC just logs and moves on.
pub fn join_group(sock: &UdpSocket, group: &SocketAddr, iface: Option<&str>) -> io::Result<()> {
    let IpAddr::V4(group_v4) = group.ip() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "only IPv4 multicast groups are supported",
        ));
    };
    if !group_v4.is_multicast() {
        return Ok(()); // unicast destination, nothing to join
    }
    if let Some(iface) = iface {
        if let Ok(ip) = iface.parse::<Ipv4Addr>() {
            sock.join_multicast_v4(&group_v4, &ip)?;
            return Ok(());
        }
    }
    let interfaces = multicast_interfaces();
    if interfaces.is_empty() {
        debug!("[mcast] no suitable interfaces, joining {group_v4} on UNSPECIFIED");
        sock.join_multicast_v4(&group_v4, &Ipv4Addr::UNSPECIFIED)?;
        return Ok(());
    }
    for ifaddr in &interfaces {
        match sock.join_multicast_v4(&group_v4, ifaddr) {
            Ok(()) => debug!("[mcast] joined {group_v4} on {ifaddr}"),
            Err(e) if e.raw_os_error() == Some(98) => {
                // EADDRINUSE: already joined on the same physical NIC
                debug!("[mcast] {group_v4} already joined on {ifaddr}");
            }
            Err(e) => debug!("[mcast] join {group_v4} on {ifaddr} failed (non-fatal): {e}"),
        }
    }
    Ok(())
}

/// Listening socket for the status/command group.
///
/// Bound with address reuse so several daemons can share the group; the
/// short read timeout lets the caller poll a terminate flag.
pub fn listen_mcast(group: &SocketAddr, iface: Option<&str>) -> io::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), group.port()).into())?;
    let sock: UdpSocket = sock.into();
    join_group(&sock, group, iface)?;
    sock.set_read_timeout(Some(Duration::from_millis(100)))?;
    Ok(sock)
}
