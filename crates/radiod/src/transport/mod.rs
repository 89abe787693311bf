// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Multicast transport plumbing: deterministic group addresses, socket
//! construction and group membership.

pub mod multicast;

pub use multicast::{join_group, listen_mcast, make_maddr, output_mcast, resolve_dest};
