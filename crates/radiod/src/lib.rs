// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! # radiod - multichannel software-defined radio engine
//!
//! One wideband front end, many independently tuned narrowband
//! receivers. A shared forward FFT turns the IF stream into
//! frequency-domain blocks; every channel selects its bins, filters,
//! inverse-transforms and demodulates, then ships audio as an RTP
//! multicast flow. Channels are created, retuned and destroyed at
//! runtime over a TLV status/command protocol on a separate multicast
//! group.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                      Front end (one per process)                   |
//! |        driver reader thread -> sample chunks -> FFT worker         |
//! +--------------------------------------------------------------------+
//! |                  Master filter (overlap-save FFT)                  |
//! |     L new samples + M-1 history -> N-point FFT -> frame ring       |
//! +--------------------------------------------------------------------+
//! |                    Channels (one thread each)                      |
//! |  bin select -> response -> IFFT -> fine tune -> demod -> RTP out   |
//! |         LINEAR | FM | WFM | SPECTRUM  (sum-typed per channel)      |
//! +--------------------------------------------------------------------+
//! |                 Control plane (status/command TLVs)                |
//! |   one receiver thread, per-channel mailboxes, periodic status      |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`engine::Engine`] | Process assembly: config to running daemon |
//! | [`filter::MasterFilter`] | Shared forward FFT and frame ring |
//! | [`channel::Channel`] | One receiver: tuning, filter, demod, RTP |
//! | [`channel::ChannelTable`] | SSRC-keyed registry with one mutex |
//! | [`protocol::tlv::TlvWriter`] | Status/command wire encoding |
//! | [`rtp::sender::RtpSender`] | Packetization with marker discipline |
//!
//! ## Concurrency model
//!
//! Preemptive threads and shared memory; no async runtime. The master
//! broadcasts a condvar per published block; channel threads are
//! independent failure domains and the ring tolerates laggards by
//! letting them skip ahead.

pub mod channel;
pub mod config;
pub mod demod;
pub mod dsp;
pub mod engine;
pub mod filter;
pub mod frontend;
pub mod protocol;
pub mod rtp;
pub mod transport;

pub use channel::{Channel, ChannelConfig, ChannelTable};
pub use config::ConfigFile;
pub use engine::{Deps, Engine};
pub use frontend::{Frontend, FrontendDriver};

/// Version string reported by `radiod -V`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
