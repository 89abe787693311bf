// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Channel table: fixed-capacity slot array keyed by SSRC.
//!
//! Structural changes (create/remove) are serialized by one mutex; per
//! channel state lives with the demodulator thread and only the shared
//! mailbox crosses threads. SSRC 0 is reserved, 0xFFFFFFFF addresses all
//! channels in commands.

use crate::config::NCHANNELS;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Latest-wins single-slot command queue plus the deferred-response
/// timer used to stagger broadcast poll replies.
#[derive(Debug, Default)]
pub struct Mailbox {
    /// Most recent command body (kind byte stripped). Latest wins.
    pub command: Option<Vec<u8>>,
    /// Tag to echo in the next status response.
    pub tag: u32,
    /// Blocks until a deferred global-status response is due; 0 = none.
    pub global_timer: u32,
}

/// The part of a channel visible outside its demod thread.
#[derive(Debug)]
pub struct ChannelShared {
    pub ssrc: u32,
    pub mailbox: Mutex<Mailbox>,
    /// Traffic counters for the RTCP/SAP side threads.
    pub rtp_stats: Arc<crate::rtp::RtpStatsAtomic>,
}

impl PartialEq for ChannelShared {
    fn eq(&self, other: &Self) -> bool {
        self.ssrc == other.ssrc
    }
}

impl ChannelShared {
    pub fn new(ssrc: u32) -> Arc<Self> {
        Arc::new(ChannelShared {
            ssrc,
            mailbox: Mutex::new(Mailbox::default()),
            rtp_stats: Arc::new(crate::rtp::RtpStatsAtomic::default()),
        })
    }

    /// Deposit a command, replacing any unread one.
    pub fn post_command(&self, body: Vec<u8>, tag: u32) {
        let mut mb = self.mailbox.lock();
        mb.command = Some(body);
        mb.tag = tag;
    }

    /// Schedule a deferred status response (broadcast poll).
    pub fn post_poll(&self, tag: u32, delay_blocks: u32) {
        let mut mb = self.mailbox.lock();
        mb.tag = tag;
        mb.global_timer = delay_blocks.max(1);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreateError {
    #[error("ssrc {0} is reserved")]
    Reserved(u32),
    #[error("ssrc {0} already exists")]
    Taken(u32),
    #[error("channel table full ({0} active)")]
    Full(usize),
}

pub struct ChannelTable {
    slots: Mutex<Vec<Option<Arc<ChannelShared>>>>,
    active: AtomicUsize,
}

impl ChannelTable {
    pub fn new() -> Self {
        ChannelTable {
            slots: Mutex::new((0..NCHANNELS).map(|_| None).collect()),
            active: AtomicUsize::new(0),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn lookup(&self, ssrc: u32) -> Option<Arc<ChannelShared>> {
        let slots = self.slots.lock();
        slots
            .iter()
            .flatten()
            .find(|s| s.ssrc == ssrc)
            .map(Arc::clone)
    }

    /// Atomically create a channel slot, failing on collision.
    pub fn create(&self, ssrc: u32) -> Result<Arc<ChannelShared>, CreateError> {
        if ssrc == 0 || ssrc == u32::MAX {
            return Err(CreateError::Reserved(ssrc));
        }
        let mut slots = self.slots.lock();
        if slots.iter().flatten().any(|s| s.ssrc == ssrc) {
            return Err(CreateError::Taken(ssrc));
        }
        let Some(free) = slots.iter_mut().find(|s| s.is_none()) else {
            return Err(CreateError::Full(self.active.load(Ordering::Relaxed)));
        };
        let shared = ChannelShared::new(ssrc);
        *free = Some(Arc::clone(&shared));
        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(shared)
    }

    /// Release a slot; called from the owning demod thread on close.
    pub fn remove(&self, ssrc: u32) {
        let mut slots = self.slots.lock();
        for s in slots.iter_mut() {
            if s.as_ref().is_some_and(|c| c.ssrc == ssrc) {
                *s = None;
                self.active.fetch_sub(1, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Visit every active channel (used by broadcast polls).
    pub fn for_each(&self, mut f: impl FnMut(&Arc<ChannelShared>)) {
        let slots = self.slots.lock();
        for s in slots.iter().flatten() {
            f(s);
        }
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}
