//! Fragment reassembly.
//!
//! Turns a sequence of possibly-fragmented, possibly-reordered packets into
//! complete frames:
//!
//! - **Unfragmented** packets are complete frames already.
//! - **Fragmented** packets are buffered per fragment-group id until every
//!   index `0..total` has arrived, then concatenated in index order.
//! - **Stale groups**: whenever a newer group id is seen, and again after a
//!   group completes, any still-open group more than [`STALENESS_WINDOW`]
//!   ids behind it is discarded and counted as a lost frame. Late fragments
//!   for such groups are dropped on arrival. At most `STALENESS_WINDOW + 1`
//!   groups are therefore open at once, even if none ever completes.
//! - **Ordering**: a completed frame whose number is not newer than the last
//!   emitted frame is discarded as late and counted as lost.
//!
//! Group ids and frame numbers are 16-bit and wrap, so "behind" and "newer"
//! use serial-number arithmetic (RFC 1982).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{Result, StreamError};
use crate::media::rtp::{FragmentHeader, RtpPacket};
use crate::stats::StreamStats;

/// How many group ids an open reassembly may trail the newest group seen.
pub const STALENESS_WINDOW: u16 = 10;

const HALF_RANGE: u16 = 0x8000;

/// A complete frame ready for the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number the frame was carried under.
    pub number: u16,
    pub data: Vec<u8>,
}

/// `true` if `candidate` is strictly after `reference`.
fn is_newer(candidate: u16, reference: u16) -> bool {
    let ahead = candidate.wrapping_sub(reference);
    ahead != 0 && ahead < HALF_RANGE
}

/// `true` if `group` trails `reference` by more than the staleness window.
fn is_stale(group: u16, reference: u16) -> bool {
    let behind = reference.wrapping_sub(group);
    behind > STALENESS_WINDOW && behind < HALF_RANGE
}

/// Partial frame, alive only while incomplete.
#[derive(Debug)]
struct ReassemblyEntry {
    total: u8,
    frame_number: u16,
    fragments: BTreeMap<u8, Vec<u8>>,
}

impl ReassemblyEntry {
    fn new(total: u8, frame_number: u16) -> Self {
        Self {
            total,
            frame_number,
            fragments: BTreeMap::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments.len() == self.total as usize
    }

    fn concatenate(&self, group: u16) -> Result<Vec<u8>> {
        let size = self.fragments.values().map(Vec::len).sum();
        let mut frame = Vec::with_capacity(size);
        for index in 0..self.total {
            let part = self
                .fragments
                .get(&index)
                .ok_or(StreamError::MissingFragment { group, index })?;
            frame.extend_from_slice(part);
        }
        Ok(frame)
    }
}

/// Reassembles frames for one data channel.
///
/// Owned by the receive loop; needs no locking of its own.
#[derive(Debug)]
pub struct Reassembler {
    entries: HashMap<u16, ReassemblyEntry>,
    newest_group: Option<u16>,
    last_frame: Option<u16>,
    stats: Arc<StreamStats>,
}

impl Reassembler {
    pub fn new(stats: Arc<StreamStats>) -> Self {
        Self {
            entries: HashMap::new(),
            newest_group: None,
            last_frame: None,
            stats,
        }
    }

    /// Feed one decoded packet; returns a frame when one becomes complete.
    pub fn push(&mut self, packet: RtpPacket) -> Option<Frame> {
        match packet.fragment().copied() {
            None => {
                let number = packet.sequence();
                self.accept(number, packet.into_payload())
            }
            Some(fragment) => self.push_fragment(fragment, packet),
        }
    }

    fn push_fragment(&mut self, fragment: FragmentHeader, packet: RtpPacket) -> Option<Frame> {
        self.stats.record_fragment_received();
        let group = fragment.id();

        if let Some(newest) = self.newest_group
            && is_stale(group, newest)
        {
            tracing::debug!(group, newest, "dropping fragment of stale group");
            return None;
        }
        if self.newest_group.is_none_or(|newest| is_newer(group, newest)) {
            self.newest_group = Some(group);
            self.sweep_stale(group);
        }

        let frame_number = packet.sequence();
        let entry = self
            .entries
            .entry(group)
            .or_insert_with(|| ReassemblyEntry::new(fragment.total(), frame_number));

        if entry.total != fragment.total() {
            tracing::warn!(
                group,
                expected = entry.total,
                got = fragment.total(),
                "fragment total disagrees with its group, dropping fragment"
            );
            return None;
        }

        // Re-delivery of an index overwrites.
        entry
            .fragments
            .insert(fragment.index(), packet.into_payload());
        tracing::trace!(
            group,
            index = fragment.index(),
            have = entry.fragments.len(),
            total = entry.total,
            "fragment stored"
        );

        if !entry.is_complete() {
            return None;
        }

        let entry = self.entries.remove(&group)?;
        match entry.concatenate(group) {
            Ok(data) => {
                self.sweep_stale(group);
                self.accept(entry.frame_number, data)
            }
            Err(e) => {
                tracing::warn!(group, error = %e, "reassembly aborted");
                self.stats.record_frame_lost();
                None
            }
        }
    }

    /// Discard every open group more than the window behind `reference`.
    fn sweep_stale(&mut self, reference: u16) {
        let stats = &self.stats;
        self.entries.retain(|&group, entry| {
            if is_stale(group, reference) {
                tracing::warn!(
                    group,
                    reference,
                    have = entry.fragments.len(),
                    total = entry.total,
                    "discarding stale fragment group"
                );
                stats.record_frame_lost();
                false
            } else {
                true
            }
        });
    }

    /// Emit `data` unless it is older than the last emitted frame.
    fn accept(&mut self, number: u16, data: Vec<u8>) -> Option<Frame> {
        if let Some(last) = self.last_frame
            && !is_newer(number, last)
        {
            tracing::debug!(frame = number, last, "discarding late frame");
            self.stats.record_frame_lost();
            return None;
        }

        self.last_frame = Some(number);
        self.stats.record_frame_received();
        Some(Frame { number, data })
    }

    /// Drop all partial groups without counting them as lost. Returns how many were dropped.
    ///
    /// Called when playback pauses; the late-frame cursor is kept.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded partial groups");
        }
        dropped
    }

    /// Number of groups currently awaiting fragments.
    pub fn pending_groups(&self) -> usize {
        self.entries.len()
    }

    pub fn last_frame(&self) -> Option<u16> {
        self.last_frame
    }
}
