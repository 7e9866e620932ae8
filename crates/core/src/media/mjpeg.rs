use std::sync::Arc;

use super::Packetizer;
use super::rtp::{
    FRAGMENT_HEADER_SIZE, FragmentHeader, HEADER_SIZE, MJPEG_PAYLOAD_TYPE, RtpHeader, RtpPacket,
};
use crate::error::{Result, StreamError};
use crate::stats::{StreamStats, wall_clock_millis};

/// Datagram size budget used to split frames.
pub const DEFAULT_MTU: usize = 1400;

/// Payload bytes per fragment under [`DEFAULT_MTU`] (1400 − 12 − 4).
pub const DEFAULT_MAX_PAYLOAD: usize = DEFAULT_MTU - HEADER_SIZE - FRAGMENT_HEADER_SIZE;

/// Whole-JPEG RTP packetizer with the 4-byte fragmentation extension.
///
/// - **Single packet**: frames of at most `max_payload` bytes are sent as
///   one unfragmented packet (12-byte header + JPEG bytes).
///
/// - **Fragmented**: larger frames are split into `ceil(len / max_payload)`
///   packets, each carrying a [`FragmentHeader`] after the fixed header:
///
///   ```text
///   [RTP header (X=1)][group id | total | index][JPEG bytes ...]
///   ```
///
/// Every packet of a frame shares one sequence number (the frame number)
/// and one timestamp. The marker bit is set on the last packet of a frame.
/// Group ids come from a wrapping counter that advances once per
/// fragmented frame.
#[derive(Debug)]
pub struct MjpegPacketizer {
    ssrc: u32,
    frame_number: u16,
    next_group: u16,
    max_payload: usize,
    stats: Option<Arc<StreamStats>>,
}

impl MjpegPacketizer {
    pub fn new(ssrc: u32) -> Self {
        tracing::debug!(ssrc = format_args!("{:#010X}", ssrc), "MJPEG packetizer created");
        Self {
            ssrc,
            frame_number: 0,
            next_group: 0,
            max_payload: DEFAULT_MAX_PAYLOAD,
            stats: None,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc() -> Self {
        Self::new(rand::random::<u32>())
    }

    /// Payload bytes per packet; clamped to at least 1.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.max(1);
        self
    }

    /// Record every produced packet, fragment and frame as sent.
    pub fn with_stats(mut self, stats: Arc<StreamStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Packetize one frame stamped with an explicit timestamp.
    pub fn packetize_at(&mut self, frame: &[u8], timestamp: u32) -> Result<Vec<Vec<u8>>> {
        if frame.is_empty() {
            tracing::warn!("skipping empty frame");
            return Ok(Vec::new());
        }

        let total = frame.len().div_ceil(self.max_payload);
        if total > u8::MAX as usize {
            return Err(StreamError::InvalidField {
                field: "fragment total",
                value: total as u32,
            });
        }

        self.frame_number = self.frame_number.wrapping_add(1);
        let group = if total > 1 {
            let id = self.next_group;
            self.next_group = self.next_group.wrapping_add(1);
            Some(id)
        } else {
            None
        };

        let mut packets = Vec::with_capacity(total);
        for (index, chunk) in frame.chunks(self.max_payload).enumerate() {
            let mut header =
                RtpHeader::new(MJPEG_PAYLOAD_TYPE, self.frame_number, timestamp, self.ssrc);
            header.marker = index + 1 == total;

            let fragment = match group {
                Some(id) => Some(FragmentHeader::new(id, total as u8, index as u8)?),
                None => None,
            };
            let packet = RtpPacket::new(header, fragment, chunk.to_vec()).encode()?;

            if let Some(stats) = &self.stats {
                stats.record_packet_sent(packet.len());
                if fragment.is_some() {
                    stats.record_fragment_sent();
                }
            }
            packets.push(packet);
        }

        if let Some(stats) = &self.stats {
            stats.record_frame_sent();
        }

        tracing::trace!(
            frame = self.frame_number,
            bytes = frame.len(),
            packets = packets.len(),
            group,
            "frame packetized"
        );
        Ok(packets)
    }
}

impl Packetizer for MjpegPacketizer {
    fn packetize(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.packetize_at(frame, wall_clock_millis())
    }

    fn codec_name(&self) -> &'static str {
        "JPEG"
    }

    fn payload_type(&self) -> u8 {
        MJPEG_PAYLOAD_TYPE
    }

    fn next_sequence(&self) -> u16 {
        self.frame_number.wrapping_add(1)
    }
}
