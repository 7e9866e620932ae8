//! Media framing: packet codec, packetization, reassembly and frame sources.
//!
//! ## Data path
//!
//! ```text
//! sender:   FrameDemuxer ──frames──▶ MjpegPacketizer ──datagrams──▶ UDP
//! receiver: UDP ──datagrams──▶ RtpPacket::decode ──▶ Reassembler ──frames──▶ renderer
//! ```
//!
//! Every datagram carries a 12-byte fixed header ([`rtp::RtpHeader`]):
//!
//! - **Sequence number** (16-bit, wrapping): the frame number, shared by
//!   all fragments of one frame.
//! - **Timestamp** (32-bit): sender wall clock in milliseconds, used for
//!   latency and jitter.
//! - **SSRC** (32-bit): randomly chosen to identify the sender.
//! - **Marker bit**: set on the last packet of a frame.
//! - **Extension bit**: set when a 4-byte [`rtp::FragmentHeader`] follows.
//!
//! | Module | Role |
//! |--------|------|
//! | [`rtp`] | Header and packet encode/decode |
//! | [`mjpeg`] | Splits JPEG frames into packets |
//! | [`reassembly`] | Joins fragments back into frames |
//! | [`demux`] | Cuts frames out of a recorded byte stream |

pub mod demux;
pub mod mjpeg;
pub mod reassembly;
pub mod rtp;

use crate::error::Result;

/// Codec-specific RTP packetizer.
///
/// Each returned `Vec<u8>` is a complete datagram: 12-byte header
/// (RFC 3550 §5.1), optional fragmentation header, then payload.
pub trait Packetizer: Send {
    /// Packetize one encoded frame, stamped with the current time.
    fn packetize(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Codec name (e.g. `"JPEG"`).
    fn codec_name(&self) -> &'static str;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// Sequence number the next frame will carry.
    fn next_sequence(&self) -> u16;
}
