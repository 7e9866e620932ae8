pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use error::{ParseErrorKind, Result, StreamError};
pub use media::Packetizer;
pub use media::demux::{FrameDemuxer, StreamFormat};
pub use media::mjpeg::MjpegPacketizer;
pub use media::reassembly::{Frame, Reassembler};
pub use media::rtp::{FragmentDetection, RtpPacket};
pub use session::{Session, SessionEvent, SessionState};
pub use stats::{StatsSnapshot, StreamStats};
