//! Network channels for the client.
//!
//! The client uses two channels with separate owners:
//!
//! - **TCP** ([`tcp`]): the control channel. The caller's thread writes
//!   requests and a reply thread reads replies.
//! - **UDP** ([`udp`]): the data channel. A receive thread owns the socket
//!   and the [`Reassembler`](crate::media::reassembly::Reassembler), and
//!   stops when its [`CancellationToken`] fires.

pub mod tcp;
pub mod udp;

pub use tcp::{ControlChannel, ReplyReader};
pub use udp::{CancellationToken, DataChannel, MediaSender, StopReason};
