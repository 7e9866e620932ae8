//! Text control protocol (RTSP/1.0 subset, RFC 2326).
//!
//! The client drives four methods; each request carries a `CSeq` that the
//! reply must echo:
//!
//! ```text
//! PLAY movie.Mjpeg RTSP/1.0\r\n         RTSP/1.0 200 OK\r\n
//! CSeq: 2\r\n                  ───▶     CSeq: 2\r\n
//! Session: 777\r\n                      Session: 777\r\n
//! \r\n
//! ```
//!
//! | Method | Sent from | Extra header |
//! |--------|-----------|--------------|
//! | SETUP | Init | `Transport: RTP/UDP; client_port= <port>` |
//! | PLAY | Ready | `Session` |
//! | PAUSE | Playing | `Session` |
//! | TEARDOWN | Ready, Playing | `Session` |
//!
//! Replies are parsed by header name with a positional fallback
//! (see [`RtspReply`]).

pub mod request;
pub mod response;

pub use request::{Method, RtspRequest};
pub use response::RtspReply;
