use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::error::{Result, StreamError};
use crate::protocol::RtspRequest;

/// Default size of a single reply read.
pub const DEFAULT_REPLY_BUFFER: usize = 4096;

/// Writing half of the control connection.
///
/// Requests go out from the caller's thread; replies are read on a
/// separate thread through a [`ReplyReader`] split off with
/// [`ControlChannel::reply_reader`].
#[derive(Debug)]
pub struct ControlChannel {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ControlChannel {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).map_err(|source| StreamError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        tracing::info!(peer = %addr, "control channel connected");
        Ok(Self { stream, peer: addr })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Split off the reading half.
    pub fn reply_reader(&self, buffer_size: usize) -> Result<ReplyReader> {
        Ok(ReplyReader {
            stream: self.stream.try_clone()?,
            buf: vec![0u8; buffer_size.max(1)],
        })
    }

    pub fn send(&mut self, request: &RtspRequest) -> Result<()> {
        let text = request.serialize();
        self.stream
            .write_all(text.as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::ConnectionReset => {
                    StreamError::NotConnected
                }
                _ => StreamError::Io(e),
            })?;
        tracing::debug!(
            peer = %self.peer,
            method = %request.method,
            cseq = request.cseq(),
            "request sent"
        );
        Ok(())
    }

    /// Close both directions. The reply reader then sees end of stream.
    pub fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both)
            && e.kind() != ErrorKind::NotConnected
        {
            tracing::debug!(error = %e, "control shutdown failed");
        }
    }
}

/// Reading half of the control connection.
#[derive(Debug)]
pub struct ReplyReader {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl ReplyReader {
    /// Read one reply: whatever a single read returns, up to the buffer size.
    /// No blank-line terminator is required. `Ok(None)` means the peer closed.
    pub fn read_reply(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.read(&mut self.buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(String::from_utf8_lossy(&self.buf[..n]).into_owned())),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Close the connection from the reading side.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
