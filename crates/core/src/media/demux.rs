//! Frame demultiplexing from a recorded or live MJPEG byte stream.
//!
//! Two dialects are recognised, auto-detected once when the stream is opened:
//!
//! - **Length-prefixed**: repeating `[5 ASCII decimal digits][payload]`.
//!   A prefix that is not a number, is zero, or exceeds [`MAX_FRAME_LEN`]
//!   yields [`StreamError::CorruptFrameLength`] and the cursor stays just past
//!   the prefix.
//! - **Marker-delimited**: raw JPEG images, each an inclusive
//!   `FF D8 … FF D9` range. Bytes between images are skipped. An image that
//!   grows past the scan cap yields [`StreamError::FrameTooLarge`]; the bytes
//!   consumed so far are dropped and scanning resumes at the cursor.
//!
//! ```text
//! length-prefixed:  "00123" <123 bytes> "04096" <4096 bytes> ...
//! marker-delimited: FF D8 ... FF D9 FF D8 ... FF D9 ...
//! ```
//!
//! A demuxer is a single-reader cursor: `&mut self` on every read keeps it
//! from being shared between threads without external locking.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, StreamError};

/// Width of the ASCII length prefix.
pub const LENGTH_PREFIX_LEN: usize = 5;

/// Largest frame accepted from either dialect.
pub const MAX_FRAME_LEN: usize = 5_000_000;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI_SECOND: u8 = 0xD9;

/// Framing dialect of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    LengthPrefixed,
    MarkerDelimited,
}

impl StreamFormat {
    /// Classify a stream from its first bytes.
    ///
    /// A leading start-of-image marker wins; otherwise five ASCII digits mean
    /// length-prefixed. Anything else is scanned for markers.
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(&SOI) {
            StreamFormat::MarkerDelimited
        } else if head.len() >= LENGTH_PREFIX_LEN
            && head[..LENGTH_PREFIX_LEN].iter().all(u8::is_ascii_digit)
        {
            StreamFormat::LengthPrefixed
        } else {
            StreamFormat::MarkerDelimited
        }
    }
}

/// Fill `buf` as far as the source allows; returns the number of bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Stateful cursor yielding successive frames from a byte source.
pub struct FrameDemuxer<R> {
    reader: BufReader<R>,
    format: StreamFormat,
    max_frame_len: usize,
    frames_read: u64,
}

impl FrameDemuxer<File> {
    /// Open a recorded stream from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let demuxer = Self::new(file)?;
        tracing::info!(path = %path.display(), format = ?demuxer.format, "frame source opened");
        Ok(demuxer)
    }
}

impl<R: Read + Seek> FrameDemuxer<R> {
    /// Wrap `source`, sampling its first bytes to pick the dialect.
    pub fn new(source: R) -> Result<Self> {
        let mut reader = BufReader::new(source);
        let mut head = [0u8; LENGTH_PREFIX_LEN];
        let n = read_up_to(&mut reader, &mut head)?;
        reader.seek(SeekFrom::Start(0))?;

        let format = StreamFormat::detect(&head[..n]);
        tracing::debug!(?format, sampled = n, "detected stream format");

        Ok(Self {
            reader,
            format,
            max_frame_len: MAX_FRAME_LEN,
            frames_read: 0,
        })
    }

    /// Override the frame size bound (length check and marker scan cap).
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Frames returned since open or the last [`reset`](Self::reset).
    pub fn frame_number(&self) -> u64 {
        self.frames_read
    }

    /// Next frame, or `Ok(None)` at end of stream.
    ///
    /// An `Err` covers only the damaged frame; calling again continues after it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let frame = match self.format {
            StreamFormat::LengthPrefixed => self.next_length_prefixed()?,
            StreamFormat::MarkerDelimited => self.next_marker_delimited()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    /// Rewind to the start of the source for replay.
    pub fn reset(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.frames_read = 0;
        tracing::debug!("frame source rewound");
        Ok(())
    }

    fn next_length_prefixed(&mut self) -> Result<Option<Vec<u8>>> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        match read_up_to(&mut self.reader, &mut prefix)? {
            0 => return Ok(None),
            LENGTH_PREFIX_LEN => {}
            n => {
                tracing::warn!(bytes = n, "truncated length prefix at end of stream");
                return Ok(None);
            }
        }

        let text = String::from_utf8_lossy(&prefix).into_owned();
        let parsed = if prefix.iter().all(u8::is_ascii_digit) {
            text.parse::<usize>().ok()
        } else {
            None
        };
        let len = match parsed {
            Some(len) if len > 0 && len <= self.max_frame_len => len,
            _ => {
                tracing::warn!(prefix = %text, frame = self.frames_read, "corrupt frame length");
                return Err(StreamError::CorruptFrameLength(text));
            }
        };

        let mut frame = vec![0u8; len];
        let n = read_up_to(&mut self.reader, &mut frame)?;
        if n < len {
            tracing::warn!(expected = len, got = n, "truncated frame at end of stream");
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        loop {
            let byte = match self.reader.fill_buf() {
                Ok([]) => return Ok(None),
                Ok(buf) => buf[0],
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.reader.consume(1);
            return Ok(Some(byte));
        }
    }

    fn next_marker_delimited(&mut self) -> Result<Option<Vec<u8>>> {
        let mut prev = 0u8;
        let mut skipped = 0usize;
        loop {
            let Some(byte) = self.read_byte()? else {
                return Ok(None);
            };
            if prev == SOI[0] && byte == SOI[1] {
                break;
            }
            prev = byte;
            skipped += 1;
        }
        if skipped > 1 {
            tracing::trace!(skipped = skipped - 1, "skipped bytes before start-of-image");
        }

        let mut frame = SOI.to_vec();
        loop {
            let Some(byte) = self.read_byte()? else {
                tracing::warn!(scanned = frame.len(), "stream ended inside a frame");
                return Ok(None);
            };
            frame.push(byte);

            if byte == EOI_SECOND && frame[frame.len() - 2] == 0xFF {
                return Ok(Some(frame));
            }
            if frame.len() > self.max_frame_len {
                tracing::warn!(scanned = frame.len(), "no end-of-image marker within scan cap");
                return Err(StreamError::FrameTooLarge {
                    scanned: frame.len(),
                });
            }
        }
    }
}
