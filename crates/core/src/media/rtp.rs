use crate::error::{Result, StreamError};

/// Size of the fixed RTP header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Size of the fragmentation descriptor that may follow the fixed header.
pub const FRAGMENT_HEADER_SIZE: usize = 4;

/// RTP version written by [`RtpHeader::new`].
pub const RTP_VERSION: u8 = 2;

/// Static payload type for JPEG (RFC 3551).
pub const MJPEG_PAYLOAD_TYPE: u8 = 26;

/// Upper bound on fragment ids accepted by the legacy heuristic.
const HEURISTIC_FRAGMENT_ID_CEILING: u32 = 100_000;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The sequence number doubles as the frame number: every fragment of one
/// frame carries the same value.
///
/// The extension bit (X) is owned by [`RtpPacket::encode`], which sets it
/// exactly when a [`FragmentHeader`] follows the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Protocol version, 2 bits.
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    /// Contributing source count, 4 bits.
    pub csrc_count: u8,
    /// Set on the last packet of a frame.
    pub marker: bool,
    /// Payload type, 7 bits.
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Version-2 header with all flags cleared.
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialize the 12-byte big-endian header.
    ///
    /// Rejects fields that do not fit their bit width instead of masking them.
    pub fn write(&self) -> Result<[u8; HEADER_SIZE]> {
        if self.version > 3 {
            return Err(StreamError::InvalidField {
                field: "version",
                value: self.version as u32,
            });
        }
        if self.payload_type > 127 {
            return Err(StreamError::InvalidField {
                field: "payload type",
                value: self.payload_type as u32,
            });
        }
        if self.csrc_count > 15 {
            return Err(StreamError::InvalidField {
                field: "CSRC count",
                value: self.csrc_count as u32,
            });
        }

        let mut header = [0u8; HEADER_SIZE];
        header[0] = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | self.csrc_count;
        header[1] = ((self.marker as u8) << 7) | self.payload_type;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        Ok(header)
    }

    /// Parse the fixed header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StreamError::MalformedPacket {
                len: buf.len(),
                reason: "shorter than the 12-byte fixed header",
            });
        }

        Ok(Self {
            version: buf[0] >> 6,
            padding: buf[0] & 0x20 != 0,
            extension: buf[0] & 0x10 != 0,
            csrc_count: buf[0] & 0x0F,
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7F,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// Fragmentation descriptor carried in bytes 12–15 of a fragmented packet.
///
/// ```text
/// +--------+--------+--------+--------+
/// |   fragment id   | total  | index  |
/// +--------+--------+--------+--------+
/// ```
///
/// Only exists for frames split into more than one packet, so `total > 1`
/// and `index < total` always hold for a constructed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentHeader {
    id: u16,
    total: u8,
    index: u8,
}

impl FragmentHeader {
    pub fn new(id: u16, total: u8, index: u8) -> Result<Self> {
        if total < 2 {
            return Err(StreamError::InvalidField {
                field: "fragment total",
                value: total as u32,
            });
        }
        if index >= total {
            return Err(StreamError::InvalidField {
                field: "fragment index",
                value: index as u32,
            });
        }
        Ok(Self { id, total, index })
    }

    /// Fragment-group id shared by every fragment of one frame.
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn total(&self) -> u8 {
        self.total
    }

    /// Zero-based position of this fragment within its group.
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn write(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let id = self.id.to_be_bytes();
        [id[0], id[1], self.total, self.index]
    }

    fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAGMENT_HEADER_SIZE {
            return None;
        }
        let id = u16::from_be_bytes([buf[0], buf[1]]);
        Self::new(id, buf[2], buf[3]).ok()
    }

    /// Legacy byte-pattern test: total > 1, index < total, id under the ceiling.
    fn parse_heuristic(buf: &[u8]) -> Option<Self> {
        let candidate = Self::parse(buf)?;
        (u32::from(candidate.id) < HEURISTIC_FRAGMENT_ID_CEILING).then_some(candidate)
    }
}

/// How [`RtpPacket::decode_with`] decides whether a fragmentation header is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FragmentDetection {
    /// Trust the header's extension bit. Unambiguous; what [`RtpPacket::encode`] writes.
    #[default]
    ExtensionBit,
    /// Sniff the 4 bytes after the fixed header.
    ///
    /// For senders that never set the extension bit. Payload bytes that happen
    /// to look like a descriptor are misclassified as one.
    Heuristic,
}

/// One decoded or to-be-encoded datagram.
///
/// Immutable once decoded; all accessors read the parsed fields directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    header: RtpHeader,
    fragment: Option<FragmentHeader>,
    payload: Vec<u8>,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, fragment: Option<FragmentHeader>, payload: Vec<u8>) -> Self {
        let header = RtpHeader {
            extension: fragment.is_some(),
            ..header
        };
        Self {
            header,
            fragment,
            payload,
        }
    }

    /// Serialize: fixed header, fragmentation header (if any), then payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = self.header.write()?;
        let mut packet =
            Vec::with_capacity(HEADER_SIZE + FRAGMENT_HEADER_SIZE + self.payload.len());
        packet.extend_from_slice(&header);
        if let Some(fragment) = &self.fragment {
            packet.extend_from_slice(&fragment.write());
        }
        packet.extend_from_slice(&self.payload);
        Ok(packet)
    }

    /// Decode using the extension bit to detect fragmentation.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::decode_with(buf, FragmentDetection::ExtensionBit)
    }

    pub fn decode_with(buf: &[u8], detection: FragmentDetection) -> Result<Self> {
        let mut header = RtpHeader::parse(buf)?;
        let rest = &buf[HEADER_SIZE..];

        let fragment = match detection {
            FragmentDetection::ExtensionBit if header.extension => {
                Some(FragmentHeader::parse(rest).ok_or(StreamError::MalformedPacket {
                    len: buf.len(),
                    reason: "extension bit set without a valid fragmentation header",
                })?)
            }
            FragmentDetection::ExtensionBit => None,
            FragmentDetection::Heuristic => {
                let fragment = FragmentHeader::parse_heuristic(rest);
                header.extension = fragment.is_some();
                fragment
            }
        };

        let payload_start = if fragment.is_some() {
            FRAGMENT_HEADER_SIZE
        } else {
            0
        };

        Ok(Self {
            header,
            fragment,
            payload: rest[payload_start..].to_vec(),
        })
    }

    pub fn header(&self) -> &RtpHeader {
        &self.header
    }

    /// Sequence number, which is also the frame number.
    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }

    pub fn marker(&self) -> bool {
        self.header.marker
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn fragment(&self) -> Option<&FragmentHeader> {
        self.fragment.as_ref()
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragment.is_some()
    }

    /// Bytes this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE
            + self.fragment.map_or(0, |_| FRAGMENT_HEADER_SIZE)
            + self.payload.len()
    }
}
