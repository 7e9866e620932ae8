use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::media::Packetizer;
use crate::media::reassembly::{Frame, Reassembler};
use crate::media::rtp::{FragmentDetection, RtpPacket};
use crate::stats::StreamStats;

/// Largest datagram the receive buffer holds.
pub const MAX_DATAGRAM: usize = 65_535;

/// Default receive timeout; bounds how long a cancellation goes unnoticed.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Why a receive loop was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopReason {
    /// Keep the socket for a later PLAY.
    Pause = 1,
    /// Close the socket.
    Teardown = 2,
}

/// Cloneable stop signal for a receive loop.
///
/// The strongest reason wins: a teardown raised after a pause still closes
/// the socket.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicU8>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, reason: StopReason) {
        self.0.fetch_max(reason as u8, Ordering::SeqCst);
    }

    pub fn reason(&self) -> Option<StopReason> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            1 => Some(StopReason::Pause),
            _ => Some(StopReason::Teardown),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }
}

/// Receive side of the data channel: the UDP socket plus the reassembly
/// state for the frames arriving on it.
#[derive(Debug)]
pub struct DataChannel {
    socket: UdpSocket,
    reassembler: Reassembler,
    detection: FragmentDetection,
    stats: Arc<StreamStats>,
}

impl DataChannel {
    /// Bind `0.0.0.0:port` with a read timeout. Port 0 picks an ephemeral port.
    pub fn bind(port: u16, recv_timeout: Duration, stats: Arc<StreamStats>) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .map_err(|source| StreamError::Bind { port, source })?;
        socket
            .set_read_timeout(Some(recv_timeout.max(Duration::from_millis(1))))
            .map_err(|source| StreamError::Bind { port, source })?;
        tracing::info!(addr = ?socket.local_addr().ok(), "data channel bound");
        Ok(Self {
            socket,
            reassembler: Reassembler::new(stats.clone()),
            detection: FragmentDetection::default(),
            stats,
        })
    }

    pub fn with_detection(mut self, detection: FragmentDetection) -> Self {
        self.detection = detection;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Receive, decode and reassemble until `token` fires.
    ///
    /// Complete frames go to `frames`. On [`StopReason::Pause`] partial
    /// groups are discarded and the channel is handed back; on
    /// [`StopReason::Teardown`] the socket is closed here and `None` is
    /// returned. Bad datagrams are counted and skipped.
    pub fn receive_loop(mut self, token: &CancellationToken, frames: &Sender<Frame>) -> Option<Self> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut renderer_gone = false;
        tracing::info!("receive loop started");

        loop {
            match token.reason() {
                Some(StopReason::Pause) => {
                    self.reassembler.clear();
                    tracing::info!("receive loop paused");
                    return Some(self);
                }
                Some(StopReason::Teardown) => {
                    tracing::info!("receive loop stopped, closing data channel");
                    return None;
                }
                None => {}
            }

            let len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "data channel receive failed, stopping loop");
                    return Some(self);
                }
            };

            let Some(frame) = self.handle_datagram(&buf[..len]) else {
                continue;
            };
            if frames.send(frame).is_err() && !renderer_gone {
                renderer_gone = true;
                tracing::debug!("frame consumer dropped, frames are discarded");
            }
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8]) -> Option<Frame> {
        let packet = match RtpPacket::decode_with(datagram, self.detection) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.record_packet_lost();
                tracing::warn!(error = %e, "dropping malformed packet");
                return None;
            }
        };
        tracing::trace!(
            seq = packet.sequence(),
            len = datagram.len(),
            fragmented = packet.is_fragmented(),
            "packet received"
        );
        // A zero timestamp means the sender did not stamp the packet.
        let sent_at = Some(packet.timestamp()).filter(|&ts| ts != 0);
        self.stats.record_packet_received(datagram.len(), sent_at);
        self.reassembler.push(packet)
    }
}

/// Send side of the data channel: packetizes frames and sends each packet
/// to one destination from an ephemeral socket.
pub struct MediaSender {
    socket: UdpSocket,
    dest: SocketAddr,
    packetizer: Box<dyn Packetizer>,
}

impl MediaSender {
    pub fn bind(dest: SocketAddr, packetizer: Box<dyn Packetizer>) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        tracing::debug!(
            %dest,
            codec = packetizer.codec_name(),
            payload_type = packetizer.payload_type(),
            "media sender bound"
        );
        Ok(Self {
            socket,
            dest,
            packetizer,
        })
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    pub fn packetizer(&self) -> &dyn Packetizer {
        self.packetizer.as_ref()
    }

    /// Packetize `frame` and send every packet. Returns the packet count.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<usize> {
        let sequence = self.packetizer.next_sequence();
        let packets = self.packetizer.packetize(frame)?;
        for packet in &packets {
            self.socket.send_to(packet, self.dest)?;
        }
        tracing::trace!(seq = sequence, packets = packets.len(), dest = %self.dest, "frame sent");
        Ok(packets.len())
    }
}

impl std::fmt::Debug for MediaSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSender")
            .field("dest", &self.dest)
            .field("codec", &self.packetizer.codec_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mjpeg::MjpegPacketizer;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn token_keeps_strongest_reason() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel(StopReason::Pause);
        assert_eq!(token.reason(), Some(StopReason::Pause));
        token.cancel(StopReason::Teardown);
        token.cancel(StopReason::Pause);
        assert_eq!(token.reason(), Some(StopReason::Teardown));
    }

    #[test]
    fn bind_conflict_is_bind_error() {
        let taken = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = DataChannel::bind(port, DEFAULT_RECV_TIMEOUT, Arc::new(StreamStats::new()));
        assert!(matches!(err, Err(StreamError::Bind { port: p, .. }) if p == port));
    }

    #[test]
    fn receives_frames_until_paused() {
        let stats = Arc::new(StreamStats::new());
        let channel = DataChannel::bind(0, Duration::from_millis(50), stats.clone()).unwrap();
        let port = channel.local_addr().unwrap().port();
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel();

        let loop_token = token.clone();
        let handle = thread::spawn(move || channel.receive_loop(&loop_token, &tx));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut packetizer = MjpegPacketizer::new(9).with_max_payload(4);
        for packet in packetizer.packetize_at(b"0123456789", 1).unwrap() {
            sender.send_to(&packet, ("127.0.0.1", port)).unwrap();
        }
        sender.send_to(&[0x80, 0x1A], ("127.0.0.1", port)).unwrap();

        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.number, 1);
        assert_eq!(frame.data, b"0123456789");

        token.cancel(StopReason::Pause);
        let channel = handle.join().unwrap().expect("pause hands the channel back");
        assert_eq!(channel.reassembler().pending_groups(), 0);

        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 3);
        assert_eq!(snap.fragments_received, 3);
        assert_eq!(snap.frames_received, 1);
    }

    #[test]
    fn unstamped_packets_count_without_latency() {
        use crate::media::rtp::{MJPEG_PAYLOAD_TYPE, RtpHeader};

        let stats = Arc::new(StreamStats::new());
        let channel = DataChannel::bind(0, Duration::from_millis(50), stats.clone()).unwrap();
        let port = channel.local_addr().unwrap().port();
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel();
        let loop_token = token.clone();
        let handle = thread::spawn(move || channel.receive_loop(&loop_token, &tx));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for seq in 1..=3u16 {
            let header = RtpHeader::new(MJPEG_PAYLOAD_TYPE, seq, 0, 5);
            let packet = RtpPacket::new(header, None, vec![0xAA; 8]).encode().unwrap();
            sender.send_to(&packet, ("127.0.0.1", port)).unwrap();
        }
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        token.cancel(StopReason::Teardown);
        assert!(handle.join().unwrap().is_none());

        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 3);
        assert_eq!(snap.avg_latency_ms, 0.0);
        assert_eq!(snap.avg_jitter_ms, 0.0);
    }

    #[test]
    fn media_sender_stamps_and_numbers_frames() {
        let stats = Arc::new(StreamStats::new());
        let channel = DataChannel::bind(0, Duration::from_millis(50), stats.clone()).unwrap();
        let dest = SocketAddr::from(([127, 0, 0, 1], channel.local_addr().unwrap().port()));
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel();
        let loop_token = token.clone();
        let handle = thread::spawn(move || channel.receive_loop(&loop_token, &tx));

        let packetizer = MjpegPacketizer::new(3).with_max_payload(16);
        let mut sender = MediaSender::bind(dest, Box::new(packetizer)).unwrap();
        assert_eq!(sender.packetizer().codec_name(), "JPEG");
        assert_eq!(sender.send_frame(&[7u8; 40]).unwrap(), 3);
        assert_eq!(sender.send_frame(&[9u8; 4]).unwrap(), 1);
        assert_eq!(sender.packetizer().next_sequence(), 3);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((first.number, first.data.len()), (1, 40));
        assert_eq!((second.number, second.data.len()), (2, 4));

        token.cancel(StopReason::Teardown);
        handle.join().unwrap();

        // Wall-clock stamps on both ends: latency is a few ms, not garbage.
        let latency = stats.snapshot().avg_latency_ms;
        assert!(latency.abs() < 1_000.0, "latency {latency}");
    }

    #[test]
    fn teardown_closes_socket() {
        let stats = Arc::new(StreamStats::new());
        let channel = DataChannel::bind(0, Duration::from_millis(20), stats).unwrap();
        let port = channel.local_addr().unwrap().port();
        let token = CancellationToken::new();
        token.cancel(StopReason::Teardown);
        let (tx, _rx) = mpsc::channel();
        assert!(channel.receive_loop(&token, &tx).is_none());
        // The port is free again.
        assert!(UdpSocket::bind(("0.0.0.0", port)).is_ok());
    }
}
