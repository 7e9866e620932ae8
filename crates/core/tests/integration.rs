//! Integration test: SETUP → PLAY → frames → PAUSE → TEARDOWN against a
//! scripted loopback server.
//!
//! The server thread answers each request on a fixed port and, after PLAY,
//! sends media datagrams to the port named in the SETUP `Transport` header.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mjpeg_rtsp::media::rtp::{FragmentHeader, MJPEG_PAYLOAD_TYPE, RtpHeader};
use mjpeg_rtsp::protocol::{Method, RtspReply, RtspRequest};
use mjpeg_rtsp::{Client, ClientConfig, RtpPacket, SessionState, StreamError};

const SESSION_ID: u64 = 777;
const WAIT: Duration = Duration::from_secs(2);

fn datagram(seq: u16, fragment: Option<(u16, u8, u8)>, payload: &[u8]) -> Vec<u8> {
    let header = RtpHeader::new(MJPEG_PAYLOAD_TYPE, seq, 0, 0xC0FFEE);
    let fragment =
        fragment.map(|(id, total, index)| FragmentHeader::new(id, total, index).unwrap());
    RtpPacket::new(header, fragment, payload.to_vec())
        .encode()
        .unwrap()
}

/// Accept one connection and answer requests with `respond` until it
/// closes. Returns every request seen.
fn spawn_server<F>(bind: &str, mut respond: F) -> (SocketAddr, JoinHandle<Vec<RtspRequest>>)
where
    F: FnMut(&RtspRequest, Option<SocketAddr>) -> String + Send + 'static,
{
    let listener = TcpListener::bind(bind).expect("bind control listener");
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, peer) = listener.accept().expect("accept");
        let mut media_dest = None;
        let mut seen = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let request = RtspRequest::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();
            if let Some(port) = request.client_port() {
                media_dest = Some(SocketAddr::new(peer.ip(), port));
            }
            let reply = respond(&request, media_dest);
            if stream.write_all(reply.as_bytes()).is_err() {
                break;
            }
            seen.push(request);
        }
        seen
    });
    (addr, handle)
}

fn config(server: SocketAddr) -> ClientConfig {
    ClientConfig {
        server,
        rtp_port: 0,
        recv_timeout: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

#[test]
fn full_session_setup_play_pause_teardown() {
    let (addr, server) = spawn_server("127.0.0.1:18554", |request, media_dest| {
        let cseq = request.cseq().unwrap();
        if request.method == Method::Play {
            let dest = media_dest.unwrap();
            let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
            udp.send_to(&datagram(10, None, b"P10"), dest).unwrap();
            // Late: older than frame 10.
            udp.send_to(&datagram(9, None, b"P9"), dest).unwrap();
            // Frame 11 in three fragments, out of order.
            udp.send_to(&datagram(11, Some((0, 3, 2)), b"ccc"), dest).unwrap();
            udp.send_to(&datagram(11, Some((0, 3, 0)), b"aaa"), dest).unwrap();
            udp.send_to(&datagram(11, Some((0, 3, 1)), b"bbb"), dest).unwrap();
        }
        // Positional form, no trailing blank line.
        format!("RTSP/1.0 200 OK\nCSeq: {}\nSession: {}", cseq, SESSION_ID)
    });

    let (mut client, frames) = Client::connect(config(addr)).expect("connect");
    assert_eq!(client.state(), SessionState::Init);

    // PLAY before SETUP is a silent no-op.
    assert!(!client.play().unwrap());

    assert!(client.setup().unwrap());
    assert!(client.wait_for_state(SessionState::Ready, WAIT), "SETUP ack");
    assert_eq!(client.session_id(), SESSION_ID);

    assert!(client.play().unwrap());
    assert!(client.wait_for_state(SessionState::Playing, WAIT), "PLAY ack");

    let first = frames.recv_timeout(WAIT).expect("frame 10");
    assert_eq!((first.number, first.data.as_slice()), (10, &b"P10"[..]));
    let second = frames.recv_timeout(WAIT).expect("frame 11");
    assert_eq!((second.number, second.data.as_slice()), (11, &b"aaabbbccc"[..]));

    let snap = client.stats().snapshot();
    assert_eq!(snap.frames_received, 2);
    assert_eq!(snap.frames_lost, 1);
    assert_eq!(snap.packets_received, 5);
    assert_eq!(snap.fragments_received, 3);

    assert!(client.pause().unwrap());
    assert!(client.wait_for_state(SessionState::Ready, WAIT), "PAUSE ack");

    assert!(client.teardown().unwrap());
    assert!(client.wait_for_state(SessionState::Init, WAIT), "TEARDOWN ack");
    assert!(client.session().teardown_acked());
    assert!(!client.setup().unwrap());

    drop(client);
    let seen = server.join().unwrap();
    let methods: Vec<Method> = seen.iter().map(|r| r.method).collect();
    assert_eq!(
        methods,
        [Method::Setup, Method::Play, Method::Pause, Method::Teardown]
    );
    let cseqs: Vec<u32> = seen.iter().filter_map(RtspRequest::cseq).collect();
    assert_eq!(cseqs, [1, 2, 3, 4]);
    assert_eq!(seen[0].session(), None);
    assert!(seen[1..].iter().all(|r| r.session() == Some(SESSION_ID)));
}

#[test]
fn malformed_reply_leaves_session_parked() {
    let (addr, server) = spawn_server("127.0.0.1:18555", |request, _| {
        match request.method {
            Method::Setup => "RTSP/1.0 200 OK\nCSeq: not-a-number\nSession: 1".to_string(),
            _ => RtspReply::ok(request.cseq().unwrap()).serialize(),
        }
    });

    let (mut client, _frames) = Client::connect(config(addr)).expect("connect");
    assert!(client.setup().unwrap());
    assert!(!client.wait_for_state(SessionState::Ready, Duration::from_millis(300)));
    assert_eq!(client.state(), SessionState::Init);
    assert_eq!(client.session_id(), 0);

    drop(client);
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn rejected_setup_keeps_init() {
    let (addr, _server) = spawn_server("127.0.0.1:18556", |request, _| {
        RtspReply::new(404, "Not Found", request.cseq().unwrap()).serialize()
    });

    let (mut client, _frames) = Client::connect(config(addr)).expect("connect");
    assert!(client.setup().unwrap());
    assert!(!client.wait_for_state(SessionState::Ready, Duration::from_millis(300)));
    assert_eq!(client.state(), SessionState::Init);
}

#[test]
fn connect_failure_is_surfaced() {
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let result = Client::connect(config(addr));
    assert!(matches!(result, Err(StreamError::Connect { .. })));
}

#[test]
fn bind_failure_is_surfaced_by_setup() {
    let taken = UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let (addr, _server) = spawn_server("127.0.0.1:18557", |request, _| {
        RtspReply::ok(request.cseq().unwrap()).with_session(1).serialize()
    });
    let (mut client, _frames) = Client::connect(ClientConfig {
        rtp_port: port,
        ..config(addr)
    })
    .expect("connect");

    assert!(matches!(client.setup(), Err(StreamError::Bind { .. })));
    assert_eq!(client.state(), SessionState::Init);
    // Nothing was sent, so CSeq is unused.
    assert_eq!(client.session().cseq(), 0);
    drop(taken);
}

#[test]
fn recorded_stream_flows_through_media_sender() {
    use std::io::Cursor;

    use mjpeg_rtsp::transport::MediaSender;
    use mjpeg_rtsp::{FrameDemuxer, MjpegPacketizer, StreamFormat};

    let (tx, rx) = mpsc::channel::<SocketAddr>();
    let (addr, _server) = spawn_server("127.0.0.1:18558", move |request, media_dest| {
        if request.method == Method::Play {
            tx.send(media_dest.unwrap()).unwrap();
        }
        format!(
            "RTSP/1.0 200 OK\r\nCSeq: {}\r\nSession: 42\r\n\r\n",
            request.cseq().unwrap()
        )
    });

    let (mut client, frames) = Client::connect(config(addr)).expect("connect");
    client.setup().unwrap();
    assert!(client.wait_for_state(SessionState::Ready, WAIT));
    client.play().unwrap();
    assert!(client.wait_for_state(SessionState::Playing, WAIT));

    // Length-prefixed recording: one large frame, one small one.
    let big: Vec<u8> = (0..4500u32).map(|i| (i % 251) as u8).collect();
    let small = b"tiny".to_vec();
    let mut recording = Vec::new();
    for frame in [&big, &small] {
        recording.extend_from_slice(format!("{:05}", frame.len()).as_bytes());
        recording.extend_from_slice(frame);
    }
    let mut demuxer = FrameDemuxer::new(Cursor::new(recording)).unwrap();
    assert_eq!(demuxer.format(), StreamFormat::LengthPrefixed);

    let dest = rx.recv_timeout(WAIT).unwrap();
    let packetizer = MjpegPacketizer::with_random_ssrc().with_max_payload(1000);
    let mut sender = MediaSender::bind(dest, Box::new(packetizer)).unwrap();
    let mut packets_sent = 0;
    while let Some(frame) = demuxer.next_frame().unwrap() {
        packets_sent += sender.send_frame(&frame).unwrap();
    }
    assert_eq!(packets_sent, 6);

    let first = frames.recv_timeout(WAIT).expect("reassembled frame");
    assert_eq!((first.number, &first.data), (1, &big));
    let second = frames.recv_timeout(WAIT).expect("single-packet frame");
    assert_eq!((second.number, &second.data), (2, &small));

    let snap = client.stats().snapshot();
    assert_eq!(snap.fragments_received, 5);
    assert_eq!(snap.packets_received, 6);
    assert!(snap.avg_latency_ms.abs() < 1_000.0, "latency {}", snap.avg_latency_ms);
}
