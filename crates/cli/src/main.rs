use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use mjpeg_rtsp::{Client, ClientConfig, FrameDemuxer, SessionState, StreamError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mjpeg-rtsp-client",
    about = "MJPEG-over-RTP streaming client"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// SETUP and PLAY a stream, print stats, then TEARDOWN
    Play {
        /// Server control address (host:port)
        #[arg(long, short, default_value = "127.0.0.1:8554")]
        server: SocketAddr,
        /// Resource to request
        #[arg(long, default_value = "movie.Mjpeg")]
        resource: String,
        /// Local UDP port for media (0 = any)
        #[arg(long, default_value_t = 25000)]
        rtp_port: u16,
        /// Seconds to play before tearing down
        #[arg(long, short, default_value_t = 10)]
        duration: u64,
        /// Seconds to wait for each reply
        #[arg(long, default_value_t = 5)]
        reply_timeout: u64,
    },
    /// Demux a recorded stream and list its frames
    Inspect {
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = match Args::parse().command {
        Command::Play {
            server,
            resource,
            rtp_port,
            duration,
            reply_timeout,
        } => {
            let config = ClientConfig {
                server,
                resource,
                rtp_port,
                ..ClientConfig::default()
            };
            play(
                config,
                Duration::from_secs(duration),
                Duration::from_secs(reply_timeout),
            )
        }
        Command::Inspect { file } => inspect(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn play(config: ClientConfig, duration: Duration, reply_timeout: Duration) -> Result<(), StreamError> {
    let (mut client, frames) = Client::connect(config)?;

    client.setup()?;
    if !client.wait_for_state(SessionState::Ready, reply_timeout) {
        eprintln!("no SETUP reply within {:?}", reply_timeout);
        return Ok(());
    }
    println!("session {}", client.session_id());

    client.play()?;
    if !client.wait_for_state(SessionState::Playing, reply_timeout) {
        eprintln!("no PLAY reply within {:?}", reply_timeout);
        client.teardown()?;
        return Ok(());
    }

    let stats = client.stats();
    let start = Instant::now();
    let mut last_report = start;
    while start.elapsed() < duration {
        if let Ok(frame) = frames.recv_timeout(Duration::from_millis(100)) {
            tracing::debug!(frame = frame.number, bytes = frame.data.len(), "frame");
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            println!("{}", stats.snapshot());
            last_report = Instant::now();
        }
    }

    client.pause()?;
    client.wait_for_state(SessionState::Ready, reply_timeout);
    client.teardown()?;
    if !client.wait_for_state(SessionState::Init, reply_timeout) {
        eprintln!("no TEARDOWN reply within {:?}", reply_timeout);
    }

    let snap = stats.snapshot();
    println!(
        "done: {} frames, {} lost, {} packets ({} bytes)",
        snap.frames_received, snap.frames_lost, snap.packets_received, snap.bytes_received
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<(), StreamError> {
    let mut demuxer = FrameDemuxer::<File>::open(path)?;
    println!("{}: {:?}", path.display(), demuxer.format());

    let mut total_bytes = 0usize;
    let mut damaged = 0usize;
    loop {
        match demuxer.next_frame() {
            Ok(Some(frame)) => {
                total_bytes += frame.len();
                println!("frame {:>6}  {:>8} bytes", demuxer.frame_number(), frame.len());
            }
            Ok(None) => break,
            Err(StreamError::Io(e)) => return Err(StreamError::Io(e)),
            Err(e) => {
                damaged += 1;
                eprintln!("skipped damaged frame: {}", e);
            }
        }
    }

    println!(
        "{} frames, {} bytes, {} damaged",
        demuxer.frame_number(),
        total_bytes,
        damaged
    );
    Ok(())
}
