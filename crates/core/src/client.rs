use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::media::reassembly::Frame;
use crate::media::rtp::FragmentDetection;
use crate::protocol::Method;
use crate::session::{Session, SessionEvent, SessionState};
use crate::stats::{DEFAULT_SAMPLE_WINDOW, StreamStats};
use crate::transport::tcp::DEFAULT_REPLY_BUFFER;
use crate::transport::udp::DEFAULT_RECV_TIMEOUT;
use crate::transport::{CancellationToken, ControlChannel, DataChannel, ReplyReader, StopReason};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Control-channel address of the server.
    pub server: SocketAddr,
    /// Resource named in every request line.
    pub resource: String,
    /// Local UDP port for the data channel. 0 picks an ephemeral port and
    /// advertises whatever was bound.
    pub rtp_port: u16,
    /// Data-channel read timeout; also the cancellation latency.
    pub recv_timeout: Duration,
    /// Bytes read per control reply.
    pub reply_buffer: usize,
    /// Latency/jitter samples kept by the stats engine.
    pub sample_window: usize,
    pub fragment_detection: FragmentDetection,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([127, 0, 0, 1], 8554)),
            resource: "movie.Mjpeg".to_string(),
            rtp_port: 25000,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            reply_buffer: DEFAULT_REPLY_BUFFER,
            sample_window: DEFAULT_SAMPLE_WINDOW,
            fragment_detection: FragmentDetection::default(),
        }
    }
}

/// Data-plane resources, driven by session events.
#[derive(Debug, Default)]
struct DataPlane {
    /// Bound socket not currently being read.
    idle: Option<DataChannel>,
    receiver: Option<(CancellationToken, JoinHandle<Option<DataChannel>>)>,
}

impl DataPlane {
    fn start(&mut self, frames: &Sender<Frame>) {
        if self.receiver.is_some() {
            tracing::debug!("receive loop already running");
            return;
        }
        let Some(channel) = self.idle.take() else {
            tracing::error!("PLAY acknowledged but no data channel is bound");
            return;
        };
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let frames = frames.clone();
        let handle = thread::spawn(move || channel.receive_loop(&loop_token, &frames));
        self.receiver = Some((token, handle));
    }
}

/// Signal the receive loop and wait for it to exit.
///
/// The lock is held only to take the handle out and to put the returned
/// channel back, not across the join.
fn stop_receiving(data: &Mutex<DataPlane>, reason: StopReason) {
    let receiver = data.lock().receiver.take();
    let returned = match receiver {
        Some((token, handle)) => {
            token.cancel(reason);
            handle.join().unwrap_or_else(|_| {
                tracing::error!("receive thread panicked");
                None
            })
        }
        None => None,
    };

    let mut plane = data.lock();
    if returned.is_some() {
        plane.idle = returned;
    }
    if reason == StopReason::Teardown && plane.idle.take().is_some() {
        tracing::info!("data channel closed");
    }
}

/// Streaming client: one control session plus its data channel.
///
/// Requests are sent from the caller's thread. Replies are handled on a
/// background thread, which applies them to the [`Session`] and starts or
/// stops the receive loop. Complete frames arrive on the [`Receiver`]
/// returned by [`Client::connect`].
///
/// ```no_run
/// use std::time::Duration;
/// use mjpeg_rtsp::{Client, ClientConfig, SessionState};
///
/// let (mut client, frames) = Client::connect(ClientConfig::default())?;
/// client.setup()?;
/// client.wait_for_state(SessionState::Ready, Duration::from_secs(2));
/// client.play()?;
/// while let Ok(frame) = frames.recv_timeout(Duration::from_secs(1)) {
///     println!("frame {} ({} bytes)", frame.number, frame.data.len());
/// }
/// client.teardown()?;
/// # Ok::<(), mjpeg_rtsp::StreamError>(())
/// ```
pub struct Client {
    config: ClientConfig,
    session: Arc<Session>,
    control: ControlChannel,
    data: Arc<Mutex<DataPlane>>,
    stats: Arc<StreamStats>,
    reply_thread: Option<JoinHandle<()>>,
}

impl Client {
    /// Connect the control channel and start the reply thread.
    pub fn connect(config: ClientConfig) -> Result<(Self, Receiver<Frame>)> {
        let control = ControlChannel::connect(config.server)?;
        let reader = control.reply_reader(config.reply_buffer)?;

        let session = Arc::new(Session::new(&config.resource));
        let data = Arc::new(Mutex::new(DataPlane::default()));
        let stats = Arc::new(StreamStats::with_sample_window(config.sample_window));
        let (frames_tx, frames_rx) = mpsc::channel();

        let reply_thread = {
            let session = session.clone();
            let data = data.clone();
            thread::spawn(move || reply_loop(reader, &session, &data, &frames_tx))
        };

        let client = Self {
            config,
            session,
            control,
            data,
            stats,
            reply_thread: Some(reply_thread),
        };
        Ok((client, frames_rx))
    }

    /// Bind the data channel and send SETUP.
    ///
    /// A bind failure is returned here. Returns `Ok(false)` if SETUP is not
    /// valid in the current state.
    pub fn setup(&mut self) -> Result<bool> {
        if !self.session.permits(Method::Setup) {
            tracing::debug!(state = ?self.session.state(), "SETUP ignored");
            return Ok(false);
        }

        let idle = self.data.lock().idle.take();
        let channel = match idle {
            Some(channel) => channel,
            None => DataChannel::bind(
                self.config.rtp_port,
                self.config.recv_timeout,
                self.stats.clone(),
            )?
            .with_detection(self.config.fragment_detection),
        };
        let port = channel.local_addr()?.port();
        self.data.lock().idle = Some(channel);

        self.send(Method::Setup, port)
    }

    pub fn play(&mut self) -> Result<bool> {
        self.send(Method::Play, 0)
    }

    pub fn pause(&mut self) -> Result<bool> {
        self.send(Method::Pause, 0)
    }

    pub fn teardown(&mut self) -> Result<bool> {
        self.send(Method::Teardown, 0)
    }

    fn send(&mut self, method: Method, client_port: u16) -> Result<bool> {
        match self.session.prepare(method, client_port) {
            Some(request) => {
                self.control.send(&request)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session_id(&self) -> u64 {
        self.session.session_id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// See [`Session::wait_for_state`].
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        self.session.wait_for_state(state, timeout)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.control.shutdown();
        if let Some(handle) = self.reply_thread.take() {
            let _ = handle.join();
        }
        stop_receiving(&self.data, StopReason::Teardown);
    }
}

/// Read replies until the control channel closes, applying each to the
/// session and acting on the resulting event.
fn reply_loop(
    mut reader: ReplyReader,
    session: &Session,
    data: &Mutex<DataPlane>,
    frames: &Sender<Frame>,
) {
    loop {
        let raw = match reader.read_reply() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::info!("control channel closed by peer");
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "control channel read ended");
                break;
            }
        };
        tracing::trace!(reply = raw.trim(), "reply received");

        match session.handle_raw_reply(&raw) {
            Some(SessionEvent::OpenDataChannel) => {
                tracing::info!(session_id = session.session_id(), "data channel open");
            }
            Some(SessionEvent::StartReceiving) => data.lock().start(frames),
            Some(SessionEvent::StopReceiving) => stop_receiving(data, StopReason::Pause),
            Some(SessionEvent::CloseChannels) => {
                stop_receiving(data, StopReason::Teardown);
                reader.shutdown();
                tracing::info!("session torn down, channels closed");
                break;
            }
            None => {}
        }
    }
}
