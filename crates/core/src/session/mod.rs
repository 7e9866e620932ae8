//! Client-side control session (RFC 2326 §A.1, reduced).
//!
//! One [`Session`] per client. It numbers outgoing requests, correlates
//! replies by `CSeq`, adopts the server-assigned session id, and moves
//! between states:
//!
//! ```text
//! Init ──SETUP ok──▶ Ready ──PLAY ok──▶ Playing
//!                      ▲                  │
//!                      └────PAUSE ok──────┘
//! Ready | Playing ──TEARDOWN ok──▶ Init (session ended)
//! ```
//!
//! Requests whose precondition does not hold are silent no-ops. Replies
//! never retry: a discarded or missing reply leaves the session where it
//! was, so callers that need liveness should use
//! [`Session::wait_for_state`] with a timeout.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{ParseErrorKind, Result, StreamError};
use crate::protocol::{Method, RtspReply, RtspRequest};

/// Control-plane state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Ready,
    Playing,
}

/// What the data plane must do after an acknowledged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// SETUP acknowledged: the receive socket may be used.
    OpenDataChannel,
    /// PLAY acknowledged: start the receive loop.
    StartReceiving,
    /// PAUSE acknowledged: stop the receive loop, keep the socket.
    StopReceiving,
    /// TEARDOWN acknowledged: close both channels.
    CloseChannels,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    cseq: u32,
    /// 0 until the server assigns one.
    session_id: u64,
    last_request: Option<Method>,
    awaiting_reply: bool,
    teardown_acked: bool,
}

/// Request/reply state machine shared by the control and data contexts.
///
/// Every accessor takes the lock for a single point operation.
#[derive(Debug)]
pub struct Session {
    resource: String,
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Session {
    pub fn new(resource: &str) -> Self {
        Session {
            resource: resource.to_string(),
            inner: Mutex::new(Inner {
                state: SessionState::Init,
                cseq: 0,
                session_id: 0,
                last_request: None,
                awaiting_reply: false,
                teardown_acked: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Server-assigned id, 0 while unassigned.
    pub fn session_id(&self) -> u64 {
        self.inner.lock().session_id
    }

    /// CSeq of the most recent request.
    pub fn cseq(&self) -> u32 {
        self.inner.lock().cseq
    }

    pub fn last_request(&self) -> Option<Method> {
        self.inner.lock().last_request
    }

    pub fn teardown_acked(&self) -> bool {
        self.inner.lock().teardown_acked
    }

    /// Whether `method` may be sent from the current state.
    pub fn permits(&self, method: Method) -> bool {
        let inner = self.inner.lock();
        Self::precondition_holds(&inner, method)
    }

    fn precondition_holds(inner: &Inner, method: Method) -> bool {
        if inner.teardown_acked {
            return false;
        }
        match method {
            Method::Setup => inner.state == SessionState::Init,
            Method::Play => inner.state == SessionState::Ready,
            Method::Pause => inner.state == SessionState::Playing,
            Method::Teardown => inner.state != SessionState::Init,
        }
    }

    /// Build the next request for `method`, or `None` if the current state
    /// does not allow it.
    ///
    /// `client_port` is only used by SETUP.
    pub fn prepare(&self, method: Method, client_port: u16) -> Option<RtspRequest> {
        let mut inner = self.inner.lock();
        if !Self::precondition_holds(&inner, method) {
            tracing::debug!(%method, state = ?inner.state, "request not valid in current state, ignored");
            return None;
        }

        inner.cseq += 1;
        inner.last_request = Some(method);
        inner.awaiting_reply = true;

        let request = RtspRequest::new(method, &self.resource, inner.cseq);
        let request = match method {
            Method::Setup => request.with_client_port(client_port),
            _ => request.with_session(inner.session_id),
        };
        tracing::debug!(%method, cseq = inner.cseq, "request prepared");
        Some(request)
    }

    /// Parse raw reply text and apply it. Unparsable or rejected replies are
    /// logged and dropped.
    pub fn handle_raw_reply(&self, raw: &str) -> Option<SessionEvent> {
        let applied = RtspReply::parse(raw).and_then(|reply| self.handle_reply(&reply));
        match applied {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, reply = raw.trim(), "discarding control reply");
                None
            }
        }
    }

    /// Apply a parsed reply.
    ///
    /// Only a reply whose CSeq matches the outstanding request, and whose
    /// session id matches ours (or ours is still unset), can change state.
    /// Anything else is ignored and returns `Ok(None)`.
    pub fn handle_reply(&self, reply: &RtspReply) -> Result<Option<SessionEvent>> {
        let mut inner = self.inner.lock();

        let Some(method) = inner.last_request.filter(|_| inner.awaiting_reply) else {
            tracing::debug!(cseq = reply.cseq, "no request outstanding, reply ignored");
            return Ok(None);
        };
        if reply.cseq != inner.cseq {
            tracing::debug!(got = reply.cseq, expected = inner.cseq, "CSeq mismatch, reply ignored");
            return Ok(None);
        }
        if let Some(id) = reply.session
            && inner.session_id != 0
            && id != inner.session_id
        {
            tracing::warn!(got = id, ours = inner.session_id, "session id mismatch, reply ignored");
            return Ok(None);
        }

        if !reply.is_success() {
            inner.awaiting_reply = false;
            tracing::warn!(
                %method,
                status = reply.status_code,
                reason = %reply.status_text,
                "request rejected"
            );
            return Ok(None);
        }

        if inner.session_id == 0 {
            match reply.session {
                Some(id) => {
                    inner.session_id = id;
                    tracing::info!(session_id = id, "session established");
                }
                None if method == Method::Setup => {
                    return Err(StreamError::UnparsableReply {
                        kind: ParseErrorKind::MissingSession,
                    });
                }
                None => {}
            }
        }

        inner.awaiting_reply = false;
        let (next, event) = match method {
            Method::Setup => (SessionState::Ready, SessionEvent::OpenDataChannel),
            Method::Play => (SessionState::Playing, SessionEvent::StartReceiving),
            Method::Pause => (SessionState::Ready, SessionEvent::StopReceiving),
            Method::Teardown => {
                inner.teardown_acked = true;
                (SessionState::Init, SessionEvent::CloseChannels)
            }
        };

        tracing::info!(%method, from = ?inner.state, to = ?next, "state transition");
        inner.state = next;
        self.changed.notify_all();
        Ok(Some(event))
    }

    /// Block until the session reaches `state` or `timeout` elapses.
    /// Returns whether the state was reached.
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.state != state {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.state == state;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(raw: &str) -> RtspReply {
        RtspReply::parse(raw).unwrap()
    }

    #[test]
    fn starts_in_init() {
        let session = Session::new("movie.Mjpeg");
        assert_eq!(session.state(), SessionState::Init);
        assert_eq!(session.session_id(), 0);
        assert_eq!(session.last_request(), None);
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = Session::new("a");
        let b = Session::new("b");
        a.prepare(Method::Setup, 1).unwrap();
        a.handle_reply(&RtspReply::ok(1).with_session(5)).unwrap();
        assert_eq!(a.state(), SessionState::Ready);
        assert_eq!(b.state(), SessionState::Init);
    }

    #[test]
    fn setup_request_carries_transport() {
        let session = Session::new("movie.Mjpeg");
        let req = session.prepare(Method::Setup, 25000).unwrap();
        assert_eq!(req.cseq(), Some(1));
        assert_eq!(req.client_port(), Some(25000));
        assert_eq!(req.session(), None);
    }

    #[test]
    fn requests_outside_precondition_are_noops() {
        let session = Session::new("movie.Mjpeg");
        assert!(session.prepare(Method::Play, 0).is_none());
        assert!(session.prepare(Method::Pause, 0).is_none());
        assert!(session.prepare(Method::Teardown, 0).is_none());
        assert_eq!(session.cseq(), 0);
    }

    #[test]
    fn setup_success_adopts_session_id() {
        let session = Session::new("movie.Mjpeg");
        session.prepare(Method::Setup, 25000).unwrap();
        let event = session
            .handle_reply(&reply("RTSP/1.0 200 OK\nCSeq: 1\nSession: 777"))
            .unwrap();
        assert_eq!(event, Some(SessionEvent::OpenDataChannel));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.session_id(), 777);

        // A repeated reply with another id changes nothing.
        let again = session
            .handle_reply(&reply("RTSP/1.0 200 OK\nCSeq: 1\nSession: 888"))
            .unwrap();
        assert_eq!(again, None);
        assert_eq!(session.session_id(), 777);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn mismatched_session_is_ignored() {
        let session = Session::new("x");
        session.prepare(Method::Setup, 1).unwrap();
        session.handle_reply(&RtspReply::ok(1).with_session(777)).unwrap();
        session.prepare(Method::Play, 1).unwrap();

        let event = session.handle_reply(&RtspReply::ok(2).with_session(888)).unwrap();
        assert_eq!(event, None);
        assert_eq!(session.state(), SessionState::Ready);

        // The request is still outstanding; the correct reply applies.
        let event = session.handle_reply(&RtspReply::ok(2).with_session(777)).unwrap();
        assert_eq!(event, Some(SessionEvent::StartReceiving));
    }

    #[test]
    fn stale_cseq_is_ignored() {
        let session = Session::new("x");
        session.prepare(Method::Setup, 1).unwrap();
        assert_eq!(session.handle_reply(&RtspReply::ok(7).with_session(1)).unwrap(), None);
        assert_eq!(session.state(), SessionState::Init);
    }

    #[test]
    fn setup_without_session_is_rejected() {
        let session = Session::new("x");
        session.prepare(Method::Setup, 1).unwrap();
        assert!(matches!(
            session.handle_reply(&RtspReply::ok(1)),
            Err(StreamError::UnparsableReply {
                kind: ParseErrorKind::MissingSession
            })
        ));
        assert_eq!(session.state(), SessionState::Init);
    }

    #[test]
    fn non_200_leaves_state_unchanged() {
        let session = Session::new("x");
        session.prepare(Method::Setup, 1).unwrap();
        let rejected = RtspReply::new(404, "Not Found", 1);
        assert_eq!(session.handle_reply(&rejected).unwrap(), None);
        assert_eq!(session.state(), SessionState::Init);
        // Still allowed to try again.
        assert!(session.prepare(Method::Setup, 1).is_some());
    }

    #[test]
    fn malformed_raw_reply_is_discarded() {
        let session = Session::new("x");
        session.prepare(Method::Setup, 1).unwrap();
        assert_eq!(session.handle_raw_reply("garbage"), None);
        assert_eq!(session.handle_raw_reply("RTSP/1.0 200 OK\nCSeq: one"), None);
        assert_eq!(session.state(), SessionState::Init);
    }

    #[test]
    fn full_lifecycle() {
        let session = Session::new("movie.Mjpeg");

        session.prepare(Method::Setup, 25000).unwrap();
        session.handle_raw_reply("RTSP/1.0 200 OK\nCSeq: 1\nSession: 777");

        let play = session.prepare(Method::Play, 0).unwrap();
        assert_eq!((play.cseq(), play.session()), (Some(2), Some(777)));
        assert_eq!(
            session.handle_raw_reply("RTSP/1.0 200 OK\nCSeq: 2\nSession: 777"),
            Some(SessionEvent::StartReceiving)
        );
        assert_eq!(session.state(), SessionState::Playing);

        assert!(session.prepare(Method::Play, 0).is_none());
        session.prepare(Method::Pause, 0).unwrap();
        assert_eq!(
            session.handle_raw_reply("RTSP/1.0 200 OK\nCSeq: 3\nSession: 777"),
            Some(SessionEvent::StopReceiving)
        );
        assert_eq!(session.state(), SessionState::Ready);

        session.prepare(Method::Teardown, 0).unwrap();
        assert_eq!(
            session.handle_raw_reply("RTSP/1.0 200 OK\nCSeq: 4\nSession: 777"),
            Some(SessionEvent::CloseChannels)
        );
        assert_eq!(session.state(), SessionState::Init);
        assert!(session.teardown_acked());
        assert!(session.prepare(Method::Setup, 25000).is_none());
    }

    #[test]
    fn wait_for_state_times_out() {
        let session = Session::new("x");
        assert!(session.wait_for_state(SessionState::Init, Duration::ZERO));
        assert!(!session.wait_for_state(SessionState::Ready, Duration::from_millis(20)));
    }
}
