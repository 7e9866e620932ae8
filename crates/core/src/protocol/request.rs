use std::fmt;

use crate::error::{ParseErrorKind, StreamError};

/// Control methods understood by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Setup,
    Play,
    Pause,
    Teardown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "SETUP" => Some(Method::Setup),
            "PLAY" => Some(Method::Play),
            "PAUSE" => Some(Method::Pause),
            "TEARDOWN" => Some(Method::Teardown),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control-channel request.
///
/// Serializes to:
///
/// ```text
/// SETUP movie.Mjpeg RTSP/1.0\r\n
/// CSeq: 1\r\n
/// Transport: RTP/UDP; client_port= 25000\r\n
/// \r\n
/// ```
///
/// `Transport` is only sent with SETUP and `Session` only with PLAY, PAUSE
/// and TEARDOWN; [`crate::session::Session`] decides which to attach.
/// Header lookup is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Method,
    /// Requested resource, e.g. a file name on the server.
    pub uri: String,
    /// Headers as ordered (name, value) pairs; `CSeq` is always first.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: Method, uri: &str, cseq: u32) -> Self {
        RtspRequest {
            method,
            uri: uri.to_string(),
            headers: vec![("CSeq".to_string(), cseq.to_string())],
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Attach the SETUP transport parameters.
    pub fn with_client_port(self, port: u16) -> Self {
        self.add_header("Transport", &format!("RTP/UDP; client_port= {}", port))
    }

    pub fn with_session(self, session_id: u64) -> Self {
        self.add_header("Session", &session_id.to_string())
    }

    /// Parse a request from its text form (used by servers and test peers).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let invalid = |kind| StreamError::UnparsableRequest { kind };
        let mut lines = raw.lines().skip_while(|l| l.trim().is_empty());

        let request_line = lines
            .next()
            .ok_or(invalid(ParseErrorKind::EmptyMessage))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(invalid(ParseErrorKind::InvalidRequestLine));
        }

        let method = Method::from_token(parts[0]).ok_or(invalid(ParseErrorKind::UnknownMethod))?;
        if parts[2] != "RTSP/1.0" {
            tracing::warn!(version = parts[2], "peer sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(invalid(ParseErrorKind::InvalidHeader))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspRequest {
            method,
            uri: parts[1].to_string(),
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq")?.parse().ok()
    }

    pub fn session(&self) -> Option<u64> {
        self.get_header("Session")?.parse().ok()
    }

    /// `client_port` from the `Transport` header.
    pub fn client_port(&self) -> Option<u16> {
        self.get_header("Transport")?
            .split(';')
            .find_map(|part| part.trim().strip_prefix("client_port="))
            .and_then(|port| port.trim().split('-').next())
            .and_then(|port| port.trim().parse().ok())
    }

    /// Serialize to the text wire format.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\n", self.method, self.uri);
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        request
    }
}
