use crate::error::{ParseErrorKind, StreamError};

/// A control-channel reply.
///
/// ```text
/// RTSP/1.0 200 OK
/// CSeq: 1
/// Session: 777
/// ```
///
/// Fields are located by header name first, so reordered or extra headers
/// are tolerated. When a header is missing, the positional layout above
/// is used instead for lines without a header name: token 1 of line 1 is
/// the CSeq, token 1 of line 2 the session id. A trailing blank line is
/// not required.
///
/// A session id of 0 is treated as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RtspReply {
    pub status_code: u16,
    pub status_text: String,
    pub cseq: u32,
    pub session: Option<u64>,
    /// Every `Name: value` line after the status line, in order.
    pub headers: Vec<(String, String)>,
}

/// Token 1 of a whitespace-split line.
fn second_token(line: &str) -> Option<&str> {
    line.split_whitespace().nth(1)
}

/// Token 1 of line `index`, unless that line is some other named header.
fn positional<'a>(lines: &[&'a str], index: usize) -> Option<&'a str> {
    lines
        .get(index)
        .copied()
        .filter(|line| !line.contains(':'))
        .and_then(second_token)
}

impl RtspReply {
    pub fn new(status_code: u16, status_text: &str, cseq: u32) -> Self {
        RtspReply {
            status_code,
            status_text: status_text.to_string(),
            cseq,
            session: None,
            headers: Vec::new(),
        }
    }

    /// 200 OK.
    pub fn ok(cseq: u32) -> Self {
        Self::new(200, "OK", cseq)
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session = Some(session_id).filter(|&id| id != 0);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Parse a reply. Fails on an empty reply, a non-integer status or CSeq,
    /// or a `Session` header that is not an integer.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let invalid = |kind| StreamError::UnparsableReply { kind };
        let lines: Vec<&str> = raw
            .lines()
            .skip_while(|l| l.trim().is_empty())
            .collect();

        let status_line = lines.first().ok_or(invalid(ParseErrorKind::EmptyMessage))?;
        let status_code: u16 = second_token(status_line)
            .and_then(|t| t.parse().ok())
            .ok_or(invalid(ParseErrorKind::InvalidStatusLine))?;
        let status_text = status_line
            .split_whitespace()
            .skip(2)
            .collect::<Vec<_>>()
            .join(" ");

        let headers: Vec<(String, String)> = lines[1..]
            .iter()
            .take_while(|l| !l.trim().is_empty())
            .filter_map(|l| l.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();
        let header = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        };

        let cseq: u32 = match header("CSeq") {
            Some(value) => value
                .parse()
                .map_err(|_| invalid(ParseErrorKind::InvalidCSeq))?,
            None => positional(&lines, 1)
                .ok_or(invalid(ParseErrorKind::MissingCSeq))?
                .parse()
                .map_err(|_| invalid(ParseErrorKind::InvalidCSeq))?,
        };

        let session = match header("Session") {
            // "777;timeout=60" -> 777
            Some(value) => {
                let id = value.split(';').next().unwrap_or(value).trim();
                Some(id.parse::<u64>().map_err(|_| invalid(ParseErrorKind::InvalidSession))?)
            }
            None => positional(&lines, 2).and_then(|t| t.parse::<u64>().ok()),
        }
        .filter(|&id| id != 0);

        Ok(RtspReply {
            status_code,
            status_text,
            cseq,
            session,
            headers,
        })
    }

    /// Serialize in positional order: status, CSeq, Session.
    pub fn serialize(&self) -> String {
        let mut reply = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);
        reply.push_str(&format!("CSeq: {}\r\n", self.cseq));
        if let Some(session) = self.session {
            reply.push_str(&format!("Session: {}\r\n", session));
        }
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("CSeq") || name.eq_ignore_ascii_case("Session") {
                continue;
            }
            reply.push_str(&format!("{}: {}\r\n", name, value));
        }
        reply.push_str("\r\n");
        reply
    }
}
