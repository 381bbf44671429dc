//! Owned SIP message model
//!
//! Parses a SIP datagram into an owned tree of start line, headers and body,
//! and serializes the tree back to canonical wire form.  The queue rewrites
//! headers (From, Request-URI, Call-ID, Via) while a message moves through
//! resolution, so the model owns its strings instead of borrowing ranges
//! from the original datagram.

use crate::error::{SmqError, SmqResult};
use crate::limits::{MAX_HEADERS, MAX_HEADER_LINE_LENGTH};
use crate::types::{Method, Scheme};
use std::fmt;
use std::str::FromStr;

/// Parameter list preserving order, `None` value for flag parameters
pub type Params = Vec<(String, Option<String>)>;

fn parse_params(text: &str) -> Params {
    text.split(';')
        .filter(|p| !p.trim().is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
            None => (p.trim().to_string(), None),
        })
        .collect()
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &Params) -> fmt::Result {
    for (name, value) in params {
        match value {
            Some(v) => write!(f, ";{}={}", name, v)?,
            None => write!(f, ";{}", name)?,
        }
    }
    Ok(())
}

/// A SIP URI: scheme, optional user, host, optional port, parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SipUri {
    pub scheme: Scheme,
    pub username: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
}

impl SipUri {
    /// Build a plain `sip:` URI
    pub fn new(username: Option<&str>, host: &str, port: Option<u16>) -> Self {
        SipUri {
            scheme: Scheme::Sip,
            username: username.map(str::to_string),
            host: host.to_string(),
            port,
            params: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> SmqResult<SipUri> {
        let (scheme_str, rest) = text.split_once(':').ok_or_else(|| {
            SmqError::parse_error("No scheme found in URI", Some(text.to_string()))
        })?;
        if scheme_str.is_empty() || !scheme_str.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SmqError::parse_error(
                format!("Invalid scheme: {}", scheme_str),
                None,
            ));
        }
        // Never fails: unknown schemes land in Scheme::Other.
        let scheme = Scheme::from_str(scheme_str)
            .unwrap_or_else(|_| Scheme::Other(scheme_str.to_string()));

        let (addr_part, params_part) = match rest.split_once(';') {
            Some((a, p)) => (a, Some(p)),
            None => (rest, None),
        };

        let (username, host_port) = match addr_part.split_once('@') {
            Some((user, hp)) => (Some(user.to_string()), hp),
            None => (None, addr_part),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((h, p)) => {
                let port = p.parse::<u16>().map_err(|_| {
                    SmqError::parse_error(format!("Invalid port: {}", p), None)
                })?;
                (h.to_string(), Some(port))
            }
            None => (host_port.to_string(), None),
        };
        if host.is_empty() {
            return Err(SmqError::parse_error("URI has no host", Some(text.to_string())));
        }

        Ok(SipUri {
            scheme,
            username,
            host,
            port,
            params: params_part.map(parse_params).unwrap_or_default(),
        })
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(ref user) = self.username {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write_params(f, &self.params)
    }
}

/// A name-addr as used in To, From and Contact headers
#[derive(Debug, Clone, PartialEq)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: SipUri,
    /// Header parameters after the closing `>`, e.g. `tag`, `expires`
    pub params: Params,
}

impl NameAddr {
    pub fn new(uri: SipUri) -> Self {
        NameAddr {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> SmqResult<NameAddr> {
        let text = text.trim();
        if let Some(lt) = text.find('<') {
            let gt = text.rfind('>').ok_or_else(|| {
                SmqError::parse_error("Unclosed < in address", Some(text.to_string()))
            })?;
            if gt < lt {
                return Err(SmqError::parse_error(
                    "Malformed address, mismatched brackets",
                    Some(text.to_string()),
                ));
            }
            let display_part = text[..lt].trim();
            let display_name = if display_part.is_empty() {
                None
            } else {
                Some(display_part.trim_matches('"').to_string())
            };
            let uri = SipUri::parse(&text[lt + 1..gt])?;
            let params = parse_params(text[gt + 1..].trim_start().trim_start_matches(';'));
            Ok(NameAddr {
                display_name,
                uri,
                params,
            })
        } else {
            // Bare URI form: everything after the first ';' is a header
            // parameter, not a URI parameter (RFC 3261 20.10).
            let (uri_part, params_part) = match text.split_once(';') {
                Some((u, p)) => (u, p),
                None => (text, ""),
            };
            Ok(NameAddr {
                display_name: None,
                uri: SipUri::parse(uri_part)?,
                params: parse_params(params_part),
            })
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == "tag")
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn set_tag(&mut self, tag: &str) {
        for (name, value) in self.params.iter_mut() {
            if name == "tag" {
                *value = Some(tag.to_string());
                return;
            }
        }
        self.params.push(("tag".to_string(), Some(tag.to_string())));
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref name) = self.display_name {
            write!(f, "{}", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        write_params(f, &self.params)
    }
}

/// A Via header: protocol, sent-by host/port, parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Via {
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: Params,
}

impl Via {
    pub fn new(host: &str, port: u16) -> Self {
        Via {
            protocol: "SIP/2.0/UDP".to_string(),
            host: host.to_string(),
            port: Some(port),
            params: vec![("branch".to_string(), Some("123".to_string()))],
        }
    }

    pub fn parse(text: &str) -> SmqResult<Via> {
        let (protocol, rest) = text.trim().split_once(' ').ok_or_else(|| {
            SmqError::parse_error("Invalid Via format: missing space", Some(text.to_string()))
        })?;
        let (sent_by, params_part) = match rest.split_once(';') {
            Some((s, p)) => (s.trim(), p),
            None => (rest.trim(), ""),
        };
        let (host, port) = match sent_by.rsplit_once(':') {
            Some((h, p)) => (
                h.to_string(),
                Some(p.parse::<u16>().map_err(|_| {
                    SmqError::parse_error(format!("Invalid Via port: {}", p), None)
                })?),
            ),
            None => (sent_by.to_string(), None),
        };
        Ok(Via {
            protocol: protocol.to_string(),
            host,
            port,
            params: parse_params(params_part),
        })
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.protocol, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write_params(f, &self.params)
    }
}

/// CSeq header: sequence number plus method
#[derive(Debug, Clone, PartialEq)]
pub struct CSeq {
    pub number: u64,
    pub method: Method,
}

impl CSeq {
    pub fn parse(text: &str) -> SmqResult<CSeq> {
        let mut parts = text.split_whitespace();
        let number = parts
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| {
                SmqError::parse_error(format!("Invalid CSeq: {}", text), None)
            })?;
        let method_str = parts.next().ok_or_else(|| {
            SmqError::parse_error(format!("CSeq missing method: {}", text), None)
        })?;
        // Method parse never fails: unknowns become Method::UNKNOWN.
        let method = Method::from_str(method_str)
            .unwrap_or_else(|_| Method::UNKNOWN(method_str.to_string()));
        Ok(CSeq { number, method })
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.method)
    }
}

/// Call-ID header: local number plus optional host part
#[derive(Debug, Clone, PartialEq)]
pub struct CallId {
    pub number: String,
    pub host: Option<String>,
}

impl CallId {
    pub fn new(number: &str, host: &str) -> Self {
        CallId {
            number: number.to_string(),
            host: Some(host.to_string()),
        }
    }

    pub fn parse(text: &str) -> SmqResult<CallId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SmqError::parse_error("Empty Call-ID", None));
        }
        match text.split_once('@') {
            Some((number, host)) => Ok(CallId {
                number: number.to_string(),
                host: Some(host.to_string()),
            }),
            None => Ok(CallId {
                number: text.to_string(),
                host: None,
            }),
        }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            Some(ref host) => write!(f, "{}@{}", self.number, host),
            None => write!(f, "{}", self.number),
        }
    }
}

/// First line of a SIP message
#[derive(Debug, Clone, PartialEq)]
pub enum StartLine {
    Request { method: Method, uri: SipUri },
    Status { code: u16, reason: String },
}

/// A parsed SIP message
#[derive(Debug, Clone, PartialEq)]
pub struct SipMsg {
    pub start: StartLine,
    /// `SIP/2.0` for everything we accept; kept so the validator can
    /// reject other versions as malformed.
    pub version: String,
    pub vias: Vec<Via>,
    pub from: Option<NameAddr>,
    pub to: Option<NameAddr>,
    pub call_id: Option<CallId>,
    pub cseq: Option<CSeq>,
    pub contact: Option<NameAddr>,
    pub content_type: Option<String>,
    /// Declared Content-Length, verbatim; the serializer recomputes it
    pub content_length: Option<String>,
    pub mime_version: Option<String>,
    /// Headers we carry but do not interpret, in arrival order
    pub extra: Vec<(String, String)>,
    pub body: Option<String>,
}

impl SipMsg {
    /// Start a new request with empty headers
    pub fn new_request(method: Method, uri: SipUri) -> Self {
        SipMsg {
            start: StartLine::Request { method, uri },
            version: "SIP/2.0".to_string(),
            vias: Vec::new(),
            from: None,
            to: None,
            call_id: None,
            cseq: None,
            contact: None,
            content_type: None,
            content_length: None,
            mime_version: None,
            extra: Vec::new(),
            body: None,
        }
    }

    /// Start a new response with empty headers
    pub fn new_status(code: u16, reason: &str) -> Self {
        SipMsg {
            start: StartLine::Status {
                code,
                reason: reason.to_string(),
            },
            version: "SIP/2.0".to_string(),
            vias: Vec::new(),
            from: None,
            to: None,
            call_id: None,
            cseq: None,
            contact: None,
            content_type: None,
            content_length: None,
            mime_version: None,
            extra: Vec::new(),
            body: None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        !self.is_request()
    }

    pub fn method(&self) -> Option<&Method> {
        match self.start {
            StartLine::Request { ref method, .. } => Some(method),
            StartLine::Status { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.start {
            StartLine::Status { code, .. } => Some(code),
            StartLine::Request { .. } => None,
        }
    }

    pub fn request_uri(&self) -> Option<&SipUri> {
        match self.start {
            StartLine::Request { ref uri, .. } => Some(uri),
            StartLine::Status { .. } => None,
        }
    }

    pub fn request_uri_mut(&mut self) -> Option<&mut SipUri> {
        match self.start {
            StartLine::Request { ref mut uri, .. } => Some(uri),
            StartLine::Status { .. } => None,
        }
    }

    /// Declared Content-Length as a number, if it parses cleanly
    pub fn declared_content_length(&self) -> Option<Result<usize, ()>> {
        self.content_length
            .as_ref()
            .map(|v| v.trim().parse::<usize>().map_err(|_| ()))
    }

    /// Parse a datagram into an owned message tree
    pub fn parse(text: &str) -> SmqResult<SipMsg> {
        let start_line_end = text.find("\r\n").ok_or_else(|| {
            SmqError::parse_error("No CRLF after start line", None)
        })?;
        let start_line = &text[..start_line_end];

        let (start, version) = if let Some(rest) = start_line.strip_prefix("SIP/") {
            // Status line: SIP/2.0 <code> <reason>
            let mut parts = rest.splitn(3, ' ');
            let version = format!("SIP/{}", parts.next().unwrap_or_default());
            let code = parts
                .next()
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| SmqError::parse_error("Invalid status code", None))?;
            let reason = parts.next().unwrap_or("").to_string();
            (StartLine::Status { code, reason }, version)
        } else {
            // Request line: <method> <uri> SIP/2.0
            let mut parts = start_line.splitn(3, ' ');
            let method_str = parts.next().unwrap_or_default();
            if method_str.is_empty() {
                return Err(SmqError::parse_error("Empty request line", None));
            }
            let method = Method::from_str(method_str)
                .unwrap_or_else(|_| Method::UNKNOWN(method_str.to_string()));
            let uri_str = parts
                .next()
                .ok_or_else(|| SmqError::parse_error("Request line has no URI", None))?;
            let uri = SipUri::parse(uri_str)?;
            let version = parts.next().unwrap_or("").trim().to_string();
            (StartLine::Request { method, uri }, version)
        };

        let mut msg = SipMsg {
            start,
            version,
            vias: Vec::new(),
            from: None,
            to: None,
            call_id: None,
            cseq: None,
            contact: None,
            content_type: None,
            content_length: None,
            mime_version: None,
            extra: Vec::new(),
            body: None,
        };

        // Headers run until the blank line; the body is everything after.
        let headers_section = &text[start_line_end + 2..];
        let (headers_text, body_text) = match headers_section.find("\r\n\r\n") {
            Some(pos) => (&headers_section[..pos], &headers_section[pos + 4..]),
            None => (headers_section.trim_end_matches("\r\n"), ""),
        };

        let mut header_count = 0;
        let mut lines = headers_text.split("\r\n").peekable();
        while let Some(first) = lines.next() {
            if first.is_empty() {
                continue;
            }
            // Unfold continuation lines onto the current header.
            let mut line = first.to_string();
            while let Some(next) = lines.peek() {
                if next.starts_with(' ') || next.starts_with('\t') {
                    line.push(' ');
                    line.push_str(lines.next().unwrap().trim_start());
                } else {
                    break;
                }
            }
            if line.len() > MAX_HEADER_LINE_LENGTH {
                return Err(SmqError::parse_error("Header line too long", None));
            }
            header_count += 1;
            if header_count > MAX_HEADERS {
                return Err(SmqError::parse_error("Too many headers", None));
            }
            msg.store_header(&line)?;
        }

        if !body_text.is_empty() {
            msg.body = Some(body_text.to_string());
        }

        Ok(msg)
    }

    fn store_header(&mut self, line: &str) -> SmqResult<()> {
        let (raw_name, value) = line.split_once(':').ok_or_else(|| {
            SmqError::parse_error("No colon in header line", Some(line.to_string()))
        })?;
        let value = value.trim();
        let lowered = raw_name.trim().to_lowercase();
        let name = expand_compact_header(&lowered);

        match name {
            "via" => self.vias.push(Via::parse(value)?),
            "from" => {
                if self.from.is_some() {
                    return Err(SmqError::parse_error("Duplicate From header", None));
                }
                self.from = Some(NameAddr::parse(value)?);
            }
            "to" => {
                if self.to.is_some() {
                    return Err(SmqError::parse_error("Duplicate To header", None));
                }
                self.to = Some(NameAddr::parse(value)?);
            }
            "call-id" => {
                if self.call_id.is_some() {
                    return Err(SmqError::parse_error("Duplicate Call-ID header", None));
                }
                self.call_id = Some(CallId::parse(value)?);
            }
            "cseq" => {
                if self.cseq.is_some() {
                    return Err(SmqError::parse_error("Duplicate CSeq header", None));
                }
                self.cseq = Some(CSeq::parse(value)?);
            }
            "contact" => self.contact = Some(NameAddr::parse(value)?),
            "content-type" => self.content_type = Some(value.to_string()),
            "content-length" => self.content_length = Some(value.to_string()),
            "mime-version" => self.mime_version = Some(value.to_string()),
            _ => self
                .extra
                .push((raw_name.trim().to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Serialize to canonical wire form.  Content-Length is recomputed from
    /// the actual body.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(256 + self.body.as_deref().map_or(0, str::len));
        match self.start {
            StartLine::Request {
                ref method,
                ref uri,
            } => {
                out.push_str(&format!("{} {} SIP/2.0\r\n", method, uri));
            }
            StartLine::Status { code, ref reason } => {
                out.push_str(&format!("SIP/2.0 {} {}\r\n", code, reason));
            }
        }
        for via in &self.vias {
            out.push_str(&format!("Via: {}\r\n", via));
        }
        if let Some(ref from) = self.from {
            out.push_str(&format!("From: {}\r\n", from));
        }
        if let Some(ref to) = self.to {
            out.push_str(&format!("To: {}\r\n", to));
        }
        if let Some(ref call_id) = self.call_id {
            out.push_str(&format!("Call-ID: {}\r\n", call_id));
        }
        if let Some(ref cseq) = self.cseq {
            out.push_str(&format!("CSeq: {}\r\n", cseq));
        }
        if let Some(ref contact) = self.contact {
            out.push_str(&format!("Contact: {}\r\n", contact));
        }
        for (name, value) in &self.extra {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(ref mime) = self.mime_version {
            out.push_str(&format!("MIME-Version: {}\r\n", mime));
        }
        if let Some(ref ctype) = self.content_type {
            out.push_str(&format!("Content-Type: {}\r\n", ctype));
        }
        let body = self.body.as_deref().unwrap_or("");
        out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        out.push_str(body);
        out
    }
}

fn expand_compact_header(name: &str) -> &str {
    match name {
        "v" => "via",
        "f" => "from",
        "t" => "to",
        "i" => "call-id",
        "m" => "contact",
        "c" => "content-type",
        "l" => "content-length",
        "s" => "subject",
        "k" => "supported",
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = "MESSAGE sip:+17074700746@127.0.0.1 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 127.0.0.1:5062;branch=z9hG4bK776asdhds\r\n\
        From: <sip:IMSI666410186585295@127.0.0.1>;tag=294\r\n\
        To: <sip:+17074700746@127.0.0.1>\r\n\
        Call-ID: 845103@127.0.0.1\r\n\
        CSeq: 1 MESSAGE\r\n\
        Content-Type: text/plain\r\n\
        Content-Length: 5\r\n\
        \r\n\
        hello";

    #[test]
    fn test_parse_request() {
        let msg = SipMsg::parse(MESSAGE).unwrap();
        assert!(msg.is_request());
        assert_eq!(msg.method(), Some(&Method::MESSAGE));
        let uri = msg.request_uri().unwrap();
        assert_eq!(uri.username.as_deref(), Some("+17074700746"));
        assert_eq!(uri.host, "127.0.0.1");
        assert_eq!(msg.from.as_ref().unwrap().tag(), Some("294"));
        assert_eq!(msg.cseq.as_ref().unwrap().number, 1);
        assert_eq!(msg.call_id.as_ref().unwrap().number, "845103");
        assert_eq!(msg.body.as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_response() {
        let text = "SIP/2.0 200 OK\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5063;branch=123\r\n\
            From: <sip:+17074700741@127.0.0.1>;tag=294\r\n\
            To: <sip:+17074700746@127.0.0.1>\r\n\
            Call-ID: 845103@127.0.0.1\r\n\
            CSeq: 1 MESSAGE\r\n\
            Content-Length: 0\r\n\r\n";
        let msg = SipMsg::parse(text).unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.status_code(), Some(200));
        assert!(msg.body.is_none());
    }

    #[test]
    fn test_wire_round_trip() {
        let msg = SipMsg::parse(MESSAGE).unwrap();
        let wire = msg.to_wire();
        let again = SipMsg::parse(&wire).unwrap();
        assert_eq!(msg, again);
    }

    #[test]
    fn test_compact_headers() {
        let text = "MESSAGE sip:411@127.0.0.1 SIP/2.0\r\n\
            v: SIP/2.0/UDP 127.0.0.1:5062;branch=77\r\n\
            f: <sip:IMSI777100223456161@127.0.0.1>;tag=9\r\n\
            t: <sip:411@127.0.0.1>\r\n\
            i: 11@127.0.0.1\r\n\
            CSeq: 3 MESSAGE\r\n\
            c: text/plain\r\n\
            l: 2\r\n\r\nhi";
        let msg = SipMsg::parse(text).unwrap();
        assert_eq!(msg.vias.len(), 1);
        assert!(msg.from.is_some());
        assert_eq!(msg.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_folded_header() {
        let text = "MESSAGE sip:101@127.0.0.1 SIP/2.0\r\n\
            From: <sip:IMSI666410186585295@127.0.0.1>\r\n\
            \t;tag=77\r\n\
            To: <sip:101@127.0.0.1>\r\n\
            Call-ID: 4@127.0.0.1\r\n\
            CSeq: 4 MESSAGE\r\n\
            Content-Length: 0\r\n\r\n";
        let msg = SipMsg::parse(text).unwrap();
        assert_eq!(msg.from.as_ref().unwrap().tag(), Some("77"));
    }

    #[test]
    fn test_duplicate_to_rejected() {
        let text = "MESSAGE sip:101@127.0.0.1 SIP/2.0\r\n\
            To: <sip:101@127.0.0.1>\r\n\
            To: <sip:102@127.0.0.1>\r\n\
            Content-Length: 0\r\n\r\n";
        assert!(SipMsg::parse(text).is_err());
    }

    #[test]
    fn test_uri_forms() {
        let uri = SipUri::parse("sip:+15551234567@10.0.0.1:5062").unwrap();
        assert_eq!(uri.username.as_deref(), Some("+15551234567"));
        assert_eq!(uri.port, Some(5062));

        let no_user = SipUri::parse("sip:127.0.0.1:5060").unwrap();
        assert!(no_user.username.is_none());

        let odd_scheme = SipUri::parse("http:foo@example.com").unwrap();
        assert_eq!(odd_scheme.scheme, Scheme::Other("http".to_string()));

        assert!(SipUri::parse("nocolonhere").is_err());
    }

    #[test]
    fn test_name_addr_bare_uri() {
        let addr = NameAddr::parse("sip:alice@10.0.0.1;tag=abc").unwrap();
        assert_eq!(addr.tag(), Some("abc"));
        assert!(addr.uri.params.is_empty());
    }

    #[test]
    fn test_name_addr_display() {
        let mut addr = NameAddr::parse("411<sip:411@127.0.0.1>").unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("411"));
        addr.set_tag("55");
        assert_eq!(addr.to_string(), "411<sip:411@127.0.0.1>;tag=55");
    }

    #[test]
    fn test_via_display() {
        let via = Via::new("127.0.0.1", 5063);
        assert_eq!(via.to_string(), "SIP/2.0/UDP 127.0.0.1:5063;branch=123");
        let parsed = Via::parse("SIP/2.0/UDP 10.1.1.1:5062;branch=z9;rport").unwrap();
        assert_eq!(parsed.host, "10.1.1.1");
        assert_eq!(parsed.port, Some(5062));
    }
}
