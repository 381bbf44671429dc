// Centralized validation of incoming short messages.
//
// Every validity check on an incoming datagram lives here, so the state
// machine can assume any queued message has the headers it needs.  The
// return value is 0 for acceptance or the 3-digit SIP status code to send
// back.  On acceptance the entry's correlation tag is stamped.

use crate::message::QueuedMessage;
use crate::sip::SipMsg;
use crate::types::{ContentType, Method, Scheme};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Everything the validator needs to know about its surroundings
pub struct ValidatorCtx<'a> {
    pub my_ipaddress: &'a str,
    pub my_2nd_ipaddress: Option<&'a str>,
    /// Global relay host and port, when configured
    pub global_relay: Option<(&'a str, u16)>,
    /// Accept a Via match as proof of relay origin
    pub relaxed_verify: bool,
    pub print_as_we_validate: bool,
    /// Oracle for the relay early check: can this To-user be delivered?
    pub deliverable: Option<&'a dyn Fn(&str) -> bool>,
}

static WARNED_FOREIGN_HOST: AtomicBool = AtomicBool::new(false);

/// Accept hosts that are plausibly us.  Foreign hosts are accepted too,
/// with a one-time warning: behind NAT our own address never appears in
/// the configuration, so rejecting would break real deployments.
fn check_host_port(host: &str, ctx: &ValidatorCtx) -> bool {
    if host.is_empty() {
        return false;
    }
    if host == "localhost"
        || host == "127.0.0.1"
        || host == ctx.my_ipaddress
        || ctx.my_2nd_ipaddress.is_some_and(|second| host == second)
    {
        return true;
    }
    if !WARNED_FOREIGN_HOST.swap(true, Ordering::Relaxed) {
        warn!(
            "Accepting SIP message for host {} for SMS delivery, even though it's not local",
            host
        );
    }
    true
}

/// Content-Type value with parameters stripped, mapped to a supported type
pub fn supported_content_type(value: &str) -> Option<ContentType> {
    let base = value.split(';').next().unwrap_or("").trim();
    ContentType::from_str(base).ok()
}

/// Does any Via sent-by match the relay host and port?
fn relaxed_verify_relay(msg: &SipMsg, relay_host: &str, relay_port: u16) -> bool {
    msg.vias.iter().any(|via| {
        via.host.eq_ignore_ascii_case(relay_host) && via.port == Some(relay_port)
    })
}

/// Did this datagram arrive from the configured relay address?
fn msg_is_from_relay(src: SocketAddr, relay_host: &str, relay_port: u16) -> bool {
    src.port() == relay_port && src.ip().to_string() == relay_host
}

/// Validate a queued short message, stamping its qtag on success.
///
/// `allow_early_check` enables the relay early-resolution path, used only
/// for datagrams fresh off the wire (not for save-file reloads or
/// internally originated messages).
pub fn validate_short_msg(
    qmsg: &mut QueuedMessage,
    ctx: &ValidatorCtx,
    allow_early_check: bool,
) -> u32 {
    if ctx.print_as_we_validate {
        if let Ok(text) = qmsg.msg.make_text_valid() {
            debug!("MSG = {}", text);
        }
    }

    if qmsg.msg.make_parsed_valid().is_err() {
        debug!("Invalid parse");
        return 400;
    }
    // Immutable borrow for the whole inspection below; qtag stamping at the
    // end re-borrows mutably.
    let src = qmsg.source_addr;
    let parsed = qmsg.msg.parsed().expect("parsed view just validated");

    if parsed.version != "SIP/2.0" {
        debug!("Invalid SIP version {}", parsed.version);
        return 400;
    }

    if parsed.is_response() {
        // A response: no content allowed.
        let reason_ok = match parsed.start {
            crate::sip::StartLine::Status { ref reason, .. } => !reason.is_empty(),
            _ => unreachable!(),
        };
        if !reason_ok {
            debug!("Response without reason phrase");
            return 400;
        }
        match parsed.declared_content_length() {
            None => debug!("Content Length zero"),
            Some(Err(())) => {
                debug!("Invalid Content Length");
                return 400;
            }
            Some(Ok(0)) => {}
            Some(Ok(_)) => {
                debug!("Response has a content length");
                return 400;
            }
        }
        if parsed.body.is_some() {
            debug!("Response has a body");
            return 400;
        }
    } else {
        // A request.
        let uri = parsed.request_uri().expect("requests carry a URI");
        if uri.scheme != Scheme::Sip {
            debug!("Not SIP scheme");
            return 416;
        }
        if !check_host_port(&uri.host, ctx) {
            debug!("Host port check failed");
            return 484;
        }
        match parsed.method() {
            Some(Method::MESSAGE) => {
                if uri.username.is_none() {
                    return 484;
                }
                let supported = parsed
                    .content_type
                    .as_deref()
                    .and_then(supported_content_type);
                match supported {
                    Some(content_type) => qmsg.content_type = content_type,
                    None => {
                        debug!("Content type not supported");
                        return 415;
                    }
                }
                if let Some(Ok(len)) = parsed.declared_content_length() {
                    if len > 0 && parsed.body.is_none() {
                        debug!("Message entity-body malformed");
                        return 413;
                    }
                }
                match parsed.cseq {
                    Some(ref cseq) if cseq.method == Method::MESSAGE => {}
                    _ => {
                        debug!("Invalid sequence number");
                        return 400;
                    }
                }
            }
            Some(Method::REGISTER) => {
                // Empty username, content type and body are all fine here.
                match parsed.cseq {
                    Some(ref cseq) if cseq.method == Method::REGISTER => {}
                    _ => {
                        debug!("Invalid REGISTER");
                        return 400;
                    }
                }
            }
            _ => {
                debug!("Unknown SIP datagram");
                return 405;
            }
        }
    }

    // Checks common to requests and responses.
    if parsed.call_id.is_none() {
        debug!("No call-id");
        return 400;
    }
    if parsed.from.is_none() {
        debug!("Invalid from address in header");
        return 400;
    }
    // A From tag is optional; the empty string stands in for it in the qtag.

    if let Some(ref mime) = parsed.mime_version {
        if mime != "1.0" {
            debug!("Wrong mime version");
            return 415;
        }
    }

    // To: sip scheme, recognized host, username.  Tags are tolerated even
    // though RFC 3261 8.1.1.2 forbids them on requests: Asterisk sends them.
    let to_ok = match parsed.to {
        Some(ref to) => {
            to.uri.scheme == Scheme::Sip
                && check_host_port(&to.uri.host, ctx)
                && to.uri.username.is_some()
        }
        None => false,
    };
    if !to_ok {
        debug!("Invalid To header");
        return 400;
    }

    // Relay early-resolution: a MESSAGE arriving from the global relay for
    // a destination we cannot deliver is refused up front with 404.
    if allow_early_check && parsed.is_request() && parsed.method() == Some(&Method::MESSAGE) {
        if let Some((relay_host, relay_port)) = ctx.global_relay {
            let from_relay = msg_is_from_relay(src, relay_host, relay_port)
                || (ctx.relaxed_verify && relaxed_verify_relay(parsed, relay_host, relay_port));
            if from_relay {
                let user = parsed
                    .to
                    .as_ref()
                    .and_then(|to| to.uri.username.as_deref())
                    .unwrap_or("");
                let deliverable = ctx.deliverable.map(|f| f(user)).unwrap_or(false);
                if !deliverable {
                    debug!("To address not deliverable");
                    return 404;
                }
                qmsg.from_relay = true;
                debug!("Inbound message to {} is from relay", user);
            }
        }
    }

    // Stamp the correlation tag from the now-trusted fields.
    if qmsg.set_qtag().is_err() {
        return 400;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::unknown_addr;

    fn ctx<'a>() -> ValidatorCtx<'a> {
        ValidatorCtx {
            my_ipaddress: "127.0.0.1",
            my_2nd_ipaddress: None,
            global_relay: None,
            relaxed_verify: false,
            print_as_we_validate: false,
            deliverable: None,
        }
    }

    fn message(extra: impl Fn(String) -> String) -> QueuedMessage {
        let base = "MESSAGE sip:+17074700746@127.0.0.1 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5062;branch=z9hG4bK8\r\n\
            From: <sip:IMSI666410186585295@127.0.0.1>;tag=294\r\n\
            To: <sip:+17074700746@127.0.0.1>\r\n\
            Call-ID: 845103@127.0.0.1\r\n\
            CSeq: 1 MESSAGE\r\n\
            Content-Type: text/plain\r\n\
            Content-Length: 5\r\n\r\nhello"
            .to_string();
        QueuedMessage::from_wire(extra(base), unknown_addr())
    }

    #[test]
    fn test_valid_message_accepted_and_tagged() {
        let mut qmsg = message(|s| s);
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 0);
        assert_eq!(qmsg.qtag, "1--294");
    }

    #[test]
    fn test_garbage_rejected_400() {
        let mut qmsg = QueuedMessage::from_wire("not sip at all".to_string(), unknown_addr());
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 400);
    }

    #[test]
    fn test_wrong_version_rejected_400() {
        let mut qmsg = message(|s| s.replace("SIP/2.0\r\n", "SIP/3.0\r\n"));
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 400);
    }

    #[test]
    fn test_non_sip_scheme_rejected_416() {
        let mut qmsg = message(|s| {
            s.replace(
                "MESSAGE sip:+17074700746@127.0.0.1",
                "MESSAGE http:+17074700746@127.0.0.1",
            )
        });
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 416);
    }

    #[test]
    fn test_unknown_method_rejected_405() {
        let mut qmsg = message(|s| {
            s.replace("MESSAGE sip:", "INVITE sip:")
                .replace("CSeq: 1 MESSAGE", "CSeq: 1 INVITE")
        });
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 405);
    }

    #[test]
    fn test_unsupported_content_type_rejected_415() {
        let mut qmsg = message(|s| s.replace("Content-Type: text/plain", "Content-Type: image/png"));
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 415);
    }

    #[test]
    fn test_missing_content_type_rejected_415() {
        let mut qmsg = message(|s| s.replace("Content-Type: text/plain\r\n", ""));
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 415);
    }

    #[test]
    fn test_missing_to_username_rejected_400() {
        let mut qmsg = message(|s| {
            s.replace(
                "To: <sip:+17074700746@127.0.0.1>",
                "To: <sip:127.0.0.1>",
            )
        });
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 400);
    }

    #[test]
    fn test_missing_uri_username_rejected_484() {
        let mut qmsg = message(|s| {
            s.replace(
                "MESSAGE sip:+17074700746@127.0.0.1",
                "MESSAGE sip:127.0.0.1",
            )
        });
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 484);
    }

    #[test]
    fn test_missing_call_id_rejected_400() {
        let mut qmsg = message(|s| s.replace("Call-ID: 845103@127.0.0.1\r\n", ""));
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 400);
    }

    #[test]
    fn test_cseq_method_mismatch_rejected_400() {
        let mut qmsg = message(|s| s.replace("CSeq: 1 MESSAGE", "CSeq: 1 REGISTER"));
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 400);
    }

    #[test]
    fn test_declared_body_without_body_rejected_413() {
        let mut qmsg = message(|s| s.replace("Content-Length: 5\r\n\r\nhello", "Content-Length: 5\r\n\r\n"));
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 413);
    }

    #[test]
    fn test_bad_mime_version_rejected_415() {
        let mut qmsg = message(|s| {
            s.replace(
                "Content-Type: text/plain\r\n",
                "MIME-Version: 2.0\r\nContent-Type: text/plain\r\n",
            )
        });
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 415);
    }

    #[test]
    fn test_register_with_empty_user_accepted() {
        let text = "REGISTER sip:127.0.0.1:5060 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5063;branch=123\r\n\
            From: IMSI666410186585295<sip:IMSI666410186585295@127.0.0.1:5060>;tag=8\r\n\
            To: IMSI666410186585295<sip:IMSI666410186585295@127.0.0.1:5060>\r\n\
            Call-ID: 77@127.0.0.1\r\n\
            CSeq: 1 REGISTER\r\n\
            Content-Length: 0\r\n\r\n";
        let mut qmsg = QueuedMessage::from_wire(text.to_string(), unknown_addr());
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 0);
    }

    #[test]
    fn test_response_with_body_rejected_400() {
        let text = "SIP/2.0 200 OK\r\n\
            From: <sip:a@127.0.0.1>;tag=1\r\n\
            To: <sip:b@127.0.0.1>\r\n\
            Call-ID: 5@127.0.0.1\r\n\
            CSeq: 1 MESSAGE\r\n\
            Content-Length: 4\r\n\r\nbody";
        let mut qmsg = QueuedMessage::from_wire(text.to_string(), unknown_addr());
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 400);
    }

    #[test]
    fn test_valid_response_accepted() {
        let text = "SIP/2.0 200 OK\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5063;branch=123\r\n\
            From: <sip:+17074700741@127.0.0.1>;tag=294\r\n\
            To: <sip:+17074700746@127.0.0.1>\r\n\
            Call-ID: 845103@127.0.0.1\r\n\
            CSeq: 1 MESSAGE\r\n\
            Content-Length: 0\r\n\r\n";
        let mut qmsg = QueuedMessage::from_wire(text.to_string(), unknown_addr());
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 0);
        assert_eq!(qmsg.qtag, "1--294");
    }

    #[test]
    fn test_to_tag_tolerated() {
        let mut qmsg = message(|s| {
            s.replace(
                "To: <sip:+17074700746@127.0.0.1>",
                "To: <sip:+17074700746@127.0.0.1>;tag=asterisk",
            )
        });
        assert_eq!(validate_short_msg(&mut qmsg, &ctx(), false), 0);
    }

    #[test]
    fn test_early_check_undeliverable_from_relay_404() {
        let relay_src: SocketAddr = "10.9.9.9:5065".parse().unwrap();
        let deliverable = |_: &str| false;
        let ctx = ValidatorCtx {
            my_ipaddress: "127.0.0.1",
            my_2nd_ipaddress: None,
            global_relay: Some(("10.9.9.9", 5065)),
            relaxed_verify: false,
            print_as_we_validate: false,
            deliverable: Some(&deliverable),
        };
        let mut qmsg = message(|s| s);
        qmsg.source_addr = relay_src;
        assert_eq!(validate_short_msg(&mut qmsg, &ctx, true), 404);
        // Same datagram without the early check is accepted.
        let mut qmsg = message(|s| s);
        qmsg.source_addr = relay_src;
        assert_eq!(validate_short_msg(&mut qmsg, &ctx, false), 0);
    }

    #[test]
    fn test_early_check_deliverable_marks_from_relay() {
        let relay_src: SocketAddr = "10.9.9.9:5065".parse().unwrap();
        let deliverable = |_: &str| true;
        let ctx = ValidatorCtx {
            my_ipaddress: "127.0.0.1",
            my_2nd_ipaddress: None,
            global_relay: Some(("10.9.9.9", 5065)),
            relaxed_verify: false,
            print_as_we_validate: false,
            deliverable: Some(&deliverable),
        };
        let mut qmsg = message(|s| s);
        qmsg.source_addr = relay_src;
        assert_eq!(validate_short_msg(&mut qmsg, &ctx, true), 0);
        assert!(qmsg.from_relay);
    }

    #[test]
    fn test_relaxed_verify_matches_via() {
        let deliverable = |_: &str| false;
        let ctx = ValidatorCtx {
            my_ipaddress: "127.0.0.1",
            my_2nd_ipaddress: None,
            global_relay: Some(("10.9.9.9", 5065)),
            relaxed_verify: true,
            print_as_we_validate: false,
            deliverable: Some(&deliverable),
        };
        // Source is not the relay, but a Via names it.
        let mut qmsg = message(|s| {
            s.replace(
                "Via: SIP/2.0/UDP 127.0.0.1:5062;branch=z9hG4bK8",
                "Via: SIP/2.0/UDP 10.9.9.9:5065;branch=z9hG4bK8",
            )
        });
        qmsg.source_addr = "172.16.0.4:5062".parse().unwrap();
        assert_eq!(validate_short_msg(&mut qmsg, &ctx, true), 404);
    }
}
