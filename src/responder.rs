//! SIP acknowledgement synthesis
//!
//! After validating a non-response request we tell the sender what we did
//! with it.  The response reuses the request's To, From, CSeq, Call-ID and
//! Via headers verbatim.  No fresh Via is added to a response
//! (RFC 3261 8.2.6.2).

use crate::error::SmqResult;
use crate::message::QueuedMessage;
use crate::sip::SipMsg;

/// Fixed reason phrase for each status code we emit
pub fn reason_phrase(code: u32) -> &'static str {
    match code {
        100 => "Trying...",
        200 => "Okay!",
        202 => "Queued",
        400 => "Bad Request",
        401 => "Un Author Ized",
        403 => "Forbidden - first register, by texting your 10-digit phone number to 101.",
        404 => "Phone Number Not Registered",
        405 => "Method Not Allowed",
        413 => "Message Body Size Error",
        415 => "Unsupported Content Type",
        416 => "Unsupported URI scheme (not SIP)",
        480 => "Recipient Temporarily Unavailable",
        484 => "Address Incomplete",
        _ => "Error Message Table Needs Updating",
    }
}

/// Build the wire-form acknowledgement for a validated request.
/// Returns `None` for responses: acking an ack would loop.
pub fn build_sip_ack(code: u32, request: &mut QueuedMessage) -> SmqResult<Option<String>> {
    let parsed = match request.msg.make_parsed_valid() {
        Ok(parsed) => parsed,
        // Don't ack what we couldn't parse.
        Err(_) => return Ok(None),
    };
    if parsed.is_response() {
        return Ok(None);
    }

    let mut response = SipMsg::new_status(code as u16, reason_phrase(code));
    response.to = parsed.to.clone();
    response.from = parsed.from.clone();
    response.cseq = parsed.cseq.clone();
    response.call_id = parsed.call_id.clone();
    response.vias = parsed.vias.clone();

    match code {
        405 => response
            .extra
            .push(("Allow".to_string(), "MESSAGE".to_string())),
        415 => response.extra.push((
            "Accept".to_string(),
            "text/plain, application/vnd.3gpp.sms".to_string(),
        )),
        _ => {}
    }

    Ok(Some(response.to_wire()))
}
