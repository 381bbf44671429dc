// Size limits on SIP datagrams and SMS bodies

/// Largest datagram we will read off the wire or accept for parsing
pub const MAX_DATAGRAM_SIZE: usize = 5000;

/// Maximum length of a single header line
pub const MAX_HEADER_LINE_LENGTH: usize = 2048;

/// Maximum number of headers in one message
pub const MAX_HEADERS: usize = 64;

/// Longest SMS body we will originate (bounces, shortcode replies).
/// Longer reply text is truncated, not rejected.
pub const SMS_MESSAGE_MAX_LENGTH: usize = 160;

/// Clamp originated message text to the SMS body limit.
pub fn clamp_sms_body(text: &str) -> &str {
    if text.len() <= SMS_MESSAGE_MAX_LENGTH {
        return text;
    }
    // Respect char boundaries; bodies are normally plain ASCII.
    let mut end = SMS_MESSAGE_MAX_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
