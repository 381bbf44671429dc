//! Queued message entry
//!
//! A message lives in the queue as both the raw datagram text and a parsed
//! tree.  Exactly one of the two views is authoritative at any moment:
//! rewriting a header invalidates the text, replacing the text invalidates
//! the tree.  [`MsgText`] owns that invariant and exposes the two reconcile
//! operations; nothing else may flip the flags.

use crate::error::{SmqError, SmqResult};
use crate::sip::SipMsg;
use crate::types::{ContentType, QueueState};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Dual representation of one SIP datagram with a single authoritative view
#[derive(Debug, Clone)]
pub struct MsgText {
    text: String,
    parsed: Option<SipMsg>,
    text_valid: bool,
    parsed_valid: bool,
}

impl MsgText {
    /// Wrap raw wire text; the text view is authoritative
    pub fn from_wire(text: String) -> Self {
        MsgText {
            text,
            parsed: None,
            text_valid: true,
            parsed_valid: false,
        }
    }

    /// Wrap an already-built tree; the parsed view is authoritative
    pub fn from_parsed(parsed: SipMsg) -> Self {
        MsgText {
            text: String::new(),
            parsed: Some(parsed),
            text_valid: false,
            parsed_valid: true,
        }
    }

    /// Reconcile so the text view is current, and return it
    pub fn make_text_valid(&mut self) -> SmqResult<&str> {
        if !self.text_valid {
            let parsed = self.parsed.as_ref().ok_or_else(|| {
                SmqError::state_error("make_text_valid", "neither view is valid")
            })?;
            self.text = parsed.to_wire();
            self.text_valid = true;
        }
        Ok(&self.text)
    }

    /// Reconcile so the parsed view is current, and return it
    pub fn make_parsed_valid(&mut self) -> SmqResult<&SipMsg> {
        if !self.parsed_valid {
            if !self.text_valid {
                return Err(SmqError::state_error(
                    "make_parsed_valid",
                    "neither view is valid",
                ));
            }
            self.parsed = Some(SipMsg::parse(&self.text)?);
            self.parsed_valid = true;
        }
        Ok(self.parsed.as_ref().expect("parsed view just validated"))
    }

    /// Borrow the tree for mutation.  The text view becomes stale.
    pub fn parsed_mut(&mut self) -> SmqResult<&mut SipMsg> {
        self.make_parsed_valid()?;
        self.text_valid = false;
        Ok(self.parsed.as_mut().expect("parsed view just validated"))
    }

    /// Borrow the tree read-only; it must already be the valid view
    pub fn parsed(&self) -> Option<&SipMsg> {
        if self.parsed_valid {
            self.parsed.as_ref()
        } else {
            None
        }
    }

    /// Replace the raw text.  The parsed view becomes stale.
    pub fn set_text(&mut self, text: String) {
        self.text = text;
        self.text_valid = true;
        self.parsed_valid = false;
    }

    /// Raw text, only when it is the current view
    pub fn text(&self) -> Option<&str> {
        if self.text_valid {
            Some(&self.text)
        } else {
            None
        }
    }
}

/// Hash prefilter over a correlation tag: its first byte.
pub fn taghash_of(tag: &str) -> u8 {
    tag.as_bytes().first().copied().unwrap_or(0)
}

/// Placeholder source address for internally originated messages
pub fn unknown_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

/// One in-flight short message, the unit the queue and the state machine
/// operate on.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub msg: MsgText,
    pub state: QueueState,
    /// Milliseconds timestamp at which this entry is next eligible
    pub next_action_time: u64,
    /// Correlation tag: `<cseq-number>--<from-tag-or-empty>`.  Call-ID is
    /// deliberately excluded: resending mints a fresh Call-ID but the
    /// response must still match.
    pub qtag: String,
    pub qtag_hash: u8,
    /// Another entry's qtag, tying a synthesized REGISTER back to the
    /// shortcode message that caused it
    pub link_tag: Option<String>,
    pub source_addr: SocketAddr,
    pub retries: u32,
    /// Direction flag: true when the message came from a handset (MS→SC)
    pub ms_to_sc: bool,
    /// Whether the body needs repacking before delivery
    pub need_repack: bool,
    pub content_type: ContentType,
    /// Set by the validator when the datagram arrived from the global relay
    pub from_relay: bool,
}

impl QueuedMessage {
    /// Entry for a datagram that arrived off the wire
    pub fn from_wire(text: String, source_addr: SocketAddr) -> Self {
        QueuedMessage {
            msg: MsgText::from_wire(text),
            state: QueueState::Initial,
            next_action_time: 0,
            qtag: String::new(),
            qtag_hash: 0,
            link_tag: None,
            source_addr,
            retries: 0,
            ms_to_sc: false,
            need_repack: false,
            content_type: ContentType::TextPlain,
            from_relay: false,
        }
    }

    /// Entry for an internally synthesized message
    pub fn from_parsed(parsed: SipMsg) -> Self {
        QueuedMessage {
            msg: MsgText::from_parsed(parsed),
            state: QueueState::Initial,
            next_action_time: 0,
            qtag: String::new(),
            qtag_hash: 0,
            link_tag: None,
            source_addr: unknown_addr(),
            retries: 0,
            ms_to_sc: false,
            need_repack: false,
            content_type: ContentType::TextPlain,
            from_relay: false,
        }
    }

    /// Recompute the correlation tag from the current CSeq number and From
    /// tag.  Must be called again after any mutation of those headers.
    pub fn set_qtag(&mut self) -> SmqResult<()> {
        let parsed = self.msg.make_parsed_valid()?;
        let from = parsed
            .from
            .as_ref()
            .ok_or_else(|| SmqError::state_error("set_qtag", "no From header"))?;
        let fromtag = from.tag().unwrap_or("");
        let cseq = parsed
            .cseq
            .as_ref()
            .ok_or_else(|| SmqError::state_error("set_qtag", "no CSeq header"))?;
        self.qtag = format!("{}--{}", cseq.number, fromtag);
        self.qtag_hash = taghash_of(&self.qtag);
        Ok(())
    }

    /// Message body as text, empty when absent
    pub fn body_text(&mut self) -> SmqResult<String> {
        Ok(self
            .msg
            .make_parsed_valid()?
            .body
            .clone()
            .unwrap_or_default())
    }

    pub fn is_request(&mut self) -> SmqResult<bool> {
        Ok(self.msg.make_parsed_valid()?.is_request())
    }
}
