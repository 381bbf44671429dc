//! The queue engine: state machine, response correlation, origination
//!
//! `Smq` owns the time-sorted queue and every collaborator the state
//! machine consults: configuration, directory client, wire transport,
//! short-code handlers and the CDR sink.  A reader worker feeds datagrams
//! in through [`Smq::accept_datagram`]; a writer worker drives due entries
//! through [`Smq::process_pending`].
//!
//! Locking: the queue mutex is the only shared-state lock.  The writer
//! removes the due entry before running lookups or sends, so the lock is
//! never held across a directory call or a datagram emit.

use crate::config::Config;
use crate::directory::{fallback_imsi_to_phone, fallback_phone_to_imsi, Directory};
use crate::error::{SmqError, SmqResult};
use crate::limits::clamp_sms_body;
use crate::message::{taghash_of, QueuedMessage};
use crate::network::{format_addr, new_call_number, new_random_number, parse_addr, Transport};
use crate::queue::{now_ms, MessageQueue};
use crate::responder::build_sip_ack;
use crate::shortcode::{
    install_default_handlers, ShortCodeAction, ShortCodeContext, ShortCodeHandler,
    ShortCodeMap, ShortCodeParams,
};
use crate::sip::{CSeq, CallId, NameAddr, SipUri, Via};
use crate::types::{ContentType, Method, QueueState, STATE_COUNT};
use crate::validation::{validate_short_msg, ValidatorCtx};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// "No Timeout": only an external event should advance the entry
const NT: u64 = 3_000_000;
/// "Re Try": start over from scratch after an error
const RT: u64 = 300_000;
/// Grace added when the far end acknowledged with a 1xx
const TT: u64 = 60_000;

/// Transition-timeout matrix in milliseconds, `BASE_TIMEOUTS[from][to]`.
/// A set-state computes `next_action_time = now + timeouts[old][new]`.
#[rustfmt::skip]
const BASE_TIMEOUTS: [[u64; STATE_COUNT]; STATE_COUNT] = [
    // to:  NS      IS      RF      AF      WD      RD      AD      WS      RS      AS      WM      RM      AM      DM      WR      RH      AR
    /* NS */ [NT,      0,      0,     NT,     NT,      0,     NT,     NT,      0,     NT,     NT,      0,     NT,      0,     NT,     NT,     NT],
    /* IS */ [ 0,      0,      0,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,     NT,      0,     NT,     NT,     NT],
    /* RF */ [ 0,     NT, 10_000, 10_000,     NT,      0,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,  1_000,      0,     NT],
    /* AF */ [ 0,     NT, 60_000,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,     NT,     NT,     NT],
    /* WD */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,     NT,     NT,     NT],
    /* RD */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT,      0,     NT,     NT,     NT,     NT,      0,     NT,     NT,     NT],
    /* AD */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,     NT,     NT,     NT],
    /* WS */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,     NT,     NT,     NT],
    /* RS */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,      0,     NT,      0,     NT,     NT,     NT],
    /* AS */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,     NT,     NT,     NT],
    /* WM */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT,     NT,     NT, 75_000,      0,     NT,      0,     NT,     NT,     NT],
    /* RM */ [ 0,     NT,     RT,     NT,     RT,     NT,     NT,     NT, 15_000,     NT, 75_000, 75_000, 15_000,      0,     NT,     NT,     NT],
    /* AM */ [ 0,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT, 60_000, 10_000,     TT,      0,     NT,     NT,     NT],
    /* DM */ [ 0,      0,      0,      0,      0,      0,      0,      0,      0,      0,      0,      0,      0,      0,      0,      0,      0],
    /* WR */ [ 0,     NT,      0,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,  1_000,      0,     NT],
    /* RH */ [ 0,     NT,      0,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,  1_000,  1_000,  2_000],
    /* AR */ [ 0,     NT,      0,     NT,     RT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,     NT,      0,  1_000,  1_000, 10_000],
];

/// Upstream relay for off-network destinations
#[derive(Debug, Clone)]
struct GlobalRelay {
    host: String,
    port: u16,
    content_type: ContentType,
}

#[derive(Default)]
struct RegisterCall {
    call_id: Option<CallId>,
    cseq: u64,
}

#[derive(Default)]
struct SpacingTimer {
    last_send: u64,
}

/// Command passed from the reader worker to the writer worker
#[derive(Debug)]
pub enum SmqCommand {
    /// Acknowledge the original sender; `payload` is `None` when the
    /// datagram was a response or could not be parsed at all
    Ack {
        code: u32,
        payload: Option<Vec<u8>>,
        dest: SocketAddr,
    },
    /// Something was enqueued: run a state-machine pass right away
    DeliverNow,
    /// Save the queue and exit
    PersistAndExit,
}

/// The store-and-forward queue service
pub struct Smq {
    config: Config,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    short_codes: ShortCodeMap,
    queue: Mutex<MessageQueue>,
    timeouts: [[u64; STATE_COUNT]; STATE_COUNT],
    cdr: Mutex<Option<File>>,

    my_ipaddress: String,
    my_udp_port: u16,
    my_2nd_ipaddress: Option<String>,
    register_host: String,
    register_port: u16,
    global_relay: Option<GlobalRelay>,
    relaxed_verify: bool,
    print_as_we_validate: bool,

    register_call: Mutex<RegisterCall>,
    spacing: Mutex<SpacingTimer>,
    stop_main_loop: AtomicBool,
    reexec_requested: AtomicBool,
}

impl Smq {
    pub fn new(
        config: Config,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> SmqResult<Smq> {
        let my_ipaddress = config.get_str("SIP.myIP").to_string();
        let my_udp_port = config.get_num("SIP.myPort") as u16;
        let my_2nd_ipaddress = if config.defines("SIP.myIP2") {
            Some(config.get_str("SIP.myIP2").to_string())
        } else {
            None
        };

        // Registration target, "host:port".
        let register_hostport = config.get_str("Asterisk.address");
        let (register_host, register_port) = match register_hostport.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse::<u16>().map_err(|_| {
                    SmqError::parse_error(
                        format!("Invalid Asterisk.address: {}", register_hostport),
                        None,
                    )
                })?,
            ),
            None => (register_hostport.to_string(), 5060),
        };

        // The relay is only live when address, port and content type are
        // all configured.
        let global_relay = if config.defines("SIP.GlobalRelay.IP")
            && config.defines("SIP.GlobalRelay.Port")
            && config.defines("SIP.GlobalRelay.ContentType")
        {
            Some(GlobalRelay {
                host: config.get_str("SIP.GlobalRelay.IP").to_string(),
                port: config.get_num("SIP.GlobalRelay.Port") as u16,
                content_type: ContentType::from_str(config.get_str("SIP.GlobalRelay.ContentType"))
                    .unwrap_or(ContentType::Vnd3gppSms),
            })
        } else {
            None
        };

        let mut timeouts = BASE_TIMEOUTS;
        if config.defines("SIP.Timeout.MessageBounce") {
            let bounce_ms = config.get_num("SIP.Timeout.MessageBounce").max(0) as u64 * 1000;
            timeouts[QueueState::RequestDestImsi.index()][QueueState::DeleteMe.index()] =
                bounce_ms;
        }
        if config.defines("SIP.Timeout.MessageResend") {
            // Recognized but not applied to any matrix cell.
            debug!(
                "SIP.Timeout.MessageResend = {}",
                config.get_num("SIP.Timeout.MessageResend")
            );
        }

        let cdr = if config.defines("CDRFile") {
            let path = config.get_str("CDRFile");
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    error!("CDR file at {} could not be created or opened: {}", path, e);
                    None
                }
            }
        } else {
            None
        };

        let mut short_codes = ShortCodeMap::new();
        install_default_handlers(&mut short_codes, &config);

        let relaxed_verify = config.get_bool("SIP.GlobalRelay.RelaxedVerify");
        let print_as_we_validate = config.get_bool("Debug.print_as_we_validate");

        Ok(Smq {
            config,
            directory,
            transport,
            short_codes,
            queue: Mutex::new(MessageQueue::new()),
            timeouts,
            cdr: Mutex::new(cdr),
            my_ipaddress,
            my_udp_port,
            my_2nd_ipaddress,
            register_host,
            register_port,
            global_relay,
            relaxed_verify,
            print_as_we_validate,
            register_call: Mutex::new(RegisterCall::default()),
            spacing: Mutex::new(SpacingTimer::default()),
            stop_main_loop: AtomicBool::new(false),
            reexec_requested: AtomicBool::new(false),
        })
    }

    /// Replace or add a short-code handler (custom deployments, tests)
    pub fn add_short_code(&mut self, code: &str, handler: ShortCodeHandler) {
        self.short_codes.insert(code, handler);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// `(state, qtag)` of every queued entry in time order
    pub fn snapshot_states(&self) -> Vec<(QueueState, String)> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .map(|qmsg| (qmsg.state, qmsg.qtag.clone()))
            .collect()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_main_loop.load(Ordering::Relaxed)
    }

    pub fn reexec_requested(&self) -> bool {
        self.reexec_requested.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self, reexec: bool) {
        if reexec {
            self.reexec_requested.store(true, Ordering::Relaxed);
        }
        self.stop_main_loop.store(true, Ordering::Relaxed);
    }

    fn timeout(&self, from: QueueState, to: QueueState) -> u64 {
        self.timeouts[from.index()][to.index()]
    }

    /// Lock the queue for persistence and inspection
    pub(crate) fn queue_mut(&self) -> std::sync::MutexGuard<'_, MessageQueue> {
        self.queue.lock().unwrap()
    }

    fn validator_deliverable(&self) -> impl Fn(&str) -> bool + '_ {
        move |user: &str| self.to_is_deliverable(user)
    }

    /// Can this destination be routed without the relay: either a short
    /// code, or a phone number the directory maps to an IMSI?
    fn to_is_deliverable(&self, user: &str) -> bool {
        self.short_codes.contains(user) || self.phone_to_imsi_checked(user).is_some()
    }

    /// Phone → IMSI through the directory with the test-bench fallback;
    /// results that do not look like an IMSI are discarded.
    fn phone_to_imsi_checked(&self, phone: &str) -> Option<String> {
        let newdest = self
            .directory
            .phone_to_imsi(phone)
            .or_else(|| fallback_phone_to_imsi(phone));
        newdest.filter(|d| is_imsi_name(d))
    }

    fn imsi_to_phone_with_fallback(&self, imsi: &str) -> Option<String> {
        self.directory
            .imsi_to_phone(imsi)
            .or_else(|| fallback_imsi_to_phone(imsi))
    }

    /// Validate a queued message against our local identity
    pub(crate) fn validate(&self, qmsg: &mut QueuedMessage, allow_early_check: bool) -> u32 {
        let deliverable = self.validator_deliverable();
        let ctx = ValidatorCtx {
            my_ipaddress: &self.my_ipaddress,
            my_2nd_ipaddress: self.my_2nd_ipaddress.as_deref(),
            global_relay: self
                .global_relay
                .as_ref()
                .map(|relay| (relay.host.as_str(), relay.port)),
            relaxed_verify: self.relaxed_verify,
            print_as_we_validate: self.print_as_we_validate,
            deliverable: Some(&deliverable),
        };
        validate_short_msg(qmsg, &ctx, allow_early_check)
    }

    // ----- reader side ---------------------------------------------------

    /// Validate a datagram fresh off the wire, enqueue it when acceptable,
    /// and hand back the acknowledgement command for the writer.
    pub fn accept_datagram(&self, data: &[u8], src: SocketAddr) -> SmqCommand {
        let text = String::from_utf8_lossy(data).into_owned();
        let mut qmsg = QueuedMessage::from_wire(text, src);
        qmsg.ms_to_sc = true;

        let errcode = self.validate(&mut qmsg, true);
        if errcode == 0 {
            let payload = build_sip_ack(202, &mut qmsg)
                .ok()
                .flatten()
                .map(String::into_bytes);
            if payload.is_some() {
                info!("Got SMS rqst qtag '{}' from {}", qmsg.qtag, format_addr(&src));
            } else {
                info!("Got SMS response qtag '{}'", qmsg.qtag);
            }
            self.insert_new_message(qmsg, QueueState::Initial, None);
            SmqCommand::Ack {
                code: 202,
                payload,
                dest: src,
            }
        } else {
            warn!("Received bad message, error {}", errcode);
            let payload = build_sip_ack(errcode, &mut qmsg)
                .ok()
                .flatten()
                .map(String::into_bytes);
            SmqCommand::Ack {
                code: errcode,
                payload,
                dest: src,
            }
        }
    }

    /// Execute a reader command on the writer side
    pub fn run_command(&self, command: SmqCommand) {
        match command {
            SmqCommand::Ack { code, payload, dest } => {
                if let Some(bytes) = payload {
                    info!("Responding with {}", code);
                    if let Err(e) = self.transport.send_datagram(&bytes, dest) {
                        error!("Trouble sending the response: {}", e);
                    }
                }
            }
            SmqCommand::DeliverNow => self.process_pending(),
            SmqCommand::PersistAndExit => self.request_stop(false),
        }
    }

    pub fn insert_new_message(
        &self,
        mut qmsg: QueuedMessage,
        state: QueueState,
        at: Option<u64>,
    ) {
        let at = at.unwrap_or_else(now_ms);
        qmsg.state = state;
        qmsg.next_action_time = at;
        self.queue.lock().unwrap().insert(qmsg);
    }

    // ----- writer side ---------------------------------------------------

    /// Drain every due entry at the current time
    pub fn process_pending(&self) {
        while self.process_one(now_ms()) {}
    }

    /// Run one state-machine pass against the due head, if any.  `now` is
    /// injectable so tests can drive the clock.
    pub fn process_one(&self, now: u64) -> bool {
        let mut qmsg = match self.queue.lock().unwrap().pop_due(now) {
            Some(qmsg) => qmsg,
            None => return false,
        };
        let state = qmsg.state;
        debug!(
            "Processing message '{}' in state {}",
            qmsg.qtag, state
        );

        match state {
            QueueState::Initial => {
                let is_request = match qmsg.is_request() {
                    Ok(is_request) => is_request,
                    Err(_) => {
                        error!("Queued entry no longer parses; deleting");
                        return true;
                    }
                };
                if is_request {
                    let is_message = qmsg
                        .msg
                        .parsed()
                        .and_then(|p| p.method())
                        .is_some_and(|m| *m == Method::MESSAGE);
                    if is_message {
                        let newstate = match self.handle_short_code(&mut qmsg) {
                            Some(newstate) => newstate,
                            None => QueueState::RequestFromLookup,
                        };
                        self.set_state_and_requeue(qmsg, state, newstate, now);
                    } else {
                        warn!("Invalid incoming SIP message, not a MESSAGE request");
                        self.set_state_and_requeue(qmsg, state, QueueState::NoState, now);
                    }
                } else {
                    self.handle_response(qmsg, now);
                }
            }

            QueueState::NoState => {
                // Broken entries get dumped to the log and deleted.
                let text = qmsg
                    .msg
                    .make_text_valid()
                    .map(str::to_string)
                    .unwrap_or_else(|_| "<unprintable>".to_string());
                info!("== This message had an error and is being deleted: {}", text);
            }

            QueueState::DeleteMe => {}

            QueueState::RequestFromLookup => {
                let newstate = self.lookup_from_address(&mut qmsg);
                self.set_state_and_requeue(qmsg, state, newstate, now);
            }

            QueueState::RequestDestImsi => {
                let newstate = self.lookup_uri_imsi(&mut qmsg);
                self.set_state_and_requeue(qmsg, state, newstate, now);
            }

            QueueState::RequestDestSipUrl => {
                let newstate = self.lookup_uri_hostport(&mut qmsg);
                self.set_state_and_requeue(qmsg, state, newstate, now);
            }

            QueueState::AwaitingTryDelivery => {
                // Waited long enough: try delivery again right now.
                qmsg.state = QueueState::RequestDelivery;
                self.request_delivery(qmsg, now);
            }

            QueueState::RequestDelivery => {
                self.request_delivery(qmsg, now);
            }

            QueueState::AskedForDelivery => {
                // Sent but never acknowledged; back off before resending.
                self.set_state_and_requeue(qmsg, state, QueueState::AwaitingTryDelivery, now);
            }

            QueueState::AwaitingRegisterHandset => {
                if self.ready_to_register(&mut qmsg) {
                    qmsg.state = QueueState::RegisterHandset;
                    let newstate = self.register_handset(&mut qmsg);
                    self.set_state_and_requeue(qmsg, QueueState::RegisterHandset, newstate, now);
                } else {
                    // Directory not updated yet; re-arm the short poll.
                    self.set_state_and_requeue(
                        qmsg,
                        state,
                        QueueState::AwaitingRegisterHandset,
                        now,
                    );
                }
            }

            QueueState::RegisterHandset => {
                let newstate = self.register_handset(&mut qmsg);
                self.set_state_and_requeue(qmsg, state, newstate, now);
            }

            QueueState::AskedToRegisterHandset => {
                // The registration never got answered; cycle back and retry.
                self.set_state_and_requeue(qmsg, state, QueueState::AwaitingRegisterHandset, now);
            }

            // Wait states whose timeout fired without the expected event:
            // drop the entry back to INITIAL and rerun the from-lookup at
            // once.  Routing these to the error sink instead may be more
            // correct; see DESIGN.md.
            QueueState::AskedForFromLookup
            | QueueState::AwaitingTryDestImsi
            | QueueState::AskedForDestImsi
            | QueueState::AwaitingTryDestSipUrl
            | QueueState::AskedForDestSipUrl => {
                error!("Message timed out with state {}", state);
                qmsg.state = QueueState::Initial;
                let newstate = self.lookup_from_address(&mut qmsg);
                self.set_state_and_requeue(qmsg, QueueState::Initial, newstate, now);
            }
        }
        true
    }

    /// Re-queue with `next_action_time = now + timeouts[old][new]`.
    /// Delete-me entries are requeued too (at zero delay); they evaporate
    /// on the next pop, which keeps the "removed before the next pop"
    /// guarantee observable in one place.
    fn set_state_and_requeue(
        &self,
        mut qmsg: QueuedMessage,
        old: QueueState,
        new: QueueState,
        now: u64,
    ) {
        let at = now + self.timeout(old, new);
        qmsg.state = new;
        qmsg.next_action_time = at;
        self.queue.lock().unwrap().insert(qmsg);
    }

    // ----- response correlation ------------------------------------------

    /// A validated SIP response reached the head of the queue.  Find the
    /// request it answers and advance, retry, bounce or retire it.  The
    /// response entry itself is consumed.
    fn handle_response(&self, mut resp: QueuedMessage, now: u64) {
        let (code, reason) = match resp.msg.make_parsed_valid() {
            Ok(parsed) => (
                parsed.status_code().unwrap_or(0),
                match parsed.start {
                    crate::sip::StartLine::Status { ref reason, .. } => reason.clone(),
                    _ => String::new(),
                },
            ),
            Err(_) => {
                warn!("Response entry no longer parses; dropping");
                return;
            }
        };

        enum FollowUp {
            None,
            Freed(QueuedMessage),
            Bounce(QueuedMessage, QueueState, String),
        }

        let acked_resend_ms = {
            let seconds = self.config.get_num("SIP.Timeout.ACKedMessageResend");
            if seconds > 0 {
                seconds as u64 * 1000
            } else {
                TT
            }
        };

        let mut followup = FollowUp::None;
        {
            let mut queue = self.queue.lock().unwrap();
            match queue.find_by_tag(&resp.qtag, resp.qtag_hash) {
                None => {
                    // A late duplicate, or the request already retired.
                    info!(
                        "Couldn't find message for response tag '{}'; ignoring",
                        resp.qtag
                    );
                    return;
                }
                Some(sent) => {
                    info!(
                        "Got {} response for sent msg '{}' in state {}",
                        code, sent.qtag, sent.state
                    );
                    if !matches!(
                        sent.state,
                        QueueState::AskedForDelivery
                            | QueueState::RequestDelivery
                            | QueueState::RequestDestSipUrl
                            | QueueState::AwaitingTryDelivery
                    ) {
                        // A forked request can legally be mid-lookup when a
                        // second fork answers; keep going.
                        error!("*** That's not a pleasant state. ***");
                    }
                }
            }

            match code / 100 {
                1 | 5 => {
                    // Interim response or server congestion: the network is
                    // alive, push the resend out.
                    if code / 100 == 5 {
                        warn!("Congestion at the base station?!");
                    }
                    if let Some(mut sent) = queue.take_by_tag(&resp.qtag, resp.qtag_hash) {
                        sent.next_action_time = now + acked_resend_ms;
                        queue.insert(sent);
                    }
                }
                2 => {
                    let sent = queue
                        .take_by_tag(&resp.qtag, resp.qtag_hash)
                        .expect("located above under the same lock");
                    followup = FollowUp::Freed(sent);
                }
                3 | 6 => {
                    // Redirected or rejected here: look the destination up
                    // again from scratch.
                    if let Some(sent) = queue.take_by_tag(&resp.qtag, resp.qtag_hash) {
                        let old = sent.state;
                        let at = now + self.timeout(old, QueueState::RequestDestImsi);
                        let mut sent = sent;
                        sent.state = QueueState::RequestDestImsi;
                        sent.next_action_time = at;
                        queue.insert(sent);
                    }
                }
                4 => {
                    if code == 480 || code == 486 {
                        // Temporarily unavailable / busy: likely out of
                        // coverage without unregistering.  Retry later.
                        if let Some(mut sent) = queue.take_by_tag(&resp.qtag, resp.qtag_hash) {
                            sent.next_action_time = now + acked_resend_ms;
                            queue.insert(sent);
                        }
                    } else if let Some(sent) = queue.take_by_tag(&resp.qtag, resp.qtag_hash) {
                        let old = sent.state;
                        followup =
                            FollowUp::Bounce(sent, old, format!("{} {}", code, reason));
                    }
                }
                _ => {
                    warn!("Unknown status code {} in SIP response", code);
                }
            }
        }

        // Queue lock released: side effects may lock again or hit the wire.
        match followup {
            FollowUp::None => {}
            FollowUp::Freed(mut sent) => {
                let method = sent
                    .msg
                    .make_parsed_valid()
                    .ok()
                    .and_then(|p| p.method().cloned());
                if method == Some(Method::REGISTER) {
                    self.wake_linked_shortcode(&sent, now);
                }
                if method == Some(Method::MESSAGE) {
                    self.write_cdr(&mut sent);
                }
                info!("Deleting sent message '{}'", sent.qtag);
            }
            FollowUp::Bounce(mut sent, old, errstr) => {
                let newstate = self.bounce_message(&mut sent, &errstr);
                let at = now + self.timeout(old, newstate);
                sent.state = newstate;
                sent.next_action_time = at;
                self.queue.lock().unwrap().insert(sent);
            }
        }
    }

    /// A REGISTER we originated was accepted: wake the shortcode entry that
    /// caused it so the register handler can issue the welcome reply.
    fn wake_linked_shortcode(&self, sent: &QueuedMessage, now: u64) {
        let link = match sent.link_tag {
            Some(ref link) => link.clone(),
            None => return,
        };
        let mut queue = self.queue.lock().unwrap();
        match queue.take_by_tag(&link, taghash_of(&link)) {
            Some(mut oldsms) if oldsms.state.is_register_state() => {
                // Re-run the SMS now that we can reply to it.
                let old = oldsms.state;
                oldsms.state = QueueState::Initial;
                oldsms.next_action_time = now + self.timeout(old, QueueState::Initial);
                queue.insert(oldsms);
            }
            Some(oldsms) => {
                // Exists but mid-retry somewhere; leave it be.
                queue.insert(oldsms);
            }
            None => {
                info!(
                    "Can't find SMS message for newly registered handset, linktag '{}'",
                    link
                );
            }
        }
    }

    // ----- per-state lookups ---------------------------------------------

    /// Translate the From IMSI to its phone number and note ourselves in a
    /// Via so replies can route back.
    fn lookup_from_address(&self, qmsg: &mut QueuedMessage) -> QueueState {
        let my_ip = self.my_ipaddress.clone();
        let my_port = self.my_udp_port;

        let fromuser = {
            let parsed = match qmsg.msg.parsed_mut() {
                Ok(parsed) => parsed,
                Err(_) => return QueueState::NoState,
            };
            let from = match parsed.from {
                Some(ref from) => from,
                None => {
                    error!("no From header");
                    return QueueState::NoState;
                }
            };
            if from.uri.scheme != crate::types::Scheme::Sip {
                error!("From scheme != sip");
                return QueueState::NoState;
            }
            let fromuser = match from.uri.username {
                Some(ref user) => user.clone(),
                None => {
                    error!("No from user name");
                    return QueueState::NoState;
                }
            };
            parsed.vias.push(Via::new(&my_ip, my_port));
            fromuser
        };

        // Already a phone number: nothing to translate.
        if fromuser.starts_with('+') || fromuser.starts_with(|c: char| c.is_ascii_digit()) {
            return QueueState::RequestDestImsi;
        }

        let tryuser = strip_imsi_prefix(&fromuser);
        if tryuser.len() != 14 && tryuser.len() != 15 {
            error!("Message does not have a valid IMSI!");
            return QueueState::NoState;
        }

        match self.imsi_to_phone_with_fallback(&fromuser) {
            Some(newfrom) => {
                let parsed = match qmsg.msg.parsed_mut() {
                    Ok(parsed) => parsed,
                    Err(_) => return QueueState::NoState,
                };
                if let Some(ref mut from) = parsed.from {
                    from.uri.username = Some(newfrom.clone());
                    from.display_name = Some(newfrom);
                }
                QueueState::RequestDestImsi
            }
            None => {
                // The relay path may still deliver; press on unrewritten.
                info!("Lookup IMSI <{}> to phonenum failed", fromuser);
                QueueState::RequestDestImsi
            }
        }
    }

    /// Translate the Request-URI phone number to an IMSI, or route to the
    /// relay, or bounce.
    fn lookup_uri_imsi(&self, qmsg: &mut QueuedMessage) -> QueueState {
        let username = {
            let parsed = match qmsg.msg.parsed_mut() {
                Ok(parsed) => parsed,
                Err(_) => return QueueState::NoState,
            };
            let uri = match parsed.request_uri() {
                Some(uri) => uri,
                None => return QueueState::NoState,
            };
            if uri.scheme != crate::types::Scheme::Sip {
                error!("scheme != sip");
                return QueueState::NoState;
            }
            match uri.username {
                Some(ref user) => user.clone(),
                None => {
                    error!("No user name");
                    return QueueState::NoState;
                }
            }
        };

        if username.starts_with('+') || !is_imsi_name(&username) {
            // A phone number in need of translation.
            match self.phone_to_imsi_checked(&username) {
                Some(newdest) => {
                    if let Ok(parsed) = qmsg.msg.parsed_mut() {
                        if let Some(uri) = parsed.request_uri_mut() {
                            uri.username = Some(newdest);
                        }
                    }
                    QueueState::RequestDestSipUrl
                }
                None => match self.global_relay {
                    None => {
                        warn!(
                            "no global relay defined; bouncing message intended for {}",
                            username
                        );
                        let text = self
                            .config
                            .get_str("Bounce.Message.NotRegistered")
                            .to_string();
                        self.bounce_message(qmsg, &text)
                    }
                    Some(ref relay) => {
                        // Hand it to the relay: leave the phone number in
                        // place and map our local From number to its global
                        // form so replies can find the way back.
                        info!(
                            "using global SIP relay {}:{} to route message to {}",
                            relay.host, relay.port, username
                        );
                        let relay_ct = relay.content_type;
                        if let Ok(parsed) = qmsg.msg.parsed_mut() {
                            if let Some(ref mut from) = parsed.from {
                                if let Some(ref local) = from.uri.username {
                                    if let Some(global) =
                                        self.directory.map_clid_global(local)
                                    {
                                        from.uri.username = Some(global);
                                    }
                                }
                            }
                        }
                        self.convert_content_type(qmsg, relay_ct);
                        QueueState::RequestDestSipUrl
                    }
                },
            }
        } else {
            // Already an IMSI; sanity-check the digits and route it.
            let tryuser = strip_imsi_prefix(&username);
            if tryuser.len() != 14 && tryuser.len() != 15 {
                error!("Invalid IMSI: {}", username);
                return QueueState::NoState;
            }
            QueueState::RequestDestSipUrl
        }
    }

    /// Resolve the destination cell (or relay) address, rewrite the
    /// Request-URI, and mint the fresh Call-ID that marks this delivery
    /// attempt.
    fn lookup_uri_hostport(&self, qmsg: &mut QueuedMessage) -> QueueState {
        let username = {
            let parsed = match qmsg.msg.parsed_mut() {
                Ok(parsed) => parsed,
                Err(_) => return QueueState::NoState,
            };
            match parsed.request_uri().and_then(|uri| uri.username.clone()) {
                Some(user) => user,
                None => {
                    error!("No IMSI");
                    return QueueState::NoState;
                }
            }
        };

        let (mut newhost, mut newport) = (None::<String>, None::<u16>);
        if username.starts_with('+') || !is_imsi_name(&username) {
            // Phone numbers can only go out through the relay.
            if let Some(ref relay) = self.global_relay {
                newhost = Some(relay.host.clone());
                newport = Some(relay.port);
                let relay_ct = relay.content_type;
                self.convert_content_type(qmsg, relay_ct);
            }
        } else if let Some(location) = self.directory.imsi_to_location(&username) {
            match location.rsplit_once(':') {
                Some((host, port)) => {
                    newhost = Some(host.to_string());
                    newport = port.parse::<u16>().ok();
                }
                None => newhost = Some(location),
            }
        }

        // Directory silent: the test bench default.
        let newhost =
            newhost.unwrap_or_else(|| "127.0.0.1".to_string());
        let newport = newport
            .unwrap_or_else(|| self.config.get_num("SIP.Default.BTSPort") as u16);

        debug!("We will send to {} on {}", newhost, newport);

        let my_ip = self.my_ipaddress.clone();
        {
            let parsed = match qmsg.msg.parsed_mut() {
                Ok(parsed) => parsed,
                Err(_) => return QueueState::NoState,
            };
            if let Some(uri) = parsed.request_uri_mut() {
                uri.host = newhost;
                uri.port = Some(newport);
            }
            // A re-resolve is a new message and needs a new Call-ID, so it
            // won't be confused with earlier attempts.
            parsed.call_id = Some(CallId::new(&new_call_number(), &my_ip));
        }
        if qmsg.set_qtag().is_err() {
            return QueueState::NoState;
        }
        QueueState::RequestDelivery
    }

    // ----- delivery -------------------------------------------------------

    /// One delivery attempt: retry accounting, rate limiting, repack, emit.
    fn request_delivery(&self, mut qmsg: QueuedMessage, now: u64) {
        qmsg.retries += 1;

        if !self.pack_sms_for_delivery(&mut qmsg) {
            error!("pack_sms_for_delivery failed");
            self.set_state_and_requeue(qmsg, QueueState::RequestDelivery, QueueState::NoState, now);
            return;
        }

        // Make sure messages eventually get discarded.
        let max_retries = self.config.get_num("SMS.MaxRetries");
        if max_retries > 0 {
            if i64::from(qmsg.retries) > max_retries {
                info!("MaxRetries: max retries exceeded, dropping message");
                self.set_state_and_requeue(
                    qmsg,
                    QueueState::RequestDelivery,
                    QueueState::DeleteMe,
                    now,
                );
                return;
            }
            info!("MaxRetries: trying attempt #{}", qmsg.retries);
        }

        // Global send spacing, if enabled.
        let rate_ms = self.config.get_num("SMS.RateLimit").max(0) as u64 * 1000;
        if rate_ms > 0 {
            let mut spacing = self.spacing.lock().unwrap();
            if now.saturating_sub(spacing.last_send) < rate_ms {
                info!("RateLimit: trying too soon, not sending yet");
                qmsg.next_action_time += rate_ms;
                drop(spacing);
                self.queue.lock().unwrap().insert(qmsg);
                return;
            }
            spacing.last_send = now;
        }

        let dest = match qmsg.msg.make_parsed_valid() {
            Ok(parsed) => parsed.request_uri().and_then(|uri| {
                let port = uri
                    .port
                    .unwrap_or_else(|| self.config.get_num("SIP.Default.BTSPort") as u16);
                parse_addr(&format!("{}:{}", uri.host, port))
            }),
            Err(_) => None,
        };

        match (dest, qmsg.msg.make_text_valid().map(str::to_string)) {
            (Some(dest), Ok(text)) => {
                info!("Delivering '{}' to {}", qmsg.qtag, format_addr(&dest));
                // Success and failure advance the same way; the timeout
                // machinery owns the retry.
                if let Err(e) = self.transport.send_datagram(text.as_bytes(), dest) {
                    warn!("Delivery send failed: {}", e);
                }
            }
            _ => warn!("Delivery skipped: no destination address for '{}'", qmsg.qtag),
        }
        self.set_state_and_requeue(
            qmsg,
            QueueState::RequestDelivery,
            QueueState::AskedForDelivery,
            now,
        );
    }

    /// Align the body representation with the destination's content type.
    /// The TPDU codec itself lives outside the queue; here we keep the
    /// Content-Type header and the entry's flag coherent.
    fn pack_sms_for_delivery(&self, qmsg: &mut QueuedMessage) -> bool {
        if !qmsg.need_repack {
            return qmsg.msg.make_text_valid().is_ok();
        }
        let target = qmsg.content_type;
        match qmsg.msg.parsed_mut() {
            Ok(parsed) => {
                parsed.content_type = Some(target.to_string());
                qmsg.msg.make_text_valid().is_ok()
            }
            Err(_) => false,
        }
    }

    fn convert_content_type(&self, qmsg: &mut QueuedMessage, to_type: ContentType) {
        debug!(
            "Converting content type from {} to {}",
            qmsg.content_type, to_type
        );
        qmsg.content_type = to_type;
        if let Ok(parsed) = qmsg.msg.parsed_mut() {
            parsed.content_type = Some(to_type.to_string());
        }
    }

    // ----- origination ----------------------------------------------------

    /// Build half of a new message: Call-ID, CSeq, method and our Via.
    /// The caller fills in From, To, the Request-URI and any body.
    /// REGISTER re-sends share one saved Call-ID with a rising CSeq.
    fn originate_half_sm(&self, method: Method) -> SmqResult<QueuedMessage> {
        let mut register_call = self.register_call.lock().unwrap();

        let call_id;
        let cseq_number;
        if method == Method::REGISTER {
            if register_call.call_id.is_none() {
                register_call.call_id =
                    Some(CallId::new(&new_call_number(), &self.my_ipaddress));
                register_call.cseq = 0;
            }
            call_id = register_call.call_id.clone().expect("saved above");
            register_call.cseq += 1;
            cseq_number = register_call.cseq;
        } else {
            call_id = CallId::new(&new_call_number(), &self.my_ipaddress);
            // Short readable numbers.
            cseq_number = u64::from(new_random_number() & 0xFFFF);
        }
        drop(register_call);

        let mut msg = crate::sip::SipMsg::new_request(
            method.clone(),
            SipUri::new(None, &self.my_ipaddress, None),
        );
        msg.call_id = Some(call_id);
        msg.cseq = Some(CSeq {
            number: cseq_number,
            method,
        });
        msg.vias.push(Via::new(&self.my_ipaddress, self.my_udp_port));

        Ok(QueuedMessage::from_parsed(msg))
    }

    /// Originate a complete MESSAGE and start it through the queue.
    /// `to` is an IMSI or a phone number; pick `first_state` accordingly
    /// (REQUEST_DESTINATION_SIPURL for IMSIs, REQUEST_DESTINATION_IMSI for
    /// phone numbers).
    pub fn originate_sm(
        &self,
        from: &str,
        to: &str,
        msgtext: &str,
        first_state: QueueState,
    ) -> SmqResult<()> {
        let mut qmsg = self.originate_half_sm(Method::MESSAGE)?;
        // Plain-text MESSAGEs get repacked before delivery.
        qmsg.need_repack = true;
        qmsg.content_type = ContentType::TextPlain;

        {
            let parsed = qmsg.msg.parsed_mut()?;
            let cseq_number = parsed.cseq.as_ref().expect("set in half-origination").number;

            // The from-tag is cheap: reuse the CSeq number.
            let mut from_addr =
                NameAddr::new(SipUri::new(Some(from), &self.my_ipaddress, None));
            from_addr.display_name = Some(from.to_string());
            from_addr.set_tag(&cseq_number.to_string());
            parsed.from = Some(from_addr);

            parsed.to = Some(NameAddr::new(SipUri::new(
                Some(to),
                &self.my_ipaddress,
                None,
            )));

            let bts_port = self.config.get_num("SIP.Default.BTSPort") as u16;
            if let Some(uri) = parsed.request_uri_mut() {
                *uri = SipUri::new(Some(to), &self.my_ipaddress, Some(bts_port));
            }

            parsed.content_type = Some(ContentType::TextPlain.to_string());
            parsed.body = Some(clamp_sms_body(msgtext).to_string());
        }

        qmsg.set_qtag()?;

        // Serialize, then reparse through the validator to be sure we built
        // something we would accept off the wire ourselves.
        let text = qmsg.msg.make_text_valid()?.to_string();
        qmsg.msg.set_text(text);
        let errcode = self.validate(&mut qmsg, false);
        if errcode != 0 {
            debug!("Short message validate failed, error {}", errcode);
            return Err(SmqError::state_error(
                "originate_sm",
                format!("validation failed with {}", errcode),
            ));
        }

        self.insert_new_message(qmsg, first_state, None);
        Ok(())
    }

    // ----- handset registration -------------------------------------------

    /// Is the IMSI↔phone mapping visible in the directory yet?
    fn ready_to_register(&self, qmsg: &mut QueuedMessage) -> bool {
        let imsi = match qmsg.msg.make_parsed_valid() {
            Ok(parsed) => parsed
                .from
                .as_ref()
                .and_then(|from| from.uri.username.clone()),
            Err(_) => None,
        };
        match imsi {
            Some(imsi) => self.directory.imsi_to_phone(&imsi).is_some(),
            None => false,
        }
    }

    /// Synthesize the SIP REGISTER that associates the handset's IMSI with
    /// its cell, pretending the cell sent it to us.  The new message enters
    /// the queue at REQUEST_MSG_DELIVERY; the shortcode entry that asked
    /// for it advances to ASKED_TO_REGISTER_HANDSET.
    fn register_handset(&self, qmsg: &mut QueuedMessage) -> QueueState {
        debug!("Send register handset message");

        let imsi = match qmsg.msg.make_parsed_valid() {
            Ok(parsed) => match parsed.from.as_ref().and_then(|f| f.uri.username.clone()) {
                Some(imsi) => imsi,
                None => return QueueState::DeleteMe,
            },
            Err(_) => return QueueState::DeleteMe,
        };
        if qmsg.qtag.is_empty() && qmsg.set_qtag().is_err() {
            return QueueState::DeleteMe;
        }

        let mut response = match self.originate_half_sm(Method::REGISTER) {
            Ok(response) => response,
            Err(_) => return QueueState::DeleteMe,
        };
        // A REGISTER carries no SMS payload; nothing to repack.
        response.need_repack = false;

        let source_addr = qmsg.source_addr;
        {
            let parsed = match response.msg.parsed_mut() {
                Ok(parsed) => parsed,
                Err(_) => return QueueState::DeleteMe,
            };
            let cseq_number = parsed.cseq.as_ref().expect("set in half-origination").number;

            // To: the long-term name being registered.
            let mut to_addr = NameAddr::new(SipUri::new(
                Some(imsi.as_str()),
                &self.register_host,
                Some(self.register_port),
            ));
            to_addr.display_name = Some(imsi.clone());

            // From: the same, plus a tag stolen from our CSeq.
            let mut from_addr = to_addr.clone();
            from_addr.set_tag(&cseq_number.to_string());
            parsed.to = Some(to_addr);
            parsed.from = Some(from_addr);

            if let Some(uri) = parsed.request_uri_mut() {
                *uri = SipUri::new(None, &self.register_host, Some(self.register_port));
            }

            // Contact: where we're registering from, i.e. the cell the
            // original shortcode SMS arrived on.
            let cell_host = source_addr.ip().to_string();
            let mut contact = NameAddr::new(SipUri::new(
                Some(imsi.as_str()),
                &cell_host,
                Some(source_addr.port()),
            ));
            contact
                .params
                .push(("expires".to_string(), Some("3600".to_string())));
            parsed.contact = Some(contact);
        }

        if response.set_qtag().is_err() {
            return QueueState::DeleteMe;
        }
        // Tie the REGISTER back to this shortcode message so its 2xx can
        // wake us.
        response.link_tag = Some(qmsg.qtag.clone());

        let text = match response.msg.make_text_valid() {
            Ok(text) => text.to_string(),
            Err(_) => return QueueState::DeleteMe,
        };
        response.msg.set_text(text);
        let errcode = self.validate(&mut response, false);
        if errcode != 0 {
            debug!("Register handset short message failed validation {}", errcode);
            return QueueState::DeleteMe;
        }

        self.insert_new_message(response, QueueState::RequestDelivery, None);
        QueueState::AskedToRegisterHandset
    }

    // ----- short codes ----------------------------------------------------

    /// Dispatch a MESSAGE whose Request-URI username is a registered short
    /// code.  Returns the next state, or `None` when the destination is not
    /// special (or the handler said to treat it as ordinary traffic).
    fn handle_short_code(&self, qmsg: &mut QueuedMessage) -> Option<QueueState> {
        let (code, imsi, body) = {
            let parsed = qmsg.msg.make_parsed_valid().ok()?;
            let code = parsed.request_uri()?.username.clone()?;
            if !self.short_codes.contains(&code) {
                return None;
            }
            let imsi = parsed
                .from
                .as_ref()
                .and_then(|from| from.uri.username.clone())
                .unwrap_or_default();
            let body = parsed.body.clone().unwrap_or_default();
            (code, imsi, body)
        };

        info!("Short-code SMS {} with text \"{}\"", code, body);

        let mut params = ShortCodeParams {
            retries: qmsg.retries,
            reply: None,
        };
        let queue_depth = self.queue_len();
        let action = {
            let ctx = ShortCodeContext {
                config: &self.config,
                directory: &*self.directory,
                queue_depth,
            };
            let handler = self.short_codes.get(&code).expect("checked above");
            handler(&imsi, &body, &mut params, &ctx)
        };

        match action {
            ShortCodeAction::Reply => {
                let reply = params.reply.unwrap_or_default();
                info!("Short-code replies: {}", reply);
                match self.originate_sm(&code, &imsi, &reply, QueueState::RequestDestSipUrl) {
                    Ok(()) => Some(QueueState::DeleteMe),
                    Err(e) => {
                        warn!("Reply failed: {}", e);
                        Some(QueueState::NoState)
                    }
                }
            }
            ShortCodeAction::Done => Some(QueueState::DeleteMe),
            ShortCodeAction::InternalError => {
                error!("Error in short-code function {}({})", code, body);
                Some(QueueState::NoState)
            }
            ShortCodeAction::RetryAfterDelay => {
                qmsg.retries += 1;
                Some(QueueState::RequestFromLookup)
            }
            ShortCodeAction::AwaitRegister => {
                // The phone# is linked to the IMSI; wait for the HLR to
                // show it before registering the cell address.
                Some(QueueState::AwaitingRegisterHandset)
            }
            ShortCodeAction::Register => Some(self.register_handset(qmsg)),
            ShortCodeAction::TreatAsOrdinary => None,
            ShortCodeAction::RestartProcessing => Some(QueueState::Initial),
            ShortCodeAction::ExecQueue => {
                self.request_stop(true);
                Some(QueueState::DeleteMe)
            }
            ShortCodeAction::QuitQueue => {
                self.request_stop(false);
                Some(QueueState::DeleteMe)
            }
        }
    }

    // ----- bounce ----------------------------------------------------------

    /// Send a failure notice back to the sender from the bounce short code.
    /// Returns the next state for the message being bounced.  Messages the
    /// bounce code itself sent are never bounced: that makes endless loops.
    fn bounce_message(&self, qmsg: &mut QueuedMessage, errstr: &str) -> QueueState {
        let (to_user, from_user, thetext) = match qmsg.msg.make_parsed_valid() {
            Ok(parsed) => (
                parsed
                    .to
                    .as_ref()
                    .and_then(|to| to.uri.username.clone())
                    .unwrap_or_default(),
                parsed
                    .from
                    .as_ref()
                    .and_then(|from| from.uri.username.clone())
                    .unwrap_or_default(),
                parsed.body.clone().unwrap_or_default(),
            ),
            Err(_) => return QueueState::NoState,
        };

        info!(
            "Bouncing {} from {} to {}: {}",
            qmsg.qtag, from_user, to_user, errstr
        );
        let errmsg = format!("Can't send your SMS to {}: {}: {}", to_user, errstr, thetext);

        let bounce_code = self.config.get_str("Bounce.Code");
        if from_user == bounce_code {
            // Our own bounce came back undeliverable; drop the loop here.
            return QueueState::NoState;
        }

        let first_state = if is_imsi_name(&from_user) {
            QueueState::RequestDestSipUrl
        } else {
            QueueState::RequestDestImsi
        };
        match self.originate_sm(bounce_code, &from_user, &errmsg, first_state) {
            Ok(()) => QueueState::DeleteMe,
            Err(e) => {
                error!("Bounce origination failed: {}", e);
                QueueState::NoState
            }
        }
    }

    // ----- CDR --------------------------------------------------------------

    /// One audit line per delivered MESSAGE: source, source IMSI,
    /// destination, timestamp.
    fn write_cdr(&self, qmsg: &mut QueuedMessage) {
        let (from, dest) = match qmsg.msg.make_parsed_valid() {
            Ok(parsed) => (
                parsed
                    .from
                    .as_ref()
                    .and_then(|f| f.uri.username.clone())
                    .unwrap_or_default(),
                parsed
                    .to
                    .as_ref()
                    .and_then(|t| t.uri.username.clone())
                    .unwrap_or_default(),
            ),
            Err(_) => return,
        };
        let imsi = self.phone_to_imsi_checked(&from).unwrap_or_default();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut cdr = self.cdr.lock().unwrap();
        match cdr.as_mut() {
            Some(file) => {
                if let Err(e) = writeln!(file, "{},{},{},{}", from, imsi, dest, now) {
                    error!("CDR write failed: {}", e);
                } else {
                    let _ = file.flush();
                }
            }
            None => {
                if self.config.defines("CDRFile") {
                    error!(
                        "CDR file at {} could not be created or opened!",
                        self.config.get_str("CDRFile")
                    );
                }
            }
        }
    }

    /// Dump the queue state to the log
    pub fn debug_dump(&self) {
        let now = now_ms();
        let mut queue = self.queue.lock().unwrap();
        let entries: Vec<(QueueState, i64, String)> = queue
            .iter_reverse()
            .map(|qmsg| {
                let text = qmsg
                    .msg
                    .make_text_valid()
                    .map(str::to_string)
                    .unwrap_or_else(|_| "<unprintable>".to_string());
                (
                    qmsg.state,
                    qmsg.next_action_time as i64 - now as i64,
                    text,
                )
            })
            .collect();
        for (state, dt, text) in entries.iter().rev() {
            debug!("=== State: {}\t{}\nMSG = {}", state, dt, text);
        }
    }
}

/// Does this username name an IMSI (`IMSI...`/`imsi...` prefix)?
pub fn is_imsi_name(name: &str) -> bool {
    let prefix = name.as_bytes().get(..4);
    matches!(prefix, Some(p) if p.eq_ignore_ascii_case(b"imsi"))
}

/// Strip a leading `IMSI`/`imsi` marker, leaving the digits
pub fn strip_imsi_prefix(name: &str) -> &str {
    if is_imsi_name(name) {
        &name[4..]
    } else {
        name
    }
}
