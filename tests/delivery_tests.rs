//! Delivery mechanics: retry bounds, rate limiting, and the response
//! status classes that steer a queued request.

use smq::engine::Smq;
use smq::{now_ms, Config, MemoryTransport, QueueState, TableDirectory};
use std::net::SocketAddr;
use std::sync::Arc;

fn build(
    configure: impl Fn(&mut Config),
) -> (Smq, Arc<MemoryTransport>, Arc<TableDirectory>) {
    let mut config = Config::default();
    configure(&mut config);
    let transport = Arc::new(MemoryTransport::new());
    let directory = Arc::new(TableDirectory::new());
    let smq = Smq::new(config, directory.clone(), transport.clone()).unwrap();
    (smq, transport, directory)
}

fn message_datagram(from: &str, to: &str, body: &str, cseq: u32, tag: &str) -> String {
    format!(
        "MESSAGE sip:{to}@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 127.0.0.1:5062;branch=z9hG4bK{cseq}\r\n\
         From: <sip:{from}@127.0.0.1>;tag={tag}\r\n\
         To: <sip:{to}@127.0.0.1>\r\n\
         Call-ID: {cseq}11@127.0.0.1\r\n\
         CSeq: {cseq} MESSAGE\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn response_datagram(code: u16, reason: &str, tag: &str, cseq: u32) -> String {
    format!(
        "SIP/2.0 {code} {reason}\r\n\
         Via: SIP/2.0/UDP 127.0.0.1:5063;branch=123\r\n\
         From: <sip:+17074700741@127.0.0.1>;tag={tag}\r\n\
         To: <sip:+17074700746@127.0.0.1>\r\n\
         Call-ID: 42@127.0.0.1\r\n\
         CSeq: {cseq} MESSAGE\r\n\
         Content-Length: 0\r\n\r\n"
    )
}

fn bts_addr() -> SocketAddr {
    "127.0.0.1:5062".parse().unwrap()
}

fn drain(smq: &Smq, now: u64) {
    while smq.process_one(now) {}
}

fn delivery_count(transport: &MemoryTransport) -> usize {
    transport
        .take_sent()
        .iter()
        .filter(|(bytes, _)| bytes.starts_with(b"MESSAGE"))
        .count()
}

/// Accept one resolvable message (fallback pair sender and destination).
fn accept_default_message(smq: &Smq, cseq: u32, tag: &str) {
    let datagram = message_datagram("IMSI666410186585295", "+17074700746", "payload", cseq, tag);
    smq.accept_datagram(datagram.as_bytes(), bts_addr());
}

#[test]
fn test_retry_exhaustion_sends_exactly_max_retries() {
    let (smq, transport, _) = build(|config| {
        config.set("SMS.MaxRetries", "3");
    });
    accept_default_message(&smq, 1, "aa");

    // Nobody ever answers; walk the clock far past the retry cadence.
    let t0 = now_ms();
    let mut t = t0;
    while t < t0 + 600_000 {
        drain(&smq, t);
        t += 5_000;
    }

    assert_eq!(delivery_count(&transport), 3);
    assert_eq!(smq.queue_len(), 0, "exhausted entry must be deleted");
}

#[test]
fn test_rate_limit_spaces_sends() {
    let (smq, transport, _) = build(|config| {
        config.set("SMS.RateLimit", "5");
    });
    accept_default_message(&smq, 1, "ra");
    accept_default_message(&smq, 2, "rb");

    let t0 = now_ms();
    drain(&smq, t0);
    // Only the first went out; the second was pushed past the spacing gap.
    assert_eq!(delivery_count(&transport), 1);
    let states: Vec<QueueState> = smq.snapshot_states().into_iter().map(|(s, _)| s).collect();
    assert!(states.contains(&QueueState::RequestDelivery));

    drain(&smq, t0 + 5_100);
    assert_eq!(delivery_count(&transport), 1);
}

#[test]
fn test_1xx_bumps_timeout_without_state_change() {
    let (smq, _, _) = build(|_| {});
    accept_default_message(&smq, 1, "bb");
    let t0 = now_ms();
    drain(&smq, t0);

    smq.accept_datagram(response_datagram(100, "Trying...", "bb", 1).as_bytes(), bts_addr());
    drain(&smq, t0 + 1);

    // Still waiting for the real answer, just later.
    let states = smq.snapshot_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].0, QueueState::AskedForDelivery);

    // The 15 s ask-timeout would have fired without the bump; it must not.
    drain(&smq, t0 + 20_000);
    let states = smq.snapshot_states();
    assert_eq!(states[0].0, QueueState::AskedForDelivery);
}

#[test]
fn test_480_bumps_timeout_like_interim() {
    let (smq, _, _) = build(|_| {});
    accept_default_message(&smq, 1, "cc");
    let t0 = now_ms();
    drain(&smq, t0);

    smq.accept_datagram(
        response_datagram(480, "Temporarily Unavailable", "cc", 1).as_bytes(),
        bts_addr(),
    );
    drain(&smq, t0 + 1);

    let states = smq.snapshot_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].0, QueueState::AskedForDelivery);
}

#[test]
fn test_5xx_bumps_timeout() {
    let (smq, _, _) = build(|_| {});
    accept_default_message(&smq, 1, "dd");
    let t0 = now_ms();
    drain(&smq, t0);

    smq.accept_datagram(
        response_datagram(503, "Service Unavailable", "dd", 1).as_bytes(),
        bts_addr(),
    );
    drain(&smq, t0 + 1);

    let states = smq.snapshot_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].0, QueueState::AskedForDelivery);
}

#[test]
fn test_3xx_restarts_destination_resolution() {
    let (smq, _, _) = build(|_| {});
    accept_default_message(&smq, 1, "ee");
    let t0 = now_ms();
    drain(&smq, t0);

    smq.accept_datagram(
        response_datagram(302, "Moved Temporarily", "ee", 1).as_bytes(),
        bts_addr(),
    );
    drain(&smq, t0 + 1);

    let states = smq.snapshot_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].0, QueueState::RequestDestImsi);
}

#[test]
fn test_hard_4xx_bounces_to_sender() {
    let (smq, transport, _) = build(|_| {});
    accept_default_message(&smq, 1, "ff");
    let t0 = now_ms();
    drain(&smq, t0);
    // Clear the first delivery off the ledger.
    let _ = transport.take_sent();

    smq.accept_datagram(response_datagram(404, "Not Found", "ff", 1).as_bytes(), bts_addr());
    drain(&smq, now_ms());

    let sent: Vec<String> = transport
        .take_sent()
        .into_iter()
        .map(|(bytes, _)| String::from_utf8(bytes).unwrap())
        .collect();
    let bounce = sent
        .iter()
        .find(|text| text.starts_with("MESSAGE"))
        .expect("bounce delivered");
    assert!(bounce.contains("From: 101<sip:101@"));
    assert!(bounce.contains("Can't send your SMS to +17074700746: 404 Not Found:"));
}

#[test]
fn test_delivery_resend_cadence() {
    let (smq, transport, _) = build(|_| {});
    accept_default_message(&smq, 1, "gg");
    let t0 = now_ms();
    drain(&smq, t0);
    assert_eq!(delivery_count(&transport), 1);

    // Ask timeout at +15 s, awaiting at +60 s more, then the resend.
    drain(&smq, t0 + 15_500);
    assert_eq!(delivery_count(&transport), 0, "no resend during backoff");
    drain(&smq, t0 + 76_000);
    assert_eq!(delivery_count(&transport), 1, "resend after the backoff");
}
