//! Short-code dispatch end to end: replies, the registration chain, and
//! handler directives.

use smq::engine::Smq;
use smq::shortcode::ShortCodeAction;
use smq::{now_ms, Config, Directory, MemoryTransport, QueueState, TableDirectory};
use std::net::SocketAddr;
use std::sync::Arc;

/// "No Timeout" transitions park an entry for ~50 minutes; tests jump the
/// clock over them.
const NT_MS: u64 = 3_000_000;

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
         Call-ID: {cseq}55@127.0.0.1\r\n\
         CSeq: {cseq} MESSAGE\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn bts_addr() -> SocketAddr {
    "127.0.0.1:5062".parse().unwrap()
}

fn drain(smq: &Smq, now: u64) {
    while smq.process_one(now) {}
}

fn sent_messages(transport: &MemoryTransport) -> Vec<(String, SocketAddr)> {
    transport
        .take_sent()
        .into_iter()
        .map(|(bytes, dest)| (String::from_utf8(bytes).unwrap(), dest))
        .collect()
}

#[test]
fn test_shortcode_reply_enqueues_message_back_to_sender() {
    let (smq, transport, _) = build(|_| {});

    let datagram = message_datagram("IMSI777100223456161", "411", "what is my status", 7, "9f");
    smq.accept_datagram(datagram.as_bytes(), bts_addr());

    // One pass: the shortcode runs, the reply is queued at destination
    // resolution, the original is marked for deletion.
    smq.process_one(now_ms());
    let states: Vec<QueueState> = smq.snapshot_states().into_iter().map(|(s, _)| s).collect();
    assert!(states.contains(&QueueState::RequestDestSipUrl));
    assert!(states.contains(&QueueState::DeleteMe));

    drain(&smq, now_ms());
    let sent = sent_messages(&transport);
    let (reply, dest) = sent
        .iter()
        .find(|(text, _)| text.starts_with("MESSAGE"))
        .cloned()
        .expect("reply was delivered");
    assert!(reply.starts_with("MESSAGE sip:IMSI777100223456161@127.0.0.1:5062"));
    assert!(reply.contains("From: 411<sip:411@"));
    assert!(reply.contains("not registered"));
    assert_eq!(dest, bts_addr());
}

#[test]
fn test_registration_chain() {
    let (smq, transport, directory) = build(|config| {
        config.set("SC.Register.Digits.Override", "1");
    });
    let imsi = "IMSI888777666555444";

    // 1. Unregistered handset texts its number to the register code.
    let datagram = message_datagram(imsi, "101", "+15551234567", 8, "c0");
    smq.accept_datagram(datagram.as_bytes(), bts_addr());
    let t0 = now_ms();
    drain(&smq, t0);

    // The handler linked the number and parked the entry.
    assert_eq!(directory.imsi_to_phone(imsi).as_deref(), Some("+15551234567"));
    let states: Vec<QueueState> = smq.snapshot_states().into_iter().map(|(s, _)| s).collect();
    assert_eq!(states, vec![QueueState::AwaitingRegisterHandset]);

    // 2. The await timeout fires; the directory now answers, so a REGISTER
    // is synthesized and delivered to the registration host.
    let t1 = t0 + NT_MS + 1_000;
    drain(&smq, t1);
    let sent = sent_messages(&transport);
    let (register, dest) = sent
        .iter()
        .find(|(text, _)| text.starts_with("REGISTER"))
        .cloned()
        .expect("REGISTER was delivered");
    assert_eq!(dest, "127.0.0.1:5060".parse().unwrap());
    assert!(register.starts_with("REGISTER sip:127.0.0.1:5060 SIP/2.0"));
    assert!(register.contains(&format!("To: {imsi}<sip:{imsi}@127.0.0.1:5060>")));
    // Contact points back at the cell the shortcode SMS arrived on.
    assert!(register.contains(&format!("Contact: <sip:{imsi}@127.0.0.1:5062>;expires=3600")));
    assert!(register.contains("CSeq: 1 REGISTER"));

    let states: Vec<QueueState> = smq.snapshot_states().into_iter().map(|(s, _)| s).collect();
    assert!(states.contains(&QueueState::AskedToRegisterHandset));

    // 3. The HLR accepts the REGISTER; the shortcode entry wakes in
    // INITIAL so the handler can greet the subscriber.
    let ok = format!(
        "SIP/2.0 200 OK\r\n\
         Via: SIP/2.0/UDP 127.0.0.1:5063;branch=123\r\n\
         From: {imsi}<sip:{imsi}@127.0.0.1:5060>;tag=1\r\n\
         To: {imsi}<sip:{imsi}@127.0.0.1:5060>\r\n\
         Call-ID: 4711@127.0.0.1\r\n\
         CSeq: 1 REGISTER\r\n\
         Content-Length: 0\r\n\r\n"
    );
    smq.accept_datagram(ok.as_bytes(), "127.0.0.1:5060".parse().unwrap());
    drain(&smq, t1 + 1_000);
    let states: Vec<QueueState> = smq.snapshot_states().into_iter().map(|(s, _)| s).collect();
    assert_eq!(states, vec![QueueState::Initial]);

    // 4. The re-run register handler replies with the welcome text.
    let t2 = t1 + NT_MS + 2_000;
    drain(&smq, t2);
    let sent = sent_messages(&transport);
    let (welcome, _) = sent
        .iter()
        .find(|(text, _)| text.starts_with("MESSAGE"))
        .cloned()
        .expect("welcome was delivered");
    assert!(welcome.contains("From: 101<sip:101@"));
    assert!(welcome.starts_with(&format!("MESSAGE sip:{imsi}@127.0.0.1:5062")));
    assert!(welcome.contains("Hello +15551234567! Text to 411 for system status."));
}

#[test]
fn test_treat_as_ordinary_falls_through_to_routing() {
    let (mut smq, transport, directory) = build(|_| {});
    smq.add_short_code(
        "2233",
        Box::new(|_, _, _, _| ShortCodeAction::TreatAsOrdinary),
    );
    // "2233" resolves like a subscriber number would.
    directory.add_subscriber("IMSI111222333444555", "2233", Some("127.0.0.1:5070"));

    let datagram = message_datagram("IMSI666410186585295", "2233", "plain routing", 9, "d1");
    smq.accept_datagram(datagram.as_bytes(), bts_addr());
    drain(&smq, now_ms());

    let sent = sent_messages(&transport);
    let (delivered, dest) = sent
        .iter()
        .find(|(text, _)| text.starts_with("MESSAGE"))
        .cloned()
        .expect("message routed normally");
    assert!(delivered.starts_with("MESSAGE sip:IMSI111222333444555@127.0.0.1:5070"));
    assert_eq!(dest, "127.0.0.1:5070".parse().unwrap());
}

#[test]
fn test_retry_after_delay_bumps_retries_and_restarts() {
    let (mut smq, _, _) = build(|_| {});
    smq.add_short_code(
        "7788",
        Box::new(|_, _, params, _| {
            if params.retries == 0 {
                ShortCodeAction::RetryAfterDelay
            } else {
                ShortCodeAction::Done
            }
        }),
    );

    let datagram = message_datagram("IMSI666410186585295", "7788", "try again", 10, "e2");
    smq.accept_datagram(datagram.as_bytes(), bts_addr());
    smq.process_one(now_ms());
    let states: Vec<QueueState> = smq.snapshot_states().into_iter().map(|(s, _)| s).collect();
    assert_eq!(states, vec![QueueState::RequestFromLookup]);
}

#[test]
fn test_exec_directive_requests_reexec_stop() {
    let (mut smq, _, _) = build(|_| {});
    smq.add_short_code("3141", Box::new(|_, _, _, _| ShortCodeAction::ExecQueue));

    let datagram = message_datagram("IMSI666410186585295", "3141", "restart please", 11, "f3");
    smq.accept_datagram(datagram.as_bytes(), bts_addr());
    drain(&smq, now_ms());

    assert!(smq.stop_requested());
    assert!(smq.reexec_requested());
    assert_eq!(smq.queue_len(), 0);
}
