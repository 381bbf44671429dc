//! Short-code command handlers
//!
//! Messages to certain numeric destinations are commands to the queue
//! itself rather than traffic to forward.  A handler receives the sender's
//! IMSI, the message body and a parameter bundle, and answers with a
//! directive telling the state machine what to do next.  Handlers get an
//! explicit context instead of reaching for globals.

use crate::config::Config;
use crate::directory::Directory;
use std::collections::HashMap;
use tracing::{debug, info};

/// What the state machine should do after a handler ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortCodeAction {
    /// Send `params.reply` back to the sender, then delete this entry
    Reply,
    /// Delete this entry
    Done,
    /// Handler failed; entry goes to the error sink
    InternalError,
    /// Bump the retry count and restart at from-address lookup
    RetryAfterDelay,
    /// Wait for the directory to report the new registration
    AwaitRegister,
    /// Register the handset immediately
    Register,
    /// Not special after all: process as an ordinary message
    TreatAsOrdinary,
    /// Re-enter the state machine from the start
    RestartProcessing,
    /// Gracefully stop and re-exec the process
    ExecQueue,
    /// Gracefully stop the process
    QuitQueue,
}

/// In/out parameter bundle for one handler invocation
#[derive(Debug, Default)]
pub struct ShortCodeParams {
    pub retries: u32,
    /// Reply text for [`ShortCodeAction::Reply`]
    pub reply: Option<String>,
}

/// What a handler may consult while deciding
pub struct ShortCodeContext<'a> {
    pub config: &'a Config,
    pub directory: &'a dyn Directory,
    pub queue_depth: usize,
}

/// One short-code command
pub type ShortCodeHandler = Box<
    dyn Fn(&str, &str, &mut ShortCodeParams, &ShortCodeContext<'_>) -> ShortCodeAction
        + Send
        + Sync,
>;

/// Map from destination short code to handler.  Constant after startup.
#[derive(Default)]
pub struct ShortCodeMap {
    handlers: HashMap<String, ShortCodeHandler>,
}

impl ShortCodeMap {
    pub fn new() -> Self {
        ShortCodeMap::default()
    }

    pub fn insert(&mut self, code: &str, handler: ShortCodeHandler) {
        self.handlers.insert(code.to_string(), handler);
    }

    pub fn get(&self, code: &str) -> Option<&ShortCodeHandler> {
        self.handlers.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.handlers.contains_key(code)
    }
}

/// Register the built-in commands under their configured codes
pub fn install_default_handlers(map: &mut ShortCodeMap, config: &Config) {
    map.insert(config.get_str("SC.Register.Code"), Box::new(register_handler));
    map.insert(config.get_str("SC.Info.Code"), Box::new(info_handler));
    map.insert(config.get_str("SC.QuickChk.Code"), Box::new(quickchk_handler));
    map.insert(config.get_str("SC.DebugDump.Code"), Box::new(debug_dump_handler));
}

/// Register the sender: body carries the phone number they want.
fn register_handler(
    imsi: &str,
    body: &str,
    params: &mut ShortCodeParams,
    ctx: &ShortCodeContext<'_>,
) -> ShortCodeAction {
    let config = ctx.config;
    let requested: String = body.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();

    if !config.get_bool("SC.Register.Digits.Override") {
        let digits = requested.chars().filter(|c| c.is_ascii_digit()).count() as i64;
        if digits < config.get_num("SC.Register.Digits.Min")
            || digits > config.get_num("SC.Register.Digits.Max")
        {
            params.reply = Some(format!(
                "{} {} {} {}",
                config.get_str("SC.Register.Msg.ErrorA"),
                requested,
                config.get_str("SC.Register.Msg.ErrorB"),
                imsi
            ));
            return ShortCodeAction::Reply;
        }
    }

    match ctx.directory.imsi_to_phone(imsi) {
        Some(current) if current == requested => {
            // Re-registration, or re-entry after the REGISTER chain
            // completed: greet the subscriber.
            params.reply = Some(format!(
                "{} {}{}",
                config.get_str("SC.Register.Msg.WelcomeA"),
                current,
                config.get_str("SC.Register.Msg.WelcomeB")
            ));
            ShortCodeAction::Reply
        }
        Some(current) => {
            params.reply = Some(format!(
                "{} {}{}",
                config.get_str("SC.Register.Msg.AlreadyA"),
                current,
                config.get_str("SC.Register.Msg.AlreadyB")
            ));
            ShortCodeAction::Reply
        }
        None => {
            if ctx.directory.phone_to_imsi(&requested).is_some() {
                params.reply = Some(format!(
                    "{} {} {}",
                    config.get_str("SC.Register.Msg.TakenA"),
                    requested,
                    config.get_str("SC.Register.Msg.TakenB")
                ));
                return ShortCodeAction::Reply;
            }
            if ctx.directory.assign_phone(imsi, &requested) {
                info!("Assigned {} to {}, awaiting HLR propagation", requested, imsi);
                ShortCodeAction::AwaitRegister
            } else {
                params.reply = Some(format!(
                    "{} {} {} {}",
                    config.get_str("SC.Register.Msg.ErrorA"),
                    requested,
                    config.get_str("SC.Register.Msg.ErrorB"),
                    imsi
                ));
                ShortCodeAction::Reply
            }
        }
    }
}

/// Tell the sender their own number and registration status.
fn info_handler(
    imsi: &str,
    _body: &str,
    params: &mut ShortCodeParams,
    ctx: &ShortCodeContext<'_>,
) -> ShortCodeAction {
    params.reply = Some(match ctx.directory.imsi_to_phone(imsi) {
        Some(phone) => format!("Your phone is registered as {}.", phone),
        None => format!(
            "Your phone is not registered.  Text your phone number to {} to register.",
            ctx.config.get_str("SC.Register.Code")
        ),
    });
    ShortCodeAction::Reply
}

/// Administrator probe: how deep is the queue right now?
fn quickchk_handler(
    _imsi: &str,
    _body: &str,
    params: &mut ShortCodeParams,
    ctx: &ShortCodeContext<'_>,
) -> ShortCodeAction {
    params.reply = Some(format!("{} messages queued", ctx.queue_depth));
    ShortCodeAction::Reply
}

/// Administrator probe: dump queue statistics to the log.
fn debug_dump_handler(
    imsi: &str,
    _body: &str,
    _params: &mut ShortCodeParams,
    ctx: &ShortCodeContext<'_>,
) -> ShortCodeAction {
    debug!("Debug dump requested by {}", imsi);
    info!("Queue depth {}", ctx.queue_depth);
    ShortCodeAction::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::TableDirectory;

    fn run(
        map: &ShortCodeMap,
        code: &str,
        imsi: &str,
        body: &str,
        dir: &TableDirectory,
        config: &Config,
    ) -> (ShortCodeAction, ShortCodeParams) {
        let mut params = ShortCodeParams::default();
        let ctx = ShortCodeContext {
            config,
            directory: dir,
            queue_depth: 3,
        };
        let action = map.get(code).unwrap()(imsi, body, &mut params, &ctx);
        (action, params)
    }

    fn setup() -> (ShortCodeMap, TableDirectory, Config) {
        let config = Config::default();
        let mut map = ShortCodeMap::new();
        install_default_handlers(&mut map, &config);
        (map, TableDirectory::new(), config)
    }

    #[test]
    fn test_default_codes_installed() {
        let (map, _, _) = setup();
        assert!(map.contains("101"));
        assert!(map.contains("411"));
        assert!(map.contains("2337"));
        assert!(map.contains("2336"));
        assert!(!map.contains("999"));
    }

    #[test]
    fn test_register_new_number_awaits() {
        let (map, dir, config) = setup();
        let (action, _) = run(&map, "101", "IMSI777100223456161", "5551234567", &dir, &config);
        assert_eq!(action, ShortCodeAction::AwaitRegister);
        assert_eq!(
            dir.imsi_to_phone("IMSI777100223456161").as_deref(),
            Some("5551234567")
        );
    }

    #[test]
    fn test_register_same_number_welcomes() {
        let (map, dir, config) = setup();
        dir.add_subscriber("IMSI777100223456161", "5551234567", None);
        let (action, params) =
            run(&map, "101", "IMSI777100223456161", "5551234567", &dir, &config);
        assert_eq!(action, ShortCodeAction::Reply);
        assert!(params.reply.unwrap().starts_with("Hello"));
    }

    #[test]
    fn test_register_different_number_reports_current() {
        let (map, dir, config) = setup();
        dir.add_subscriber("IMSI777100223456161", "5551234567", None);
        let (action, params) =
            run(&map, "101", "IMSI777100223456161", "5559999999", &dir, &config);
        assert_eq!(action, ShortCodeAction::Reply);
        assert!(params.reply.unwrap().contains("already registered"));
    }

    #[test]
    fn test_register_taken_number_refused() {
        let (map, dir, config) = setup();
        dir.add_subscriber("IMSI111111111111111", "5551234567", None);
        let (action, params) =
            run(&map, "101", "IMSI777100223456161", "5551234567", &dir, &config);
        assert_eq!(action, ShortCodeAction::Reply);
        assert!(params.reply.unwrap().contains("already in use"));
    }

    #[test]
    fn test_register_bad_digit_count_errors() {
        let (map, dir, config) = setup();
        let (action, params) = run(&map, "101", "IMSI777100223456161", "123", &dir, &config);
        assert_eq!(action, ShortCodeAction::Reply);
        assert!(params.reply.unwrap().starts_with("Error in assigning"));
    }

    #[test]
    fn test_info_reports_registration() {
        let (map, dir, config) = setup();
        let (_, params) = run(&map, "411", "IMSI777100223456161", "", &dir, &config);
        assert!(params.reply.unwrap().contains("not registered"));

        dir.add_subscriber("IMSI777100223456161", "5551234567", None);
        let (_, params) = run(&map, "411", "IMSI777100223456161", "", &dir, &config);
        assert!(params.reply.unwrap().contains("5551234567"));
    }

    #[test]
    fn test_quickchk_reports_depth() {
        let (map, dir, config) = setup();
        let (action, params) = run(&map, "2337", "IMSI777100223456161", "", &dir, &config);
        assert_eq!(action, ShortCodeAction::Reply);
        assert_eq!(params.reply.unwrap(), "3 messages queued");
    }

    #[test]
    fn test_debug_dump_is_done() {
        let (map, dir, config) = setup();
        let (action, params) = run(&map, "2336", "IMSI777100223456161", "", &dir, &config);
        assert_eq!(action, ShortCodeAction::Done);
        assert!(params.reply.is_none());
    }
}
