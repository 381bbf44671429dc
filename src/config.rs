//! Read-mostly key/value configuration
//!
//! Every recognized key ships with a compiled-in default; an optional TOML
//! file overlays them, with nested tables flattened onto the dotted key
//! names (`[SIP] myPort = 5063` becomes `SIP.myPort`).  The state machine
//! consults this store on each timeout, so lookups stay cheap.

use crate::error::{SmqError, SmqResult};
use std::collections::HashMap;
use std::path::Path;

/// Recognized keys: name, default value, one-line description.
/// The description feeds `--gensql` / `--gentex`.
pub const CONFIG_DEFAULTS: &[(&str, &str, &str)] = &[
    (
        "Asterisk.address",
        "127.0.0.1:5060",
        "The SIP PBX/HLR address and port that REGISTER messages are sent to.",
    ),
    (
        "Bounce.Code",
        "101",
        "The short code that bounced messages originate from.",
    ),
    (
        "Bounce.Message.IMSILookupFailed",
        "Cannot determine return address; bouncing message.  Text your phone number to 101 to register and try again.",
        "The bounce message that is sent when the originating IMSI cannot be verified.",
    ),
    (
        "Bounce.Message.NotRegistered",
        "Phone not registered here.",
        "Bounce message indicating that the destination phone is not registered.",
    ),
    (
        "CDRFile",
        "",
        "Log CDRs here.  To enable, specify an absolute path; leave empty to disable.",
    ),
    (
        "Debug.print_as_we_validate",
        "0",
        "Generate lots of output during validation.",
    ),
    (
        "savefile",
        "/tmp/smq.save",
        "The file to save SMS messages to when exiting.",
    ),
    (
        "SC.DebugDump.Code",
        "2336",
        "Short code that dumps queue debug information to the log.",
    ),
    (
        "SC.Info.Code",
        "411",
        "Short code that tells the sender their own number and registration status.",
    ),
    (
        "SC.QuickChk.Code",
        "2337",
        "Short code that tells the sender how many messages are currently queued.",
    ),
    (
        "SC.Register.Code",
        "101",
        "Short code that registers the sender to the system.",
    ),
    (
        "SC.Register.Digits.Max",
        "10",
        "The maximum number of digits a phone number can have.",
    ),
    (
        "SC.Register.Digits.Min",
        "7",
        "The minimum number of digits a phone number must have.",
    ),
    (
        "SC.Register.Digits.Override",
        "0",
        "Ignore phone number digit length checks.",
    ),
    (
        "SC.Register.Msg.AlreadyA",
        "Your phone is already registered as",
        "First part of the already-registered reply, followed by the current number.",
    ),
    (
        "SC.Register.Msg.AlreadyB",
        ".",
        "Second part of the already-registered reply.",
    ),
    (
        "SC.Register.Msg.ErrorA",
        "Error in assigning",
        "First part of the registration-failure reply, followed by the attempted number.",
    ),
    (
        "SC.Register.Msg.ErrorB",
        "to IMSI",
        "Second part of the registration-failure reply, followed by the handset IMSI.",
    ),
    (
        "SC.Register.Msg.TakenA",
        "The phone number",
        "First part of the number-taken reply, followed by the attempted number.",
    ),
    (
        "SC.Register.Msg.TakenB",
        "is already in use. Try another, then call that one to talk to whoever took yours.",
        "Second part of the number-taken reply.",
    ),
    (
        "SC.Register.Msg.WelcomeA",
        "Hello",
        "First part of the welcome reply, followed by the assigned number.",
    ),
    (
        "SC.Register.Msg.WelcomeB",
        "! Text to 411 for system status.",
        "Second part of the welcome reply.",
    ),
    (
        "SIP.Default.BTSPort",
        "5062",
        "The default base station port to try when none is available.",
    ),
    (
        "SIP.GlobalRelay.ContentType",
        "application/vnd.3gpp.sms",
        "The content type that the global relay expects.",
    ),
    (
        "SIP.GlobalRelay.IP",
        "",
        "IP address of the global relay to send unresolvable messages to; empty disables.",
    ),
    (
        "SIP.GlobalRelay.Port",
        "",
        "Port of the global relay to send unresolvable messages to.",
    ),
    (
        "SIP.GlobalRelay.RelaxedVerify",
        "0",
        "Relax relay verification by only using the SIP Via headers.",
    ),
    (
        "SIP.myIP",
        "127.0.0.1",
        "The IP address this queue advertises in Via and Call-ID headers.",
    ),
    (
        "SIP.myIP2",
        "",
        "Optional second local address accepted as ours by the validator.",
    ),
    (
        "SIP.myPort",
        "5063",
        "The port that the queue binds and listens on.",
    ),
    (
        "SIP.Timeout.ACKedMessageResend",
        "60",
        "Number of seconds to delay resending acknowledged messages.",
    ),
    (
        "SIP.Timeout.MessageBounce",
        "120",
        "Timeout, in seconds, between bounced message sending tries.",
    ),
    (
        "SIP.Timeout.MessageResend",
        "120",
        "Timeout, in seconds, between message sending tries.",
    ),
    (
        "SMS.MaxRetries",
        "2160",
        "Delivery attempts per message before it is dropped; 0 allows infinite retries.",
    ),
    (
        "SMS.RateLimit",
        "0",
        "Limit delivery rate to one message every X seconds; 0 disables.",
    ),
    (
        "SubscriberRegistry.A3A8",
        "../comp128",
        "Path to the program that implements the A3/A8 algorithm.",
    ),
    (
        "SubscriberRegistry.db",
        "/var/lib/smq/registry.db",
        "The location of the database holding the subscriber registry.",
    ),
    (
        "SubscriberRegistry.UpstreamServer",
        "",
        "URL of the subscriber registry interface on the upstream server; empty disables.",
    ),
];

/// Key/value configuration store
#[derive(Debug, Clone)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let values = CONFIG_DEFAULTS
            .iter()
            .map(|(key, default, _)| (key.to_string(), default.to_string()))
            .collect();
        Config { values }
    }
}

impl Config {
    /// Defaults overlaid with a TOML file
    pub fn from_file(path: &Path) -> SmqResult<Config> {
        let mut config = Config::default();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SmqError::persist_error(path.display().to_string(), e.to_string())
        })?;
        let table: toml::Table = text.parse().map_err(|e: toml::de::Error| {
            SmqError::parse_error(e.to_string(), Some(path.display().to_string()))
        })?;
        flatten_table(&mut config.values, "", &table);
        Ok(config)
    }

    /// String value; empty when the key is unknown
    pub fn get_str(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    /// Numeric value; zero when missing or malformed
    pub fn get_num(&self, key: &str) -> i64 {
        self.get_str(key).trim().parse().unwrap_or(0)
    }

    /// Boolean value: "1"/"true"/"yes" are true
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get_str(key).trim(), "1" | "true" | "yes")
    }

    /// Whether the key carries a non-empty value
    pub fn defines(&self, key: &str) -> bool {
        !self.get_str(key).is_empty()
    }

    /// Override one key (tests and the short-code console)
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// SQL insert statements for the default table, one per key
    pub fn gen_sql(&self) -> String {
        let mut out = String::from(
            "CREATE TABLE IF NOT EXISTS CONFIG (KEYSTRING TEXT PRIMARY KEY, VALUESTRING TEXT, COMMENTS TEXT);\n",
        );
        for (key, default, description) in CONFIG_DEFAULTS {
            out.push_str(&format!(
                "INSERT OR IGNORE INTO CONFIG (KEYSTRING,VALUESTRING,COMMENTS) VALUES ('{}','{}','{}');\n",
                key,
                default.replace('\'', "''"),
                description.replace('\'', "''"),
            ));
        }
        out
    }

    /// TeX table of the recognized keys for the operations manual
    pub fn gen_tex(&self) -> String {
        let mut out = String::from("\\begin{tabular}{|l|l|p{8cm}|}\n\\hline\n");
        out.push_str("Key & Default & Description \\\\\n\\hline\n");
        for (key, default, description) in CONFIG_DEFAULTS {
            out.push_str(&format!(
                "{} & {} & {} \\\\\n",
                tex_escape(key),
                tex_escape(default),
                tex_escape(description)
            ));
        }
        out.push_str("\\hline\n\\end{tabular}\n");
        out
    }
}

fn tex_escape(text: &str) -> String {
    text.replace('\\', "\\textbackslash{}")
        .replace('_', "\\_")
        .replace('&', "\\&")
        .replace('%', "\\%")
        .replace('#', "\\#")
}

fn flatten_table(values: &mut HashMap<String, String>, prefix: &str, table: &toml::Table) {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        match value {
            toml::Value::Table(nested) => flatten_table(values, &key, nested),
            toml::Value::String(s) => {
                values.insert(key, s.clone());
            }
            toml::Value::Integer(n) => {
                values.insert(key, n.to_string());
            }
            toml::Value::Boolean(b) => {
                values.insert(key, if *b { "1" } else { "0" }.to_string());
            }
            toml::Value::Float(x) => {
                values.insert(key, x.to_string());
            }
            other => {
                values.insert(key, other.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_present() {
        let config = Config::default();
        assert_eq!(config.get_str("SIP.myPort"), "5063");
        assert_eq!(config.get_num("SIP.Default.BTSPort"), 5062);
        assert_eq!(config.get_num("SMS.MaxRetries"), 2160);
        assert!(!config.get_bool("SIP.GlobalRelay.RelaxedVerify"));
        assert!(!config.defines("SIP.GlobalRelay.IP"));
        assert!(config.defines("Bounce.Code"));
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("SMS.RateLimit", "5");
        assert_eq!(config.get_num("SMS.RateLimit"), 5);
        config.set("SIP.GlobalRelay.IP", "10.23.0.1");
        assert!(config.defines("SIP.GlobalRelay.IP"));
    }

    #[test]
    fn test_unknown_key_is_empty() {
        let config = Config::default();
        assert_eq!(config.get_str("No.Such.Key"), "");
        assert_eq!(config.get_num("No.Such.Key"), 0);
        assert!(!config.defines("No.Such.Key"));
    }

    #[test]
    fn test_toml_flattening() {
        let table: toml::Table = "[SIP]\nmyPort = 5070\n[SMS]\nRateLimit = 2\n"
            .parse()
            .unwrap();
        let mut values = HashMap::new();
        flatten_table(&mut values, "", &table);
        assert_eq!(values.get("SIP.myPort").unwrap(), "5070");
        assert_eq!(values.get("SMS.RateLimit").unwrap(), "2");
    }

    #[test]
    fn test_gensql_and_gentex_cover_all_keys() {
        let config = Config::default();
        let sql = config.gen_sql();
        let tex = config.gen_tex();
        for (key, _, _) in CONFIG_DEFAULTS {
            assert!(sql.contains(key), "gensql missing {}", key);
            assert!(tex.contains(&tex_escape(key)), "gentex missing {}", key);
        }
    }
}
