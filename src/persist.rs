//! Queue persistence
//!
//! The save file is a crash-recovery checkpoint, not a transactional log.
//! One plain-text record per entry, written in reverse timestamp order so
//! that replaying the file front-to-back rebuilds a forward-time queue with
//! cheap insertions:
//!
//! ```text
//! === <state> <next_action_time> <source_addr> <length> <ms_to_sc> <need_repack>
//! <raw SIP datagram, exactly length bytes>
//!
//! ```
//!
//! On load every record is re-validated; bad records are counted and
//! skipped, and if any were seen the file is truncated afterward so a
//! second crash cannot re-ingest the same bad data.

use crate::engine::Smq;
use crate::error::{SmqError, SmqResult};
use crate::message::QueuedMessage;
use crate::network::{format_addr, parse_addr};
use crate::types::QueueState;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of a queue restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStats {
    pub loaded: usize,
    pub errors: usize,
}

/// Write the whole queue to `path`.  Returns how many records were saved.
pub fn save_queue(smq: &Smq, path: &Path) -> SmqResult<usize> {
    debug!("save_queue_to_file: {}", path.display());
    let mut file = File::create(path)
        .map_err(|e| SmqError::persist_error(path.display().to_string(), e.to_string()))?;

    let mut howmany = 0;
    let mut queue = smq.queue_mut();
    for qmsg in queue.iter_reverse() {
        let text = match qmsg.msg.make_text_valid() {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping unserializable entry '{}': {}", qmsg.qtag, e);
                continue;
            }
        };
        write!(
            file,
            "=== {} {} {} {} {} {}\n{}\n\n",
            qmsg.state.index(),
            qmsg.next_action_time,
            format_addr(&qmsg.source_addr),
            text.len(),
            u8::from(qmsg.ms_to_sc),
            u8::from(qmsg.need_repack),
            text
        )
        .map_err(|e| SmqError::persist_error(path.display().to_string(), e.to_string()))?;
        howmany += 1;
    }
    drop(queue);

    info!("Saved {} queued messages to {}", howmany, path.display());
    Ok(howmany)
}

/// Whitespace-delimited token scan over the save file
fn next_token<'a>(text: &'a str, pos: &mut usize) -> Option<&'a str> {
    let bytes = text.as_bytes();
    while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    if *pos >= bytes.len() {
        return None;
    }
    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    Some(&text[start..*pos])
}

fn skip_newlines(text: &str, pos: &mut usize) {
    let bytes = text.as_bytes();
    while *pos < bytes.len() && bytes[*pos] == b'\n' {
        *pos += 1;
    }
}

/// Restore the queue from `path`.  Missing file is not an error: the queue
/// simply starts empty.
pub fn load_queue(smq: &Smq, path: &Path) -> SmqResult<LoadStats> {
    debug!("read_queue_from_file: {}", path.display());
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No queue save file at {}", path.display());
            return Ok(LoadStats::default());
        }
        Err(e) => {
            return Err(SmqError::persist_error(
                path.display().to_string(),
                e.to_string(),
            ))
        }
    };

    let mut stats = LoadStats::default();
    let mut pos = 0;

    loop {
        let marker = match next_token(&text, &mut pos) {
            Some(marker) => marker,
            None => break,
        };
        if marker != "===" {
            debug!("End of queue save file");
            break;
        }

        let header: Option<(usize, u64, String, usize, bool, bool)> = (|| {
            let state = next_token(&text, &mut pos)?.parse::<usize>().ok()?;
            let at = next_token(&text, &mut pos)?.parse::<u64>().ok()?;
            let addr = next_token(&text, &mut pos)?.to_string();
            let length = next_token(&text, &mut pos)?.parse::<usize>().ok()?;
            let ms_to_sc = next_token(&text, &mut pos)? == "1";
            let need_repack = next_token(&text, &mut pos)? == "1";
            Some((state, at, addr, length, ms_to_sc, need_repack))
        })();
        let (state_index, at, addrstr, length, ms_to_sc, need_repack) = match header {
            Some(header) => header,
            None => {
                warn!("Truncated record header in {}", path.display());
                stats.errors += 1;
                break;
            }
        };

        skip_newlines(&text, &mut pos);
        let msgtext = match pos.checked_add(length).and_then(|end| text.get(pos..end)) {
            Some(body) => body.to_string(),
            None => {
                warn!("Truncated record body in {}", path.display());
                stats.errors += 1;
                break;
            }
        };
        pos += length;
        skip_newlines(&text, &mut pos);

        let state = match QueueState::from_index(state_index) {
            Some(state) => state,
            None => {
                warn!("Record with unknown state {}", state_index);
                stats.errors += 1;
                continue;
            }
        };
        let source_addr = match parse_addr(&addrstr) {
            Some(addr) => addr,
            None => {
                debug!("Parse network address failed: {}", addrstr);
                continue;
            }
        };

        let mut qmsg = QueuedMessage::from_wire(msgtext, source_addr);
        qmsg.ms_to_sc = ms_to_sc;
        qmsg.need_repack = need_repack;

        let errcode = smq.validate(&mut qmsg, false);
        if errcode != 0 {
            warn!("Saved message failed validation, error {}", errcode);
            stats.errors += 1;
            continue;
        }
        match qmsg.is_request() {
            Ok(true) => {
                info!("Read SMS '{}' direction={}", qmsg.qtag, if qmsg.ms_to_sc { "MS->SC" } else { "SC->MS" });
                smq.insert_new_message(qmsg, state, Some(at));
                stats.loaded += 1;
            }
            _ => {
                // Stored responses have nothing left to correlate with.
                debug!("Dropping saved response '{}'", qmsg.qtag);
                stats.errors += 1;
            }
        }
    }

    info!(
        "=== Read {} messages total, {} bad ones",
        stats.loaded, stats.errors
    );

    // A dirty file must not be replayed into the queue twice.
    if stats.errors > 0 {
        if let Err(e) = OpenOptions::new().write(true).truncate(true).open(path) {
            warn!("Could not clear dirty save file {}: {}", path.display(), e);
        }
    }

    Ok(stats)
}
