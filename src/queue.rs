//! Time-sorted message queue
//!
//! The single shared mutable structure of the system.  Entries are totally
//! ordered by `(next_action_time, insertion sequence)`; the head is the next
//! entry due.  Callers hold the surrounding mutex across find-and-mutate
//! sequences, so nothing here locks.

use crate::message::QueuedMessage;
use crate::types::QueueState;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the epoch; the queue's time axis
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Queue position: action time first, insertion sequence as tiebreaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    pub at: u64,
    seq: u64,
}

/// The time-sorted priority queue of in-flight messages
#[derive(Default)]
pub struct MessageQueue {
    entries: BTreeMap<QueueKey, QueuedMessage>,
    next_seq: u64,
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert with state and an explicit action time
    pub fn insert_at(&mut self, mut qmsg: QueuedMessage, state: QueueState, at: u64) {
        qmsg.state = state;
        qmsg.next_action_time = at;
        self.insert(qmsg);
    }

    /// Insert at the entry's recorded `next_action_time`
    pub fn insert(&mut self, qmsg: QueuedMessage) {
        let key = QueueKey {
            at: qmsg.next_action_time,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, qmsg);
    }

    /// Action time of the head entry
    pub fn head_time(&self) -> Option<u64> {
        self.entries.keys().next().map(|k| k.at)
    }

    /// Remove and return the head if it is due at `now`
    pub fn pop_due(&mut self, now: u64) -> Option<QueuedMessage> {
        let key = *self.entries.keys().next()?;
        if key.at > now {
            return None;
        }
        self.entries.remove(&key)
    }

    /// Find a queued message by tag.  The hash byte short-circuits the
    /// string compares; the full compare breaks collisions.
    pub fn find_by_tag(&self, tag: &str, taghash: u8) -> Option<&QueuedMessage> {
        self.entries
            .values()
            .find(|m| m.qtag_hash == taghash && m.qtag == tag)
    }

    /// Key of the entry with this tag, for remove-modify-reinsert cycles
    pub fn key_by_tag(&self, tag: &str, taghash: u8) -> Option<QueueKey> {
        self.entries
            .iter()
            .find(|(_, m)| m.qtag_hash == taghash && m.qtag == tag)
            .map(|(key, _)| *key)
    }

    /// Remove and return the entry with this tag
    pub fn take_by_tag(&mut self, tag: &str, taghash: u8) -> Option<QueuedMessage> {
        let key = self.key_by_tag(tag, taghash)?;
        self.entries.remove(&key)
    }

    /// Entries in reverse time order, for persistence: replaying the save
    /// file front-to-back then rebuilds the queue in forward order.
    pub fn iter_reverse(&mut self) -> impl Iterator<Item = &mut QueuedMessage> {
        self.entries.values_mut().rev()
    }

    /// Entries in forward time order
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.values()
    }

    /// Check the total-order invariant; used by tests
    pub fn is_time_ordered(&self) -> bool {
        let mut last = 0;
        for key in self.entries.keys() {
            if key.at < last {
                return false;
            }
            last = key.at;
        }
        true
    }
}
