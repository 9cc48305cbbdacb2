//! A tool's bounded FIFO of pending inbound events (the "tool queue"), with overflow policy and
//! lifetime counters.
//!
//! Shaped like `buf.rs`'s `DataBuffer` (a capacity-bounded `VecDeque`), but with the exact
//! overflow-policy dispatch and counters of `original_source/src/core/tool_queue.c`.

use std::collections::VecDeque;

use crate::{Error, Result};

/// What to do when [`Inbox::add`] is called on a full inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Evict the oldest message to make room for the new one (the default).
    DropOldest,
    /// Reject the new message, keeping the existing contents.
    DropNewest,
    /// In a single-threaded supervisor "block" degenerates to "fail now, let the caller retry on
    /// a later tick" — identical observable behaviour to `DropNewest`.
    Block,
}

/// A fixed-capacity ring buffer of pending messages for one tool.
pub struct Inbox {
    messages: VecDeque<String>,
    capacity: usize,
    policy: QueuePolicy,
    dropped: u64,
    delivered: u64,
}

impl Inbox {
    /// Creates an empty inbox with the given capacity and overflow policy.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, policy: QueuePolicy) -> Self {
        assert!(capacity > 0, "inbox capacity must be > 0");
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            dropped: 0,
            delivered: 0,
        }
    }

    /// Appends `msg`, applying the overflow policy if the inbox is full.
    pub fn add(&mut self, msg: String) -> Result<()> {
        if self.messages.len() >= self.capacity {
            match self.policy {
                QueuePolicy::DropOldest => {
                    self.messages.pop_front();
                    self.dropped += 1;
                    log::warn!(target: "inbox", "queue full, dropped oldest event");
                }
                QueuePolicy::DropNewest | QueuePolicy::Block => {
                    self.dropped += 1;
                    log::warn!(target: "inbox", "queue full, dropped newest event");
                    return Err(Error::QueueFull("tool inbox".into()));
                }
            }
        }
        self.messages.push_back(msg);
        Ok(())
    }

    /// Returns the head message without removing it.
    pub fn peek(&self) -> Option<&str> {
        self.messages.front().map(String::as_str)
    }

    /// Removes and returns the head message, incrementing `delivered`. No-op on an empty inbox.
    pub fn remove(&mut self) -> Option<String> {
        let msg = self.messages.pop_front();
        if msg.is_some() {
            self.delivered += 1;
        }
        msg
    }

    /// Current number of queued messages.
    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// Fixed capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True iff no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True iff the inbox is at capacity.
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    /// Lifetime count of messages dropped due to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Lifetime count of messages removed via [`Inbox::remove`].
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Discards every queued message. `dropped`/`delivered` counters are left untouched.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
