//! The event wire format and the bounded fan-out queue.
//!
//! Parse/format semantics are grounded on `original_source/src/core/event.c`; the fan-out
//! mechanics (snapshot the matching subscribers under a brief lock, then deliver) follow the
//! pattern `hub.rs` uses to avoid holding a lock across delivery.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::platform::Platform;
use crate::registry::ToolRegistry;
use crate::tool::RestartPolicy;
use crate::{Error, Result};

/// Maximum length of an event's `type` field.
pub const MAX_EVENT_TYPE: usize = 63;
/// Maximum length of an event's `data` field.
pub const MAX_EVENT_DATA: usize = 4095;
/// Capacity of the bus's pending-fan-out queue.
pub const MAX_EVENTS_QUEUE: usize = 1000;

/// A structured triple carried as one newline-terminated, pipe-delimited line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event type (e.g. `"foo"`; `"COMMAND"` is reserved for control requests).
    pub event_type: String,
    /// Name of the publishing tool.
    pub sender: String,
    /// Arbitrary payload; may itself contain `|` characters.
    pub data: String,
    /// Coarse publish timestamp (seconds since the Unix epoch).
    pub timestamp: u64,
}

/// Truncates `s` to at most `max` bytes, backing off to the nearest preceding char boundary so a
/// multibyte character straddling the cap is never split (which would make `String::truncate`
/// panic).
fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    s.truncate(idx);
}

impl Event {
    /// Builds an event, truncating each field to its wire-format cap. Truncation backs off to the
    /// nearest char boundary rather than cutting mid-character (a tool's stdout is arbitrary
    /// bytes; a hard byte-cap truncation must never panic).
    pub fn new(event_type: impl Into<String>, sender: impl Into<String>, data: impl Into<String>) -> Self {
        let mut event_type = event_type.into();
        truncate_at_char_boundary(&mut event_type, MAX_EVENT_TYPE);
        let mut sender = sender.into();
        truncate_at_char_boundary(&mut sender, MAX_EVENT_TYPE);
        let mut data = data.into();
        truncate_at_char_boundary(&mut data, MAX_EVENT_DATA);
        Self {
            event_type,
            sender,
            data,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Parses `TYPE|SENDER|DATA` (with or without a trailing `\n`). Splits on only the first two
    /// pipes, so pipe characters inside `DATA` are preserved literally.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut parts = line.splitn(3, '|');
        let event_type = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ParseFailed("missing event type".into()))?;
        let sender = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::ParseFailed("missing event sender".into()))?;
        let data = parts.next().unwrap_or("");
        Ok(Event::new(event_type, sender, data))
    }

    /// Renders the wire form: `TYPE|SENDER|DATA\n`.
    pub fn format(&self) -> String {
        format!("{}|{}|{}\n", self.event_type, self.sender, self.data)
    }
}

/// The bounded FIFO of published events awaiting fan-out (§4.D).
pub struct EventBus {
    queue: VecDeque<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    /// Publishes an event. Fails with [`Error::QueueFull`] once [`MAX_EVENTS_QUEUE`] is reached;
    /// the bus never drops or overwrites a pending event.
    pub fn publish(
        &mut self,
        event_type: impl Into<String>,
        sender: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<()> {
        if self.queue.len() >= MAX_EVENTS_QUEUE {
            return Err(Error::QueueFull("event bus".into()));
        }
        self.queue.push_back(Event::new(event_type, sender, data));
        Ok(())
    }

    /// Number of events currently queued awaiting fan-out.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True iff there are no events awaiting fan-out.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drains the queue, delivering each event into every subscribed tool's inbox and triggering
    /// on-demand auto-start (§4.D). Best-effort: a delivery failure for one tool is logged and
    /// does not stop fan-out to the others or processing of later events.
    pub fn process_queue<P: Platform>(&mut self, registry: &mut ToolRegistry<P>) {
        while let Some(event) = self.queue.pop_front() {
            let line = event.format();
            for name in registry.names() {
                let Some(tool) = registry.find_mut(&name) else { continue };
                if !tool.matches(&event.event_type) {
                    continue;
                }
                if let Err(e) = tool.inbox.add(line.clone()) {
                    log::warn!(target: "eventbus", "delivery to '{name}' failed: {e}");
                }
                if tool.is_on_demand()
                    && tool.status == crate::tool::ToolStatus::Stopped
                    && !tool.is_starting_on_demand
                    && matches!(tool.restart_policy, RestartPolicy::OnDemand)
                {
                    tool.is_starting_on_demand = true;
                    if let Err(e) = registry.start(&name) {
                        log::warn!(target: "eventbus", "on-demand start of '{name}' failed: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_always_ends_in_newline() {
        let e = Event::new("foo", "me", "bar");
        assert!(e.format().ends_with('\n'));
    }

    #[test]
    fn truncation_backs_off_a_straddling_multibyte_char_without_panicking() {
        // "é" is 2 bytes; put one right on the MAX_EVENT_DATA boundary so a naive byte-truncate
        // would split it.
        let mut data = "x".repeat(MAX_EVENT_DATA - 1);
        data.push('é');
        data.push_str("tail");
        let e = Event::new("t", "s", data);
        assert!(e.data.len() <= MAX_EVENT_DATA);
        assert!(e.data.is_char_boundary(e.data.len()));
        assert!(std::str::from_utf8(e.data.as_bytes()).is_ok());
    }

    #[test]
    fn parse_accepts_trailing_newline_or_not() {
        let a = Event::parse("foo|me|bar").unwrap();
        let b = Event::parse("foo|me|bar\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_preserves_embedded_pipes_in_data() {
        let e = Event::parse("TYPE|me|a|b|c\n").unwrap();
        assert_eq!(e.event_type, "TYPE");
        assert_eq!(e.sender, "me");
        assert_eq!(e.data, "a|b|c");
        assert_eq!(e.format(), "TYPE|me|a|b|c\n");
    }

    #[test]
    fn parse_rejects_missing_pipes() {
        assert!(Event::parse("justtype").is_err());
    }

    #[test]
    fn parse_rejects_empty_type_or_sender() {
        assert!(Event::parse("|sender|data").is_err());
        assert!(Event::parse("type||data").is_err());
        assert!(Event::parse("type|").is_err());
    }

    #[test]
    fn round_trip_parse_format() {
        let e = Event::new("foo", "me", "hello");
        let formatted = e.format();
        let parsed = Event::parse(&formatted).unwrap();
        assert_eq!(e.event_type, parsed.event_type);
        assert_eq!(e.sender, parsed.sender);
        assert_eq!(e.data, parsed.data);
    }

    #[test]
    fn publish_rejects_when_queue_is_saturated() {
        let mut bus = EventBus::new();
        for _ in 0..MAX_EVENTS_QUEUE {
            bus.publish("t", "s", "d").unwrap();
        }
        assert!(matches!(bus.publish("t", "s", "d"), Err(Error::QueueFull(_))));
    }
}
