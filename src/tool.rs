//! A tool's static configuration and live lifecycle state.

use std::os::fd::OwnedFd;
use std::time::Instant;

use crate::framer::LineFramer;
use crate::inbox::{Inbox, QueuePolicy};
use crate::platform::ProcessHandle;

/// Maximum length of a tool name, matching `MAX_TOOL_NAME` in the reference implementation.
pub const MAX_TOOL_NAME: usize = 63;
/// Maximum number of subscriptions a single tool may carry.
pub const MAX_SUBSCRIPTIONS: usize = 50;

/// A tool's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// Not running; no process handle.
    Stopped,
    /// `spawn` has been called but the process is not yet confirmed up.
    Starting,
    /// The process is alive and its streams are valid.
    Running,
    /// A graceful or forced kill has been requested; waiting for exit.
    Stopping,
    /// The process exited unexpectedly while `Running`.
    Crashed,
    /// `spawn` failed; terminal until the next `restart`.
    Error,
}

impl ToolStatus {
    /// The label used in control-surface responses (`Status: RUNNING`, etc).
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Stopped => "STOPPED",
            ToolStatus::Starting => "STARTING",
            ToolStatus::Running => "RUNNING",
            ToolStatus::Stopping => "STOPPING",
            ToolStatus::Crashed => "CRASHED",
            ToolStatus::Error => "ERROR",
        }
    }
}

/// When a tool should be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never auto-restart.
    Never,
    /// Always auto-restart on crash (subject to `max_restarts`).
    Always,
    /// Stay stopped until a subscribed event arrives, then auto-start.
    OnDemand,
}

/// A stdin write that has not finished draining into the tool's pipe. `offset` bytes of `bytes`
/// have already been accepted by the kernel; a follow-up non-blocking write resumes from there
/// instead of re-sending the already-written prefix. Reachable whenever a wire line exceeds
/// `PIPE_BUF` (a max-size event line is 4224 bytes; `PIPE_BUF` is 4096 on Linux), so the kernel is
/// free to accept a write only partially.
pub struct PendingWrite {
    /// The full line (including its trailing newline) being written to stdin.
    pub bytes: Vec<u8>,
    /// How many leading bytes of `bytes` have already been written.
    pub offset: usize,
}

/// The live process handle and open stream descriptors for a `Running`/`Starting`/`Stopping`
/// tool. Dropped (closing every descriptor) on any transition out of those states.
pub struct ToolProcess {
    /// The OS process handle.
    pub handle: ProcessHandle,
    /// Write end of the tool's stdin.
    pub stdin: OwnedFd,
    /// Read end of the tool's stdout.
    pub stdout: OwnedFd,
    /// Read end of the tool's stderr.
    pub stderr: OwnedFd,
}

/// A child process managed by the supervisor, plus its configuration, inbox and counters.
pub struct Tool {
    /// Unique name (≤ [`MAX_TOOL_NAME`] chars).
    pub name: String,
    /// Shell command line.
    pub command: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Start automatically when the framework comes up.
    pub autostart: bool,
    /// Restart when the process exits unexpectedly.
    pub restart_on_crash: bool,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
    /// Maximum automatic restarts before giving up.
    pub max_restarts: u32,
    /// Ceiling on inter-restart backoff growth, in seconds (default 60, per the reference
    /// implementation's `restart_max_delay_sec`).
    pub restart_max_delay_sec: u32,
    /// Current restart count.
    pub restart_count: u32,
    /// Event-type subscriptions (`*` matches everything).
    pub subscriptions: Vec<String>,
    /// Current lifecycle status.
    pub status: ToolStatus,
    /// Live process/stream handles; `None` whenever `status` is not
    /// `Starting`/`Running`/`Stopping`.
    pub process: Option<ToolProcess>,
    /// Per-tool stdout line framer (own carry-over buffer; never shared between tools).
    pub framer: LineFramer,
    /// Pending inbound events awaiting delivery to this tool's stdin.
    pub inbox: Inbox,
    /// An in-flight stdin write that has not yet fully drained into the pipe, if any.
    pub pending_write: Option<PendingWrite>,
    /// True while `restart_policy == OnDemand` and an auto-start has been triggered but the tool
    /// has not yet transitioned out of `Starting`/`Running`. Prevents double-spawn from repeated
    /// matching events.
    pub is_starting_on_demand: bool,
    /// When the process was (re)started.
    pub started_at: Option<Instant>,
    /// Last time the tool was observed alive by the health sweep.
    pub last_heartbeat: Option<Instant>,
    /// Events written to the tool's stdin.
    pub events_sent: u64,
    /// Events read from the tool's stdout and published.
    pub events_received: u64,
    /// Stderr lines forwarded as log output.
    pub log_lines: u64,
}

impl Tool {
    /// Creates a new, `Stopped` tool with the defaults from `register` (§4.C): restart policy
    /// `Always`, `max_restarts = 3`, inbox capacity 100 with `DropOldest`, no subscriptions.
    pub fn new(name: String, command: String) -> Self {
        Self {
            name,
            command,
            description: None,
            autostart: false,
            restart_on_crash: false,
            restart_policy: RestartPolicy::Always,
            max_restarts: 3,
            restart_max_delay_sec: 60,
            restart_count: 0,
            subscriptions: Vec::new(),
            status: ToolStatus::Stopped,
            process: None,
            framer: LineFramer::new(),
            inbox: Inbox::new(100, QueuePolicy::DropOldest),
            pending_write: None,
            is_starting_on_demand: false,
            started_at: None,
            last_heartbeat: None,
            events_sent: 0,
            events_received: 0,
            log_lines: 0,
        }
    }

    /// True iff this tool is an on-demand tool (`restart_policy == OnDemand`).
    pub fn is_on_demand(&self) -> bool {
        matches!(self.restart_policy, RestartPolicy::OnDemand)
    }

    /// Adds a subscription, trimming surrounding quotes/whitespace and de-duplicating.
    ///
    /// Returns `Err` if the subscription cap ([`MAX_SUBSCRIPTIONS`]) is already reached.
    pub fn subscribe(&mut self, event_type: &str) -> crate::Result<()> {
        let trimmed = trim_subscription(event_type);
        if self.subscriptions.iter().any(|s| s == trimmed) {
            return Ok(());
        }
        if self.subscriptions.len() >= MAX_SUBSCRIPTIONS {
            return Err(crate::Error::generic(format!(
                "tool '{}' has reached the subscription cap ({MAX_SUBSCRIPTIONS})",
                self.name
            )));
        }
        self.subscriptions.push(trimmed.to_string());
        Ok(())
    }

    /// True iff `event_type` matches one of this tool's subscriptions (exact match, after
    /// trimming, or the `*` wildcard). Short-circuits on the first hit.
    pub fn matches(&self, event_type: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|sub| sub == "*" || sub == event_type)
    }
}

/// Trims the surrounding quotes/whitespace the reference config format tolerates around
/// subscription entries (e.g. `" 'foo' "` becomes `foo`).
pub fn trim_subscription(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_trimming_matches_wildcard_and_exact() {
        let mut tool = Tool::new("c".into(), "true".into());
        tool.subscribe(" 'foo' ").unwrap();
        assert_eq!(tool.subscriptions, vec!["foo".to_string()]);
        assert!(tool.matches("foo"));
        assert!(!tool.matches("bar"));

        let mut wildcard_tool = Tool::new("a".into(), "true".into());
        wildcard_tool.subscribe("*").unwrap();
        assert!(wildcard_tool.matches("anything"));
    }

    #[test]
    fn subscription_cap_is_enforced() {
        let mut tool = Tool::new("d".into(), "true".into());
        for i in 0..MAX_SUBSCRIPTIONS {
            tool.subscribe(&format!("type{i}")).unwrap();
        }
        assert!(tool.subscribe("one-too-many").is_err());
    }

    #[test]
    fn duplicate_subscriptions_are_tolerated_without_growing() {
        let mut tool = Tool::new("e".into(), "true".into());
        tool.subscribe("foo").unwrap();
        tool.subscribe("foo").unwrap();
        assert_eq!(tool.subscriptions.len(), 1);
    }
}
