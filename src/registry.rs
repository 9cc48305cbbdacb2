//! Named, ordered collection of [`Tool`]s with lifecycle operations (§4.C).
//!
//! Generic over [`Platform`] so the lifecycle logic can be exercised against
//! [`crate::platform::fake::FakePlatform`] in tests, the way the teacher's own `Supervisor<T>`
//! stays generic over its task payload rather than hard-coding one concrete worker type.

use std::os::fd::{AsRawFd, RawFd};

use crate::platform::{Platform, ProcessHandle, UnixPlatform};
use crate::tool::{PendingWrite, RestartPolicy, Tool, ToolProcess, ToolStatus};
use crate::{Error, Result};

/// Maximum number of tools a registry may hold (§3).
pub const MAX_TOOLS: usize = 100;

/// Graceful-stop wait before escalating to a forced kill, in milliseconds.
const STOP_WAIT_MS: i64 = 1000;

/// Owns every registered [`Tool`] in declaration order and mediates all lifecycle transitions.
pub struct ToolRegistry<P: Platform = UnixPlatform> {
    platform: P,
    tools: Vec<Tool>,
}

impl Default for ToolRegistry<UnixPlatform> {
    fn default() -> Self {
        Self::new(UnixPlatform)
    }
}

impl<P: Platform> ToolRegistry<P> {
    /// Creates an empty registry driven by `platform`.
    pub fn new(platform: P) -> Self {
        Self { platform, tools: Vec::new() }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.tools.iter().position(|t| t.name == name)
    }

    /// Registers a new tool with the defaults from §4.C. `AlreadyExists` on a duplicate name,
    /// `Generic` once [`MAX_TOOLS`] is reached.
    pub fn register(&mut self, name: &str, command: &str) -> Result<()> {
        if name.is_empty() || command.is_empty() {
            return Err(Error::InvalidArg("tool name and command must be non-empty".into()));
        }
        if self.index_of(name).is_some() {
            return Err(Error::AlreadyExists(format!("tool '{name}'")));
        }
        if self.tools.len() >= MAX_TOOLS {
            return Err(Error::generic(format!("registry is full ({MAX_TOOLS} tools)")));
        }
        self.tools.push(Tool::new(name.to_string(), command.to_string()));
        Ok(())
    }

    /// Stops (if running) and removes a tool, preserving the relative order of the rest.
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        if self.index_of(name).is_none() {
            return Err(Error::NotFound(format!("tool '{name}'")));
        }
        if self.tools[self.index_of(name).unwrap()].status != ToolStatus::Stopped {
            self.stop(name)?;
        }
        let idx = self.index_of(name).expect("checked above");
        self.tools.remove(idx);
        Ok(())
    }

    /// Looks up a tool by name.
    pub fn find(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Looks up a tool by name, mutably.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Tool> {
        self.tools.iter_mut().find(|t| t.name == name)
    }

    /// Names of every registered tool, in declaration order. A snapshot, not a live view — safe
    /// to iterate while mutating individual tools.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// A snapshot-stable ordered walk over every registered tool (§4.C `first`/`next`).
    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    /// Appends a subscription to a tool's subscription set.
    pub fn subscribe(&mut self, name: &str, event_type: &str) -> Result<()> {
        self.find_mut(name)
            .ok_or_else(|| Error::NotFound(format!("tool '{name}'")))?
            .subscribe(event_type)
    }

    /// Queues `msg` for delivery to `name`'s stdin on a future [`ToolRegistry::flush_inboxes`]
    /// tick, going through the tool's own overflow policy like any other inbound event.
    pub fn enqueue(&mut self, name: &str, msg: String) -> Result<()> {
        self.find_mut(name)
            .ok_or_else(|| Error::NotFound(format!("tool '{name}'")))?
            .inbox
            .add(msg)
    }

    /// Starts a tool. No-op (success) if already `Running`. `NotFound` if unknown.
    pub fn start(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name).ok_or_else(|| Error::NotFound(format!("tool '{name}'")))?;
        if self.tools[idx].status == ToolStatus::Running {
            return Ok(());
        }

        self.tools[idx].status = ToolStatus::Starting;
        let command = self.tools[idx].command.clone();

        let spawned = self.platform.spawn(&command);
        let (handle, streams) = match spawned {
            Ok(v) => v,
            Err(e) => {
                self.tools[idx].status = ToolStatus::Error;
                log::error!(target: "registry", "failed to start '{name}': {e}");
                return Err(Error::ProcessFailed(format!("'{name}': {e}")));
            }
        };

        if let Err(e) = self.platform.set_nonblocking(streams.stdin.as_raw_fd()) {
            log::warn!(target: "registry", "tool '{name}': stdin not set non-blocking: {e}");
        }
        if let Err(e) = self.platform.set_nonblocking(streams.stdout.as_raw_fd()) {
            log::warn!(target: "registry", "tool '{name}': stdout not set non-blocking: {e}");
        }
        if let Err(e) = self.platform.set_nonblocking(streams.stderr.as_raw_fd()) {
            log::warn!(target: "registry", "tool '{name}': stderr not set non-blocking: {e}");
        }

        let tool = &mut self.tools[idx];
        tool.process = Some(ToolProcess {
            handle,
            stdin: streams.stdin,
            stdout: streams.stdout,
            stderr: streams.stderr,
        });
        tool.status = ToolStatus::Running;
        tool.started_at = Some(std::time::Instant::now());
        tool.last_heartbeat = Some(std::time::Instant::now());
        tool.is_starting_on_demand = false;

        log::info!(target: name, "started, pid={}", self.platform.process_id(handle));
        Ok(())
    }

    /// Stops a tool. No-op (success) if not `Running`. `NotFound` if unknown.
    pub fn stop(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name).ok_or_else(|| Error::NotFound(format!("tool '{name}'")))?;
        if self.tools[idx].status != ToolStatus::Running && self.tools[idx].status != ToolStatus::Crashed
        {
            if self.tools[idx].status != ToolStatus::Stopped {
                self.tools[idx].status = ToolStatus::Stopped;
            }
            return Ok(());
        }

        let handle = self.tools[idx].process.as_ref().map(|p| p.handle);
        self.tools[idx].status = ToolStatus::Stopping;

        if let Some(handle) = handle {
            if let Err(e) = self.platform.kill(handle, false) {
                log::warn!(target: "registry", "tool '{name}': graceful kill failed ({e}), forcing");
                let _ = self.platform.kill(handle, true);
            }
            match self.platform.wait(handle, STOP_WAIT_MS) {
                Ok(crate::platform::WaitOutcome::TimedOut) => {
                    log::warn!(target: "registry", "tool '{name}': did not exit in {STOP_WAIT_MS}ms, forcing kill");
                    let _ = self.platform.kill(handle, true);
                    let _ = self.platform.wait(handle, STOP_WAIT_MS);
                }
                _ => {}
            }
        }

        let tool = &mut self.tools[idx];
        tool.process = None;
        // A write in flight targeted the old stdin pipe, now closed; a fresh start gets a fresh
        // pipe, so there is nothing left to resume.
        tool.pending_write = None;
        // §4.C: preserve the inbox only if the tool is both on-demand and restart-on-crash.
        if !(tool.is_on_demand() && tool.restart_on_crash) {
            tool.inbox.clear();
        }
        tool.status = ToolStatus::Stopped;
        tool.is_starting_on_demand = false;
        log::info!(target: "registry", "tool '{name}' stopped");
        Ok(())
    }

    /// Stops then starts a tool, bumping `restart_count` and settling briefly in between.
    pub fn restart(&mut self, name: &str) -> Result<()> {
        self.stop(name)?;
        if let Some(tool) = self.find_mut(name) {
            tool.restart_count += 1;
        }
        self.platform.sleep_ms(500);
        self.start(name)
    }

    /// Writes `msg` plus a trailing newline to a tool's stdin, blocking the caller until the
    /// pipe accepts it (in practice: spin-retrying the non-blocking write). `NotFound` if
    /// unknown; `Generic` if not `Running`.
    pub fn send_event(&mut self, name: &str, msg: &str) -> Result<()> {
        loop {
            match self.send_event_nonblocking(name, msg) {
                Err(Error::QueueFull(_)) => {
                    self.platform.sleep_ms(10);
                    continue;
                }
                other => return other,
            }
        }
    }

    /// Non-blocking variant of [`ToolRegistry::send_event`]; `QueueFull` if the pipe buffer is
    /// momentarily full.
    ///
    /// A write that the kernel only partially accepts (reachable once the wire line exceeds
    /// `PIPE_BUF`, e.g. a max-size event line) resumes from the byte offset it left off at on the
    /// next call with the same message, rather than re-sending the already-written prefix. The
    /// caller must keep retrying with the identical `msg` until this returns `Ok` — which is
    /// exactly what [`ToolRegistry::flush_inboxes`] does by re-peeking the same inbox head.
    pub fn send_event_nonblocking(&mut self, name: &str, msg: &str) -> Result<()> {
        let idx = self.index_of(name).ok_or_else(|| Error::NotFound(format!("tool '{name}'")))?;
        if self.tools[idx].status != ToolStatus::Running {
            return Err(Error::generic(format!("tool '{name}' is not running")));
        }
        let fd = self.tools[idx]
            .process
            .as_ref()
            .expect("Running tool always has a process")
            .stdin
            .as_raw_fd();

        if self.tools[idx].pending_write.is_none() {
            let mut bytes = msg.as_bytes().to_vec();
            if !bytes.ends_with(b"\n") {
                bytes.push(b'\n');
            }
            self.tools[idx].pending_write = Some(PendingWrite { bytes, offset: 0 });
        }

        let offset = self.tools[idx].pending_write.as_ref().expect("set above").offset;
        let written = {
            let pw = self.tools[idx].pending_write.as_ref().expect("set above");
            self.platform.write_nonblocking(fd, &pw.bytes[offset..])?
        };
        if written == 0 {
            return Err(Error::QueueFull(format!("tool '{name}' stdin")));
        }

        let pw = self.tools[idx].pending_write.as_mut().expect("set above");
        pw.offset += written;
        if pw.offset < pw.bytes.len() {
            return Err(Error::QueueFull(format!("tool '{name}' stdin")));
        }

        self.tools[idx].pending_write = None;
        self.tools[idx].events_sent += 1;
        Ok(())
    }

    /// Drains as much of each `Running` tool's inbox as its stdin pipe can currently absorb.
    /// Stops at the first message a tool's pipe can't fully accept this tick; that message (and
    /// everything behind it) stays queued for the next tick rather than being written partially.
    pub fn flush_inboxes(&mut self) {
        let names = self.names();
        for name in names {
            loop {
                let Some(idx) = self.index_of(&name) else { break };
                if self.tools[idx].status != ToolStatus::Running {
                    break;
                }
                let Some(msg) = self.tools[idx].inbox.peek().map(str::to_string) else { break };
                match self.send_event_nonblocking(&name, msg.trim_end_matches('\n')) {
                    Ok(()) => {
                        self.tools[idx].inbox.remove();
                    }
                    Err(Error::QueueFull(_)) => break,
                    Err(e) => {
                        log::warn!(target: "registry", "tool '{name}': inbox flush failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    /// Health sweep: detects tools whose process has exited unexpectedly, marks them `Crashed`,
    /// and restarts them if `restart_on_crash` and under the restart cap (§4.C).
    pub fn check_health(&mut self) {
        let names = self.names();
        for name in names {
            let Some(idx) = self.index_of(&name) else { continue };
            if self.tools[idx].status != ToolStatus::Running {
                continue;
            }
            let handle = match self.tools[idx].process.as_ref().map(|p| p.handle) {
                Some(h) => h,
                None => continue,
            };
            if self.platform.is_running(handle) {
                self.tools[idx].last_heartbeat = Some(std::time::Instant::now());
                continue;
            }

            self.tools[idx].process = None;
            self.tools[idx].pending_write = None;
            self.tools[idx].status = ToolStatus::Crashed;
            log::warn!(target: "registry", "tool '{name}' crashed");

            let (restart_on_crash, restart_count, max_restarts) = {
                let tool = &self.tools[idx];
                (tool.restart_on_crash, tool.restart_count, tool.max_restarts)
            };
            if restart_on_crash && restart_count < max_restarts {
                log::info!(target: "registry", "restarting crashed tool '{name}' ({}/{max_restarts})", restart_count + 1);
                if let Err(e) = self.restart(&name) {
                    log::error!(target: "registry", "failed to restart '{name}': {e}");
                }
            }
        }
    }

    /// The handle of a `Running`/`Starting`/`Stopping` tool's process, for callers (e.g. the
    /// control dispatcher) that need a `pid` without borrowing the [`Tool`] itself.
    pub fn process_handle(&self, name: &str) -> Option<ProcessHandle> {
        self.find(name)?.process.as_ref().map(|p| p.handle)
    }

    /// The underlying platform's reported OS process id for `handle`.
    pub fn process_id(&self, handle: ProcessHandle) -> u32 {
        self.platform.process_id(handle)
    }

    /// Non-blocking read of a raw stream descriptor (stdout/stderr), for the output pump. Exposed
    /// here rather than on `Platform` directly so callers don't need their own platform handle.
    pub fn read_stream(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize> {
        self.platform.read_nonblocking(fd, buf)
    }
}
