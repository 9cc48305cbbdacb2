//! The single-threaded supervisor tick (§4.G).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{FrameworkContext, SharedState};
use crate::event::Event;
use crate::platform::Platform;

/// Sleep between ticks, matching the reference implementation's ~100ms cadence.
const TICK_MS: u64 = 100;

/// Runs the main supervisor tick repeatedly until `ctx.running` is cleared, then stops every tool
/// in declaration order (§4.G, §5).
pub fn run<P: Platform>(ctx: &Arc<FrameworkContext<P>>) {
    log::info!(target: "framework", "entering main loop");
    while ctx.is_running() {
        tick(ctx);
        std::thread::sleep(Duration::from_millis(TICK_MS));
    }
    shutdown(ctx);
    log::info!(target: "framework", "main loop exiting");
}

/// One iteration: fan out queued events, pump every running tool's stdout/stderr (routing
/// `COMMAND` lines through the dispatcher and regular lines onto the bus), flush inboxes to
/// stdin, then sweep health.
fn tick<P: Platform>(ctx: &FrameworkContext<P>) {
    let mut guard = ctx.state.lock();
    let state = &mut *guard;

    if ctx.reload_requested.swap(false, Ordering::SeqCst) {
        reload_config(ctx, state);
    }

    state.bus.process_queue(&mut state.registry);

    for (sender, line) in pump_outputs(&mut state.registry) {
        match Event::parse(&line) {
            Ok(event) if event.event_type == "COMMAND" => {
                let response = crate::control::execute(ctx, state, &event.data);
                let reply = Event::new("RESPONSE", "framework", response.trim_end_matches('\n')).format();
                if let Err(e) = state.registry.enqueue(&sender, reply) {
                    log::warn!(target: "framework", "failed to route command response to '{sender}': {e}");
                }
            }
            Ok(event) => {
                if let Err(e) = state.bus.publish(event.event_type, event.sender, event.data) {
                    log::warn!(target: "framework", "publish from '{sender}' failed: {e}");
                } else if let Some(tool) = state.registry.find_mut(&sender) {
                    tool.events_received += 1;
                }
            }
            Err(e) => log::warn!(target: "framework", "malformed line from '{sender}': {e}"),
        }
    }

    state.registry.flush_inboxes();
    state.registry.check_health();
}

/// Re-reads the config file named by `ctx.config_path` (if any) and re-applies tool declarations:
/// known tools get their description/restart policy/subscriptions/command updated in place, and
/// sections for tools not yet registered are registered (and auto-started, if so marked). A tool
/// whose command changed keeps running under its old command until its next restart; a tool
/// dropped from the file entirely is left registered rather than torn down from under a reload.
fn reload_config<P: Platform>(ctx: &FrameworkContext<P>, state: &mut SharedState<P>) {
    let Some(path) = ctx.config_path.lock().clone() else {
        log::warn!(target: "framework", "received SIGHUP but no config path is known, ignoring reload");
        return;
    };

    let (_config, tool_configs) = match crate::config::load(&path) {
        Ok(loaded) => loaded,
        Err(e) => {
            log::error!(target: "framework", "config reload from '{}' failed: {e}", path.display());
            return;
        }
    };

    log::info!(target: "framework", "reloading tool declarations from '{}'", path.display());
    for tool in &tool_configs {
        if let Some(existing) = state.registry.find_mut(&tool.name) {
            existing.description = tool.description.clone();
            existing.restart_on_crash = tool.restart_on_crash;
            existing.max_restarts = tool.max_restarts;
            existing.autostart = tool.autostart;
            if existing.command != tool.command {
                log::info!(
                    target: "framework",
                    "tool '{}': command changed, takes effect on next restart",
                    tool.name
                );
                existing.command = tool.command.clone();
            }
            existing.subscriptions.clear();
            for sub in &tool.subscriptions {
                if let Err(e) = existing.subscribe(sub) {
                    log::warn!(target: "framework", "tool '{}': {e}", tool.name);
                }
            }
        } else {
            log::info!(target: "framework", "reload: registering new tool '{}'", tool.name);
            if let Err(e) = state.registry.register(&tool.name, &tool.command) {
                log::error!(target: "framework", "reload: failed to register tool '{}': {e}", tool.name);
                continue;
            }
            let registered = state.registry.find_mut(&tool.name).expect("just registered");
            registered.description = tool.description.clone();
            registered.autostart = tool.autostart;
            registered.restart_on_crash = tool.restart_on_crash;
            registered.max_restarts = tool.max_restarts;
            for sub in &tool.subscriptions {
                if let Err(e) = registered.subscribe(sub) {
                    log::warn!(target: "framework", "tool '{}': {e}", tool.name);
                }
            }
            if tool.autostart {
                if let Err(e) = state.registry.start(&tool.name) {
                    log::error!(target: "framework", "reload: failed to start tool '{}': {e}", tool.name);
                }
            }
        }
    }
}

/// Drains stderr (forwarded as log lines) and stdout (framed into complete lines) for every
/// `Running` tool this tick, returning `(sender_name, line)` for each complete stdout line.
fn pump_outputs<P: Platform>(registry: &mut crate::registry::ToolRegistry<P>) -> Vec<(String, String)> {
    use crate::tool::ToolStatus;
    use std::os::fd::AsRawFd;

    let mut out = Vec::new();
    let mut buf = [0u8; 4096];

    for name in registry.names() {
        let Some(tool) = registry.find_mut(&name) else { continue };
        if tool.status != ToolStatus::Running {
            continue;
        }
        let Some(process) = &tool.process else { continue };
        let stderr_fd = process.stderr.as_raw_fd();
        let stdout_fd = process.stdout.as_raw_fd();

        match registry.read_stream(stderr_fd, &mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                for line in text.trim_end_matches('\n').split('\n') {
                    if !line.is_empty() {
                        log::info!(target: name.as_str(), "{line}");
                        if let Some(tool) = registry.find_mut(&name) {
                            tool.log_lines += 1;
                        }
                    }
                }
            }
            Err(e) => log::warn!(target: "framework", "tool '{name}': stderr read failed: {e}"),
        }

        match registry.read_stream(stdout_fd, &mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let Some(tool) = registry.find_mut(&name) else { continue };
                let lines = tool.framer.feed(&buf[..n]);
                for line in lines {
                    out.push((name.clone(), line));
                }
            }
            Err(e) => log::warn!(target: "framework", "tool '{name}': stdout read failed: {e}"),
        }
    }

    out
}

fn shutdown<P: Platform>(ctx: &FrameworkContext<P>) {
    let mut state = ctx.state.lock();
    let names = state.registry.names();
    for name in names {
        if let Err(e) = state.registry.stop(&name) {
            log::warn!(target: "framework", "failed to stop '{name}' during shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;

    #[test]
    fn tick_fans_out_published_events_and_flushes_inboxes() {
        let ctx = FrameworkContext::new(FakePlatform::new(), None);
        {
            let mut state = ctx.state.lock();
            state.registry.register("a", "true").unwrap();
            state.registry.subscribe("a", "*").unwrap();
            state.registry.start("a").unwrap();
            state.bus.publish("foo", "x", "hello").unwrap();
        }
        tick(&ctx);
        let state = ctx.state.lock();
        // Delivered then immediately flushed to the (fake) stdin pipe this same tick.
        assert_eq!(state.registry.find("a").unwrap().inbox.count(), 0);
        assert!(state.registry.find("a").unwrap().events_sent >= 1);
    }

    #[test]
    fn sighup_reload_updates_existing_tools_and_registers_new_ones() {
        use std::io::Write;

        let ctx = FrameworkContext::new(FakePlatform::new(), None);
        {
            let mut state = ctx.state.lock();
            state.registry.register("a", "true").unwrap();
        }

        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            "[tool:a]\ncommand = true\nsubscribe_to = foo\n\n[tool:b]\ncommand = true\nautostart = yes\n"
        )
        .unwrap();
        ctx.set_config_path(f.path().to_path_buf());
        ctx.reload_requested.store(true, Ordering::SeqCst);

        tick(&ctx);

        assert!(!ctx.reload_requested.load(Ordering::SeqCst));
        let state = ctx.state.lock();
        assert_eq!(state.registry.find("a").unwrap().subscriptions, vec!["foo".to_string()]);
        let b = state.registry.find("b").unwrap();
        assert_eq!(b.status, crate::tool::ToolStatus::Running);
    }

    #[test]
    fn sighup_reload_without_a_known_config_path_is_a_logged_no_op() {
        let ctx = FrameworkContext::new(FakePlatform::new(), None);
        ctx.reload_requested.store(true, Ordering::SeqCst);
        tick(&ctx);
        assert!(!ctx.reload_requested.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_stops_every_tool() {
        let ctx = FrameworkContext::new(FakePlatform::new(), None);
        {
            let mut state = ctx.state.lock();
            state.registry.register("a", "true").unwrap();
            state.registry.start("a").unwrap();
        }
        shutdown(&ctx);
        let state = ctx.state.lock();
        assert_eq!(state.registry.find("a").unwrap().status, crate::tool::ToolStatus::Stopped);
    }
}
