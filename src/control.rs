//! One canonical command dispatcher shared by the socket and console frontends (§4.F).
//!
//! Response text is copied verbatim from `control_api.c`'s `control_execute_command` so operators
//! and scripts that already know the reference wording see the same thing here.

use crate::context::FrameworkContext;
use crate::platform::Platform;
use crate::tool::ToolStatus;

/// The framework version reported by the `version` command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Locks `ctx`'s shared state and dispatches `command` through [`execute`]. The entry point for
/// the socket and console frontends, which never hold the lock themselves.
pub fn dispatch<P: Platform>(ctx: &FrameworkContext<P>, command: &str) -> String {
    let mut state = ctx.state.lock();
    execute(ctx, &mut state, command)
}

/// Dispatches `command` against an already-locked [`crate::context::SharedState`]. Used by
/// [`dispatch`] and directly by the main loop, which is already holding the lock when it routes a
/// `COMMAND` line read from a tool's stdout — `parking_lot::Mutex` is not reentrant, so that path
/// must not call [`dispatch`] and re-lock.
pub(crate) fn execute<P: Platform>(
    ctx: &FrameworkContext<P>,
    state: &mut crate::context::SharedState<P>,
    command: &str,
) -> String {
    let mut words = command.trim().splitn(2, char::is_whitespace);
    let verb = match words.next() {
        Some(v) if !v.is_empty() => v.to_ascii_lowercase(),
        _ => return "Error: Empty command\n".to_string(),
    };
    let arg = words.next().map(str::trim).unwrap_or("").to_string();

    match verb.as_str() {
        "list" => cmd_list(state),
        "start" if !arg.is_empty() => cmd_start(state, &arg),
        "stop" if !arg.is_empty() => cmd_stop(state, &arg),
        "restart" if !arg.is_empty() => cmd_restart(state, &arg),
        "status" if !arg.is_empty() => cmd_status(state, &arg),
        "uptime" => cmd_uptime(ctx),
        "version" => cmd_version(),
        "shutdown" => cmd_shutdown(ctx),
        "help" => cmd_help(),
        other => format!("Error: Unknown command '{other}'\nType 'help' for available commands\n"),
    }
}

fn cmd_list<P: Platform>(state: &crate::context::SharedState<P>) -> String {
    let mut out = String::new();
    out.push_str("\nTools Status:\n");
    out.push_str(&format!("{:<20} {:<10} {:<10}\n", "Name", "Status", "PID"));
    out.push_str("------------------------------------------------------------\n");
    for tool in state.registry.iter() {
        let pid = tool.process.as_ref().map(|p| p.handle).unwrap_or(0);
        out.push_str(&format!("{:<20} {:<10} {:<10}\n", tool.name, tool.status.as_str(), pid));
    }
    out.push('\n');
    out
}

fn cmd_start<P: Platform>(state: &mut crate::context::SharedState<P>, name: &str) -> String {
    match state.registry.start(name) {
        Ok(()) => {
            let pid = state.registry.process_handle(name).unwrap_or(0);
            format!("Success: Tool '{name}' started\n  PID: {pid}\n  Status: RUNNING\n")
        }
        Err(crate::Error::NotFound(_)) => format!("Error: Tool '{name}' not found in configuration\n"),
        Err(_) => format!("Error: Failed to start tool '{name}'\n"),
    }
}

fn cmd_stop<P: Platform>(state: &mut crate::context::SharedState<P>, name: &str) -> String {
    match state.registry.stop(name) {
        Ok(()) => format!("Success: Tool '{name}' stopped\n"),
        Err(_) => format!("Error: Failed to stop tool '{name}'\n"),
    }
}

fn cmd_restart<P: Platform>(state: &mut crate::context::SharedState<P>, name: &str) -> String {
    match state.registry.restart(name) {
        Ok(()) => {
            let pid = state.registry.process_handle(name).unwrap_or(0);
            format!("Success: Tool '{name}' restarted\n  PID: {pid}\n")
        }
        Err(_) => format!("Error: Failed to restart tool '{name}'\n"),
    }
}

fn cmd_status<P: Platform>(state: &crate::context::SharedState<P>, name: &str) -> String {
    let Some(tool) = state.registry.find(name) else {
        return format!("Error: Tool '{name}' not found\n");
    };
    let mut out = String::new();
    out.push_str("\nTool Status:\n");
    out.push_str(&format!("  Name: {}\n", tool.name));
    out.push_str(&format!("  Command: {}\n", tool.command));
    if let Some(desc) = &tool.description {
        if !desc.is_empty() {
            out.push_str(&format!("  Description: {desc}\n"));
        }
    }
    out.push_str(&format!(
        "  Status: {}\n",
        if tool.status == ToolStatus::Running {
            "RUNNING"
        } else if tool.status == ToolStatus::Stopped {
            "STOPPED"
        } else if tool.status == ToolStatus::Crashed {
            "CRASHED"
        } else {
            "UNKNOWN"
        }
    ));
    let pid = tool.process.as_ref().map(|p| p.handle).unwrap_or(0);
    out.push_str(&format!("  PID: {pid}\n"));
    out.push_str(&format!("  Autostart: {}\n", if tool.autostart { "yes" } else { "no" }));
    out.push_str(&format!("  Restart on crash: {}\n", if tool.restart_on_crash { "yes" } else { "no" }));
    out.push_str(&format!("  Events sent: {}\n", tool.events_sent));
    out.push_str(&format!("  Events received: {}\n", tool.events_received));
    out.push('\n');
    out
}

fn cmd_uptime<P: Platform>(ctx: &FrameworkContext<P>) -> String {
    let uptime = ctx.uptime_secs();
    let hours = uptime / 3600;
    let minutes = (uptime % 3600) / 60;
    let seconds = uptime % 60;
    format!("Framework uptime: {hours}h {minutes}m {seconds}s\n")
}

fn cmd_version() -> String {
    format!("Toolframe version {VERSION}\n")
}

fn cmd_shutdown<P: Platform>(ctx: &FrameworkContext<P>) -> String {
    ctx.terminate();
    log::info!(target: "framework", "shutdown requested via control command");
    "Shutting down framework...\n".to_string()
}

fn cmd_help() -> String {
    "\nAvailable commands:\n\
     \x20 list                 - List all tools and their status\n\
     \x20 start <tool>         - Start a tool\n\
     \x20 stop <tool>          - Stop a tool\n\
     \x20 restart <tool>       - Restart a tool\n\
     \x20 status <tool>        - Show detailed tool status\n\
     \x20 uptime               - Show framework uptime\n\
     \x20 version              - Show framework version\n\
     \x20 shutdown             - Shutdown the framework\n\
     \x20 help                 - Show this help message\n\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;

    fn context() -> FrameworkContext<FakePlatform> {
        FrameworkContext::new(FakePlatform::new(), None)
    }

    #[test]
    fn end_to_end_start_status_stop_shutdown_matches_scenario_6() {
        let ctx = context();
        {
            let mut state = ctx.state.lock();
            state.registry.register("t", "true").unwrap();
        }

        let resp = dispatch(&ctx, "start t");
        assert!(resp.starts_with("Success: Tool 't' started"));

        let resp = dispatch(&ctx, "status t");
        assert!(resp.lines().any(|l| l.trim() == "Status: RUNNING"));

        let resp = dispatch(&ctx, "stop t");
        assert_eq!(resp, "Success: Tool 't' stopped\n");

        assert!(ctx.is_running());
        let resp = dispatch(&ctx, "shutdown");
        assert_eq!(resp, "Shutting down framework...\n");
        assert!(!ctx.is_running());
    }

    #[test]
    fn unknown_verb_and_empty_command_are_errors() {
        let ctx = context();
        assert!(dispatch(&ctx, "").starts_with("Error: Empty command"));
        assert!(dispatch(&ctx, "bogus").starts_with("Error: Unknown command 'bogus'"));
    }

    #[test]
    fn start_of_unknown_tool_is_not_found() {
        let ctx = context();
        assert_eq!(dispatch(&ctx, "start ghost"), "Error: Tool 'ghost' not found in configuration\n");
    }

    #[test]
    fn command_verb_is_case_insensitive() {
        let ctx = context();
        {
            let mut state = ctx.state.lock();
            state.registry.register("t", "true").unwrap();
        }
        assert!(dispatch(&ctx, "START t").starts_with("Success"));
    }

    #[test]
    fn list_includes_every_registered_tool() {
        let ctx = context();
        {
            let mut state = ctx.state.lock();
            state.registry.register("a", "true").unwrap();
            state.registry.register("b", "true").unwrap();
        }
        let resp = dispatch(&ctx, "list");
        assert!(resp.contains("a"));
        assert!(resp.contains("b"));
    }
}
