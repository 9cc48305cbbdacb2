//! CLI entry point (§6, §10.D).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser};

use toolframe::platform::UnixPlatform;
use toolframe::{config, configure_logger, context::FrameworkContext, mainloop, server, signals};

/// Process supervisor and event-routing bus for a fleet of cooperating tool processes.
#[derive(Parser, Debug)]
#[command(name = "toolframe", version = env!("CARGO_PKG_VERSION"), about, disable_version_flag = true)]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "yuki-frame.conf")]
    config: PathBuf,
    /// Force debug-level logging regardless of the config file.
    #[arg(short, long)]
    debug: bool,
    /// Enable the interactive console on standard input/output.
    #[arg(short, long)]
    interactive: bool,
    /// Override the control socket port from the config file.
    #[arg(short, long)]
    port: Option<u16>,
    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> toolframe::Result<()> {
    let (file_config, tool_configs) = config::load(&args.config)?;

    let level = if args.debug || file_config.enable_debug {
        log::LevelFilter::Debug
    } else {
        file_config.log_level.as_level_filter()
    };
    configure_logger(level);

    log::info!(target: "framework", "toolframe v{} starting", env!("CARGO_PKG_VERSION"));

    let control_port = args.port.unwrap_or(file_config.control_port);
    let ctx = Arc::new(FrameworkContext::new(UnixPlatform, Some(control_port)));
    ctx.set_config_path(args.config.clone());

    register_and_autostart(&ctx, &tool_configs);

    signals::install(ctx.clone())?;

    if file_config.enable_remote_control {
        server::spawn_socket_server(ctx.clone(), control_port)?;
    }
    if args.interactive {
        server::spawn_console(ctx.clone());
    }

    mainloop::run(&ctx);

    log::info!(target: "framework", "toolframe shut down");
    Ok(())
}

fn register_and_autostart(ctx: &Arc<FrameworkContext<UnixPlatform>>, tool_configs: &[config::ToolConfig]) {
    let mut state = ctx.state.lock();
    for tool in tool_configs {
        log::info!(target: "framework", "registering tool: {}", tool.name);
        if let Err(e) = state.registry.register(&tool.name, &tool.command) {
            log::error!(target: "framework", "failed to register tool '{}': {e}", tool.name);
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
    }
    for tool in tool_configs {
        if tool.autostart {
            log::info!(target: "framework", "auto-starting tool: {}", tool.name);
            if let Err(e) = state.registry.start(&tool.name) {
                log::error!(target: "framework", "failed to start tool '{}': {e}", tool.name);
            }
        }
    }
}
