//! `SIGINT`/`SIGTERM`/`SIGHUP` handling (§5, §9).
//!
//! A dedicated thread blocks on the signal iterator and flips shared flags rather than doing work
//! inside an actual signal handler, the same style `controller.rs`'s own signal thread uses for
//! its shutdown/reload path.

use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::context::FrameworkContext;
use crate::platform::Platform;
use crate::Result;

/// Spawns the signal-handling thread: `SIGINT`/`SIGTERM` request shutdown and end the thread;
/// `SIGHUP` requests a config reload and the thread keeps listening.
pub fn install<P>(ctx: Arc<FrameworkContext<P>>) -> Result<std::thread::JoinHandle<()>>
where
    P: Platform + Send + Sync + 'static,
{
    let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP])?;
    Ok(std::thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGTERM | SIGINT => {
                    log::info!(target: "framework", "received shutdown signal");
                    ctx.terminate();
                    break;
                }
                SIGHUP => {
                    log::info!(target: "framework", "received SIGHUP, requesting config reload");
                    ctx.reload_requested.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }))
}
