//! The mutable state threaded through the main loop and the dispatcher (§5, §9).
//!
//! Replaces the reference implementation's process-wide globals (`g_running`, the config
//! singleton, the registry singleton) with one owned value passed explicitly through the
//! call-graph, so the core is instantiable more than once — e.g. once per test.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::event::EventBus;
use crate::platform::{Platform, UnixPlatform};
use crate::registry::ToolRegistry;

/// Everything the main loop and the control dispatcher mutate under one lock (§5: "one mutex
/// guards the registry, each tool's inbox, and the bus queue").
pub struct SharedState<P: Platform = UnixPlatform> {
    /// Every registered tool.
    pub registry: ToolRegistry<P>,
    /// The pending-fan-out event queue.
    pub bus: EventBus,
}

/// Process-wide framework state: the shared, mutex-guarded [`SharedState`] plus the flags and
/// timestamps that may be read without taking the lock.
pub struct FrameworkContext<P: Platform = UnixPlatform> {
    /// Registry + bus, serialised by one lock.
    pub state: Mutex<SharedState<P>>,
    /// Cleared to request a graceful shutdown; checked at the top of every main-loop tick.
    pub running: AtomicBool,
    /// Set by the signal thread on `SIGHUP`; `tick` consumes it (via `swap`) and reloads tool
    /// declarations from [`config_path`](Self::config_path), if one has been recorded.
    pub reload_requested: AtomicBool,
    /// The config file `tick` re-reads on a reload; recorded once via [`Self::set_config_path`]
    /// after the framework's initial config load succeeds. `None` means a `SIGHUP` reload is a
    /// no-op beyond a logged warning (e.g. a context built directly in tests).
    pub config_path: Mutex<Option<PathBuf>>,
    /// When the framework finished initialising, for the `uptime` control command.
    pub started_at: Instant,
    /// The loopback control port, if remote control is enabled.
    pub control_port: Option<u16>,
}

impl<P: Platform> FrameworkContext<P> {
    /// Builds a fresh context with an empty registry and bus.
    pub fn new(platform: P, control_port: Option<u16>) -> Self {
        Self {
            state: Mutex::new(SharedState { registry: ToolRegistry::new(platform), bus: EventBus::new() }),
            running: AtomicBool::new(true),
            reload_requested: AtomicBool::new(false),
            config_path: Mutex::new(None),
            started_at: Instant::now(),
            control_port,
        }
    }

    /// Records the path `tick` should re-read from on a `SIGHUP` reload.
    pub fn set_config_path(&self, path: PathBuf) {
        *self.config_path.lock() = Some(path);
    }

    /// True until a shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests a graceful shutdown; observed by the main loop within one tick.
    pub fn terminate(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Seconds elapsed since the context was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;

    #[test]
    fn terminate_flips_is_running() {
        let ctx = FrameworkContext::new(FakePlatform::new(), None);
        assert!(ctx.is_running());
        ctx.terminate();
        assert!(!ctx.is_running());
    }

    #[test]
    fn uptime_is_non_negative_immediately_after_creation() {
        let ctx = FrameworkContext::new(FakePlatform::new(), None);
        assert!(ctx.uptime_secs() < 2);
    }
}
