//! Process spawning and non-blocking I/O, abstracted over the host OS.
//!
//! The Unix implementation spawns the command through `/bin/sh -c`, exactly like
//! `platform_spawn_process` in the reference implementation: the child's three standard streams
//! come back as file descriptors the parent owns, and the child's ends are never visible to the
//! parent process once spawn returns.

use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// An opaque handle to a spawned child process.
pub type ProcessHandle = u32;

/// The outcome of a bounded [`Platform::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process exited.
    Exited,
    /// The timeout elapsed before the process exited.
    TimedOut,
}

/// The three standard-stream descriptors handed back by [`Platform::spawn`].
pub struct SpawnedStreams {
    /// Write end of the child's stdin.
    pub stdin: OwnedFd,
    /// Read end of the child's stdout.
    pub stdout: OwnedFd,
    /// Read end of the child's stderr.
    pub stderr: OwnedFd,
}

/// Abstract contract for process spawning, non-blocking I/O and liveness checks.
///
/// Implementable on any modern OS; the only implementation shipped here targets Unix via `libc`
/// and `nix`, in the same spirit as the teacher's own comfort with raw syscalls for process and
/// device control (see `thread_rt.rs`, `io/keyboard.rs`).
pub trait Platform {
    /// Spawns `command` through the system shell, returning a handle plus the three piped
    /// standard streams. The streams are not yet in non-blocking mode; call
    /// [`Platform::set_nonblocking`] on each before reading/writing.
    fn spawn(&self, command: &str) -> Result<(ProcessHandle, SpawnedStreams)>;
    /// Puts `fd` into non-blocking mode.
    fn set_nonblocking(&self, fd: RawFd) -> Result<()>;
    /// Reads up to `buf.len()` bytes without blocking. Returns `Ok(0)` both when no data is
    /// currently available and when the peer has closed the pipe; the caller distinguishes the
    /// two via [`Platform::is_running`].
    fn read_nonblocking(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize>;
    /// Writes up to `buf.len()` bytes without blocking. Returns `Ok(0)` when the pipe buffer is
    /// currently full.
    fn write_nonblocking(&self, fd: RawFd, buf: &[u8]) -> Result<usize>;
    /// Requests termination: graceful (`SIGTERM`) if `force` is false, immediate (`SIGKILL`)
    /// otherwise. Killing an already-exited process is not an error.
    fn kill(&self, handle: ProcessHandle, force: bool) -> Result<()>;
    /// True iff the process has not yet exited.
    fn is_running(&self, handle: ProcessHandle) -> bool;
    /// Waits up to `timeout_ms` for the process to exit. `timeout_ms <= 0` polls once.
    fn wait(&self, handle: ProcessHandle, timeout_ms: i64) -> Result<WaitOutcome>;
    /// The OS process id for `handle` (on Unix, the handle already is the pid).
    fn process_id(&self, handle: ProcessHandle) -> u32;
    /// Suspends the calling thread.
    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// The Unix [`Platform`] implementation, built on `std::process::Command` for spawning and raw
/// `libc`/`nix` calls for the non-blocking and liveness primitives the standard library does not
/// expose.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPlatform;

/// Children spawned by [`UnixPlatform`] are tracked by pid; the `std::process::Child` handle is
/// intentionally leaked into a process-local table so `wait`/`kill`/`is_running` can operate on a
/// bare pid, matching the abstract contract in SPEC_FULL.md §4.A (`ProcessHandle` is just an
/// integer, not an owned resource the caller must thread around).
mod children {
    use super::Child;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    static TABLE: Mutex<Option<HashMap<u32, Child>>> = Mutex::new(None);

    pub fn insert(pid: u32, child: Child) {
        TABLE.lock().get_or_insert_with(HashMap::new).insert(pid, child);
    }

    pub fn with_mut<R>(pid: u32, f: impl FnOnce(&mut Child) -> R) -> Option<R> {
        let mut guard = TABLE.lock();
        guard.get_or_insert_with(HashMap::new).get_mut(&pid).map(f)
    }

    pub fn remove(pid: u32) {
        if let Some(table) = TABLE.lock().as_mut() {
            table.remove(&pid);
        }
    }
}

impl Platform for UnixPlatform {
    fn spawn(&self, command: &str) -> Result<(ProcessHandle, SpawnedStreams)> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ProcessFailed(e.to_string()))?;

        let stdin: OwnedFd = child
            .stdin
            .take()
            .ok_or_else(|| Error::PipeFailed("missing stdin".into()))?
            .into();
        let stdout: OwnedFd = child
            .stdout
            .take()
            .ok_or_else(|| Error::PipeFailed("missing stdout".into()))?
            .into();
        let stderr: OwnedFd = child
            .stderr
            .take()
            .ok_or_else(|| Error::PipeFailed("missing stderr".into()))?
            .into();

        let pid = child.id();
        children::insert(pid, child);

        Ok((pid, SpawnedStreams { stdin, stdout, stderr }))
    }

    fn set_nonblocking(&self, fd: RawFd) -> Result<()> {
        // SAFETY: `fd` is a valid, open descriptor owned by the caller for the duration of this
        // call (a pipe end returned by `spawn`, or stdin for the interactive console).
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        if flags == -1 {
            return Err(Error::IO(io::Error::last_os_error()));
        }
        let res = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if res == -1 {
            return Err(Error::IO(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn read_nonblocking(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::InvalidArg("zero-length read buffer".into()));
        }
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)) {
                return Ok(0);
            }
            return Err(Error::IO(err));
        }
        Ok(n as usize)
    }

    fn write_nonblocking(&self, fd: RawFd, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::InvalidArg("zero-length write buffer".into()));
        }
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)) {
                return Ok(0);
            }
            return Err(Error::IO(err));
        }
        Ok(n as usize)
    }

    fn kill(&self, handle: ProcessHandle, force: bool) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(handle as i32);
        let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        match kill(pid, sig) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {
                reap_nonblocking(handle);
                Ok(())
            }
            Err(e) => Err(Error::ProcessFailed(e.to_string())),
        }
    }

    fn is_running(&self, handle: ProcessHandle) -> bool {
        if let Some(Some(status)) = children::with_mut(handle, |c| c.try_wait().ok()) {
            return status.is_none();
        }
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        matches!(kill(Pid::from_raw(handle as i32), None), Ok(()))
    }

    fn wait(&self, handle: ProcessHandle, timeout_ms: i64) -> Result<WaitOutcome> {
        if timeout_ms <= 0 {
            return Ok(if reap_nonblocking(handle) {
                WaitOutcome::Exited
            } else {
                WaitOutcome::TimedOut
            });
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            if reap_nonblocking(handle) {
                return Ok(WaitOutcome::Exited);
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    fn process_id(&self, handle: ProcessHandle) -> u32 {
        handle
    }
}

/// Non-blocking `waitpid`, reaping the child if it has exited. Returns true if the process is
/// gone.
fn reap_nonblocking(handle: ProcessHandle) -> bool {
    if let Some(Some(status)) = children::with_mut(handle, |c| c.try_wait().ok()) {
        if status.is_some() {
            children::remove(handle);
            return true;
        }
        return false;
    }
    // Not in our table (e.g. already reaped) - fall back to a liveness probe.
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    !matches!(kill(Pid::from_raw(handle as i32), None), Ok(()))
}

/// An in-memory [`Platform`] for registry/lifecycle tests, so they run deterministically without
/// depending on `/bin/sh` or real child processes (SPEC_FULL.md §8/§10.E).
///
/// `spawn` hands back real OS pipes (so non-blocking read/write semantics, including `EAGAIN` and
/// pipe-full behaviour, are the genuine kernel ones) but never actually execs anything; one end of
/// each pipe is leaked so the other end never observes EOF on its own. Liveness is tracked in a
/// small table keyed by a counter-assigned handle, flippable from the test via [`FakePlatform::kill_handle`].
#[cfg(test)]
pub(crate) mod fake {
    use super::{ProcessHandle, SpawnedStreams, WaitOutcome};
    use crate::{Error, Result};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;
    use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pipe_pair() -> io::Result<(OwnedFd, OwnedFd)> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `pipe(2)` just populated both descriptors; each is valid and uniquely owned.
        Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
    }

    /// The "child side" of a fake spawn's three pipes, kept open (not closed, not read) so the
    /// parent's ends behave like a real, live child holds them — except in tests that explicitly
    /// want to act as the child, via [`FakePlatform::child_stdin_reader_fd`] and friends.
    struct ChildEnds {
        stdin_reader: RawFd,
        stdout_writer: RawFd,
        stderr_writer: RawFd,
    }

    /// A [`Platform`](super::Platform) backed by real pipes and an in-process liveness table,
    /// standing in for an actual OS process.
    #[derive(Default)]
    pub struct FakePlatform {
        alive: Mutex<HashMap<u32, bool>>,
        next_handle: AtomicU32,
        child_ends: Mutex<HashMap<u32, ChildEnds>>,
    }

    impl FakePlatform {
        /// Creates a fresh fake with no spawned handles.
        pub fn new() -> Self {
            Self::default()
        }

        /// Marks `handle` as exited, as if the fake child had crashed.
        pub fn kill_handle(&self, handle: ProcessHandle) {
            self.alive.lock().insert(handle, false);
        }

        /// The raw fd of the "child's" read end of `handle`'s stdin pipe, for tests that need to
        /// drain what the supervisor wrote (e.g. to exercise a resumed partial write).
        pub fn child_stdin_reader_fd(&self, handle: ProcessHandle) -> RawFd {
            self.child_ends.lock()[&handle].stdin_reader
        }
    }

    impl super::Platform for FakePlatform {
        fn spawn(&self, _command: &str) -> Result<(ProcessHandle, SpawnedStreams)> {
            let handle = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
            self.alive.lock().insert(handle, true);

            let (stdin_r, stdin_w) = pipe_pair().map_err(Error::IO)?;
            let (stdout_r, stdout_w) = pipe_pair().map_err(Error::IO)?;
            let (stderr_r, stderr_w) = pipe_pair().map_err(Error::IO)?;
            // Keep the "child's" ends open (as raw fds, untracked by Rust's ownership) so the
            // parent's ends never see EOF from a read peer going away; there is no real child
            // process here to hold them open. A test can still reach the stdin reader via
            // `child_stdin_reader_fd` to act as the child.
            self.child_ends.lock().insert(
                handle,
                ChildEnds {
                    stdin_reader: stdin_r.into_raw_fd(),
                    stdout_writer: stdout_w.into_raw_fd(),
                    stderr_writer: stderr_w.into_raw_fd(),
                },
            );

            Ok((
                handle,
                SpawnedStreams { stdin: stdin_w, stdout: stdout_r, stderr: stderr_r },
            ))
        }

        fn set_nonblocking(&self, fd: RawFd) -> Result<()> {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
            if flags == -1 {
                return Err(Error::IO(io::Error::last_os_error()));
            }
            if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
                return Err(Error::IO(io::Error::last_os_error()));
            }
            Ok(())
        }

        fn read_nonblocking(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize> {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)) {
                    return Ok(0);
                }
                return Err(Error::IO(err));
            }
            Ok(n as usize)
        }

        fn write_nonblocking(&self, fd: RawFd, buf: &[u8]) -> Result<usize> {
            let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)) {
                    return Ok(0);
                }
                return Err(Error::IO(err));
            }
            Ok(n as usize)
        }

        fn kill(&self, handle: ProcessHandle, _force: bool) -> Result<()> {
            self.alive.lock().insert(handle, false);
            Ok(())
        }

        fn is_running(&self, handle: ProcessHandle) -> bool {
            *self.alive.lock().get(&handle).unwrap_or(&false)
        }

        fn wait(&self, handle: ProcessHandle, _timeout_ms: i64) -> Result<WaitOutcome> {
            Ok(if self.is_running(handle) { WaitOutcome::TimedOut } else { WaitOutcome::Exited })
        }

        fn process_id(&self, handle: ProcessHandle) -> u32 {
            handle
        }

        fn sleep_ms(&self, _ms: u64) {
            // Tests never want to actually wait on the fake's settle sleeps.
        }
    }
}
