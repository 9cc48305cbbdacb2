//! The two control-surface frontends: loopback TCP and interactive console (§4.F).
//!
//! Each frontend makes exactly one blocking call at a time (`accept`/`recv`/`send`, or a stdin
//! read) and is realised as a dedicated `std::thread` rather than an async task, matching §5's
//! "no executor is needed" scheduling model.

use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::context::FrameworkContext;
use crate::platform::Platform;
use crate::Result;

/// Per-connection idle read timeout (§5).
const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the accept loop re-checks `ctx.running` while waiting for a connection.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawns the loopback control-socket thread, binding `127.0.0.1:<port>` and accepting one client
/// at a time for the lifetime of the framework.
pub fn spawn_socket_server<P>(ctx: Arc<FrameworkContext<P>>, port: u16) -> Result<std::thread::JoinHandle<()>>
where
    P: Platform + Send + Sync + 'static,
{
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    log::info!(target: "framework", "control socket listening on {addr}");

    Ok(std::thread::spawn(move || {
        while ctx.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!(target: "framework", "control client connected from {peer}");
                    if let Err(e) = handle_client(&ctx, stream) {
                        log::warn!(target: "framework", "control client {peer} error: {e}");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::warn!(target: "framework", "control socket accept failed: {e}");
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
        log::info!(target: "framework", "control socket shutting down");
    }))
}

/// Services one client connection: read a line, dispatch it, write the response, repeat until
/// peer EOF, a read timeout, or a `shutdown` command.
fn handle_client<P: Platform>(ctx: &FrameworkContext<P>, stream: TcpStream) -> Result<()> {
    stream.set_read_timeout(Some(CLIENT_IDLE_TIMEOUT))?;
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break; // peer closed the connection
        }
        let command = line.trim_end_matches(['\r', '\n']);
        if command.is_empty() {
            continue;
        }
        let response = crate::control::dispatch(ctx, command);
        writer.write_all(response.as_bytes())?;
        writer.flush()?;
        if command.eq_ignore_ascii_case("shutdown") {
            break;
        }
    }
    Ok(())
}

/// Spawns the interactive console thread, reading commands from the process's own standard
/// input for the lifetime of the framework.
pub fn spawn_console<P>(ctx: Arc<FrameworkContext<P>>) -> std::thread::JoinHandle<()>
where
    P: Platform + Send + Sync + 'static,
{
    std::thread::spawn(move || console_loop(&ctx))
}

fn console_loop<P: Platform>(ctx: &FrameworkContext<P>) {
    println!("Toolframe Interactive Console v{}", crate::control::VERSION);
    println!("Type 'help' for commands, 'quit' to exit console");

    let stdin = std::io::stdin();
    loop {
        print!("toolframe> ");
        if std::io::stdout().flush().is_err() {
            break;
        }
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break; // EOF
        }
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command.eq_ignore_ascii_case("quit") || command.eq_ignore_ascii_case("exit") {
            println!("Exiting console mode (framework continues running)...");
            break;
        }
        let response = crate::control::dispatch(ctx, command);
        print!("{response}");
        if command.eq_ignore_ascii_case("shutdown") {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use std::io::Read;

    #[test]
    fn socket_server_binds_and_exits_once_terminated() {
        let ctx = Arc::new(FrameworkContext::new(FakePlatform::new(), None));
        let handle = spawn_socket_server(ctx.clone(), 0).unwrap();
        ctx.terminate();
        handle.join().expect("accept thread should exit once running is cleared");
    }

    #[test]
    fn handle_client_round_trips_start_and_shutdown() {
        let ctx = FrameworkContext::new(FakePlatform::new(), None);
        {
            let mut state = ctx.state.lock();
            state.registry.register("t", "true").unwrap();
        }
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handle_client(&ctx, stream).unwrap();
            ctx
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"start t\n").unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("Success: Tool 't' started"));

        client.write_all(b"shutdown\n").unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Shutting down framework...\n");

        let ctx = server.join().unwrap();
        assert!(!ctx.is_running());
    }
}
