/// Software stand-in for the servo controller board
///
/// Listens on TCP, serves one client at a time and handles the line protocol
/// the way the board's firmware does: track four servo angles, remember the
/// last expression and display mode, answer every line with "OK". The reply
/// can be switched at run time for fault injection.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};

/// Servos the firmware drives; lines for higher channels are ignored
pub const EMULATED_SERVOS: usize = 4;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyMode {
    /// Answer "OK"
    Ack,
    /// Answer with this text instead
    Reply(String),
    /// Read the line and never answer
    Silent,
}

#[derive(Debug)]
struct EmulatorState {
    received: Vec<String>,
    reply_mode: ReplyMode,
    angles: [u8; EMULATED_SERVOS],
    expression: Option<String>,
    mode: Option<String>,
}

impl EmulatorState {
    fn apply(&mut self, command: &str) {
        if command == "RESET" {
            self.angles = [90; EMULATED_SERVOS];
            self.expression = None;
            return;
        }
        if let Some(name) = command.strip_prefix("EXPRESSION,") {
            self.expression = Some(name.to_string());
            return;
        }
        if let Some(mode) = command.strip_prefix("MODE_") {
            self.mode = Some(mode.to_string());
            return;
        }
        if let Some(list) = command.strip_prefix("ALL,") {
            for (slot, value) in self.angles.iter_mut().zip(list.split(',')) {
                *slot = value.trim().parse().unwrap_or(0);
            }
            return;
        }
        if let Some((ch, angle)) = command.split_once(',') {
            let ch: usize = ch.trim().parse().unwrap_or(usize::MAX);
            if ch < EMULATED_SERVOS {
                self.angles[ch] = angle.trim().parse().unwrap_or(0);
            }
        }
    }
}

pub struct RigEmulator {
    addr: SocketAddr,
    state: Arc<Mutex<EmulatorState>>,
    shutdown: Arc<AtomicBool>,
}

impl RigEmulator {
    /// Bind and start serving in a background thread. Use port 0 for an
    /// ephemeral port, then read it back with `port()`.
    pub fn spawn<A: ToSocketAddrs>(bind: A) -> Result<Self> {
        let listener = TcpListener::bind(bind).context("Failed to bind emulator listener")?;
        listener
            .set_nonblocking(true)
            .context("Failed to make emulator listener non-blocking")?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(EmulatorState {
            received: Vec::new(),
            reply_mode: ReplyMode::Ack,
            angles: [90; EMULATED_SERVOS],
            expression: None,
            mode: None,
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_state = Arc::clone(&state);
        let thread_shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            info!(target: "emulator", "Emulator listening on {}", addr);
            while !thread_shutdown.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        info!(target: "emulator", "Client connected: {}", peer);
                        serve_client(stream, &thread_state, &thread_shutdown);
                        info!(target: "emulator", "Client disconnected: {}", peer);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                    Err(e) => {
                        warn!(target: "emulator", "Accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { addr, state, shutdown })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_reply_mode(&self, mode: ReplyMode) {
        if let Ok(mut s) = self.state.lock() {
            s.reply_mode = mode;
        }
    }

    /// Every line received so far, trimmed, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.state.lock().map(|s| s.received.clone()).unwrap_or_default()
    }

    pub fn clear_received(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.received.clear();
        }
    }

    /// Block until at least `count` lines have arrived or `timeout` passes
    pub fn wait_for_lines(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let lines = self.received();
            if lines.len() >= count || Instant::now() >= deadline {
                return lines;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn angles(&self) -> [u8; EMULATED_SERVOS] {
        self.state.lock().map(|s| s.angles).unwrap_or([90; EMULATED_SERVOS])
    }

    pub fn expression(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.expression.clone())
    }

    pub fn mode(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.mode.clone())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Drop for RigEmulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_client(mut stream: TcpStream, state: &Arc<Mutex<EmulatorState>>, shutdown: &AtomicBool) {
    if stream.set_nonblocking(false).is_err() || stream.set_read_timeout(Some(POLL_INTERVAL)).is_err() {
        return;
    }
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 256];
    while !shutdown.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(_) => return,
        }

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            debug!(target: "emulator", "Received: {}", command);

            let reply = match state.lock() {
                Ok(mut s) => {
                    s.apply(&command);
                    s.received.push(command);
                    match &s.reply_mode {
                        ReplyMode::Ack => Some("OK".to_string()),
                        ReplyMode::Reply(text) => Some(text.clone()),
                        ReplyMode::Silent => None,
                    }
                }
                Err(_) => return,
            };
            if let Some(reply) = reply {
                if stream.write_all(format!("{}\r\n", reply).as_bytes()).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_command_handling() {
        let mut s = EmulatorState {
            received: Vec::new(),
            reply_mode: ReplyMode::Ack,
            angles: [90; EMULATED_SERVOS],
            expression: None,
            mode: None,
        };
        s.apply("2,45");
        assert_eq!(s.angles, [90, 90, 45, 90]);
        // Channels beyond the driven servos are ignored
        s.apply("4,10");
        assert_eq!(s.angles, [90, 90, 45, 90]);
        s.apply("ALL,10,20,30,40,0");
        assert_eq!(s.angles, [10, 20, 30, 40]);
        s.apply("EXPRESSION,SLEEPY");
        s.apply("MODE_WEATHER");
        assert_eq!(s.expression.as_deref(), Some("SLEEPY"));
        assert_eq!(s.mode.as_deref(), Some("WEATHER"));
        s.apply("RESET");
        assert_eq!(s.angles, [90; EMULATED_SERVOS]);
        assert_eq!(s.expression, None);
    }
}
