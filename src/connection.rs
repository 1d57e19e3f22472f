/// TCP connection to the servo controller
///
/// Owns the socket. One request/response exchange at a time: write a line,
/// read until the reply's newline or the timeout. Any timeout or I/O error
/// drops the socket, there is no implicit reconnect.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::ConnError;

/// Upper bound for connect and for every reply
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    timeout: Duration,
    // Bytes read past the last newline
    pending: Vec<u8>,
}

impl Connection {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            stream: None,
            peer: None,
            timeout,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open the socket. An existing connection is closed first.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ConnError> {
        self.disconnect();

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ConnError::InvalidAddress(format!("{}:{}: {}", host, port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(ConnError::InvalidAddress(format!("{}:{} resolved to nothing", host, port)));
        }

        let mut last_err = ConnError::Refused(format!("{}:{}", host, port));
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.timeout))
                        .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| ConnError::Refused(e.to_string()))?;
                    info!(target: "connection", "Connected to {}", addr);
                    self.stream = Some(stream);
                    self.peer = Some(addr);
                    self.pending.clear();
                    return Ok(());
                }
                Err(e) => {
                    debug!(target: "connection", "Connect to {} failed: {}", addr, e);
                    last_err = match e.kind() {
                        ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnError::Timeout,
                        _ => ConnError::Refused(format!("{}: {}", addr, e)),
                    };
                }
            }
        }
        Err(last_err)
    }

    /// Close the socket if open. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            if let Some(peer) = self.peer {
                info!(target: "connection", "Disconnected from {}", peer);
            }
        }
        self.peer = None;
        self.pending.clear();
    }

    /// Send `line` plus a newline and return the reply line without its terminator.
    pub fn exchange(&mut self, line: &str) -> Result<String, ConnError> {
        let result = self.exchange_inner(line);
        if let Err(ref e) = result {
            warn!(target: "connection", "Exchange '{}' failed: {}", line, e);
            self.disconnect();
        }
        result
    }

    fn exchange_inner(&mut self, line: &str) -> Result<String, ConnError> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(ConnError::NotConnected)?;

        let mut out = Vec::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
        stream.write_all(&out).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnError::Timeout,
            _ => ConnError::Broken(e.to_string()),
        })?;
        stream.flush().map_err(|e| ConnError::Broken(e.to_string()))?;
        debug!(target: "connection", "→ {}", line);

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let reply = String::from_utf8_lossy(&raw[..pos]).trim_end_matches('\r').to_string();
                debug!(target: "connection", "← {}", reply);
                return Ok(reply);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConnError::Timeout);
            }
            // Shrink the socket timeout so the whole reply fits the bound
            stream
                .set_read_timeout(Some(deadline - now))
                .map_err(|e| ConnError::Broken(e.to_string()))?;

            let mut chunk = [0u8; 256];
            match stream.read(&mut chunk) {
                Ok(0) => return Err(ConnError::Broken("peer closed the connection".to_string())),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) => match e.kind() {
                    ErrorKind::TimedOut | ErrorKind::WouldBlock => continue,
                    ErrorKind::Interrupted => continue,
                    _ => return Err(ConnError::Broken(e.to_string())),
                },
            }
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    /// Peer that answers each line with `reply`, or stays silent when `None`
    fn spawn_peer(reply: Option<&'static str>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let mut writer = stream.try_clone().unwrap();
                let reader = BufReader::new(stream);
                for line in reader.lines() {
                    if line.is_err() {
                        break;
                    }
                    if let Some(r) = reply {
                        let _ = writer.write_all(r.as_bytes());
                    }
                }
            }
        });
        addr
    }

    #[test]
    fn test_exchange_round_trip() {
        let addr = spawn_peer(Some("OK\r\n"));
        let mut conn = Connection::with_timeout(Duration::from_millis(500));
        conn.connect("127.0.0.1", addr.port()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.exchange("1,90").unwrap(), "OK");
        assert_eq!(conn.exchange("RESET").unwrap(), "OK");
    }

    #[test]
    fn test_exchange_requires_connection() {
        let mut conn = Connection::new();
        assert_eq!(conn.exchange("RESET"), Err(ConnError::NotConnected));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let addr = spawn_peer(Some("OK\n"));
        let mut conn = Connection::with_timeout(Duration::from_millis(500));
        conn.connect("127.0.0.1", addr.port()).unwrap();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let addr = spawn_peer(None);
        let mut conn = Connection::with_timeout(Duration::from_millis(50));
        conn.connect("127.0.0.1", addr.port()).unwrap();
        let started = Instant::now();
        assert_eq!(conn.exchange("RESET"), Err(ConnError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_closed_peer_is_broken() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });
        let mut conn = Connection::with_timeout(Duration::from_millis(500));
        conn.connect("127.0.0.1", port).unwrap();
        peer.join().unwrap();
        match conn.exchange("RESET") {
            Err(ConnError::Broken(_)) => {}
            other => panic!("expected Broken, got {:?}", other),
        }
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_connect_refused_stays_disconnected() {
        // Bind then drop to get a port with nothing listening
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut conn = Connection::with_timeout(Duration::from_millis(200));
        assert!(conn.connect("127.0.0.1", port).is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_invalid_address() {
        let mut conn = Connection::new();
        match conn.connect("not a host name", 8080) {
            Err(ConnError::InvalidAddress(_)) => {}
            other => panic!("expected InvalidAddress, got {:?}", other),
        }
    }
}
