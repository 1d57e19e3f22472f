/// High-level servo commands
///
/// `CommandClient` is a cloneable handle. All clones feed one worker thread
/// which owns the `Connection`, so exchanges are serialized in submission
/// order no matter how many callers (UI, sequencer) hold a handle. Each
/// request carries its own reply channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::channel_map::ChannelMap;
use crate::connection::{Connection, ConnectionState};
use crate::error::{CommandError, ConnError};
use crate::presets::PresetTable;
use crate::protocol::{self, Angle, DisplayMode, Expression};
use crate::sequencer::ServoOperations;

enum Request {
    Connect {
        host: String,
        port: u16,
        reply: Sender<Result<(), ConnError>>,
    },
    Disconnect {
        reply: Sender<()>,
    },
    Exchange {
        line: String,
        reply: Sender<Result<String, ConnError>>,
    },
}

#[derive(Debug, Clone)]
pub struct CommandClient {
    requests: Sender<Request>,
    connected: Arc<AtomicBool>,
    map: Arc<ChannelMap>,
    presets: Arc<PresetTable>,
    // Last acknowledged angle per logical channel
    angles: Arc<Mutex<Vec<Angle>>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Connect { host, port, .. } => write!(f, "Connect({}:{})", host, port),
            Request::Disconnect { .. } => write!(f, "Disconnect"),
            Request::Exchange { line, .. } => write!(f, "Exchange({})", line),
        }
    }
}

impl CommandClient {
    /// Spawn the command worker. The worker exits once every handle is dropped.
    pub fn new(map: Arc<ChannelMap>, presets: Arc<PresetTable>, timeout: Duration) -> Self {
        let (tx, rx) = unbounded();
        let connected = Arc::new(AtomicBool::new(false));
        let worker_connected = Arc::clone(&connected);
        thread::spawn(move || run_worker(Connection::with_timeout(timeout), rx, worker_connected));

        let servo_count = map.servo_count();
        Self {
            requests: tx,
            connected,
            map,
            presets,
            angles: Arc::new(Mutex::new(vec![Angle::MID; servo_count])),
        }
    }

    pub fn connect(&self, host: &str, port: u16) -> Result<(), ConnError> {
        let (reply, rx) = bounded(1);
        self.requests
            .send(Request::Connect { host: host.to_string(), port, reply })
            .map_err(|_| ConnError::NotConnected)?;
        rx.recv().map_err(|_| ConnError::NotConnected)?
    }

    pub fn disconnect(&self) {
        let (reply, rx) = bounded(1);
        if self.requests.send(Request::Disconnect { reply }).is_ok() {
            let _ = rx.recv();
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    /// Snapshot of the last acknowledged angle per logical channel
    pub fn angles(&self) -> Vec<u8> {
        self.angles
            .lock()
            .map(|a| a.iter().map(|x| x.degrees()).collect())
            .unwrap_or_default()
    }

    pub fn set_channel(&self, logical_channel: usize, angle: i32) -> Result<(), CommandError> {
        let angle = Angle::new(angle)?;
        let hw = self.map.lookup(logical_channel).ok_or(CommandError::InvalidChannel {
            channel: logical_channel,
            count: self.map.servo_count(),
        })?;
        self.send(protocol::encode_set(hw, angle))?;
        if let Ok(mut cache) = self.angles.lock() {
            cache[logical_channel] = angle;
        }
        Ok(())
    }

    /// Set every logical channel at once, `angles[i]` for logical channel `i`
    pub fn set_all(&self, angles: &[i32]) -> Result<(), CommandError> {
        let angles = angles
            .iter()
            .map(|&d| Angle::new(d))
            .collect::<Result<Vec<_>, _>>()?;
        self.send_all(&angles)
    }

    pub fn apply_preset(&self, name: &str) -> Result<(), CommandError> {
        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| CommandError::UnknownPreset(name.to_string()))?;
        debug!(target: "command_client", "Applying preset '{}'", name);
        self.send_all(&preset.angles)
    }

    /// Soft reset. On acknowledgement the cached pose returns to 90° everywhere.
    pub fn reset(&self) -> Result<(), CommandError> {
        self.send(protocol::encode_reset())?;
        if let Ok(mut cache) = self.angles.lock() {
            cache.iter_mut().for_each(|a| *a = Angle::MID);
        }
        Ok(())
    }

    pub fn set_expression(&self, expression: Expression) -> Result<(), CommandError> {
        self.send(protocol::encode_expression(expression))
    }

    pub fn set_mode(&self, mode: DisplayMode) -> Result<(), CommandError> {
        self.send(protocol::encode_mode(mode))
    }

    fn send_all(&self, angles: &[Angle]) -> Result<(), CommandError> {
        let count = self.map.servo_count();
        if angles.len() != count {
            return Err(CommandError::AngleCount { expected: count, got: angles.len() });
        }
        let mut slots: Vec<Option<Angle>> = vec![None; self.map.hardware_channels()];
        for (logical, &angle) in angles.iter().enumerate() {
            if let Some(hw) = self.map.lookup(logical) {
                slots[hw] = Some(angle);
            }
        }
        self.send(protocol::encode_set_all(&slots))?;
        if let Ok(mut cache) = self.angles.lock() {
            cache.copy_from_slice(angles);
        }
        Ok(())
    }

    /// One exchange through the worker, reply decoded as an acknowledgement
    fn send(&self, line: String) -> Result<(), CommandError> {
        let (reply, rx) = bounded(1);
        self.requests
            .send(Request::Exchange { line, reply })
            .map_err(|_| CommandError::Stopped)?;
        let reply = rx.recv().map_err(|_| CommandError::Stopped)??;
        if protocol::decode_ack(&reply) {
            Ok(())
        } else {
            Err(CommandError::Rejected(reply))
        }
    }
}

impl ServoOperations for CommandClient {
    fn apply_preset(&self, name: &str) -> Result<(), CommandError> {
        CommandClient::apply_preset(self, name)
    }

    fn set_expression(&self, expression: Expression) -> Result<(), CommandError> {
        CommandClient::set_expression(self, expression)
    }

    fn is_connected(&self) -> bool {
        CommandClient::is_connected(self)
    }
}

fn run_worker(mut conn: Connection, requests: Receiver<Request>, connected: Arc<AtomicBool>) {
    debug!(target: "command_client", "Command worker started");
    for request in requests.iter() {
        match request {
            Request::Connect { host, port, reply } => {
                let result = conn.connect(&host, port);
                if let Err(ref e) = result {
                    warn!(target: "command_client", "Connect to {}:{} failed: {}", host, port, e);
                }
                connected.store(conn.is_connected(), Ordering::SeqCst);
                let _ = reply.send(result);
            }
            Request::Disconnect { reply } => {
                conn.disconnect();
                connected.store(false, Ordering::SeqCst);
                let _ = reply.send(());
            }
            Request::Exchange { line, reply } => {
                let result = conn.exchange(&line);
                connected.store(conn.is_connected(), Ordering::SeqCst);
                let _ = reply.send(result);
            }
        }
    }
    conn.disconnect();
    connected.store(false, Ordering::SeqCst);
    info!(target: "command_client", "Command worker stopped");
}
