/// Gait sequencer
///
/// Plays the preset table's gait one preset per tick on a background timer
/// thread. A tick waits for its acknowledgement before the next one is
/// scheduled, so at most one tick is ever in flight. Any command error halts
/// the sequence; nothing is retried.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::error::{CommandError, ConnError};
use crate::presets::PresetTable;
use crate::protocol::Expression;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Commands the sequencer needs from the rig. `CommandClient` is the real
/// implementation; tests substitute a recorder.
pub trait ServoOperations: Send + 'static {
    fn apply_preset(&self, name: &str) -> Result<(), CommandError>;
    fn set_expression(&self, expression: Expression) -> Result<(), CommandError>;
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Running,
}

#[derive(Debug)]
struct Progress {
    state: SequencerState,
    step: usize,
    last_error: Option<CommandError>,
}

struct Timer {
    // Dropping the sender wakes and ends the timer thread
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Sequencer<S: ServoOperations + Clone> {
    ops: S,
    gait: Arc<Vec<String>>,
    neutral: String,
    interval: Duration,
    progress: Arc<Mutex<Progress>>,
    timer: Option<Timer>,
}

impl<S: ServoOperations + Clone> Sequencer<S> {
    pub fn new(ops: S, presets: &PresetTable, neutral: &str, interval: Duration) -> Self {
        Self {
            ops,
            gait: Arc::new(presets.gait().to_vec()),
            neutral: neutral.to_string(),
            interval,
            progress: Arc::new(Mutex::new(Progress {
                state: SequencerState::Idle,
                step: 0,
                last_error: None,
            })),
            timer: None,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.progress
            .lock()
            .map(|p| p.state)
            .unwrap_or(SequencerState::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.state() == SequencerState::Running
    }

    /// Index into the gait of the next preset to play
    pub fn current_step(&self) -> usize {
        self.progress.lock().map(|p| p.step).unwrap_or(0)
    }

    /// Error that halted the last run, cleared on `start`
    pub fn last_error(&self) -> Option<CommandError> {
        self.progress.lock().ok().and_then(|p| p.last_error.clone())
    }

    pub fn gait(&self) -> &[String] {
        &self.gait
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin playing the gait from its first step. The first tick fires one
    /// interval from now. No-op while already running.
    pub fn start(&mut self) -> Result<(), CommandError> {
        if self.is_running() {
            debug!(target: "sequencer", "start ignored, already running");
            return Ok(());
        }
        // A previous run may have halted itself; collect its thread
        self.reap_timer();

        if !self.ops.is_connected() {
            return Err(CommandError::Transport(ConnError::NotConnected));
        }
        if let Err(e) = self.ops.set_expression(Expression::Smiley) {
            warn!(target: "sequencer", "Could not set start expression: {}", e);
        }

        if let Ok(mut p) = self.progress.lock() {
            p.state = SequencerState::Running;
            p.step = 0;
            p.last_error = None;
        }

        let (cancel, cancel_rx) = bounded::<()>(0);
        let ops = self.ops.clone();
        let gait = Arc::clone(&self.gait);
        let progress = Arc::clone(&self.progress);
        let interval = self.interval;
        let handle = thread::spawn(move || run_timer(ops, gait, progress, interval, cancel_rx));
        self.timer = Some(Timer { cancel, handle });

        info!(target: "sequencer", "Gait started ({} steps every {:?})", self.gait.len(), self.interval);
        Ok(())
    }

    /// Cancel the pending tick, return to the neutral preset (best effort)
    /// and go Idle. Waits for an in-flight tick, which is bounded by the
    /// transport timeout. No-op while Idle.
    pub fn stop(&mut self) {
        let was_running = match self.progress.lock() {
            Ok(mut p) => {
                let running = p.state == SequencerState::Running;
                p.state = SequencerState::Idle;
                running
            }
            Err(_) => false,
        };
        self.reap_timer();
        if let Ok(mut p) = self.progress.lock() {
            p.step = 0;
        }
        if !was_running {
            return;
        }

        if let Err(e) = self.ops.apply_preset(&self.neutral) {
            warn!(target: "sequencer", "Could not return to '{}': {}", self.neutral, e);
        }
        info!(target: "sequencer", "Gait stopped");
    }

    fn reap_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            drop(timer.cancel);
            if timer.handle.join().is_err() {
                error!(target: "sequencer", "Timer thread panicked");
            }
        }
    }
}

impl<S: ServoOperations + Clone> Drop for Sequencer<S> {
    fn drop(&mut self) {
        if let Ok(mut p) = self.progress.lock() {
            p.state = SequencerState::Idle;
        }
        // Wake the timer thread without waiting for it
        if let Some(timer) = self.timer.take() {
            drop(timer.cancel);
        }
    }
}

fn run_timer<S: ServoOperations>(
    ops: S,
    gait: Arc<Vec<String>>,
    progress: Arc<Mutex<Progress>>,
    interval: Duration,
    cancel: Receiver<()>,
) {
    loop {
        let cancelled = select! {
            recv(cancel) -> _ => true,
            default(interval) => false,
        };
        if cancelled {
            break;
        }

        let (step, name) = match progress.lock() {
            Ok(p) if p.state == SequencerState::Running => (p.step, gait[p.step % gait.len()].clone()),
            _ => break,
        };

        match ops.apply_preset(&name) {
            Ok(()) => {
                debug!(target: "sequencer", "Step {} '{}' done", step, name);
                if let Ok(mut p) = progress.lock() {
                    p.step = (step + 1) % gait.len();
                }
            }
            Err(e) => {
                error!(target: "sequencer", "Step {} '{}' failed, halting gait: {}", step, name, e);
                if let Ok(mut p) = progress.lock() {
                    p.state = SequencerState::Idle;
                    p.step = 0;
                    p.last_error = Some(e);
                }
                break;
            }
        }
    }
}
