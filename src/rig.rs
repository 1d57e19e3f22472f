/// Servo rig facade
///
/// Everything a front end needs in one owned value: the command client and
/// the gait sequencer driving it. Disconnect and reset stop a running gait
/// before they touch the connection.

use std::sync::Arc;

use log::info;

use crate::command_client::CommandClient;
use crate::config_loader::RigSettings;
use crate::connection::ConnectionState;
use crate::error::{CommandError, ConnError};
use crate::presets::PresetTable;
use crate::protocol::{DisplayMode, Expression};
use crate::sequencer::{Sequencer, SequencerState};

pub struct ServoRig {
    client: CommandClient,
    sequencer: Sequencer<CommandClient>,
}

impl ServoRig {
    pub fn new(settings: RigSettings) -> Self {
        let presets = Arc::new(settings.presets);
        let client = CommandClient::new(Arc::new(settings.channel_map), Arc::clone(&presets), settings.timeout);
        let sequencer = Sequencer::new(client.clone(), &presets, &settings.neutral, settings.tick_interval);
        Self { client, sequencer }
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ConnError> {
        self.sequencer.stop();
        self.client.connect(host, port)?;
        info!(target: "rig", "Rig connected to {}:{}", host, port);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.sequencer.stop();
        self.client.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn sequencer_state(&self) -> SequencerState {
        self.sequencer.state()
    }

    pub fn last_sequence_error(&self) -> Option<CommandError> {
        self.sequencer.last_error()
    }

    /// Last acknowledged angle per logical channel
    pub fn angles(&self) -> Vec<u8> {
        self.client.angles()
    }

    pub fn presets(&self) -> &PresetTable {
        self.client.presets()
    }

    pub fn set_channel(&self, logical_channel: usize, angle: i32) -> Result<(), CommandError> {
        self.client.set_channel(logical_channel, angle)
    }

    pub fn set_all(&self, angles: &[i32]) -> Result<(), CommandError> {
        self.client.set_all(angles)
    }

    pub fn apply_preset(&self, name: &str) -> Result<(), CommandError> {
        self.client.apply_preset(name)
    }

    /// Stop any gait, then soft-reset the controller
    pub fn reset(&mut self) -> Result<(), CommandError> {
        self.sequencer.stop();
        self.client.reset()
    }

    /// The controller redraws its servo status page on RESET
    pub fn show_status_page(&mut self) -> Result<(), CommandError> {
        self.reset()
    }

    pub fn set_expression(&self, expression: Expression) -> Result<(), CommandError> {
        self.client.set_expression(expression)
    }

    pub fn set_mode(&self, mode: DisplayMode) -> Result<(), CommandError> {
        self.client.set_mode(mode)
    }

    pub fn start_sequence(&mut self) -> Result<(), CommandError> {
        self.sequencer.start()
    }

    pub fn stop_sequence(&mut self) {
        self.sequencer.stop();
    }
}

impl Drop for ServoRig {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::RigEmulator;
    use std::time::Duration;

    fn settings() -> RigSettings {
        RigSettings {
            timeout: Duration::from_millis(200),
            tick_interval: Duration::from_millis(20),
            ..RigSettings::default()
        }
    }

    #[test]
    fn test_reset_stops_gait_and_restores_mid_pose() {
        let emu = RigEmulator::spawn("127.0.0.1:0").unwrap();
        let mut rig = ServoRig::new(settings());
        rig.connect("127.0.0.1", emu.port()).unwrap();
        rig.set_all(&[0, 180, 0, 180]).unwrap();
        rig.start_sequence().unwrap();
        emu.wait_for_lines(4, Duration::from_secs(2));

        rig.reset().unwrap();
        assert_eq!(rig.sequencer_state(), SequencerState::Idle);
        assert_eq!(rig.angles(), [90, 90, 90, 90]);
        assert_eq!(emu.received().last().map(String::as_str), Some("RESET"));
        assert_eq!(emu.angles(), [90, 90, 90, 90]);
    }

    #[test]
    fn test_reset_from_idle() {
        let emu = RigEmulator::spawn("127.0.0.1:0").unwrap();
        let mut rig = ServoRig::new(settings());
        rig.connect("127.0.0.1", emu.port()).unwrap();
        rig.set_channel(2, 10).unwrap();
        rig.reset().unwrap();
        assert_eq!(rig.sequencer_state(), SequencerState::Idle);
        assert_eq!(rig.angles(), [90, 90, 90, 90]);
    }

    #[test]
    fn test_disconnect_stops_gait() {
        let emu = RigEmulator::spawn("127.0.0.1:0").unwrap();
        let mut rig = ServoRig::new(settings());
        rig.connect("127.0.0.1", emu.port()).unwrap();
        rig.start_sequence().unwrap();
        rig.disconnect();
        assert_eq!(rig.sequencer_state(), SequencerState::Idle);
        assert_eq!(rig.state(), ConnectionState::Disconnected);
        rig.disconnect();
        assert_eq!(rig.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_start_sequence_requires_connection() {
        let mut rig = ServoRig::new(settings());
        assert_eq!(
            rig.start_sequence(),
            Err(CommandError::Transport(ConnError::NotConnected))
        );
        assert_eq!(rig.sequencer_state(), SequencerState::Idle);
    }
}
