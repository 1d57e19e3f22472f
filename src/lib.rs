/// Servo rig control library
///
/// Line-protocol client for a networked multi-servo controller, plus a gait
/// sequencer that cycles pose presets on a timer.

pub mod channel_map;
pub mod command_client;
pub mod config_loader;
pub mod connection;
pub mod emulator;
pub mod error;
pub mod presets;
pub mod protocol;
pub mod rig;
pub mod sequencer;

pub use command_client::CommandClient;
pub use config_loader::RigSettings;
pub use connection::{Connection, ConnectionState};
pub use error::{CommandError, ConnError};
pub use protocol::{Angle, DisplayMode, Expression};
pub use rig::ServoRig;
pub use sequencer::{Sequencer, SequencerState, ServoOperations};
