/// Line protocol spoken by the servo controller
///
/// Requests are single ASCII lines, the terminator is added by the connection.
/// Every request is answered with one line; exactly "OK" means accepted.

use std::fmt;
use std::str::FromStr;

use crate::error::CommandError;

pub const MAX_ANGLE: i32 = 180;
/// Pose the controller boots into and returns to on RESET
pub const MID_ANGLE: u8 = 90;
/// Value sent for hardware channels no logical channel maps to
pub const UNUSED_CHANNEL_ANGLE: u8 = 0;

/// Servo angle in degrees, always within 0..=180
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Angle(u8);

impl Angle {
    pub const MID: Angle = Angle(MID_ANGLE);

    pub fn new(degrees: i32) -> Result<Self, CommandError> {
        if (0..=MAX_ANGLE).contains(&degrees) {
            Ok(Angle(degrees as u8))
        } else {
            Err(CommandError::InvalidAngle(degrees))
        }
    }

    pub fn degrees(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Faces the controller's display can draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expression {
    Smiley,
    Crying,
    Sleepy,
}

impl Expression {
    pub const ALL: [Expression; 3] = [Expression::Smiley, Expression::Crying, Expression::Sleepy];

    pub fn as_str(self) -> &'static str {
        match self {
            Expression::Smiley => "SMILEY",
            Expression::Crying => "CRYING",
            Expression::Sleepy => "SLEEPY",
        }
    }
}

impl FromStr for Expression {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CommandError::UnknownExpression(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Clock,
    Weather,
    Status,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 3] = [DisplayMode::Clock, DisplayMode::Weather, DisplayMode::Status];

    pub fn as_str(self) -> &'static str {
        match self {
            DisplayMode::Clock => "CLOCK",
            DisplayMode::Weather => "WEATHER",
            DisplayMode::Status => "STATUS",
        }
    }
}

impl FromStr for DisplayMode {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisplayMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CommandError::UnknownMode(s.to_string()))
    }
}

/// "<channel>,<angle>"
pub fn encode_set(hardware_channel: usize, angle: Angle) -> String {
    format!("{},{}", hardware_channel, angle)
}

/// "ALL,<a0>,...,<aM-1>", one entry per hardware channel in ascending order.
/// `None` slots are sent as `UNUSED_CHANNEL_ANGLE`.
pub fn encode_set_all(angles_by_hardware_channel: &[Option<Angle>]) -> String {
    let mut line = String::from("ALL");
    for slot in angles_by_hardware_channel {
        let degrees = slot.map(Angle::degrees).unwrap_or(UNUSED_CHANNEL_ANGLE);
        line.push(',');
        line.push_str(&degrees.to_string());
    }
    line
}

pub fn encode_reset() -> String {
    "RESET".to_string()
}

pub fn encode_expression(expression: Expression) -> String {
    format!("EXPRESSION,{}", expression.as_str())
}

pub fn encode_mode(mode: DisplayMode) -> String {
    format!("MODE_{}", mode.as_str())
}

/// True iff the trimmed reply is exactly "OK". Anything else, including an
/// empty or partial line, is a negative acknowledgement.
pub fn decode_ack(reply: &str) -> bool {
    reply.trim() == "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_bounds() {
        assert_eq!(Angle::new(0).unwrap().degrees(), 0);
        assert_eq!(Angle::new(180).unwrap().degrees(), 180);
        assert_eq!(Angle::new(-1), Err(CommandError::InvalidAngle(-1)));
        assert_eq!(Angle::new(181), Err(CommandError::InvalidAngle(181)));
    }

    #[test]
    fn test_encode_set() {
        assert_eq!(encode_set(3, Angle::new(45).unwrap()), "3,45");
    }

    #[test]
    fn test_encode_set_all_fills_unused() {
        let a = |d| Some(Angle::new(d).unwrap());
        let line = encode_set_all(&[a(10), a(20), a(30), a(40), None]);
        assert_eq!(line, "ALL,10,20,30,40,0");
    }

    #[test]
    fn test_encode_fixed_commands() {
        assert_eq!(encode_reset(), "RESET");
        assert_eq!(encode_expression(Expression::Sleepy), "EXPRESSION,SLEEPY");
        assert_eq!(encode_mode(DisplayMode::Weather), "MODE_WEATHER");
    }

    #[test]
    fn test_parse_named_sets() {
        assert_eq!("smiley".parse::<Expression>(), Ok(Expression::Smiley));
        assert_eq!("CLOCK".parse::<DisplayMode>(), Ok(DisplayMode::Clock));
        assert_eq!(
            "ANGRY".parse::<Expression>(),
            Err(CommandError::UnknownExpression("ANGRY".to_string()))
        );
        assert!("RADIO".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn test_decode_ack() {
        assert!(decode_ack("OK"));
        assert!(decode_ack("  OK\r\n"));
        assert!(!decode_ack(""));
        assert!(!decode_ack("O"));
        assert!(!decode_ack("OK OK"));
        assert!(!decode_ack("ERR"));
    }
}
