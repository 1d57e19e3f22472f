/// Logical -> hardware channel mapping
///
/// The UI numbers servos 0..N; the controller board numbers its outputs 0..M.
/// The map is fixed at construction.

use anyhow::{anyhow, Result};

/// Servo count driven by the rig
pub const DEFAULT_SERVO_COUNT: usize = 4;
/// Output channels on the controller board
pub const DEFAULT_HARDWARE_CHANNELS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    hardware: Vec<usize>,
    hardware_channels: usize,
}

impl ChannelMap {
    /// Build a map from `hardware[logical] = hardware index`.
    /// Fails if any target is out of range or used twice.
    pub fn new(hardware: Vec<usize>, hardware_channels: usize) -> Result<Self> {
        if hardware.len() > hardware_channels {
            return Err(anyhow!(
                "{} logical channels cannot map into {} hardware channels",
                hardware.len(), hardware_channels
            ));
        }
        let mut seen = vec![false; hardware_channels];
        for (logical, &hw) in hardware.iter().enumerate() {
            if hw >= hardware_channels {
                return Err(anyhow!(
                    "logical channel {} maps to hardware channel {} (valid range 0..{})",
                    logical, hw, hardware_channels
                ));
            }
            if seen[hw] {
                return Err(anyhow!("hardware channel {} is mapped twice", hw));
            }
            seen[hw] = true;
        }
        Ok(Self { hardware, hardware_channels })
    }

    /// Identity map over the first `servo_count` hardware channels
    pub fn identity(servo_count: usize, hardware_channels: usize) -> Result<Self> {
        Self::new((0..servo_count).collect(), hardware_channels)
    }

    pub fn lookup(&self, logical: usize) -> Option<usize> {
        self.hardware.get(logical).copied()
    }

    /// Number of logical channels (N)
    pub fn servo_count(&self) -> usize {
        self.hardware.len()
    }

    /// Size of the hardware channel space (M)
    pub fn hardware_channels(&self) -> usize {
        self.hardware_channels
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            hardware: (0..DEFAULT_SERVO_COUNT).collect(),
            hardware_channels: DEFAULT_HARDWARE_CHANNELS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        let map = ChannelMap::default();
        assert_eq!(map.servo_count(), 4);
        assert_eq!(map.hardware_channels(), 5);
        for c in 0..4 {
            assert_eq!(map.lookup(c), Some(c));
        }
        assert_eq!(map.lookup(4), None);
    }

    #[test]
    fn test_rejects_duplicate_target() {
        assert!(ChannelMap::new(vec![0, 1, 1, 3], 5).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_target() {
        assert!(ChannelMap::new(vec![0, 1, 2, 5], 5).is_err());
    }

    #[test]
    fn test_permuted_map() {
        let map = ChannelMap::new(vec![4, 0, 2, 1], 5).unwrap();
        assert_eq!(map.lookup(0), Some(4));
        assert_eq!(map.lookup(3), Some(1));
    }
}
