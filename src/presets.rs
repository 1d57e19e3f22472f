/// Pose presets and the gait sequence built from them
///
/// A preset holds one angle per logical channel. The gait is a cyclic list of
/// preset names; the sequencer plays one per tick.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::protocol::Angle;

/// Preset the sequencer returns to when stopped
pub const NEUTRAL_PRESET: &str = "stand";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: String,
    pub angles: Vec<Angle>,
}

#[derive(Debug, Clone)]
pub struct PresetTable {
    servo_count: usize,
    presets: BTreeMap<String, Preset>,
    gait: Vec<String>,
}

impl PresetTable {
    /// Build a table; every preset must carry `servo_count` angles and every
    /// gait entry must name a preset.
    pub fn new(servo_count: usize, raw: BTreeMap<String, Vec<i32>>, gait: Vec<String>) -> Result<Self> {
        let mut presets = BTreeMap::new();
        for (name, degrees) in raw {
            if degrees.len() != servo_count {
                return Err(anyhow!(
                    "preset '{}' has {} angles, expected {}",
                    name, degrees.len(), servo_count
                ));
            }
            let angles = degrees
                .iter()
                .map(|&d| Angle::new(d))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow!("preset '{}': {}", name, e))?;
            presets.insert(name.clone(), Preset { name, angles });
        }

        if gait.is_empty() {
            return Err(anyhow!("gait sequence is empty"));
        }
        if let Some(missing) = gait.iter().find(|n| !presets.contains_key(*n)) {
            return Err(anyhow!("gait step '{}' does not name a preset", missing));
        }

        Ok(Self { servo_count, presets, gait })
    }

    /// Four-leg walking table used when no config file provides one
    pub fn builtin() -> Self {
        let raw: BTreeMap<String, Vec<i32>> = [
            ("stand", vec![90, 90, 90, 90]),
            ("step1", vec![60, 120, 90, 90]),
            ("step2", vec![90, 90, 60, 120]),
            ("step3", vec![120, 60, 120, 60]),
            ("sit", vec![30, 150, 30, 150]),
        ]
        .into_iter()
        .map(|(n, a)| (n.to_string(), a))
        .collect();
        let gait = vec!["step1".to_string(), "step2".to_string(), "step3".to_string()];
        let presets = raw
            .into_iter()
            .map(|(name, degrees)| {
                // Values above are literal and in range
                let angles = degrees.into_iter().filter_map(|d| Angle::new(d).ok()).collect();
                (name.clone(), Preset { name, angles })
            })
            .collect();
        Self { servo_count: 4, presets, gait }
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn gait(&self) -> &[String] {
        &self.gait
    }

    pub fn servo_count(&self) -> usize {
        self.servo_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, Vec<i32>)]) -> BTreeMap<String, Vec<i32>> {
        entries.iter().map(|(n, a)| (n.to_string(), a.clone())).collect()
    }

    #[test]
    fn test_builtin_table_is_consistent() {
        let table = PresetTable::builtin();
        assert!(table.contains(NEUTRAL_PRESET));
        assert_eq!(table.gait(), ["step1", "step2", "step3"]);
        for name in table.names() {
            assert_eq!(table.get(name).unwrap().angles.len(), table.servo_count());
        }
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = PresetTable::new(4, raw(&[("stand", vec![90, 90, 90])]), vec!["stand".into()]);
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_out_of_range_angle() {
        let err = PresetTable::new(2, raw(&[("stand", vec![90, 200])]), vec!["stand".into()]);
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_bad_gait() {
        let presets = raw(&[("stand", vec![90, 90])]);
        assert!(PresetTable::new(2, presets.clone(), vec![]).is_err());
        assert!(PresetTable::new(2, presets, vec!["stand".into(), "leap".into()]).is_err());
    }
}
