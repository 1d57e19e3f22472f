/// Rig configuration
///
/// Single source of truth: servolink.yaml next to Cargo.toml (or a path given
/// on the command line), with per-host connection blocks and SERVOLINK_*
/// environment overrides loaded through .env.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;

use crate::channel_map::{ChannelMap, DEFAULT_HARDWARE_CHANNELS, DEFAULT_SERVO_COUNT};
use crate::connection::DEFAULT_TIMEOUT;
use crate::presets::{PresetTable, NEUTRAL_PRESET};
use crate::sequencer::DEFAULT_TICK_INTERVAL;

pub const CONFIG_FILE: &str = "servolink.yaml";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ChannelsConfig {
    pub servo_count: Option<usize>,
    pub hardware_channels: Option<usize>,
    pub map: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SequencerConfig {
    pub interval_ms: Option<u64>,
    pub gait: Option<Vec<String>>,
    pub neutral: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub connection: Option<ConnectionConfig>,
    pub channels: Option<ChannelsConfig>,
    pub sequencer: Option<SequencerConfig>,
    pub presets: Option<BTreeMap<String, Vec<i32>>>,
    pub hosts: Option<HashMap<String, ConnectionConfig>>, // hostname -> connection override
}

/// Fully validated settings the rig is built from
#[derive(Debug, Clone)]
pub struct RigSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout: Duration,
    pub channel_map: ChannelMap,
    pub presets: PresetTable,
    pub tick_interval: Duration,
    pub neutral: String,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            timeout: DEFAULT_TIMEOUT,
            channel_map: ChannelMap::default(),
            presets: PresetTable::builtin(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            neutral: NEUTRAL_PRESET.to_string(),
        }
    }
}

impl RigSettings {
    /// Validate a parsed config. Host blocks matching `hostname` override the
    /// top-level connection block key by key.
    pub fn from_config(config: Config, hostname: &str) -> Result<Self> {
        let mut conn = config.connection.unwrap_or_default();
        if let Some(host_block) = config.hosts.as_ref().and_then(|h| h.get(hostname)) {
            log::info!(target: "config_loader", "Using connection block for host '{}'", hostname);
            if host_block.host.is_some() { conn.host = host_block.host.clone(); }
            if host_block.port.is_some() { conn.port = host_block.port; }
            if host_block.timeout_ms.is_some() { conn.timeout_ms = host_block.timeout_ms; }
        }

        let channels = config.channels.unwrap_or_default();
        let servo_count = channels.servo_count.unwrap_or(DEFAULT_SERVO_COUNT);
        let hardware_channels = channels.hardware_channels.unwrap_or(DEFAULT_HARDWARE_CHANNELS);
        let channel_map = match channels.map {
            Some(map) => {
                if map.len() != servo_count {
                    return Err(anyhow!(
                        "channels.map has {} entries but servo_count is {}",
                        map.len(), servo_count
                    ));
                }
                ChannelMap::new(map, hardware_channels)?
            }
            None => ChannelMap::identity(servo_count, hardware_channels)?,
        };

        let seq = config.sequencer.unwrap_or_default();
        let presets = match config.presets {
            Some(raw) => {
                let gait = seq
                    .gait
                    .clone()
                    .ok_or_else(|| anyhow!("sequencer.gait is required when presets are configured"))?;
                PresetTable::new(servo_count, raw, gait)?
            }
            None => {
                let table = PresetTable::builtin();
                if table.servo_count() != servo_count {
                    return Err(anyhow!(
                        "built-in presets drive {} servos but servo_count is {}; configure presets",
                        table.servo_count(), servo_count
                    ));
                }
                if seq.gait.is_some() {
                    return Err(anyhow!("sequencer.gait given without presets"));
                }
                table
            }
        };

        let neutral = seq.neutral.unwrap_or_else(|| NEUTRAL_PRESET.to_string());
        if !presets.contains(&neutral) {
            return Err(anyhow!("neutral preset '{}' is not defined", neutral));
        }

        Ok(Self {
            host: conn.host,
            port: conn.port,
            timeout: conn.timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TIMEOUT),
            channel_map,
            presets,
            tick_interval: seq.interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_TICK_INTERVAL),
            neutral,
        })
    }

    /// Apply SERVOLINK_HOST / SERVOLINK_PORT / SERVOLINK_TIMEOUT_MS from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SERVOLINK_HOST") {
            self.host = Some(host);
        }
        if let Some(port) = lookup("SERVOLINK_PORT") {
            let port = port
                .trim()
                .parse()
                .map_err(|e| anyhow!("SERVOLINK_PORT '{}' is not a port: {}", port, e))?;
            self.port = Some(port);
        }
        if let Some(ms) = lookup("SERVOLINK_TIMEOUT_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|e| anyhow!("SERVOLINK_TIMEOUT_MS '{}' is not a number: {}", ms, e))?;
            self.timeout = Duration::from_millis(ms);
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(CONFIG_FILE)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Missing required {} at {:?}: {}", CONFIG_FILE, path, e))?;
    let config: Config = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(config)
}

/// Load settings for this machine. An explicit `path` must exist; without one
/// the default file is used if present, built-in defaults otherwise.
pub fn load_rig_settings(path: Option<&Path>) -> Result<RigSettings> {
    let _ = dotenv();
    let hostname = gethostname::gethostname().to_string_lossy().to_string();

    let mut settings = match path {
        Some(p) => RigSettings::from_config(load_config(p)?, &hostname)?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                RigSettings::from_config(load_config(&default_path)?, &hostname)?
            } else {
                log::info!(target: "config_loader", "No {} found, using built-in defaults", CONFIG_FILE);
                RigSettings::default()
            }
        }
    };
    settings.apply_overrides(|key| env::var(key).ok())?;

    log::info!(target: "config_loader", "RigSettings: target={}:{}, timeout={:?}, servos={}, presets={}, tick={:?} (hostname={})",
               settings.host.as_deref().unwrap_or("-"),
               settings.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
               settings.timeout,
               settings.channel_map.servo_count(),
               settings.presets.names().count(),
               settings.tick_interval,
               hostname);
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = RigSettings::from_config(Config::default(), "any").unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(2));
        assert_eq!(settings.tick_interval, Duration::from_millis(500));
        assert_eq!(settings.channel_map, ChannelMap::default());
        assert_eq!(settings.neutral, "stand");
        assert!(settings.host.is_none());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse(
            r#"
connection:
  host: 192.168.1.3
  port: 8080
  timeout_ms: 750
channels:
  servo_count: 2
  hardware_channels: 5
  map: [3, 1]
sequencer:
  interval_ms: 250
  gait: [lean, stand]
  neutral: stand
presets:
  stand: [90, 90]
  lean: [45, 135]
hosts:
  bench-pc:
    host: 127.0.0.1
"#,
        );
        let settings = RigSettings::from_config(cfg.clone(), "other").unwrap();
        assert_eq!(settings.host.as_deref(), Some("192.168.1.3"));
        assert_eq!(settings.port, Some(8080));
        assert_eq!(settings.timeout, Duration::from_millis(750));
        assert_eq!(settings.channel_map.lookup(0), Some(3));
        assert_eq!(settings.presets.gait(), ["lean", "stand"]);
        assert_eq!(settings.tick_interval, Duration::from_millis(250));

        let bench = RigSettings::from_config(cfg, "bench-pc").unwrap();
        assert_eq!(bench.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(bench.port, Some(8080));
    }

    #[test]
    fn test_rejects_inconsistent_config() {
        let short_preset = parse("sequencer: {gait: [stand]}\npresets: {stand: [90, 90]}\n");
        assert!(RigSettings::from_config(short_preset, "h").is_err());

        let missing_neutral = parse(
            "channels: {servo_count: 1}\nsequencer: {gait: [a]}\npresets: {a: [10]}\n",
        );
        assert!(RigSettings::from_config(missing_neutral, "h").is_err());

        let bad_map = parse("channels: {map: [0, 0, 1, 2]}\n");
        assert!(RigSettings::from_config(bad_map, "h").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = RigSettings::default();
        let vars: HashMap<&str, &str> =
            [("SERVOLINK_HOST", "10.0.0.7"), ("SERVOLINK_PORT", "9000")].into_iter().collect();
        settings
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(settings.port, Some(9000));
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);

        let bad = |k: &str| (k == "SERVOLINK_PORT").then(|| "eighty".to_string());
        assert!(settings.apply_overrides(bad).is_err());
    }
}
