//! Runtime configuration
//!
//! Every protocol variant difference (frame size, handshake length, coolant
//! offset, bike-off timeout, byte offsets) is a field here rather than a
//! separate code path. Loaded from JSON; missing fields take the defaults
//! from [`crate::constants`].

use crate::constants::{bus, decoder, gears, link, storage, timing};
use crate::validators::{self, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub decoder: DecoderConfig,
    pub gears: GearConfig,
    pub session: SessionConfig,
    pub link: LinkConfig,
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
}

/// Serial line and framing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// Serial device, e.g. "/dev/ttyUSB0"
    pub port: String,
    pub baud_rate: u32,
    pub start_byte: u8,
    pub diag_byte: u8,
    pub normal_byte: u8,
    pub handshake_len: usize,
    pub frame_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: bus::BAUD,
            start_byte: bus::START_BYTE,
            diag_byte: bus::DIAG_BYTE,
            normal_byte: bus::NORMAL_BYTE,
            handshake_len: bus::HANDSHAKE_LEN,
            frame_size: bus::FRAME_SIZE,
        }
    }
}

/// Frame layout and calibration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    pub rpm_offset: usize,
    pub speed_offset: usize,
    pub error_offset: usize,
    pub coolant_offset_byte: usize,
    pub rpm_multiplier: u16,
    pub speed_window: usize,
    pub coolant_offset: i16,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            rpm_offset: decoder::RPM_OFFSET,
            speed_offset: decoder::SPEED_OFFSET,
            error_offset: decoder::ERROR_OFFSET,
            coolant_offset_byte: decoder::COOLANT_OFFSET_BYTE,
            rpm_multiplier: decoder::RPM_MULTIPLIER,
            speed_window: decoder::SPEED_WINDOW,
            coolant_offset: decoder::COOLANT_OFFSET,
        }
    }
}

/// Gear learning and lookup tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GearConfig {
    pub window_size: usize,
    pub max_gears: usize,
    pub learn_min_speed: u16,
    pub neutral_speed: u16,
    pub deviation: u16,
    pub lookup_tolerance: u16,
}

impl Default for GearConfig {
    fn default() -> Self {
        Self {
            window_size: gears::WINDOW_SIZE,
            max_gears: gears::MAX_GEARS,
            learn_min_speed: gears::LEARN_MIN_SPEED,
            neutral_speed: gears::NEUTRAL_SPEED,
            deviation: gears::DEVIATION,
            lookup_tolerance: gears::LOOKUP_TOLERANCE,
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub bike_off_timeout_ms: u64,
    pub housekeeping_interval_ms: u64,
    /// Start with bike-off detection enabled
    pub monitor_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bike_off_timeout_ms: timing::BIKE_OFF_TIMEOUT_MS,
            housekeeping_interval_ms: timing::HOUSEKEEPING_INTERVAL_MS,
            monitor_enabled: true,
        }
    }
}

/// Wireless/TCP link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub queue_capacity: usize,
    pub bind_address: String,
    pub elm_port: u16,
    pub console_port: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: link::QUEUE_CAPACITY,
            bind_address: "0.0.0.0".to_string(),
            elm_port: link::ELM_PORT,
            console_port: link::CONSOLE_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: storage::DEFAULT_PATH.to_string(),
        }
    }
}

/// Strings reported through mode 09 and health values for hosts without sensors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub vin: String,
    pub calibration_id: String,
    pub ecu_name: String,
    pub mcu_temp_c: u8,
    pub cpu_mhz: u8,
    pub free_ram_kb: u8,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            vin: "YAMAHAESP32ODB".to_string(),
            calibration_id: String::new(),
            ecu_name: "ESP327Emulator".to_string(),
            mcu_temp_c: 0,
            cpu_mhz: 240,
            free_ram_kb: 0,
        }
    }
}

impl Config {
    /// Load a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&text)?;
            info!("Loaded config from {}", path.display());
            config
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a JSON string
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Range-check every value
    pub fn validate(&self) -> Result<(), ValidationError> {
        validators::validate_baud_rate(self.bus.baud_rate)?;
        validators::validate_frame_size(self.bus.frame_size)?;
        validators::validate_handshake_len(self.bus.handshake_len)?;
        validators::validate_frame_layout(&self.decoder, self.bus.frame_size)?;
        validators::validate_speed_window(self.decoder.speed_window)?;
        validators::validate_gear_config(&self.gears)?;
        validators::validate_bike_off_timeout(self.session.bike_off_timeout_ms)?;
        validators::validate_queue_capacity(self.link.queue_capacity)?;
        Ok(())
    }
}
