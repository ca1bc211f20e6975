//! Centralized constants for the Yamaha diagnostic bus and the ELM327 link
//!
//! This module contains all magic numbers, sentinels, and protocol defaults
//! used throughout the crate. Every value here is the default for a field in
//! [`crate::config::Config`].

// ============================================================================
// BUS FRAMING
// ============================================================================

pub mod bus {
    /// First byte of the immobilizer handshake after power-on
    pub const START_BYTE: u8 = 0x3E;

    /// Handshake terminal byte selecting the dealer diagnostic menu
    pub const DIAG_BYTE: u8 = 0xCD;

    /// Handshake terminal byte selecting normal operation
    pub const NORMAL_BYTE: u8 = 0xFE;

    /// Bytes collected after the start byte, terminal byte included
    pub const HANDSHAKE_LEN: usize = 61;

    /// Handshake length used by older ECU revisions
    pub const HANDSHAKE_LEN_LEGACY: usize = 55;

    /// Data frame size, checksum included
    pub const FRAME_SIZE: usize = 5;

    /// L9637D line speed (non-standard)
    pub const BAUD: u32 = 16_040;

    /// Valid frame sizes
    pub const MIN_FRAME_SIZE: usize = 2;
    pub const MAX_FRAME_SIZE: usize = 16;

    /// Valid handshake lengths
    pub const MIN_HANDSHAKE_LEN: usize = 1;
    pub const MAX_HANDSHAKE_LEN: usize = 255;
}

// ============================================================================
// FRAME LAYOUT & CALIBRATION
// ============================================================================

pub mod decoder {
    /// Byte offsets inside a data frame
    pub const RPM_OFFSET: usize = 0;
    pub const SPEED_OFFSET: usize = 1;
    pub const ERROR_OFFSET: usize = 2;
    pub const COOLANT_OFFSET_BYTE: usize = 3;

    /// RPM = raw byte * multiplier (max 12750 at 50)
    pub const RPM_MULTIPLIER: u16 = 50;

    /// Raw speed bytes summed into one speed reading
    pub const SPEED_WINDOW: usize = 8;

    /// Coolant calibration: temp = raw + offset
    pub const COOLANT_OFFSET: i16 = -30;

    /// Coolant calibration used by the first logger revision
    pub const COOLANT_OFFSET_LEGACY: i16 = 40;

    /// Max speed tracking only starts above this value
    pub const MAX_SPEED_FLOOR: u16 = 10;
}

// ============================================================================
// GEAR LEARNING
// ============================================================================

pub mod gears {
    /// Ratio samples per mode vote (15ms * 333 ≈ 5s of riding)
    pub const WINDOW_SIZE: usize = 333;

    /// Gears on the XT660
    pub const MAX_GEARS: usize = 5;

    /// Hard upper bound for the table (keys "0".."7")
    pub const MAX_GEARS_LIMIT: usize = 8;

    /// Below this speed a training sample counts as neutral
    pub const LEARN_MIN_SPEED: u16 = 10;

    /// Below this speed the classifier reports neutral
    pub const NEUTRAL_SPEED: u16 = 7;

    /// Candidates closer than this to the last gear are repeats
    pub const DEVIATION: u16 = 6;

    /// Classifier match tolerance
    pub const LOOKUP_TOLERANCE: u16 = 6;
}

// ============================================================================
// SESSION TIMING
// ============================================================================

pub mod timing {
    /// No bus byte for this long means the ignition is off
    pub const BIKE_OFF_TIMEOUT_MS: u64 = 5_000;

    /// Bike-off timeout used by the first logger revision
    pub const BIKE_OFF_TIMEOUT_LEGACY_MS: u64 = 10_000;

    /// Device-health refresh period
    pub const HOUSEKEEPING_INTERVAL_MS: u64 = 500;

    /// Host loop sleep when nothing was processed
    pub const IDLE_SLEEP_MS: u64 = 1;

    /// Minimum spacing between repeated bus read warnings
    pub const BUS_ERROR_LOG_INTERVAL_MS: u64 = 5_000;

    /// Valid bike-off timeout range
    pub const MIN_BIKE_OFF_TIMEOUT_MS: u64 = 100;
    pub const MAX_BIKE_OFF_TIMEOUT_MS: u64 = 60_000;
}

// ============================================================================
// LINK
// ============================================================================

pub mod link {
    /// Outbound/inbound queue depth per channel
    pub const QUEUE_CAPACITY: usize = 50;

    /// TCP port for the ELM327 channel (WiFi ELM327 convention)
    pub const ELM_PORT: u16 = 35_000;

    /// TCP port for the operator console
    pub const CONSOLE_PORT: u16 = 35_001;

    /// Longest accepted inbound line
    pub const MAX_LINE_LEN: usize = 256;

    /// ELM327 prompt terminating every response
    pub const ELM_PROMPT: &str = "\r\r>";
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub mod storage {
    /// Key holding the ratio table layout version
    pub const VERSION_KEY: &str = "version";

    /// Current ratio table layout version
    pub const LAYOUT_VERSION: u16 = 1;

    /// Default SQLite file
    pub const DEFAULT_PATH: &str = "yds-logger.db";
}

// ============================================================================
// ELM327 / OBD-II
// ============================================================================

pub mod obd {
    pub const MODE_CURRENT_DATA: u8 = 0x01;
    pub const MODE_VEHICLE_INFO: u8 = 0x09;
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

    // Mode 01 PIDs
    pub const SUPPORTED_01_20: u8 = 0x00;
    pub const COOLANT_TEMP: u8 = 0x05;
    pub const ENGINE_RPM: u8 = 0x0C;
    pub const VEHICLE_SPEED: u8 = 0x0D;
    pub const SUPPORTED_21_40: u8 = 0x20;
    pub const SUPPORTED_41_60: u8 = 0x40;
    pub const SUPPORTED_61_80: u8 = 0x60;
    pub const SUPPORTED_81_A0: u8 = 0x80;
    pub const SUPPORTED_A1_C0: u8 = 0xA0;
    pub const TRANSMISSION_GEAR: u8 = 0xA4;

    // Mode 09 PIDs
    pub const VIN: u8 = 0x02;
    pub const CALIBRATION_ID: u8 = 0x04;
    pub const ECU_NAME: u8 = 0x0A;

    /// Coolant is reported as A - 40
    pub const COOLANT_BIAS: i16 = 40;

    /// RPM is reported as (256A + B) / 4
    pub const RPM_SCALE: u32 = 4;

    /// Response header for the emulated engine ECU
    pub const ECU_HEADER: &str = "7E8";

    /// Protocol number reported by ATDPN (ISO 15765-4 CAN 11/500)
    pub const PROTOCOL_NUMBER: &str = "6";

    pub const ELM_VERSION: &str = "ELM327 v2.1";
}
