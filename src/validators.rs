//! Input validation for configuration values
//!
//! Provides centralized range checks so that an invalid config file is
//! rejected at startup instead of producing a framer or learner that can
//! never match anything.

use crate::config::{DecoderConfig, GearConfig};
use crate::constants::{bus, gears, timing};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Validation error with detailed message
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

// ============================================================================
// BUS VALIDATION
// ============================================================================

/// Validates the serial line speed
pub fn validate_baud_rate(rate: u32) -> ValidationResult<u32> {
    if (1_200..=1_000_000).contains(&rate) {
        Ok(rate)
    } else {
        Err(ValidationError::new(
            "bus.baud_rate",
            format!("Invalid baud rate {}. Must be between 1200 and 1000000", rate),
        ))
    }
}

/// Validates the frame size (data bytes plus checksum)
pub fn validate_frame_size(size: usize) -> ValidationResult<usize> {
    if (bus::MIN_FRAME_SIZE..=bus::MAX_FRAME_SIZE).contains(&size) {
        Ok(size)
    } else {
        Err(ValidationError::new(
            "bus.frame_size",
            format!(
                "Invalid frame size {}. Must be between {} and {}",
                size,
                bus::MIN_FRAME_SIZE,
                bus::MAX_FRAME_SIZE
            ),
        ))
    }
}

/// Validates the handshake buffer length
pub fn validate_handshake_len(len: usize) -> ValidationResult<usize> {
    if (bus::MIN_HANDSHAKE_LEN..=bus::MAX_HANDSHAKE_LEN).contains(&len) {
        Ok(len)
    } else {
        Err(ValidationError::new(
            "bus.handshake_len",
            format!(
                "Invalid handshake length {}. Must be between {} and {}",
                len,
                bus::MIN_HANDSHAKE_LEN,
                bus::MAX_HANDSHAKE_LEN
            ),
        ))
    }
}

// ============================================================================
// DECODER VALIDATION
// ============================================================================

/// Every decoded offset must point at a data byte, never at the checksum
pub fn validate_frame_layout(layout: &DecoderConfig, frame_size: usize) -> ValidationResult<()> {
    let data_len = frame_size.saturating_sub(1);
    let offsets = [
        ("decoder.rpm_offset", layout.rpm_offset),
        ("decoder.speed_offset", layout.speed_offset),
        ("decoder.error_offset", layout.error_offset),
        ("decoder.coolant_offset_byte", layout.coolant_offset_byte),
    ];

    for (field, offset) in offsets {
        if offset >= data_len {
            return Err(ValidationError::new(
                field,
                format!("Offset {} is outside the {} data bytes of a frame", offset, data_len),
            ));
        }
    }

    if layout.rpm_multiplier == 0 {
        return Err(ValidationError::new("decoder.rpm_multiplier", "Multiplier cannot be zero"));
    }

    if u8::MAX as u32 * layout.rpm_multiplier as u32 > u16::MAX as u32 {
        return Err(ValidationError::new(
            "decoder.rpm_multiplier",
            format!("Multiplier {} overflows a 16-bit RPM", layout.rpm_multiplier),
        ));
    }

    Ok(())
}

/// Validates the speed batch size
pub fn validate_speed_window(window: usize) -> ValidationResult<usize> {
    // 257 * 255 would overflow u16
    if (1..=256).contains(&window) {
        Ok(window)
    } else {
        Err(ValidationError::new(
            "decoder.speed_window",
            format!("Invalid speed window {}. Must be between 1 and 256", window),
        ))
    }
}

// ============================================================================
// GEAR VALIDATION
// ============================================================================

/// Validates gear learning parameters
pub fn validate_gear_config(config: &GearConfig) -> ValidationResult<()> {
    if config.window_size == 0 {
        return Err(ValidationError::new("gears.window_size", "Window size cannot be zero"));
    }

    if config.max_gears == 0 || config.max_gears > gears::MAX_GEARS_LIMIT {
        return Err(ValidationError::new(
            "gears.max_gears",
            format!(
                "Invalid gear count {}. Must be between 1 and {}",
                config.max_gears,
                gears::MAX_GEARS_LIMIT
            ),
        ));
    }

    if config.neutral_speed > config.learn_min_speed {
        return Err(ValidationError::new(
            "gears.neutral_speed",
            format!(
                "Neutral speed {} is above the learning floor {}",
                config.neutral_speed, config.learn_min_speed
            ),
        ));
    }

    Ok(())
}

// ============================================================================
// SESSION / LINK VALIDATION
// ============================================================================

/// Validates the bike-off timeout
pub fn validate_bike_off_timeout(timeout_ms: u64) -> ValidationResult<u64> {
    if (timing::MIN_BIKE_OFF_TIMEOUT_MS..=timing::MAX_BIKE_OFF_TIMEOUT_MS).contains(&timeout_ms) {
        Ok(timeout_ms)
    } else {
        Err(ValidationError::new(
            "session.bike_off_timeout_ms",
            format!(
                "Invalid timeout {}ms. Must be between {} and {}",
                timeout_ms,
                timing::MIN_BIKE_OFF_TIMEOUT_MS,
                timing::MAX_BIKE_OFF_TIMEOUT_MS
            ),
        ))
    }
}

/// Validates the per-channel queue depth
pub fn validate_queue_capacity(capacity: usize) -> ValidationResult<usize> {
    if capacity == 0 {
        Err(ValidationError::new("link.queue_capacity", "Queue capacity cannot be zero"))
    } else {
        Ok(capacity)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_baud_rate() {
        assert!(validate_baud_rate(16_040).is_ok());
        assert!(validate_baud_rate(0).is_err());
        assert!(validate_baud_rate(10_000_000).is_err());
    }

    #[test]
    fn test_validate_frame_size() {
        assert!(validate_frame_size(5).is_ok());
        assert!(validate_frame_size(6).is_ok());
        assert!(validate_frame_size(1).is_err());
        assert!(validate_frame_size(64).is_err());
    }

    #[test]
    fn test_validate_frame_layout_rejects_checksum_offset() {
        let layout = DecoderConfig {
            coolant_offset_byte: 4,
            ..DecoderConfig::default()
        };
        let err = validate_frame_layout(&layout, 5).unwrap_err();
        assert_eq!(err.field, "decoder.coolant_offset_byte");

        // A 6-byte frame has room for it
        assert!(validate_frame_layout(&layout, 6).is_ok());
    }

    #[test]
    fn test_validate_frame_layout_rpm_overflow() {
        let layout = DecoderConfig {
            rpm_multiplier: 300,
            ..DecoderConfig::default()
        };
        assert!(validate_frame_layout(&layout, 5).is_err());
    }

    #[test]
    fn test_validate_gear_config() {
        assert!(validate_gear_config(&GearConfig::default()).is_ok());

        let zero_gears = GearConfig {
            max_gears: 0,
            ..GearConfig::default()
        };
        assert!(validate_gear_config(&zero_gears).is_err());

        let inverted = GearConfig {
            neutral_speed: 20,
            learn_min_speed: 10,
            ..GearConfig::default()
        };
        assert!(validate_gear_config(&inverted).is_err());
    }

    #[test]
    fn test_validate_bike_off_timeout() {
        assert!(validate_bike_off_timeout(5_000).is_ok());
        assert!(validate_bike_off_timeout(10_000).is_ok());
        assert!(validate_bike_off_timeout(0).is_err());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("bus.frame_size", "too small");
        assert_eq!(err.to_string(), "bus.frame_size: too small");
    }
}
