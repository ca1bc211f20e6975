//! Telemetry decoder
//!
//! Maps a validated bus frame onto the telemetry store. RPM, error code and
//! coolant are direct byte mappings. Speed is reported by the ECU in small
//! increments, so raw speed bytes are accumulated in batches and the batch
//! sum is the speed reading.

use crate::constants::decoder::MAX_SPEED_FLOOR;
use crate::framer::Frame;
use crate::telemetry::Telemetry;
use tracing::debug;

/// Byte offsets and calibration used to decode a frame
pub use crate::config::DecoderConfig as FrameLayout;

/// Fixed-capacity accumulator for raw speed bytes
#[derive(Debug, Clone)]
pub struct SpeedRollingBuffer {
    samples: Vec<u8>,
    capacity: usize,
}

impl SpeedRollingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a raw sample; returns the batch sum and empties the buffer when full
    pub fn push(&mut self, raw: u8) -> Option<u16> {
        self.samples.push(raw);
        if self.samples.len() < self.capacity {
            return None;
        }

        let sum = self.samples.iter().map(|&b| b as u16).sum();
        self.samples.clear();
        Some(sum)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Values taken from one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub rpm: u16,
    /// Set only when this frame completed a speed batch
    pub speed: Option<u16>,
    pub error_code: u8,
    pub coolant_temp: i16,
}

pub struct Decoder {
    layout: FrameLayout,
    speed: SpeedRollingBuffer,
}

impl Decoder {
    pub fn new(layout: FrameLayout) -> Self {
        let speed = SpeedRollingBuffer::new(layout.speed_window);
        Self { layout, speed }
    }

    pub fn speed_buffer(&self) -> &SpeedRollingBuffer {
        &self.speed
    }

    /// Drop any partial speed batch
    pub fn reset(&mut self) {
        self.speed.clear();
    }

    /// Decode a normal-mode frame into `telemetry`
    pub fn decode(&mut self, frame: &Frame, telemetry: &mut Telemetry) -> Decoded {
        let layout = &self.layout;

        let rpm = frame.byte(layout.rpm_offset) as u16 * layout.rpm_multiplier;
        let error_code = frame.byte(layout.error_offset);
        let coolant_temp = frame.byte(layout.coolant_offset_byte) as i16 + layout.coolant_offset;
        let speed = self.speed.push(frame.byte(layout.speed_offset));

        telemetry.rpm = rpm;
        telemetry.mark_rpm_fresh();
        telemetry.error_code = error_code;
        telemetry.coolant_temp = coolant_temp;

        if let Some(speed) = speed {
            telemetry.speed = speed;
            telemetry.mark_speed_fresh();
            if speed > MAX_SPEED_FLOOR && speed > telemetry.max_speed {
                debug!("New max speed {}", speed);
                telemetry.max_speed = speed;
            }
        }

        Decoded {
            rpm,
            speed,
            error_code,
            coolant_temp,
        }
    }
}
