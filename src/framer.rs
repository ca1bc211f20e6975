//! Yamaha Diagnostic Bus Framing
//!
//! Turns the raw byte stream from the L9637D line into checksum-validated
//! frames. After power-on the ECU sends an immobilizer handshake that starts
//! with `0x3E`; its last byte selects normal operation (`0xFE`) or the dealer
//! diagnostic menu (`0xCD`). After that the ECU repeats fixed-size frames:
//!
//! ```text
//! RPM SPEED ERROR COOLANT CHK
//! ```
//!
//! where `CHK` is the sum of the data bytes mod 256. There is no start-of-frame
//! marker, so the framer keeps a sliding window and shifts one byte at a time
//! until the checksum lines up.

use crate::config::BusConfig;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

/// Checksum (sum of all bytes mod 256)
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Operating mode selected by the handshake terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    Normal,
    Diagnostic,
}

/// Framer synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    /// Waiting for the handshake start byte
    Hunting,
    /// Collecting the immobilizer handshake
    Handshake,
    /// Normal operation, frames are decoded
    Framing,
    /// Dealer diagnostic menu, frames are reported but not decoded
    DiagMode,
}

impl fmt::Display for FramerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramerState::Hunting => "hunting",
            FramerState::Handshake => "handshake",
            FramerState::Framing => "framing",
            FramerState::DiagMode => "diag",
        };
        f.write_str(name)
    }
}

/// A checksum-validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Build a frame from data bytes, appending the checksum
    pub fn from_data(data: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + 1);
        bytes.extend_from_slice(data);
        bytes.push(checksum(data));
        Self { bytes }
    }

    /// Full frame including the checksum byte
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Data bytes without the checksum
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }

    /// Data byte at `offset`, 0 if the layout points past the frame
    pub fn byte(&self, offset: usize) -> u8 {
        self.data().get(offset).copied().unwrap_or(0)
    }

    /// Format as space-separated hex
    pub fn to_hex(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Event produced by [`Framer::push`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Start byte seen, handshake collection begins
    HandshakeStarted,
    /// Handshake ended with an unknown terminator, back to hunting
    HandshakeRejected { terminal: u8 },
    /// Handshake accepted
    SessionStarted(BusMode),
    /// A valid frame
    Frame { mode: BusMode, frame: Frame },
}

/// Framing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerConfig {
    pub start_byte: u8,
    pub diag_byte: u8,
    pub normal_byte: u8,
    /// Bytes collected after the start byte, terminator included
    pub handshake_len: usize,
    /// Frame size, checksum included
    pub frame_size: usize,
}

impl From<&BusConfig> for FramerConfig {
    fn from(bus: &BusConfig) -> Self {
        Self {
            start_byte: bus.start_byte,
            diag_byte: bus.diag_byte,
            normal_byte: bus.normal_byte,
            handshake_len: bus.handshake_len,
            frame_size: bus.frame_size,
        }
    }
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self::from(&BusConfig::default())
    }
}

/// Byte-at-a-time frame synchronizer
pub struct Framer {
    config: FramerConfig,
    state: FramerState,
    immo: Vec<u8>,
    window: VecDeque<u8>,
    frames: u64,
    /// Bytes shifted out of the window without forming a frame
    discarded: u64,
}

impl Framer {
    pub fn new(config: FramerConfig) -> Self {
        Self {
            config,
            state: FramerState::Hunting,
            immo: Vec::with_capacity(config.handshake_len),
            window: VecDeque::with_capacity(config.frame_size),
            frames: 0,
            discarded: 0,
        }
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Valid frames emitted since the last reset
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes dropped by resynchronization since the last reset
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Return to hunting and forget all buffered bytes
    pub fn reset(&mut self) {
        self.state = FramerState::Hunting;
        self.immo.clear();
        self.window.clear();
        self.frames = 0;
        self.discarded = 0;
    }

    /// Feed one byte from the bus
    pub fn push(&mut self, byte: u8) -> Option<FrameEvent> {
        match self.state {
            FramerState::Hunting => {
                if byte == self.config.start_byte {
                    info!("Handshake start byte 0x{:02X} received", byte);
                    self.immo.clear();
                    self.state = FramerState::Handshake;
                    Some(FrameEvent::HandshakeStarted)
                } else {
                    None
                }
            }
            FramerState::Handshake => self.push_handshake(byte),
            FramerState::Framing => self.push_frame(byte).map(|frame| FrameEvent::Frame {
                mode: BusMode::Normal,
                frame,
            }),
            FramerState::DiagMode => self.push_frame(byte).map(|frame| FrameEvent::Frame {
                mode: BusMode::Diagnostic,
                frame,
            }),
        }
    }

    fn push_handshake(&mut self, byte: u8) -> Option<FrameEvent> {
        self.immo.push(byte);

        if self.immo.len() < self.config.handshake_len {
            return None;
        }

        // Only the terminator matters, the rest is immobilizer exchange
        self.immo.clear();

        if byte == self.config.diag_byte {
            info!("Handshake complete: diagnostic menu");
            self.state = FramerState::DiagMode;
            Some(FrameEvent::SessionStarted(BusMode::Diagnostic))
        } else if byte == self.config.normal_byte {
            info!("Handshake complete: normal operation");
            self.state = FramerState::Framing;
            Some(FrameEvent::SessionStarted(BusMode::Normal))
        } else {
            warn!("Unknown handshake terminator 0x{:02X}, hunting again", byte);
            self.state = FramerState::Hunting;
            Some(FrameEvent::HandshakeRejected { terminal: byte })
        }
    }

    fn push_frame(&mut self, byte: u8) -> Option<Frame> {
        let size = self.config.frame_size;

        if self.window.len() >= size {
            self.window.pop_front();
            self.discarded += 1;
        }
        self.window.push_back(byte);

        if self.window.len() < size {
            return None;
        }

        let bytes = self.window.make_contiguous();

        // Idle line, not data
        if bytes.iter().all(|&b| b == 0) {
            return None;
        }

        let expected = checksum(&bytes[..size - 1]);
        let received = bytes[size - 1];

        if expected != received {
            debug!(
                "Checksum mismatch: calculated 0x{:02X}, received 0x{:02X}, shifting",
                expected, received
            );
            return None;
        }

        let frame = Frame {
            bytes: bytes.to_vec(),
        };
        self.window.clear();
        self.frames += 1;
        Some(frame)
    }
}
