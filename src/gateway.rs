//! Gateway main loop
//!
//! Owns every piece of session state and advances it one step per
//! [`Gateway::tick`]:
//!
//! 1. bike-off check
//! 2. at most one bus byte (framing, decoding, gear learning/classification)
//! 3. at most one operator command
//! 4. at most one ELM327 query
//! 5. device-health housekeeping when due
//!
//! Nothing here blocks except storage commits, which only happen when a gear
//! table is sealed or erased.

use crate::clock::TimeSource;
use crate::commands::{Command, DebugMode, MENU};
use crate::config::{Config, GearConfig};
use crate::constants::storage::VERSION_KEY;
use crate::constants::timing::BUS_ERROR_LOG_INTERVAL_MS;
use crate::decoder::Decoder;
use crate::elm::ElmInterpreter;
use crate::framer::{BusMode, Frame, FrameEvent, Framer, FramerConfig, FramerState};
use crate::gear::{classify, GearLearner, LearnEvent};
use crate::liveness::LivenessMonitor;
use crate::serial::ByteSource;
use crate::storage::{erase_ratio_table, load_ratio_table, persist_ratio_table, KvStore};
use crate::telemetry::{HealthProbe, Telemetry};
use crate::transport::{Inbound, Outbound, Transport};
use tracing::{debug, info, warn};

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to do, the caller may sleep
    Idle,
    /// Something was processed
    Busy,
    /// Operator asked for a restart
    Restart,
}

/// Rate limit for a warning that can repeat on every tick
#[derive(Debug, Clone, Default)]
struct WarnThrottle {
    last_ms: Option<u64>,
    suppressed: u64,
}

impl WarnThrottle {
    /// `Some(suppressed since the last warning)` when a warning is due
    fn due(&mut self, now: u64, interval_ms: u64) -> Option<u64> {
        let due = match self.last_ms {
            Some(last) => now.saturating_sub(last) >= interval_ms,
            None => true,
        };
        if !due {
            self.suppressed += 1;
            return None;
        }
        self.last_ms = Some(now);
        Some(std::mem::take(&mut self.suppressed))
    }
}

fn notify<T: Transport>(transport: &mut T, text: impl Into<String>) {
    transport.enqueue(Outbound::Console, text.into());
}

fn join_ratios(ratios: &[u16]) -> String {
    ratios
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct Gateway<C: TimeSource, S: KvStore, H: HealthProbe> {
    gear_params: GearConfig,
    housekeeping_interval_ms: u64,
    framer: Framer,
    decoder: Decoder,
    telemetry: Telemetry,
    learner: GearLearner,
    liveness: LivenessMonitor,
    elm: ElmInterpreter,
    debug: DebugMode,
    clock: C,
    store: S,
    health: H,
    last_housekeeping_ms: Option<u64>,
    bus_errors: u64,
    bus_warning: WarnThrottle,
}

impl<C: TimeSource, S: KvStore, H: HealthProbe> Gateway<C, S, H> {
    /// Build a gateway and load the stored gear table
    pub fn new(config: &Config, clock: C, store: S, health: H) -> Self {
        let mut learner = GearLearner::new(config.gears);

        match load_ratio_table(&store, config.gears.max_gears) {
            Ok(Some(ratios)) => learner.restore(ratios),
            Ok(None) => info!("No complete gear table stored"),
            Err(e) => warn!("Failed to load gear ratios: {}", e),
        }

        Self {
            gear_params: config.gears,
            housekeeping_interval_ms: config.session.housekeeping_interval_ms,
            framer: Framer::new(FramerConfig::from(&config.bus)),
            decoder: Decoder::new(config.decoder.clone()),
            telemetry: Telemetry::new(),
            learner,
            liveness: LivenessMonitor::new(
                config.session.bike_off_timeout_ms,
                config.session.monitor_enabled,
            ),
            elm: ElmInterpreter::new(config.identity.clone()),
            debug: DebugMode::Off,
            clock,
            store,
            health,
            last_housekeeping_ms: None,
            bus_errors: 0,
            bus_warning: WarnThrottle::default(),
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn learner(&self) -> &GearLearner {
        &self.learner
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    pub fn debug_mode(&self) -> DebugMode {
        self.debug
    }

    /// Failed bus reads since boot
    pub fn bus_errors(&self) -> u64 {
        self.bus_errors
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Greet the console after boot
    pub fn start<T: Transport>(&mut self, transport: &mut T) {
        for line in MENU {
            notify(transport, *line);
        }

        let table = self.learner.table();
        if table.is_sealed() {
            notify(
                transport,
                format!("Gear ratios loaded: {}", join_ratios(table.ratios())),
            );
        } else {
            notify(transport, "No gear ratios stored. Send GEARS to start training");
        }
    }

    /// Run one loop iteration
    pub fn tick<B: ByteSource, T: Transport>(&mut self, bus: &mut B, transport: &mut T) -> Tick {
        let now = self.clock.now_ms();
        let mut busy = false;

        if self.liveness.poll(now) {
            self.end_session(transport);
            busy = true;
        }

        match bus.try_read_byte() {
            Ok(Some(byte)) => {
                self.liveness.touch(now);
                self.handle_byte(byte, transport);
                busy = true;
            }
            Ok(None) => {}
            Err(e) => {
                self.bus_errors += 1;
                match self.bus_warning.due(now, BUS_ERROR_LOG_INTERVAL_MS) {
                    Some(0) => warn!("Bus read failed: {}", e),
                    Some(suppressed) => {
                        warn!("Bus read failed: {} ({} more since last report)", e, suppressed)
                    }
                    None => {}
                }
            }
        }

        if let Some(line) = transport.try_dequeue(Inbound::Console) {
            if self.handle_command(&line, transport) == Tick::Restart {
                return Tick::Restart;
            }
            busy = true;
        }

        if let Some(query) = transport.try_dequeue(Inbound::Elm) {
            self.handle_query(&query, transport);
            busy = true;
        }

        self.housekeeping(now, transport);

        if busy {
            Tick::Busy
        } else {
            Tick::Idle
        }
    }

    // ========================================================================
    // BUS
    // ========================================================================

    fn handle_byte<T: Transport>(&mut self, byte: u8, transport: &mut T) {
        let Some(event) = self.framer.push(byte) else {
            return;
        };

        match event {
            FrameEvent::HandshakeStarted => notify(transport, "Starting IMMO sequence"),
            FrameEvent::HandshakeRejected { terminal } => notify(
                transport,
                format!("Unknown handshake end 0x{:02X}, waiting for ECU", terminal),
            ),
            FrameEvent::SessionStarted(BusMode::Normal) => {
                notify(transport, "Normal start initiated")
            }
            FrameEvent::SessionStarted(BusMode::Diagnostic) => {
                notify(transport, "Diag start initiated")
            }
            FrameEvent::Frame {
                mode: BusMode::Diagnostic,
                frame,
            } => notify(transport, format!("Diag frame: {}", frame.to_hex())),
            FrameEvent::Frame {
                mode: BusMode::Normal,
                frame,
            } => self.process_frame(&frame, transport),
        }
    }

    fn process_frame<T: Transport>(&mut self, frame: &Frame, transport: &mut T) {
        self.decoder.decode(frame, &mut self.telemetry);
        let sample = self.telemetry.take_gear_sample();

        if self.learner.is_training() {
            if let Some((speed, rpm)) = sample {
                if let Some(event) = self.learner.offer(speed, rpm) {
                    self.on_learn_event(event, transport);
                }
            }
        } else if self.learner.table().is_sealed() {
            self.telemetry.gear = classify(
                self.learner.table().ratios(),
                self.telemetry.speed,
                self.telemetry.rpm,
                &self.gear_params,
            );
        }
    }

    fn end_session<T: Transport>(&mut self, transport: &mut T) {
        info!(
            "Bike off: {} frames this session, {} bytes resynced",
            self.framer.frames(),
            self.framer.discarded()
        );
        self.framer.reset();
        self.decoder.reset();
        self.telemetry.clear_vehicle();
        if self.learner.cancel() {
            notify(transport, "Gear training cancelled");
        }
        notify(transport, "Bike Off Detected");
    }

    // ========================================================================
    // GEAR LEARNING
    // ========================================================================

    fn on_learn_event<T: Transport>(&mut self, event: LearnEvent, transport: &mut T) {
        match event {
            LearnEvent::ShiftIntoFirst => {
                self.telemetry.gear = 0;
                notify(transport, "Shift into Gear 1 now");
            }
            LearnEvent::Repeat { candidate, gear } => notify(
                transport,
                format!("Ratio {} matches Gear {}, shift up", candidate, gear),
            ),
            LearnEvent::Regression { candidate, gear } => notify(
                transport,
                format!("Ratio {} is above Gear {}, ignored", candidate, gear),
            ),
            LearnEvent::GearSet { gear, ratio } => {
                self.telemetry.gear = gear as u8;
                notify(
                    transport,
                    format!("Gear {} set: {}. Shift into Gear {}", gear, ratio, gear + 1),
                );
            }
            LearnEvent::Sealed { ratios } => {
                self.telemetry.gear = ratios.len() as u8;
                notify(transport, "Max Gears Reached. Gear learning has completed");
                notify(transport, format!("Gear ratios: {}", join_ratios(&ratios)));
                self.save_ratios(&ratios, transport);
            }
        }
    }

    fn save_ratios<T: Transport>(&mut self, ratios: &[u16], transport: &mut T) {
        match persist_ratio_table(&mut self.store, ratios) {
            Ok(()) => notify(transport, "Gear ratios saved"),
            Err(e) => {
                warn!("Failed to save gear ratios: {}", e);
                notify(transport, format!("Failed to save gear ratios: {}", e));
            }
        }
    }

    // ========================================================================
    // OPERATOR COMMANDS
    // ========================================================================

    fn handle_command<T: Transport>(&mut self, line: &str, transport: &mut T) -> Tick {
        let Some(command) = Command::parse(line) else {
            return Tick::Busy;
        };
        info!("Console command {:?}", command);

        if let Some(ack) = command.acknowledgement() {
            notify(transport, format!("Command Received: {}", ack));
        }

        match command {
            Command::Menu => {
                for entry in MENU {
                    notify(transport, *entry);
                }
            }
            Command::Debug(mode) => {
                self.debug = mode;
                if mode == DebugMode::Off {
                    self.liveness.set_enabled(true);
                }
            }
            Command::BikeOn => self.liveness.set_enabled(true),
            Command::BikeOff => self.liveness.set_enabled(false),
            Command::GearsOn => {
                if self.learner.start() {
                    notify(transport, "Starting Gear training. Shift into Gear 1 now");
                } else {
                    notify(transport, "Gear table is complete. Send RATIO RESET to retrain");
                }
            }
            Command::GearsOff => {
                self.learner.stop();
                notify(transport, "Gear training stopped");
            }
            Command::RatioReset => {
                self.learner.reset_table();
                self.telemetry.gear = 0;
                match erase_ratio_table(&mut self.store) {
                    Ok(()) => notify(transport, "Stored gear ratios erased"),
                    Err(e) => {
                        warn!("Failed to erase gear ratios: {}", e);
                        notify(transport, format!("Failed to erase gear ratios: {}", e));
                    }
                }
                self.learner.start();
                notify(transport, "Starting Gear training. Shift into Gear 1 now");
            }
            Command::Ratios => self.report_ratios(transport),
            Command::Status => self.report_status(transport),
            Command::Restart => return Tick::Restart,
            Command::Unknown(text) => notify(transport, format!("Command Not Known: {}", text)),
        }

        Tick::Busy
    }

    fn report_ratios<T: Transport>(&self, transport: &mut T) {
        let table = self.learner.table();

        if table.is_empty() {
            notify(transport, "No gear ratios stored");
            return;
        }

        for (index, ratio) in table.ratios().iter().enumerate() {
            notify(transport, format!("Gear {}: {}", index + 1, ratio));
        }

        if !table.is_sealed() {
            notify(
                transport,
                format!("Training: {} of {} gears", table.len(), self.gear_params.max_gears),
            );
            return;
        }

        match self.store.updated_at(VERSION_KEY) {
            Ok(Some(at)) => notify(
                transport,
                format!("Stored {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            ),
            Ok(None) => notify(transport, "Not stored"),
            Err(e) => debug!("Could not read ratio timestamp: {}", e),
        }
    }

    fn report_status<T: Transport>(&self, transport: &mut T) {
        let on_off = |flag: bool| if flag { "on" } else { "off" };

        let lines = [
            format!("Bus: {}", self.framer.state()),
            format!(
                "Frames: {}, resync bytes: {}",
                self.framer.frames(),
                self.framer.discarded()
            ),
            format!("Bus read errors: {}", self.bus_errors),
            format!("Bike timer: {}", on_off(self.liveness.is_enabled())),
            format!(
                "Gear training: {} ({}/{} samples)",
                on_off(self.learner.is_training()),
                self.learner.window_len(),
                self.gear_params.window_size
            ),
            format!(
                "Gear table: {} of {} gears{}",
                self.learner.table().len(),
                self.gear_params.max_gears,
                if self.learner.table().is_sealed() { ", sealed" } else { "" }
            ),
            format!("Debug: {:?}", self.debug),
            format!(
                "Dropped messages: ELM {}, console {}",
                transport.dropped(Outbound::Elm),
                transport.dropped(Outbound::Console)
            ),
        ];

        for line in lines {
            notify(transport, line);
        }
    }

    // ========================================================================
    // ELM327 / HOUSEKEEPING
    // ========================================================================

    fn handle_query<T: Transport>(&mut self, query: &str, transport: &mut T) {
        if self.debug == DebugMode::Rx {
            notify(transport, format!("Received from ELM: {}", query.trim()));
        }

        if let Some(response) = self.elm.respond(query, &self.telemetry) {
            if self.debug == DebugMode::Tx {
                notify(transport, format!("Sent to ELM: {}", response));
            }
            transport.enqueue(Outbound::Elm, response);
        }
    }

    fn housekeeping<T: Transport>(&mut self, now: u64, transport: &mut T) {
        let due = match self.last_housekeeping_ms {
            Some(last) => now.saturating_sub(last) >= self.housekeeping_interval_ms,
            None => true,
        };
        if !due {
            return;
        }

        self.last_housekeeping_ms = Some(now);
        self.telemetry.refresh_health(&self.health, now);

        if self.debug == DebugMode::Pids {
            notify(transport, self.telemetry.report());
        }
    }

    /// Whether the framer has synchronized with the ECU
    pub fn in_session(&self) -> bool {
        matches!(
            self.framer.state(),
            FramerState::Framing | FramerState::DiagMode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_throttle_spacing() {
        let mut throttle = WarnThrottle::default();
        assert_eq!(throttle.due(0, 5_000), Some(0));
        for now in 1..1_000 {
            assert_eq!(throttle.due(now, 5_000), None);
        }
        assert_eq!(throttle.due(4_999, 5_000), None);
        assert_eq!(throttle.due(5_000, 5_000), Some(1_000));
        assert_eq!(throttle.due(10_000, 5_000), Some(0));
    }
}
