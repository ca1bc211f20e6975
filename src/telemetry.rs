//! Live telemetry store
//!
//! Single record of the latest decoded values plus device health. The decoder
//! and gear classifier write it, the ELM327 interpreter and debug dumps read
//! it. Everything runs on one loop so there is no locking.

use crate::config::IdentityConfig;
use serde::Serialize;

/// Host-side health readings reported through the custom PIDs
pub trait HealthProbe {
    fn mcu_temp_c(&self) -> u8;
    fn cpu_mhz(&self) -> u8;
    fn free_ram_kb(&self) -> u8;
}

/// Health probe returning configured constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHealth {
    pub mcu_temp_c: u8,
    pub cpu_mhz: u8,
    pub free_ram_kb: u8,
}

impl From<&IdentityConfig> for FixedHealth {
    fn from(identity: &IdentityConfig) -> Self {
        Self {
            mcu_temp_c: identity.mcu_temp_c,
            cpu_mhz: identity.cpu_mhz,
            free_ram_kb: identity.free_ram_kb,
        }
    }
}

impl HealthProbe for FixedHealth {
    fn mcu_temp_c(&self) -> u8 {
        self.mcu_temp_c
    }

    fn cpu_mhz(&self) -> u8 {
        self.cpu_mhz
    }

    fn free_ram_kb(&self) -> u8 {
        self.free_ram_kb
    }
}

/// Device health snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceHealth {
    pub mcu_temp_c: u8,
    pub cpu_mhz: u8,
    pub free_ram_kb: u8,
    /// Seconds since boot, wraps at 65536
    pub uptime_s: u16,
}

/// Latest values from the bus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    pub rpm: u16,
    pub speed: u16,
    pub coolant_temp: i16,
    pub error_code: u8,
    /// 0 is neutral or unknown
    pub gear: u8,
    pub max_speed: u16,
    pub health: DeviceHealth,
    #[serde(skip)]
    rpm_fresh: bool,
    #[serde(skip)]
    speed_fresh: bool,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag RPM as updated since the last gear sample
    pub fn mark_rpm_fresh(&mut self) {
        self.rpm_fresh = true;
    }

    /// Flag speed as updated since the last gear sample
    pub fn mark_speed_fresh(&mut self) {
        self.speed_fresh = true;
    }

    /// Take a (speed, rpm) pair once both have been refreshed; clears both flags
    pub fn take_gear_sample(&mut self) -> Option<(u16, u16)> {
        if self.rpm_fresh && self.speed_fresh {
            self.rpm_fresh = false;
            self.speed_fresh = false;
            Some((self.speed, self.rpm))
        } else {
            None
        }
    }

    /// Forget vehicle values when the bus goes quiet
    pub fn clear_vehicle(&mut self) {
        self.rpm = 0;
        self.speed = 0;
        self.gear = 0;
        self.rpm_fresh = false;
        self.speed_fresh = false;
    }

    /// Refresh health readings
    pub fn refresh_health(&mut self, probe: &impl HealthProbe, now_ms: u64) {
        self.health = DeviceHealth {
            mcu_temp_c: probe.mcu_temp_c(),
            cpu_mhz: probe.cpu_mhz(),
            free_ram_kb: probe.free_ram_kb(),
            uptime_s: (now_ms / 1000) as u16,
        };
    }

    /// Multi-line dump for the PIDS debug mode
    pub fn report(&self) -> String {
        format!(
            "RPM: {}\nSpeed: {}\nMax Speed: {}\nCoolant: {}\nError: {}\nGear: {}\n\
             MCU Temp: {}\nCPU MHz: {}\nFree RAM: {}\nUptime: {}",
            self.rpm,
            self.speed,
            self.max_speed,
            self.coolant_temp,
            self.error_code,
            self.gear,
            self.health.mcu_temp_c,
            self.health.cpu_mhz,
            self.health.free_ram_kb,
            self.health.uptime_s,
        )
    }
}
