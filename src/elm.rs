//! ELM327 adapter emulation
//!
//! Answers the AT commands and OBD-II queries that dashboard apps send to a
//! WiFi/BLE ELM327 dongle, using values from the telemetry store. Responses
//! are space-separated hex bytes without the prompt; the link adds `\r\r>`.

use crate::config::IdentityConfig;
use crate::constants::obd;
use crate::telemetry::Telemetry;
use tracing::debug;

/// Mode 01 PIDs answered with live data
const SUPPORTED_PIDS: [u8; 4] = [
    obd::COOLANT_TEMP,
    obd::ENGINE_RPM,
    obd::VEHICLE_SPEED,
    obd::TRANSMISSION_GEAR,
];

/// Mode 01 "supported PIDs" ranges answered with a bitmap
const BITMAP_PIDS: [u8; 6] = [
    obd::SUPPORTED_01_20,
    obd::SUPPORTED_21_40,
    obd::SUPPORTED_41_60,
    obd::SUPPORTED_61_80,
    obd::SUPPORTED_81_A0,
    obd::SUPPORTED_A1_C0,
];

/// Custom mode used for logger values
const MODE_CUSTOM: u8 = 0x10;

/// PID byte every custom-mode answer carries
const CUSTOM_RESPONSE_PID: u8 = 0x02;

const NO_DATA: &str = "NO DATA";
const OK: &str = "OK";
const UNKNOWN: &str = "?";

/// Format bytes as space-separated hex
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Supported-PID bitmap for `base + 1 ..= base + 0x20`
///
/// The last bit announces the next range when anything above it is supported.
fn supported_bitmap(base: u8) -> [u8; 4] {
    let mut bits: u32 = 0;
    for &pid in &SUPPORTED_PIDS {
        let offset = pid as i32 - base as i32;
        if (1..=32).contains(&offset) {
            bits |= 1 << (32 - offset);
        }
    }
    if SUPPORTED_PIDS.iter().any(|&pid| pid as u32 > base as u32 + 0x20) {
        bits |= 1;
    }
    bits.to_be_bytes()
}

/// ASCII bytes padded with leading zeros to a multiple of four
fn vin_bytes(vin: &str) -> Vec<u8> {
    let text = vin.as_bytes();
    let padding = (4 - text.len() % 4) % 4;
    let mut bytes = vec![0u8; padding];
    bytes.extend_from_slice(text);
    bytes
}

/// ASCII bytes padded with trailing zeros to `min` and to a multiple of four
fn padded_ascii(text: &str, min: usize, max: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.bytes().take(max).collect();
    let target = bytes.len().max(min).div_ceil(4) * 4;
    bytes.resize(target.min(max), 0);
    bytes
}

pub struct ElmInterpreter {
    identity: IdentityConfig,
    headers: bool,
}

impl ElmInterpreter {
    pub fn new(identity: IdentityConfig) -> Self {
        Self {
            identity,
            headers: false,
        }
    }

    pub fn headers(&self) -> bool {
        self.headers
    }

    /// Answer one query; `None` for blank input
    pub fn respond(&mut self, query: &str, telemetry: &Telemetry) -> Option<String> {
        let compact: String = query
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        if compact.is_empty() {
            return None;
        }

        let response = if compact.starts_with("AT") {
            self.at_command(&compact[2..])
        } else {
            self.obd_request(&compact, telemetry)
        };

        debug!("ELM {} -> {}", compact, response);
        Some(response)
    }

    fn at_command(&mut self, command: &str) -> String {
        match command {
            "I" | "@1" => obd::ELM_VERSION.to_string(),
            "Z" => {
                self.headers = false;
                OK.to_string()
            }
            "H0" => {
                self.headers = false;
                OK.to_string()
            }
            "H1" => {
                self.headers = true;
                OK.to_string()
            }
            "DPN" => obd::PROTOCOL_NUMBER.to_string(),
            "E0" | "E1" | "D" | "PC" | "M0" | "L0" | "L1" | "S0" | "S1" => OK.to_string(),
            c if c.starts_with("ST") || c.starts_with("SP") || c.starts_with("AT") => OK.to_string(),
            _ => UNKNOWN.to_string(),
        }
    }

    fn obd_request(&self, request: &str, telemetry: &Telemetry) -> String {
        // "010C1": trailing digit is the expected response count
        let request = match request.as_bytes() {
            [m0, m1, p0, p1] | [m0, m1, p0, p1, _] => [*m0, *m1, *p0, *p1],
            _ => return UNKNOWN.to_string(),
        };

        let (Some(mode), Some(pid)) = (
            parse_hex_byte(&request[..2]),
            parse_hex_byte(&request[2..]),
        ) else {
            return UNKNOWN.to_string();
        };

        let data = match mode {
            obd::MODE_CURRENT_DATA => self.current_data(pid, telemetry),
            obd::MODE_VEHICLE_INFO => self.vehicle_info(pid),
            MODE_CUSTOM => self.custom(pid, telemetry),
            _ => None,
        };

        let Some(data) = data else {
            return NO_DATA.to_string();
        };

        let response_pid = if mode == MODE_CUSTOM {
            CUSTOM_RESPONSE_PID
        } else {
            pid
        };
        let mut bytes = vec![response_mode(mode), response_pid];
        bytes.extend_from_slice(&data);

        if self.headers && mode != obd::MODE_VEHICLE_INFO {
            format!("{} {:02X} {}", obd::ECU_HEADER, bytes.len(), hex_bytes(&bytes))
        } else {
            hex_bytes(&bytes)
        }
    }

    fn current_data(&self, pid: u8, telemetry: &Telemetry) -> Option<Vec<u8>> {
        if BITMAP_PIDS.contains(&pid) {
            return Some(supported_bitmap(pid).to_vec());
        }

        match pid {
            obd::COOLANT_TEMP => {
                let raw = (telemetry.coolant_temp + obd::COOLANT_BIAS).clamp(0, 255);
                Some(vec![raw as u8])
            }
            obd::ENGINE_RPM => {
                let raw = (telemetry.rpm as u32 * obd::RPM_SCALE).min(u16::MAX as u32) as u16;
                Some(raw.to_be_bytes().to_vec())
            }
            obd::VEHICLE_SPEED => Some(vec![telemetry.speed.min(255) as u8]),
            obd::TRANSMISSION_GEAR => Some(vec![telemetry.gear]),
            _ => None,
        }
    }

    fn vehicle_info(&self, pid: u8) -> Option<Vec<u8>> {
        match pid {
            obd::VIN => Some(vin_bytes(&self.identity.vin)),
            obd::CALIBRATION_ID => Some(padded_ascii(&self.identity.calibration_id, 4, 16)),
            obd::ECU_NAME => Some(padded_ascii(&self.identity.ecu_name, 20, 20)),
            _ => None,
        }
    }

    /// Logger values, reported in the mode 01 PID 02 shape apps already parse
    fn custom(&self, pid: u8, telemetry: &Telemetry) -> Option<Vec<u8>> {
        let health = &telemetry.health;
        match pid {
            0x01 => Some(vec![telemetry.error_code]),
            0x02 => Some(vec![health.mcu_temp_c]),
            0x03 => Some(vec![health.cpu_mhz]),
            0x04 => Some(vec![health.free_ram_kb]),
            0x05 => Some(vec![telemetry.max_speed.min(255) as u8]),
            0x06 => Some(health.uptime_s.to_be_bytes().to_vec()),
            _ => None,
        }
    }
}

/// Two ASCII hex digits; `None` for anything else
fn parse_hex_byte(digits: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(digits).ok()?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}

fn response_mode(mode: u8) -> u8 {
    match mode {
        MODE_CUSTOM => obd::MODE_CURRENT_DATA + obd::POSITIVE_RESPONSE_OFFSET,
        m => m + obd::POSITIVE_RESPONSE_OFFSET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::DeviceHealth;

    fn interpreter() -> ElmInterpreter {
        ElmInterpreter::new(IdentityConfig::default())
    }

    fn telemetry() -> Telemetry {
        let mut t = Telemetry::new();
        t.rpm = 2000;
        t.speed = 48;
        t.coolant_temp = 85;
        t.error_code = 12;
        t.gear = 3;
        t.max_speed = 300;
        t.health = DeviceHealth {
            mcu_temp_c: 41,
            cpu_mhz: 240,
            free_ram_kb: 180,
            uptime_s: 0x0102,
        };
        t
    }

    #[test]
    fn test_at_commands() {
        let mut elm = interpreter();
        let t = Telemetry::default();
        assert_eq!(elm.respond("ATI", &t).unwrap(), "ELM327 v2.1");
        assert_eq!(elm.respond("at@1", &t).unwrap(), "ELM327 v2.1");
        assert_eq!(elm.respond("ATZ", &t).unwrap(), "OK");
        assert_eq!(elm.respond("AT E0", &t).unwrap(), "OK");
        assert_eq!(elm.respond("ATSP6", &t).unwrap(), "OK");
        assert_eq!(elm.respond("ATST62", &t).unwrap(), "OK");
        assert_eq!(elm.respond("ATAT2", &t).unwrap(), "OK");
        assert_eq!(elm.respond("ATDPN", &t).unwrap(), "6");
        assert_eq!(elm.respond("ATMA", &t).unwrap(), "?");
    }

    #[test]
    fn test_blank_query_ignored() {
        let mut elm = interpreter();
        assert_eq!(elm.respond("  \r", &Telemetry::default()), None);
    }

    #[test]
    fn test_supported_pid_bitmaps() {
        let mut elm = interpreter();
        let t = Telemetry::default();
        assert_eq!(elm.respond("0100", &t).unwrap(), "41 00 08 18 00 01");
        assert_eq!(elm.respond("0120", &t).unwrap(), "41 20 00 00 00 01");
        assert_eq!(elm.respond("0160", &t).unwrap(), "41 60 00 00 00 01");
        assert_eq!(elm.respond("0180", &t).unwrap(), "41 80 00 00 00 01");
        assert_eq!(elm.respond("01A0", &t).unwrap(), "41 A0 10 00 00 00");
        assert_eq!(elm.respond("01C0", &t).unwrap(), "NO DATA");
    }

    #[test]
    fn test_live_pids() {
        let mut elm = interpreter();
        let t = telemetry();
        // 85 + 40 = 125
        assert_eq!(elm.respond("0105", &t).unwrap(), "41 05 7D");
        // 2000 * 4 = 8000
        assert_eq!(elm.respond("010C", &t).unwrap(), "41 0C 1F 40");
        assert_eq!(elm.respond("010D", &t).unwrap(), "41 0D 30");
        assert_eq!(elm.respond("01A4", &t).unwrap(), "41 A4 03");
    }

    #[test]
    fn test_response_count_suffix() {
        let mut elm = interpreter();
        let t = telemetry();
        assert_eq!(elm.respond("010C 1", &t).unwrap(), "41 0C 1F 40");
        assert_eq!(elm.respond("010D1", &t).unwrap(), "41 0D 30");
    }

    #[test]
    fn test_value_clamping() {
        let mut elm = interpreter();
        let mut t = Telemetry::new();
        t.speed = 400;
        t.coolant_temp = -60;
        assert_eq!(elm.respond("010D", &t).unwrap(), "41 0D FF");
        assert_eq!(elm.respond("0105", &t).unwrap(), "41 05 00");
    }

    #[test]
    fn test_unsupported_pid() {
        let mut elm = interpreter();
        let t = Telemetry::default();
        assert_eq!(elm.respond("0111", &t).unwrap(), "NO DATA");
        assert_eq!(elm.respond("0300", &t).unwrap(), "NO DATA");
        assert_eq!(elm.respond("01ZZ", &t).unwrap(), "?");
        assert_eq!(elm.respond("01", &t).unwrap(), "?");
    }

    #[test]
    fn test_non_ascii_query_rejected() {
        let mut elm = interpreter();
        let t = telemetry();
        let garbled = String::from_utf8_lossy(b"01\xFF").into_owned();
        assert_eq!(elm.respond(&garbled, &t).unwrap(), "?");
        let garbled = String::from_utf8_lossy(b"0\xFF").into_owned();
        assert_eq!(elm.respond(&garbled, &t).unwrap(), "?");
        assert_eq!(elm.respond("0\u{e9}0C", &t).unwrap(), "?");
        assert_eq!(elm.respond("AT\u{e9}", &t).unwrap(), "?");
        // Sign prefixes are not hex digits
        assert_eq!(elm.respond("+10C", &t).unwrap(), "?");
    }

    #[test]
    fn test_vehicle_info() {
        let mut elm = interpreter();
        let t = Telemetry::default();
        assert_eq!(
            elm.respond("0902", &t).unwrap(),
            "49 02 00 00 59 41 4D 41 48 41 45 53 50 33 32 4F 44 42"
        );
        assert_eq!(elm.respond("0904", &t).unwrap(), "49 04 00 00 00 00");
        assert_eq!(
            elm.respond("090A", &t).unwrap(),
            "49 0A 45 53 50 33 32 37 45 6D 75 6C 61 74 6F 72 00 00 00 00 00 00"
        );
    }

    #[test]
    fn test_custom_pids() {
        let mut elm = interpreter();
        let t = telemetry();
        assert_eq!(elm.respond("1001", &t).unwrap(), "41 02 0C");
        assert_eq!(elm.respond("1002", &t).unwrap(), "41 02 29");
        assert_eq!(elm.respond("1003 1", &t).unwrap(), "41 02 F0");
        assert_eq!(elm.respond("1004", &t).unwrap(), "41 02 B4");
        assert_eq!(elm.respond("1005", &t).unwrap(), "41 02 FF");
        assert_eq!(elm.respond("1006", &t).unwrap(), "41 02 01 02");
        assert_eq!(elm.respond("1007", &t).unwrap(), "NO DATA");
    }

    #[test]
    fn test_headers() {
        let mut elm = interpreter();
        let t = telemetry();
        assert_eq!(elm.respond("ATH1", &t).unwrap(), "OK");
        assert!(elm.headers());
        assert_eq!(elm.respond("010C", &t).unwrap(), "7E8 04 41 0C 1F 40");
        assert_eq!(elm.respond("01A4", &t).unwrap(), "7E8 03 41 A4 03");

        elm.respond("ATZ", &t);
        assert!(!elm.headers());
        assert_eq!(elm.respond("01A4", &t).unwrap(), "41 A4 03");
    }
}
