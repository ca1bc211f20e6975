//! Operator console commands
//!
//! Plain-text commands typed into the console channel of the phone app.
//! Matching is case-insensitive and ignores surrounding whitespace.

/// Console echo mode; only one is active at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    #[default]
    Off,
    /// Echo inbound ELM queries
    Rx,
    /// Echo outbound ELM responses
    Tx,
    /// Dump telemetry on every housekeeping pass
    Pids,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Menu,
    Debug(DebugMode),
    /// Enable bike-off detection
    BikeOn,
    /// Disable bike-off detection
    BikeOff,
    GearsOn,
    GearsOff,
    RatioReset,
    Ratios,
    Status,
    Restart,
    Unknown(String),
}

impl Command {
    /// Parse one console line; `None` for blank input
    pub fn parse(line: &str) -> Option<Command> {
        let text = line.trim().to_ascii_uppercase();
        if text.is_empty() {
            return None;
        }

        // Collapse runs of spaces so "DEBUG  RX" still matches
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

        let command = match normalized.as_str() {
            "MENU" => Command::Menu,
            "DEBUG OFF" | "DEBUG 0" => Command::Debug(DebugMode::Off),
            "DEBUG RX" => Command::Debug(DebugMode::Rx),
            "DEBUG TX" => Command::Debug(DebugMode::Tx),
            "DEBUG PID" | "DEBUG PIDS" => Command::Debug(DebugMode::Pids),
            "BIKE ON" => Command::BikeOn,
            "BIKE OFF" => Command::BikeOff,
            "GEARS" | "GEAR LEARN" => Command::GearsOn,
            "GEARS OFF" => Command::GearsOff,
            "RATIO RESET" => Command::RatioReset,
            "RATIOS" => Command::Ratios,
            "STATUS" => Command::Status,
            "RESET" => Command::Restart,
            _ => Command::Unknown(line.trim().to_string()),
        };

        Some(command)
    }

    /// Acknowledgement sent before the command runs
    pub fn acknowledgement(&self) -> Option<&'static str> {
        let text = match self {
            Command::Debug(DebugMode::Off) => "Debug Off",
            Command::Debug(DebugMode::Rx) => "Debug RX",
            Command::Debug(DebugMode::Tx) => "Debug TX",
            Command::Debug(DebugMode::Pids) => "Debug PIDS",
            Command::BikeOn => "Bike timer enabled",
            Command::BikeOff => "Bike timer disabled",
            Command::GearsOn => "GEARS",
            Command::GearsOff => "GEARS OFF",
            Command::RatioReset => "Ratio reset",
            Command::Restart => "Bye!",
            Command::Menu | Command::Ratios | Command::Status | Command::Unknown(_) => return None,
        };
        Some(text)
    }
}

/// Command list printed by MENU and on connect
pub const MENU: &[&str] = &[
    "**** Yamaha Datalogger ****",
    "Enter a command:",
    "",
    "**** Gear Ratio Control ****",
    "Start the learn process whilst riding in first gear",
    "Ratios - Display stored gear ratios",
    "Ratio Reset - Wipe all saved gear ratios and start training. WARNING!!",
    "Gears - Start gear training",
    "Gears Off - Stop gear training",
    "",
    "**** Debug Functions ****",
    "Debug Off - Turn off debug output",
    "Debug Rx - Echo received ELM queries",
    "Debug Tx - Echo transmitted ELM responses",
    "Debug Pid - Dump live values",
    "Bike On - Enable bike-off timer",
    "Bike Off - Disable bike-off timer, state is kept when the bus is silent",
    "Status - Show session state",
    "Menu - Print a list of all commands",
    "Reset - Restart the logger",
];
