//! Bus byte sources
//!
//! The gateway pulls one byte per tick through [`ByteSource`]. On the host the
//! bytes come from the L9637D transceiver behind a USB serial adapter; in
//! tests they come from a `VecDeque<u8>`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Duration;
use tracing::info;

/// Non-blocking source of bus bytes
pub trait ByteSource {
    /// Next byte if one is available right now
    fn try_read_byte(&mut self) -> io::Result<Option<u8>>;
}

impl ByteSource for VecDeque<u8> {
    fn try_read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.pop_front())
    }
}

/// Information about a serial port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl PortInfo {
    /// One-line summary, e.g. `/dev/ttyUSB0 (USB 0403:6001 FT232R USB UART)`
    pub fn describe(&self) -> String {
        let mut details = self.port_type.clone();
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            details.push_str(&format!(" {:04X}:{:04X}", vid, pid));
        }
        if let Some(product) = &self.product {
            details.push(' ');
            details.push_str(product);
        }
        format!("{} ({})", self.name, details)
    }
}

/// List all available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = available_ports().context("Failed to list ports")?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (port_type, vid, pid, product) = match &p.port_type {
                SerialPortType::UsbPort(usb) => {
                    ("USB".to_string(), Some(usb.vid), Some(usb.pid), usb.product.clone())
                }
                SerialPortType::PciPort => ("PCI".to_string(), None, None, None),
                SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None),
                SerialPortType::Unknown => ("Unknown".to_string(), None, None, None),
            };

            PortInfo {
                name: p.port_name,
                port_type,
                vid,
                pid,
                product,
            }
        })
        .collect())
}

/// Serial port feeding the bus decoder
pub struct SerialBus {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    pending: VecDeque<u8>,
}

impl SerialBus {
    /// Open the port 8N1 without flow control
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(10))
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .with_context(|| format!("Failed to open port {}", port_name))?;

        info!("Connected to {} at {} baud", port_name, baud_rate);

        Ok(Self {
            port,
            name: port_name.to_string(),
            pending: VecDeque::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Move whatever the driver has buffered into `pending`
    fn read_available(&mut self) -> io::Result<()> {
        let bytes_to_read = self.port.bytes_to_read().map_err(io::Error::from)?;
        if bytes_to_read == 0 {
            return Ok(());
        }

        let mut buffer = vec![0u8; bytes_to_read as usize];
        let bytes_read = match self.port.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e),
        };

        self.pending.extend(&buffer[..bytes_read]);
        Ok(())
    }
}

impl ByteSource for SerialBus {
    fn try_read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pending.is_empty() {
            self.read_available()?;
        }
        Ok(self.pending.pop_front())
    }
}
