//! TCP link for phone apps
//!
//! Stands in for the BLE UART of the logger hardware. Each channel is a
//! listener accepting one client at a time; everything is non-blocking so the
//! bridge can be polled from the same loop as the gateway.
//!
//! ```text
//! :35000  ELM327 channel   query\r      -> response\r\r>
//! :35001  console channel  COMMAND\n    -> notification\n
//! ```

use crate::config::LinkConfig;
use crate::constants::link::{ELM_PROMPT, MAX_LINE_LEN};
use crate::transport::{Inbound, Outbound, QueueTransport};
use anyhow::{Context, Result};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// One listening channel and its connected client
struct Endpoint {
    name: &'static str,
    listener: TcpListener,
    client: Option<(TcpStream, SocketAddr)>,
    line: Vec<u8>,
    inbound: Inbound,
    outbound: Outbound,
    terminator: &'static str,
}

impl Endpoint {
    fn bind(
        name: &'static str,
        address: &str,
        port: u16,
        inbound: Inbound,
        outbound: Outbound,
        terminator: &'static str,
    ) -> Result<Self> {
        let listener = TcpListener::bind((address, port))
            .with_context(|| format!("Failed to bind {} channel on {}:{}", name, address, port))?;
        listener.set_nonblocking(true)?;
        info!("{} channel listening on {}:{}", name, address, port);

        Ok(Self {
            name,
            listener,
            client: None,
            line: Vec::with_capacity(MAX_LINE_LEN),
            inbound,
            outbound,
            terminator,
        })
    }

    fn local_port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    fn accept(&mut self) -> bool {
        if self.client.is_some() {
            return false;
        }

        match self.listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!("{}: failed to configure {}: {}", self.name, addr, e);
                    return false;
                }
                let _ = stream.set_nodelay(true);
                info!("{}: client connected from {}", self.name, addr);
                self.line.clear();
                self.client = Some((stream, addr));
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!("{}: accept failed: {}", self.name, e);
                false
            }
        }
    }

    fn disconnect(&mut self, reason: &str) {
        if let Some((_, addr)) = self.client.take() {
            info!("{}: client {} disconnected ({})", self.name, addr, reason);
        }
        self.line.clear();
    }

    /// Read whatever the client sent and queue complete lines
    fn receive(&mut self, transport: &mut QueueTransport) -> bool {
        let Some((stream, _)) = self.client.as_mut() else {
            return false;
        };

        let mut buffer = [0u8; MAX_LINE_LEN];
        let n = match stream.read(&mut buffer) {
            Ok(0) => {
                self.disconnect("closed");
                return false;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(e) => {
                self.disconnect(&e.to_string());
                return false;
            }
        };

        for &byte in &buffer[..n] {
            match byte {
                b'\r' | b'\n' => {
                    if !self.line.is_empty() {
                        let text = String::from_utf8_lossy(&self.line).into_owned();
                        debug!("{}: <- {}", self.name, text);
                        transport.push_inbound(self.inbound, text);
                        self.line.clear();
                    }
                }
                _ if self.line.len() < MAX_LINE_LEN => self.line.push(byte),
                // Overlong line, drop the excess
                _ => {}
            }
        }
        true
    }

    /// Write one queued message to the client
    fn send(&mut self, transport: &mut QueueTransport) -> bool {
        let Some((stream, _)) = self.client.as_mut() else {
            return false;
        };
        let Some(text) = transport.pop_outbound(self.outbound) else {
            return false;
        };

        let mut payload = text.into_bytes();
        payload.extend_from_slice(self.terminator.as_bytes());

        if let Err(e) = stream.write_all(&payload) {
            warn!("{}: write failed, message dropped: {}", self.name, e);
            self.disconnect(&e.to_string());
        }
        true
    }

    fn poll(&mut self, transport: &mut QueueTransport) -> bool {
        let accepted = self.accept();
        let received = self.receive(transport);
        let sent = self.send(transport);
        accepted || received || sent
    }
}

/// Both client channels
pub struct TcpBridge {
    elm: Endpoint,
    console: Endpoint,
}

impl TcpBridge {
    pub fn bind(config: &LinkConfig) -> Result<Self> {
        let elm = Endpoint::bind(
            "ELM",
            &config.bind_address,
            config.elm_port,
            Inbound::Elm,
            Outbound::Elm,
            ELM_PROMPT,
        )?;
        let console = Endpoint::bind(
            "Console",
            &config.bind_address,
            config.console_port,
            Inbound::Console,
            Outbound::Console,
            "",
        )?;
        Ok(Self { elm, console })
    }

    /// Actual (ELM, console) ports, useful when binding port 0
    pub fn ports(&self) -> io::Result<(u16, u16)> {
        Ok((self.elm.local_port()?, self.console.local_port()?))
    }

    /// Accept, read and write once on each channel; true if anything moved
    pub fn poll(&mut self, transport: &mut QueueTransport) -> bool {
        let elm = self.elm.poll(transport);
        let console = self.console.poll(transport);
        elm || console
    }

    /// Push out queued console messages before a restart
    pub fn flush(&mut self, transport: &mut QueueTransport) {
        while transport.pending(Outbound::Console) > 0 {
            if !self.console.send(transport) {
                break;
            }
        }
    }
}
