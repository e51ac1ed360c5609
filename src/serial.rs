use crate::config::StartupError;
use pixelpen_common::{Transport, TransportError};
use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use std::{
    io::{self, Write},
    thread,
    time::{Duration, Instant},
};

const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const GREETING_WINDOW: Duration = Duration::from_millis(500);
const GREETING_POLL: Duration = Duration::from_millis(50);

const NAME_HINTS: &[&str] = &["ttyacm", "ttyusb", "cu.usbmodem", "cu.usbserial"];
const USB_HINTS: &[&str] = &["arduino", "wch", "ch340", "usb serial", "cp210x", "ftdi"];

fn looks_like_a_board(info: &SerialPortInfo) -> bool {
    let name = info.port_name.to_lowercase();
    if NAME_HINTS.iter().any(|hint| name.contains(hint)) {
        return true;
    }

    match &info.port_type {
        SerialPortType::UsbPort(usb) => [usb.manufacturer.as_deref(), usb.product.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_lowercase)
            .any(|text| USB_HINTS.iter().any(|hint| text.contains(hint))),
        _ => false,
    }
}

/// First port that looks like a microcontroller on USB.
pub fn detect_port() -> Result<String, StartupError> {
    let mut ports = serialport::available_ports().unwrap_or_else(|error| {
        warn!(%error, "listing serial ports failed");
        Vec::new()
    });

    for port in &ports {
        debug!(port = %port.port_name, kind = ?port.port_type, "found serial port");
    }

    match ports.iter().position(looks_like_a_board) {
        Some(idx) => Ok(ports.swap_remove(idx).port_name),
        None => Err(StartupError::NoSerialPort {
            detected: ports.into_iter().map(|port| port.port_name).collect(),
        }),
    }
}

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open the port and wait out the board reset that opening it triggers.
    pub fn open(name: &str, baud: u32, reset_delay: Duration) -> Result<Self, StartupError> {
        let mut port = serialport::new(name, baud)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|source| StartupError::OpenSerial {
                port: name.to_owned(),
                source,
            })?;

        info!(port = name, baud, "serial port open, waiting for board reset");
        thread::sleep(reset_delay);
        if let Err(error) = port.clear(ClearBuffer::Input) {
            warn!(%error, "clearing serial input failed");
        }
        drain_greeting(port.as_mut());

        Ok(Self {
            port: Some(port),
            name: name.to_owned(),
        })
    }
}

/// Log whatever the firmware prints on boot.
fn drain_greeting(port: &mut dyn SerialPort) {
    if let Err(error) = port.set_timeout(GREETING_POLL) {
        warn!(%error, "could not shorten serial timeout");
        return;
    }

    let started = Instant::now();
    let mut greeting = Vec::new();
    let mut buf = [0; 256];
    while started.elapsed() < GREETING_WINDOW {
        match port.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => greeting.extend_from_slice(&buf[..n]),
            Err(error) if error.kind() == io::ErrorKind::TimedOut => break,
            Err(error) => {
                debug!(%error, "greeting read failed");
                break;
            }
        }
    }

    for line in String::from_utf8_lossy(&greeting).lines() {
        let line = line.trim();
        if !line.is_empty() {
            info!(line, "board says");
        }
    }

    if let Err(error) = port.set_timeout(WRITE_TIMEOUT) {
        warn!(%error, "could not restore serial timeout");
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut port) = self.port.take() {
            port.flush()?;
            info!(port = %self.name, "serial port closed");
        }
        Ok(())
    }

    fn label(&self) -> &str {
        &self.name
    }
}
