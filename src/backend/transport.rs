//! Transport trait for the instrument link
//!
//! This module provides a common trait for byte transports to the VNA,
//! enabling the real serial port and simulated transports for testing.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default read timeout for the instrument link
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Default baud rate (the NanoVNA is a USB CDC device and ignores it)
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// USB vendor/product IDs of supported VNA devices
pub const KNOWN_DEVICES: &[(u16, u16, &str)] = &[
    (0x0483, 0x5740, "NanoVNA"),
    (0x04b4, 0x0008, "S-A-A-2"),
];

/// Byte transport to the instrument
///
/// Implementations must be `Send` so the transport can live behind the
/// session guard and be used from the worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Port name or other identifier (for logging)
    fn identifier(&self) -> String;

    /// Open the link with the given read timeout
    fn open(&mut self, timeout: Duration) -> io::Result<()>;

    /// Close the link; closing a closed transport is a no-op
    fn close(&mut self);

    /// Check if the link is open
    fn is_open(&self) -> bool;

    /// Discard buffered but unread input and pending output
    fn flush_buffers(&mut self) -> io::Result<()>;

    /// Write all bytes
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read available bytes, returning how many were read
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// A transport behind the session-scoped exclusion guard
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Creates transports by identifier
pub trait TransportFactory: Send + Sync {
    /// Create a closed transport for the identifier
    fn create(&self, identifier: &str) -> Box<dyn Transport>;
}

#[cfg(feature = "serial")]
pub use serial::{discover_ports, SerialTransport, SerialTransportFactory};

#[cfg(feature = "serial")]
mod serial {
    use super::{Transport, TransportFactory, KNOWN_DEVICES};
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// Serial port transport backed by the `serialport` crate
    pub struct SerialTransport {
        port_name: String,
        baud_rate: u32,
        port: Option<Box<dyn serialport::SerialPort>>,
    }

    impl SerialTransport {
        /// Create a closed serial transport
        pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                port_name: port_name.into(),
                baud_rate,
                port: None,
            }
        }

        fn port_mut(&mut self) -> io::Result<&mut Box<dyn serialport::SerialPort>> {
            self.port
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port not open"))
        }
    }

    impl Transport for SerialTransport {
        fn identifier(&self) -> String {
            self.port_name.clone()
        }

        fn open(&mut self, timeout: Duration) -> io::Result<()> {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(timeout)
                .flow_control(serialport::FlowControl::None)
                .open()?;
            self.port = Some(port);
            Ok(())
        }

        fn close(&mut self) {
            self.port.take();
        }

        fn is_open(&self) -> bool {
            self.port.is_some()
        }

        fn flush_buffers(&mut self) -> io::Result<()> {
            self.port_mut()?.clear(serialport::ClearBuffer::All)?;
            Ok(())
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let port = self.port_mut()?;
            port.write_all(data)?;
            port.flush()
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.port_mut()?.read(buf)
        }
    }

    /// Factory producing [`SerialTransport`]s at a fixed baud rate
    #[derive(Debug, Clone)]
    pub struct SerialTransportFactory {
        baud_rate: u32,
    }

    impl SerialTransportFactory {
        /// Create a factory
        pub fn new(baud_rate: u32) -> Self {
            Self { baud_rate }
        }
    }

    impl TransportFactory for SerialTransportFactory {
        fn create(&self, identifier: &str) -> Box<dyn Transport> {
            Box::new(SerialTransport::new(identifier, self.baud_rate))
        }
    }

    /// List serial ports that look like a supported VNA
    pub fn discover_ports() -> Vec<String> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("Serial port enumeration failed: {}", e);
                return Vec::new();
            }
        };

        ports
            .into_iter()
            .filter_map(|port| match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => KNOWN_DEVICES
                    .iter()
                    .find(|(vid, pid, _)| *vid == usb.vid && *pid == usb.pid)
                    .map(|(_, _, name)| {
                        tracing::debug!("Found {} on {}", name, port.port_name);
                        port.port_name.clone()
                    }),
                _ => None,
            })
            .collect()
    }
}
