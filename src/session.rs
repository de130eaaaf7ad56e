//! Raw access to the cartridge's bulk endpoints.

use crate::error::{Error, Result};
use crate::TIMEOUT;
use rusb::{DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Fixed waits the cartridge firmware needs between bus operations. These are part of the
/// device's timing contract and are not retries.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Delay {
    /// Between sending a command and reading its response.
    Settle,

    /// Between two consecutive ROM info requests while listing the catalog.
    CatalogEntry,

    /// Before the serial ID request that follows a device info request.
    SerialQuery,
}

impl Delay {
    pub const fn duration(self) -> Duration {
        match self {
            Delay::Settle => Duration::from_millis(10),
            Delay::CatalogEntry => Duration::from_millis(10),
            Delay::SerialQuery => Duration::from_millis(50),
        }
    }
}

/// A byte pipe to the cartridge: one bulk OUT and one bulk IN endpoint.
pub trait Session {
    /// Writes a complete command frame. Fails unless the whole frame was transferred.
    fn send(&mut self, frame: &[u8]) -> Result<usize>;

    /// Reads one response into `buffer` and returns its length. A timeout yields `Ok(0)`.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Blocks for the given delay.
    fn pause(&mut self, delay: Delay) {
        std::thread::sleep(delay.duration());
    }
}

/// Bulk endpoint addresses of the cartridge's vendor interface.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Endpoints {
    pub bulk_in: u8,
    pub bulk_out: u8,
}

/// A claimed cartridge interface. The interface is released when the session is dropped.
pub struct UsbSession<T: UsbContext> {
    handle: DeviceHandle<T>,
    endpoints: Endpoints,
    interface: u8,
}

impl<T: UsbContext> UsbSession<T> {
    /// Wraps a handle whose `interface` has already been claimed.
    pub(crate) fn new(handle: DeviceHandle<T>, endpoints: Endpoints, interface: u8) -> Self {
        Self {
            handle,
            endpoints,
            interface,
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }
}

impl<T: UsbContext> Session for UsbSession<T> {
    fn send(&mut self, frame: &[u8]) -> Result<usize> {
        trace!(bytes = hex::encode(frame), "USB write");
        match self
            .handle
            .write_bulk(self.endpoints.bulk_out, frame, TIMEOUT)
        {
            Ok(written) if written == frame.len() => Ok(written),
            Ok(written) => Err(Error::IncompleteWrite {
                written,
                expected: frame.len(),
            }),
            Err(rusb::Error::Timeout) => Err(Error::Timeout),
            Err(error) => Err(Error::Transport(error)),
        }
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.handle.read_bulk(self.endpoints.bulk_in, buffer, TIMEOUT) {
            Ok(read) => {
                trace!(bytes = hex::encode(&buffer[..read]), "USB read");
                Ok(read)
            }
            Err(rusb::Error::Timeout) => {
                debug!("USB read timed out");
                Ok(0)
            }
            Err(error) => Err(Error::Transport(error)),
        }
    }
}

impl<T: UsbContext> Drop for UsbSession<T> {
    fn drop(&mut self) {
        if let Err(error) = self.handle.release_interface(self.interface) {
            warn!(interface = self.interface, %error, "Failed to release interface");
        }
    }
}
