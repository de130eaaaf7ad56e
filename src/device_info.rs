//! Contains data structures for the identity the cartridge reports back to the connecting PC.

use crate::command::Command;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::session::Session;
use std::fmt;

const DEVICE_INFO_CAPACITY: usize = 15;
const DEVICE_INFO_MIN_LENGTH: usize = 11;
const SERIAL_ID_CAPACITY: usize = 10;
const SERIAL_ID_LENGTH: usize = 8;

/// Hardware and firmware information read back from the cartridge.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceInfo {
    /// Feature level of the firmware protocol.
    pub feature_step: u8,

    pub hardware_version: u8,

    /// Cartridge firmware version.
    pub firmware_version: FirmwareVersion,

    /// Short hash of the commit the firmware was built from.
    pub build_id: u32,

    /// Whether the firmware was built from a tree with uncommitted changes.
    pub dirty: bool,
}

impl DeviceInfo {
    /// Decodes the response to [`Command::DeviceInfo`].
    pub fn decode(response: &[u8]) -> Result<Self> {
        if response.len() < DEVICE_INFO_MIN_LENGTH {
            return Err(Error::ShortResponse {
                opcode: Command::DeviceInfo.into(),
                expected: DEVICE_INFO_MIN_LENGTH,
                actual: response.len(),
            });
        }

        Ok(DeviceInfo {
            feature_step: response[0],
            hardware_version: response[1],
            firmware_version: FirmwareVersion {
                major: response[2],
                minor: response[3],
                patch: response[4],
                suffix: response[5],
            },
            build_id: u32::from_be_bytes([response[6], response[7], response[8], response[9]]),
            dirty: response[10] != 0,
        })
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Feature step: {}", self.feature_step)?;
        writeln!(f, "Hardware version: {}", self.hardware_version)?;
        writeln!(f, "Firmware version: {}", self.firmware_version)?;
        writeln!(f, "Firmware build: 0x{:08x}", self.build_id)?;
        write!(f, "Dirty build: {}", if self.dirty { "yes" } else { "no" })
    }
}

/// Represents a firmware version with a trailing letter, e.g. `1.2.0a`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,

    /// ASCII suffix character. Not printed unless it is a graphic character.
    pub suffix: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.suffix.is_ascii_graphic() {
            write!(f, "{}", self.suffix as char)?;
        }
        Ok(())
    }
}

/// Unique identifier of the cartridge's microcontroller.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SerialId(pub [u8; SERIAL_ID_LENGTH]);

impl SerialId {
    /// Decodes the response to [`Command::SerialId`].
    pub fn decode(response: &[u8]) -> Result<Self> {
        if response.len() < SERIAL_ID_LENGTH {
            return Err(Error::ShortResponse {
                opcode: Command::SerialId.into(),
                expected: SERIAL_ID_LENGTH,
                actual: response.len(),
            });
        }

        let mut id = [0u8; SERIAL_ID_LENGTH];
        id.copy_from_slice(&response[..SERIAL_ID_LENGTH]);
        Ok(SerialId(id))
    }
}

impl fmt::Display for SerialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// Device info together with the serial ID, if the cartridge reported one.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Identity {
    pub info: DeviceInfo,
    pub serial: Option<SerialId>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info)?;
        if let Some(serial) = &self.serial {
            write!(f, "\nSerial ID: {}", serial)?;
        }
        Ok(())
    }
}

pub(crate) fn query_device_info<S: Session>(engine: &mut Engine<S>) -> Result<DeviceInfo> {
    let response = engine.execute(Command::DeviceInfo, &[], DEVICE_INFO_CAPACITY)?;
    DeviceInfo::decode(&response)
}

pub(crate) fn query_serial_id<S: Session>(engine: &mut Engine<S>) -> Result<SerialId> {
    let response = engine.execute(Command::SerialId, &[], SERIAL_ID_CAPACITY)?;
    SerialId::decode(&response)
}
