use crate::error::{Error, Result};
use crate::transfer::BankChunkAddress;

/// Largest payload that fits in a command frame behind the command byte.
pub const MAX_PAYLOAD_LENGTH: usize = 64;

/// Largest command frame: the command byte plus the payload.
pub const MAX_FRAME_LENGTH: usize = MAX_PAYLOAD_LENGTH + 1;

/// Size of the receive window for a single response, echo byte included.
pub const MAX_RESPONSE_LENGTH: usize = 128;

/// Commands understood by the cartridge firmware. Every response starts with the command byte
/// echoed back.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
    RomUtilization = 0x01,
    RequestRomUpload = 0x02,
    RomChunk = 0x03,
    RomInfo = 0x04,
    DeleteRom = 0x05,
    RequestSaveDownload = 0x06,
    SaveChunkRead = 0x07,
    RequestSaveUpload = 0x08,
    SaveChunkWrite = 0x09,
    SerialId = 0xfd,
    DeviceInfo = 0xfe,
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command as u8
    }
}

/// Builds a command frame from the command byte and its payload.
pub(crate) fn frame(opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LENGTH {
        return Err(Error::FrameTooLarge {
            opcode,
            payload_length: payload.len(),
        });
    }

    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(opcode);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Interprets a single-byte status response. An echo without status byte counts as accepted.
pub(crate) fn check_status(
    command: Command,
    response: &[u8],
    address: Option<BankChunkAddress>,
) -> Result<()> {
    match response.first() {
        None | Some(0) => Ok(()),
        Some(&status) => Err(Error::DeviceRejected {
            opcode: command.into(),
            status,
            address,
        }),
    }
}
