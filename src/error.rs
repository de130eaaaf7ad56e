use crate::transfer::BankChunkAddress;
use std::result::Result as StdResult;
use thiserror::Error;

/// Errors which can occur during cartridge setup and communication.
#[derive(Debug, Error)]
pub enum Error {
    /// It was attempted to open a connection to a cartridge which does not exist.
    #[error("Croco Cartridge not found")]
    CartridgeNotFound,

    /// The given USB address pertains to a device which is not a Croco Cartridge.
    #[error("unsupported device {vendor_id:04x}:{product_id:04x}")]
    UnsupportedDevice { vendor_id: u16, product_id: u16 },

    /// Several cartridges are connected and none was selected.
    #[error("more than one cartridge connected")]
    TooManyMatches,

    /// The active configuration has no vendor-specific interface with a bulk endpoint pair.
    #[error("no vendor-specific interface with bulk IN and OUT endpoints found")]
    EndpointsNotFound,

    /// The request cannot be expressed in the protocol (e.g. a ROM name longer than 17 bytes).
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// An error occurred during the raw USB communication.
    #[error("USB transport error: {0}")]
    Transport(#[from] rusb::Error),

    /// A bulk write did not complete within the timeout.
    #[error("timed out sending to the device")]
    Timeout,

    /// A bulk write accepted fewer bytes than the frame contained.
    #[error("incomplete write: {written} of {expected} bytes sent")]
    IncompleteWrite { written: usize, expected: usize },

    /// The device sent nothing back, not even the echo byte.
    #[error("no response from device to command 0x{opcode:02x}")]
    NoResponse { opcode: u8 },

    /// The first response byte did not echo the command just sent.
    #[error("command echo mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    EchoMismatch { expected: u8, actual: u8 },

    /// The command frame would exceed 65 bytes.
    #[error("command 0x{opcode:02x} too large: {payload_length} payload bytes")]
    FrameTooLarge { opcode: u8, payload_length: usize },

    /// A handshake or chunk acknowledgement carried a non-zero status code.
    #[error("command 0x{opcode:02x} rejected with status {status}{}", chunk_context(.address))]
    DeviceRejected {
        opcode: u8,
        status: u8,
        address: Option<BankChunkAddress>,
    },

    /// A downloaded chunk does not carry the address the host expected next.
    #[error("chunk out of sync: expected {expected}, received {received}")]
    Sync {
        expected: BankChunkAddress,
        received: BankChunkAddress,
    },

    /// A response was shorter than its fixed layout requires.
    #[error("short response to command 0x{opcode:02x}: expected {expected} bytes, got {actual}")]
    ShortResponse {
        opcode: u8,
        expected: usize,
        actual: usize,
    },

    /// A save transfer was requested for a ROM without save memory.
    #[error("ROM {rom_id} has no save memory")]
    NoSaveMemory { rom_id: u8 },

    /// Writing downloaded data failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn chunk_context(address: &Option<BankChunkAddress>) -> String {
    match address {
        Some(address) => format!(" at {}", address),
        None => String::new(),
    }
}

/// Shorthand for a Result with the crate's own Error type.
pub type Result<T> = StdResult<T, Error>;
