//! This crate provides a way to manage a Croco Cartridge connected via USB: list the installed
//! ROMs, read the cartridge's identity, upload ROMs and transfer save games in both directions.
//!
//! # Example: Backing up a save game
//! ```rust, no_run
//! use croco::{Context, Operation};
//! use std::fs::File;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Find and open the only connected cartridge
//! let context = Context::new()?;
//! let mut cartridge = context.open_cartridge(None)?;
//!
//! // Look up the installed ROMs
//! let catalog = cartridge.catalog()?;
//! for entry in &catalog.entries {
//!     println!("{}", entry);
//! }
//!
//! // Download the save memory of the first ROM into a file
//! let file = File::create("save.sav")?;
//! let progress = cartridge.download_save(0, file)?.execute()?;
//! println!("{} bytes in {} banks", progress.bytes, progress.banks);
//! # Ok(())
//! # }
//! ```
//!
//! Transfers are chunked; besides `execute()`, the returned operations can be iterated for
//! progress feedback. See the [`Operation`] trait for details.
//!
//! [`Operation`]: trait.Operation.html

mod cartridge;
mod catalog;
mod command;
mod context;
mod device_info;
mod engine;
mod error;
mod session;
mod transfer;

pub use cartridge::{Cartridge, CartridgeInfo};
pub use catalog::{Catalog, RomCatalogEntry, RomName, Utilization, MAX_ROM_BANKS, ROM_NAME_LENGTH};
pub use command::{Command, MAX_FRAME_LENGTH, MAX_PAYLOAD_LENGTH, MAX_RESPONSE_LENGTH};
pub use context::{Context, UsbContext};
pub use device_info::{DeviceInfo, FirmwareVersion, Identity, SerialId};
pub use engine::Engine;
pub use error::{Error, Result};
pub use session::{Delay, Endpoints, Session, UsbSession};
pub use transfer::{
    Addresses, BankChunkAddress, Direction, Download, Operation, Progress, TransferKind,
    TransferPlan, Upload, CHUNK_SIZE, ROM_BANK_SIZE, SAVE_BANK_SIZE, SPEED_SWITCH_SENTINEL,
};

/// USB vendor ID of the cartridge.
pub const VENDOR_ID: u16 = 0x2e8a;

/// USB product ID of the cartridge.
pub const PRODUCT_ID: u16 = 0x107f;

/// Timeout for all usb transactions.
const TIMEOUT: std::time::Duration = std::time::Duration::from_millis(5000);
