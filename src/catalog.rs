//! The list of ROMs installed on the cartridge.

use crate::command::Command;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::session::{Delay, Session};
use std::fmt;
use tracing::warn;

/// Number of banks available for ROMs on the cartridge.
pub const MAX_ROM_BANKS: u16 = 888;

/// Length of the fixed, NUL-padded ROM name field.
pub const ROM_NAME_LENGTH: usize = 17;

const UTILIZATION_CAPACITY: usize = 10;
const UTILIZATION_MIN_LENGTH: usize = 5;
const ROM_INFO_CAPACITY: usize = 25;
const ROM_INFO_MIN_LENGTH: usize = 20;

/// How much of the cartridge is in use.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Utilization {
    pub rom_count: u8,
    pub used_banks: u16,
    pub max_banks: u16,
}

impl Utilization {
    /// Decodes the response to [`Command::RomUtilization`]. The firmware reports used banks
    /// little-endian and scaled by 256.
    pub fn decode(response: &[u8]) -> Result<Self> {
        if response.len() < UTILIZATION_MIN_LENGTH {
            return Err(Error::ShortResponse {
                opcode: Command::RomUtilization.into(),
                expected: UTILIZATION_MIN_LENGTH,
                actual: response.len(),
            });
        }

        Ok(Utilization {
            rom_count: response[0],
            used_banks: u16::from_le_bytes([response[1], response[2]]) / 256,
            max_banks: MAX_ROM_BANKS,
        })
    }
}

/// A ROM name as stored on the cartridge: up to 17 bytes, NUL-padded, not necessarily
/// NUL-terminated.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct RomName([u8; ROM_NAME_LENGTH]);

impl RomName {
    pub fn from_raw(raw: [u8; ROM_NAME_LENGTH]) -> Self {
        Self(raw)
    }

    /// The significant bytes, up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(ROM_NAME_LENGTH);
        &self.0[..end]
    }

    pub fn raw(&self) -> &[u8; ROM_NAME_LENGTH] {
        &self.0
    }
}

impl fmt::Display for RomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for RomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// A ROM installed on the cartridge.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RomCatalogEntry {
    /// Position of the ROM on the cartridge, starting at 0.
    pub id: u8,
    pub name: RomName,
    pub rom_banks: u16,
    pub ram_banks: u8,
    pub mbc: u8,
}

impl RomCatalogEntry {
    /// Decodes the response to [`Command::RomInfo`] for the ROM `id`.
    pub fn decode(id: u8, response: &[u8]) -> Result<Self> {
        let length = response.len();
        if length < ROM_INFO_MIN_LENGTH {
            return Err(Error::ShortResponse {
                opcode: Command::RomInfo.into(),
                expected: ROM_INFO_MIN_LENGTH,
                actual: length,
            });
        }

        let mut name = [0u8; ROM_NAME_LENGTH];
        name.copy_from_slice(&response[..ROM_NAME_LENGTH]);

        // MBC needs at least 19 bytes, ROM banks at least 21
        let mbc = if length > 18 { response[18] } else { 0xff };
        let rom_banks = if length > 20 {
            u16::from_le_bytes([response[19], response[20]])
        } else {
            0
        };

        Ok(RomCatalogEntry {
            id,
            name: RomName(name),
            rom_banks,
            ram_banks: response[17],
            mbc,
        })
    }
}

impl fmt::Display for RomCatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:2}] {:<22} | ROM: {:5} banks | RAM: {} x 8KB | MBC: 0x{:02x}",
            self.id, self.name, self.rom_banks, self.ram_banks, self.mbc
        )
    }
}

/// Everything the cartridge reports about its installed ROMs.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Catalog {
    pub utilization: Utilization,
    pub entries: Vec<RomCatalogEntry>,

    /// ROM ids whose info request failed or whose response was too short to decode.
    pub skipped: Vec<u8>,
}

pub(crate) fn query_utilization<S: Session>(engine: &mut Engine<S>) -> Result<Utilization> {
    let response = engine.execute(Command::RomUtilization, &[], UTILIZATION_CAPACITY)?;
    Utilization::decode(&response)
}

pub(crate) fn query_rom_info<S: Session>(engine: &mut Engine<S>, id: u8) -> Result<RomCatalogEntry> {
    let response = engine.execute(Command::RomInfo, &[id], ROM_INFO_CAPACITY)?;
    RomCatalogEntry::decode(id, &response)
}

/// Fetches the utilization and then the info of every ROM. A failing utilization query aborts
/// the listing, a failing ROM info query only skips that entry.
pub(crate) fn list<S: Session>(engine: &mut Engine<S>) -> Result<Catalog> {
    let utilization = query_utilization(engine)?;

    let mut entries = Vec::with_capacity(usize::from(utilization.rom_count));
    let mut skipped = Vec::new();
    for id in 0..utilization.rom_count {
        match query_rom_info(engine, id) {
            Ok(entry) => entries.push(entry),
            Err(error) => {
                warn!(rom_id = id, %error, "Skipping ROM without usable info");
                skipped.push(id);
            }
        }
        engine.pause(Delay::CatalogEntry);
    }

    Ok(Catalog {
        utilization,
        entries,
        skipped,
    })
}
