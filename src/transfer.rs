//! Chunked bank transfers between the host and the cartridge.
//!
//! Every bulk data flow starts with a handshake command that announces the transfer, followed by
//! one transaction per 32-byte chunk. Chunks are addressed by a big-endian `(bank, chunk)` pair
//! and always travel in ascending order: banks `0..total_banks`, and within each bank chunks
//! `0..chunks_per_bank`. The device has no other way to know which chunk it is given or asked
//! for, so downloads check the address echoed with each chunk against the one expected next.

use crate::catalog::ROM_NAME_LENGTH;
use crate::command::{self, Command};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::session::Session;
use std::fmt;
use std::io::Write;
use tracing::{debug, info};

/// Payload bytes carried by a single chunk.
pub const CHUNK_SIZE: usize = 32;

/// Bank size of ROM transfers.
pub const ROM_BANK_SIZE: usize = 16384;

/// Bank size of save (SRAM) transfers.
pub const SAVE_BANK_SIZE: usize = 8192;

/// Trailer of the ROM upload handshake, reserved for a transfer speed mode. The firmware has only
/// ever been sent this value.
pub const SPEED_SWITCH_SENTINEL: u16 = 0xffff;

/// Length of a downloaded chunk: the address header followed by the chunk data.
const DOWNLOAD_CHUNK_LENGTH: usize = 4 + CHUNK_SIZE;

/// Position of a chunk within a transfer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct BankChunkAddress {
    pub bank: u16,
    pub chunk: u16,
}

impl BankChunkAddress {
    /// Wire representation: bank and chunk, both big-endian.
    pub fn to_be_bytes(self) -> [u8; 4] {
        let bank = self.bank.to_be_bytes();
        let chunk = self.chunk.to_be_bytes();
        [bank[0], bank[1], chunk[0], chunk[1]]
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self {
            bank: u16::from_be_bytes([bytes[0], bytes[1]]),
            chunk: u16::from_be_bytes([bytes[2], bytes[3]]),
        }
    }
}

impl fmt::Display for BankChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank {}, chunk {}", self.bank, self.chunk)
    }
}

/// Kind of memory a transfer targets, which fixes its bank size.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransferKind {
    Rom,
    Save,
}

impl TransferKind {
    pub fn bank_size(self) -> usize {
        match self {
            TransferKind::Rom => ROM_BANK_SIZE,
            TransferKind::Save => SAVE_BANK_SIZE,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    /// Host to cartridge.
    Upload,

    /// Cartridge to host.
    Download,
}

/// Shape of a single transfer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransferPlan {
    pub kind: TransferKind,
    pub direction: Direction,
    pub total_banks: u16,

    /// ROM whose save memory is transferred. `None` for ROM uploads.
    pub rom_id: Option<u8>,
}

impl TransferPlan {
    /// Plans the upload of a ROM image, rounding up to whole banks.
    pub fn rom_upload(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(Error::InvalidRequest("ROM image is empty"));
        }
        let total_banks = u16::try_from(length.div_ceil(ROM_BANK_SIZE))
            .map_err(|_| Error::InvalidRequest("ROM image has too many banks"))?;
        Ok(Self {
            kind: TransferKind::Rom,
            direction: Direction::Upload,
            total_banks,
            rom_id: None,
        })
    }

    /// Plans a transfer of the complete save memory of a ROM with `ram_banks` banks.
    pub fn save(direction: Direction, rom_id: u8, ram_banks: u8) -> Result<Self> {
        if ram_banks == 0 {
            return Err(Error::NoSaveMemory { rom_id });
        }
        Ok(Self {
            kind: TransferKind::Save,
            direction,
            total_banks: u16::from(ram_banks),
            rom_id: Some(rom_id),
        })
    }

    pub fn bank_size(&self) -> usize {
        self.kind.bank_size()
    }

    pub fn chunks_per_bank(&self) -> u16 {
        (self.bank_size() / CHUNK_SIZE) as u16
    }

    pub fn total_chunks(&self) -> usize {
        usize::from(self.total_banks) * usize::from(self.chunks_per_bank())
    }

    /// Bytes moved by the complete transfer, padding included.
    pub fn total_bytes(&self) -> usize {
        usize::from(self.total_banks) * self.bank_size()
    }

    /// Byte offset of a chunk within the transferred region.
    pub fn offset_of(&self, address: BankChunkAddress) -> usize {
        (usize::from(address.bank) * usize::from(self.chunks_per_bank()) + usize::from(address.chunk))
            * CHUNK_SIZE
    }

    /// All chunk addresses in wire order.
    pub fn addresses(&self) -> Addresses {
        Addresses {
            next: BankChunkAddress { bank: 0, chunk: 0 },
            total_banks: self.total_banks,
            chunks_per_bank: self.chunks_per_bank(),
        }
    }
}

/// Iterator over the chunk addresses of a transfer, in the order they travel.
#[derive(Debug, Clone)]
pub struct Addresses {
    next: BankChunkAddress,
    total_banks: u16,
    chunks_per_bank: u16,
}

impl Iterator for Addresses {
    type Item = BankChunkAddress;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.bank >= self.total_banks || self.chunks_per_bank == 0 {
            return None;
        }

        let current = self.next;
        if current.chunk + 1 == self.chunks_per_bank {
            self.next = BankChunkAddress {
                bank: current.bank + 1,
                chunk: 0,
            };
        } else {
            self.next.chunk += 1;
        }
        Some(current)
    }
}

/// How far a transfer has progressed.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Progress {
    /// Bytes moved so far, including padding.
    pub bytes: usize,

    /// Banks completely processed.
    pub banks: u16,
}

/// A transfer in progress. Each iteration moves one chunk and yields the progress so far; the
/// iterator is fused after the first error.
pub trait Operation: Iterator<Item = Result<Progress>> {
    fn plan(&self) -> &TransferPlan;

    /// Bytes the complete transfer moves.
    fn total(&self) -> usize {
        self.plan().total_bytes()
    }

    /// Runs the remaining transfer to completion.
    fn execute(&mut self) -> Result<Progress> {
        let mut progress = Progress::default();
        while let Some(step) = self.next() {
            progress = step?;
        }
        Ok(progress)
    }
}

/// Announces a ROM upload. The name must not exceed 17 bytes and is zero-padded.
pub(crate) fn request_rom_upload<S: Session>(
    engine: &mut Engine<S>,
    plan: &TransferPlan,
    name: &[u8],
) -> Result<()> {
    if name.len() > ROM_NAME_LENGTH {
        return Err(Error::InvalidRequest("ROM name longer than 17 bytes"));
    }

    let mut payload = [0u8; 2 + ROM_NAME_LENGTH + 2];
    payload[0..2].copy_from_slice(&plan.total_banks.to_be_bytes());
    payload[2..2 + name.len()].copy_from_slice(name);
    payload[2 + ROM_NAME_LENGTH..].copy_from_slice(&SPEED_SWITCH_SENTINEL.to_be_bytes());

    let response = engine.execute(Command::RequestRomUpload, &payload, 1)?;
    command::check_status(Command::RequestRomUpload, &response, None)?;
    info!(banks = plan.total_banks, "ROM upload accepted");
    Ok(())
}

/// Announces a save download or upload for the given ROM.
pub(crate) fn request_save_transfer<S: Session>(engine: &mut Engine<S>, plan: &TransferPlan) -> Result<()> {
    let request = match plan.direction {
        Direction::Download => Command::RequestSaveDownload,
        Direction::Upload => Command::RequestSaveUpload,
    };
    let rom_id = plan
        .rom_id
        .ok_or(Error::InvalidRequest("save transfer without ROM id"))?;

    let response = engine.execute(request, &[rom_id], 1)?;
    command::check_status(request, &response, None)?;
    info!(rom_id, banks = plan.total_banks, direction = ?plan.direction, "Save transfer accepted");
    Ok(())
}

/// Sends a data region chunk by chunk. Data past its end is sent as zeros.
pub struct Upload<'d, 'a, S: Session> {
    engine: &'a mut Engine<S>,
    plan: TransferPlan,
    command: Command,
    data: &'d [u8],
    addresses: Addresses,
    progress: Progress,
    done: bool,
}

impl<'d, 'a, S: Session> Upload<'d, 'a, S> {
    /// Starts sending chunks after an accepted handshake.
    pub(crate) fn new(engine: &'a mut Engine<S>, plan: TransferPlan, data: &'d [u8]) -> Self {
        let command = match plan.kind {
            TransferKind::Rom => Command::RomChunk,
            TransferKind::Save => Command::SaveChunkWrite,
        };
        Self {
            engine,
            command,
            data,
            addresses: plan.addresses(),
            done: plan.total_chunks() == 0,
            plan,
            progress: Progress::default(),
        }
    }

    fn send_chunk(&mut self, address: BankChunkAddress) -> Result<()> {
        let mut packet = [0u8; 4 + CHUNK_SIZE];
        packet[..4].copy_from_slice(&address.to_be_bytes());

        let offset = self.plan.offset_of(address);
        if offset < self.data.len() {
            let end = (offset + CHUNK_SIZE).min(self.data.len());
            packet[4..4 + end - offset].copy_from_slice(&self.data[offset..end]);
        }

        let response = self.engine.execute(self.command, &packet, 1)?;
        command::check_status(self.command, &response, Some(address))
    }
}

impl<S: Session> Operation for Upload<'_, '_, S> {
    fn plan(&self) -> &TransferPlan {
        &self.plan
    }
}

impl<S: Session> Iterator for Upload<'_, '_, S> {
    type Item = Result<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(address) = self.addresses.next() else {
            self.done = true;
            info!(
                bytes = self.progress.bytes,
                banks = self.progress.banks,
                "Upload complete"
            );
            return None;
        };

        Some(match self.send_chunk(address) {
            Ok(()) => {
                self.progress.bytes += CHUNK_SIZE;
                if address.chunk + 1 == self.plan.chunks_per_bank() {
                    self.progress.banks += 1;
                    debug!(bank = address.bank, "Bank sent");
                }
                Ok(self.progress)
            }
            Err(error) => {
                // Ensure that the iterator is fused after an error occurs
                self.done = true;
                Err(error)
            }
        })
    }
}

/// Receives a data region chunk by chunk into a writer. Only chunks whose address matched the
/// expected sequence are written.
pub struct Download<'a, S: Session, W: Write> {
    engine: &'a mut Engine<S>,
    plan: TransferPlan,
    writer: W,
    addresses: Addresses,
    progress: Progress,
    done: bool,
}

impl<'a, S: Session, W: Write> Download<'a, S, W> {
    /// Starts requesting save chunks after an accepted handshake.
    pub(crate) fn new(engine: &'a mut Engine<S>, plan: TransferPlan, writer: W) -> Self {
        Self {
            engine,
            writer,
            addresses: plan.addresses(),
            done: plan.total_chunks() == 0,
            plan,
            progress: Progress::default(),
        }
    }

    /// Returns the writer, e.g. to inspect what was received before a failure.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn receive_chunk(&mut self, expected: BankChunkAddress) -> Result<()> {
        let response = self
            .engine
            .execute(Command::SaveChunkRead, &[], DOWNLOAD_CHUNK_LENGTH)?;
        if response.len() < DOWNLOAD_CHUNK_LENGTH {
            return Err(Error::ShortResponse {
                opcode: Command::SaveChunkRead.into(),
                expected: DOWNLOAD_CHUNK_LENGTH,
                actual: response.len(),
            });
        }

        let received = BankChunkAddress::from_be_bytes([response[0], response[1], response[2], response[3]]);
        if received != expected {
            return Err(Error::Sync { expected, received });
        }

        self.writer.write_all(&response[4..DOWNLOAD_CHUNK_LENGTH])?;
        Ok(())
    }
}

impl<S: Session, W: Write> Operation for Download<'_, S, W> {
    fn plan(&self) -> &TransferPlan {
        &self.plan
    }
}

impl<S: Session, W: Write> Iterator for Download<'_, S, W> {
    type Item = Result<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(expected) = self.addresses.next() else {
            self.done = true;
            if let Err(error) = self.writer.flush() {
                return Some(Err(error.into()));
            }
            info!(
                bytes = self.progress.bytes,
                banks = self.progress.banks,
                "Download complete"
            );
            return None;
        };

        Some(match self.receive_chunk(expected) {
            Ok(()) => {
                self.progress.bytes += CHUNK_SIZE;
                if expected.chunk + 1 == self.plan.chunks_per_bank() {
                    self.progress.banks += 1;
                    debug!(bank = expected.bank, "Bank received");
                }
                Ok(self.progress)
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::ScriptedSession;

    fn chunk_response(opcode: u8, address: BankChunkAddress, fill: u8) -> Vec<u8> {
        let mut response = vec![opcode];
        response.extend_from_slice(&address.to_be_bytes());
        response.extend_from_slice(&[fill; CHUNK_SIZE]);
        response
    }

    #[test]
    fn address_wire_format_is_big_endian() {
        let address = BankChunkAddress {
            bank: 0x0102,
            chunk: 0x01ff,
        };
        assert_eq!(address.to_be_bytes(), [0x01, 0x02, 0x01, 0xff]);
        assert_eq!(BankChunkAddress::from_be_bytes([0x01, 0x02, 0x01, 0xff]), address);
    }

    #[test]
    fn rom_plan_rounds_up_to_banks() {
        assert_eq!(TransferPlan::rom_upload(1).unwrap().total_banks, 1);
        assert_eq!(TransferPlan::rom_upload(ROM_BANK_SIZE).unwrap().total_banks, 1);
        assert_eq!(TransferPlan::rom_upload(ROM_BANK_SIZE + 1).unwrap().total_banks, 2);
        assert_eq!(TransferPlan::rom_upload(20000).unwrap().total_banks, 2);
        assert!(matches!(
            TransferPlan::rom_upload(0),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn chunks_per_bank_follows_kind() {
        assert_eq!(TransferPlan::rom_upload(1).unwrap().chunks_per_bank(), 512);
        let save = TransferPlan::save(Direction::Download, 0, 4).unwrap();
        assert_eq!(save.chunks_per_bank(), 256);
        assert_eq!(save.total_bytes(), 4 * SAVE_BANK_SIZE);
    }

    #[test]
    fn save_plan_needs_save_memory() {
        assert!(matches!(
            TransferPlan::save(Direction::Upload, 3, 0),
            Err(Error::NoSaveMemory { rom_id: 3 })
        ));
    }

    #[test]
    fn addresses_are_nested_and_gapless() {
        let plan = TransferPlan::save(Direction::Download, 0, 2).unwrap();
        let addresses: Vec<_> = plan.addresses().collect();
        assert_eq!(addresses.len(), plan.total_chunks());
        assert_eq!(addresses[0], BankChunkAddress { bank: 0, chunk: 0 });
        assert_eq!(addresses[255], BankChunkAddress { bank: 0, chunk: 255 });
        assert_eq!(addresses[256], BankChunkAddress { bank: 1, chunk: 0 });
        assert!(addresses.windows(2).all(|pair| pair[0] < pair[1]));
        for address in addresses {
            assert_eq!(
                plan.offset_of(address),
                (usize::from(address.bank) * 256 + usize::from(address.chunk)) * CHUNK_SIZE
            );
        }
    }

    #[test]
    fn rom_handshake_layout() {
        let plan = TransferPlan::rom_upload(3 * ROM_BANK_SIZE).unwrap();
        let mut engine = Engine::new(ScriptedSession::new(vec![vec![0x02, 0x00]]));
        request_rom_upload(&mut engine, &plan, b"TETRIS").unwrap();

        let sent = &engine.session().sent[0];
        assert_eq!(sent.len(), 1 + 2 + ROM_NAME_LENGTH + 2);
        assert_eq!(&sent[..3], &[0x02, 0x00, 0x03]);
        assert_eq!(&sent[3..9], b"TETRIS");
        assert!(sent[9..20].iter().all(|&b| b == 0));
        assert_eq!(&sent[20..], &[0xff, 0xff]);
    }

    #[test]
    fn rom_handshake_rejects_long_name() {
        let plan = TransferPlan::rom_upload(1).unwrap();
        let mut engine = Engine::new(ScriptedSession::default());
        assert!(matches!(
            request_rom_upload(&mut engine, &plan, &[b'A'; 18]),
            Err(Error::InvalidRequest(_))
        ));
        assert!(engine.session().sent.is_empty());
    }

    #[test]
    fn save_handshake_carries_rom_id() {
        let plan = TransferPlan::save(Direction::Upload, 7, 1).unwrap();
        let mut engine = Engine::new(ScriptedSession::new(vec![vec![0x08, 0x01]]));
        match request_save_transfer(&mut engine, &plan) {
            Err(Error::DeviceRejected {
                opcode: 0x08,
                status: 1,
                address: None,
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(engine.session().sent, vec![vec![0x08, 7]]);
    }

    #[test]
    fn upload_pads_past_end_of_data() {
        let plan = TransferPlan::save(Direction::Upload, 0, 1).unwrap();
        let acks = (0..plan.total_chunks()).map(|_| vec![0x09, 0x00]);
        let mut engine = Engine::new(ScriptedSession::new(acks));
        let data: Vec<u8> = (1..=40).collect();

        let progress = Upload::new(&mut engine, plan.clone(), &data).execute().unwrap();
        assert_eq!(progress.bytes, SAVE_BANK_SIZE);
        assert_eq!(progress.banks, 1);

        let sent = &engine.session().sent;
        assert_eq!(sent.len(), 256);
        assert_eq!(&sent[0][..5], &[0x09, 0, 0, 0, 0]);
        assert_eq!(&sent[0][5..], &data[..32]);
        assert_eq!(&sent[1][1..5], &[0, 0, 0, 1]);
        assert_eq!(&sent[1][5..13], &data[32..]);
        assert!(sent[1][13..].iter().all(|&b| b == 0));
        assert_eq!(&sent[255][1..5], &[0, 0, 0, 255]);
        assert!(sent[255][5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn upload_stops_at_first_rejected_chunk() {
        let plan = TransferPlan::save(Direction::Upload, 0, 1).unwrap();
        let responses = vec![vec![0x09, 0x00], vec![0x09, 0x00], vec![0x09, 0x03]];
        let mut engine = Engine::new(ScriptedSession::new(responses));
        let data = [0xaa; 64];

        let mut upload = Upload::new(&mut engine, plan, &data);
        assert!(upload.next().unwrap().is_ok());
        assert!(upload.next().unwrap().is_ok());
        match upload.next() {
            Some(Err(Error::DeviceRejected {
                opcode: 0x09,
                status: 3,
                address: Some(BankChunkAddress { bank: 0, chunk: 2 }),
            })) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(upload.next().is_none());
        assert_eq!(engine.session().sent.len(), 3);
    }

    #[test]
    fn download_writes_validated_chunks() {
        let plan = TransferPlan::save(Direction::Download, 0, 1).unwrap();
        let responses = plan
            .addresses()
            .map(|address| chunk_response(0x07, address, address.chunk as u8));
        let mut engine = Engine::new(ScriptedSession::new(responses));

        let mut download = Download::new(&mut engine, plan, Vec::new());
        let progress = download.execute().unwrap();
        assert_eq!(progress, Progress { bytes: SAVE_BANK_SIZE, banks: 1 });

        let data = download.into_writer();
        assert_eq!(data.len(), SAVE_BANK_SIZE);
        assert!(data[..32].iter().all(|&b| b == 0));
        assert!(data[32 * 255..].iter().all(|&b| b == 255));
    }

    #[test]
    fn download_detects_reordered_chunks() {
        let plan = TransferPlan::save(Direction::Download, 0, 1).unwrap();
        let first = BankChunkAddress { bank: 0, chunk: 0 };
        let second = BankChunkAddress { bank: 0, chunk: 1 };
        let third = BankChunkAddress { bank: 0, chunk: 2 };
        let responses = vec![
            chunk_response(0x07, first, 0x11),
            chunk_response(0x07, third, 0x33),
            chunk_response(0x07, second, 0x22),
        ];
        let mut engine = Engine::new(ScriptedSession::new(responses));

        let mut download = Download::new(&mut engine, plan, Vec::new());
        match download.execute() {
            Err(Error::Sync { expected, received }) => {
                assert_eq!(expected, second);
                assert_eq!(received, third);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(download.into_writer(), vec![0x11; CHUNK_SIZE]);
    }

    #[test]
    fn download_rejects_short_chunk() {
        let plan = TransferPlan::save(Direction::Download, 0, 1).unwrap();
        let mut engine = Engine::new(ScriptedSession::new(vec![vec![0x07, 0, 0, 0, 0, 1, 2]]));

        let mut download = Download::new(&mut engine, plan, Vec::new());
        match download.execute() {
            Err(Error::ShortResponse {
                opcode: 0x07,
                expected: 36,
                actual: 6,
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(download.into_writer().is_empty());
    }
}
