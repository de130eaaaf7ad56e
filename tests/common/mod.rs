//! An in-memory cartridge speaking the USB command protocol.

#![allow(dead_code)]

pub use croco::*;

#[derive(Debug, Clone)]
pub struct FakeRom {
    pub name: [u8; 17],
    pub data: Vec<u8>,
    pub ram_banks: u8,
    pub mbc: u8,
    pub save: Vec<u8>,
}

impl FakeRom {
    pub fn new(name: &str, rom_banks: usize, ram_banks: u8, mbc: u8) -> Self {
        let mut field = [0u8; 17];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            name: field,
            data: vec![0; rom_banks * ROM_BANK_SIZE],
            ram_banks,
            mbc,
            save: vec![0; usize::from(ram_banks) * SAVE_BANK_SIZE],
        }
    }

    pub fn rom_banks(&self) -> u16 {
        (self.data.len() / ROM_BANK_SIZE) as u16
    }
}

#[derive(Debug)]
enum State {
    Idle,
    RomUpload {
        name: [u8; 17],
        data: Vec<u8>,
        banks: u16,
        next: usize,
    },
    SaveDownload {
        rom: usize,
        next: usize,
    },
    SaveUpload {
        rom: usize,
        next: usize,
    },
}

/// Emulated cartridge. Chunks are served and accepted strictly in ascending order.
pub struct FakeCartridge {
    pub roms: Vec<FakeRom>,

    /// Raw used-bank counter reported by the utilization command.
    pub used_banks_raw: u16,

    /// Data bytes (after the echo) returned for ROM info requests.
    pub rom_info_length: usize,

    /// Status answered to the ROM upload handshake.
    pub upload_status: u8,

    /// Chunk index (in wire order) whose acknowledgement carries a failure status.
    pub fail_chunk: Option<usize>,

    /// Addresses served for save downloads instead of the regular order.
    pub download_order: Option<Vec<BankChunkAddress>>,

    pub device_info: Vec<u8>,
    pub serial: Vec<u8>,

    /// Every frame received, in order.
    pub frames: Vec<Vec<u8>>,
    pub pauses: Vec<Delay>,

    state: State,
    pending: Option<Vec<u8>>,
}

impl FakeCartridge {
    pub fn new(roms: Vec<FakeRom>) -> Self {
        Self {
            roms,
            used_banks_raw: 0,
            rom_info_length: 21,
            upload_status: 0,
            fail_chunk: None,
            download_order: None,
            device_info: vec![2, 1, 1, 3, 0, b'a', 0x0b, 0xad, 0xc0, 0xde, 0],
            serial: vec![0xe6, 0x61, 0x38, 0x52, 0x83, 0x4a, 0x2b, 0x2c],
            frames: Vec::new(),
            pauses: Vec::new(),
            state: State::Idle,
            pending: None,
        }
    }

    /// Frames sent with the given command byte.
    pub fn frames_for(&self, opcode: u8) -> Vec<&Vec<u8>> {
        self.frames.iter().filter(|f| f[0] == opcode).collect()
    }

    fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
        let opcode = frame[0];
        let payload = &frame[1..];
        let mut response = vec![opcode];

        match opcode {
            0x01 => {
                response.push(self.roms.len() as u8);
                response.extend_from_slice(&self.used_banks_raw.to_le_bytes());
                response.extend_from_slice(&[0, 0]);
            }
            0x04 => {
                if let Some(rom) = self.roms.get(usize::from(payload[0])) {
                    let mut info = rom.name.to_vec();
                    info.push(rom.ram_banks);
                    info.push(rom.mbc);
                    info.extend_from_slice(&rom.rom_banks().to_le_bytes());
                    info.truncate(self.rom_info_length);
                    response.extend_from_slice(&info);
                }
            }
            0x02 => {
                if self.upload_status != 0 {
                    response.push(self.upload_status);
                } else {
                    let banks = u16::from_be_bytes([payload[0], payload[1]]);
                    let mut name = [0u8; 17];
                    name.copy_from_slice(&payload[2..19]);
                    assert_eq!(&payload[19..21], &[0xff, 0xff]);
                    self.state = State::RomUpload {
                        name,
                        data: vec![0xee; usize::from(banks) * ROM_BANK_SIZE],
                        banks,
                        next: 0,
                    };
                    response.push(0);
                }
            }
            0x03 => {
                let status = self.accept_rom_chunk(payload);
                response.push(status);
            }
            0x05 => {
                let id = usize::from(payload[0]);
                if id < self.roms.len() {
                    self.roms.remove(id);
                    response.push(0);
                } else {
                    response.push(1);
                }
            }
            0x06 | 0x08 => match self.roms.get(usize::from(payload[0])) {
                Some(rom) if rom.ram_banks > 0 => {
                    let rom = usize::from(payload[0]);
                    self.state = if opcode == 0x06 {
                        State::SaveDownload { rom, next: 0 }
                    } else {
                        State::SaveUpload { rom, next: 0 }
                    };
                    response.push(0);
                }
                _ => response.push(1),
            },
            0x07 => {
                if let State::SaveDownload { rom, next } = &mut self.state {
                    let address = match &self.download_order {
                        Some(order) => order[*next],
                        None => address_of(*next, SAVE_BANK_SIZE),
                    };
                    let offset = offset_of(address, SAVE_BANK_SIZE);
                    response.extend_from_slice(&address.to_be_bytes());
                    response.extend_from_slice(&self.roms[*rom].save[offset..offset + CHUNK_SIZE]);
                    *next += 1;
                }
            }
            0x09 => {
                let status = self.accept_save_chunk(payload);
                response.push(status);
            }
            0xfe => response.extend_from_slice(&self.device_info),
            0xfd => response.extend_from_slice(&self.serial),
            _ => {}
        }
        response
    }

    fn accept_rom_chunk(&mut self, payload: &[u8]) -> u8 {
        let fail = self.fail_chunk;
        let State::RomUpload {
            name,
            data,
            banks,
            next,
        } = &mut self.state
        else {
            return 1;
        };

        let address = BankChunkAddress::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if address != address_of(*next, ROM_BANK_SIZE) || fail == Some(*next) {
            return 2;
        }
        let offset = offset_of(address, ROM_BANK_SIZE);
        data[offset..offset + CHUNK_SIZE].copy_from_slice(&payload[4..4 + CHUNK_SIZE]);
        *next += 1;

        if *next == usize::from(*banks) * (ROM_BANK_SIZE / CHUNK_SIZE) {
            let rom = FakeRom {
                name: *name,
                data: std::mem::take(data),
                ram_banks: 0,
                mbc: 0x00,
                save: Vec::new(),
            };
            self.roms.push(rom);
            self.state = State::Idle;
        }
        0
    }

    fn accept_save_chunk(&mut self, payload: &[u8]) -> u8 {
        let fail = self.fail_chunk;
        let State::SaveUpload { rom, next } = &mut self.state else {
            return 1;
        };

        let address = BankChunkAddress::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if address != address_of(*next, SAVE_BANK_SIZE) || fail == Some(*next) {
            return 2;
        }
        let offset = offset_of(address, SAVE_BANK_SIZE);
        self.roms[*rom].save[offset..offset + CHUNK_SIZE].copy_from_slice(&payload[4..4 + CHUNK_SIZE]);
        *next += 1;
        0
    }
}

pub fn address_of(index: usize, bank_size: usize) -> BankChunkAddress {
    let chunks_per_bank = bank_size / CHUNK_SIZE;
    BankChunkAddress {
        bank: (index / chunks_per_bank) as u16,
        chunk: (index % chunks_per_bank) as u16,
    }
}

pub fn offset_of(address: BankChunkAddress, bank_size: usize) -> usize {
    usize::from(address.bank) * bank_size + usize::from(address.chunk) * CHUNK_SIZE
}

impl Session for FakeCartridge {
    fn send(&mut self, frame: &[u8]) -> Result<usize> {
        assert!(frame.len() <= 65, "frame of {} bytes", frame.len());
        self.frames.push(frame.to_vec());
        self.pending = Some(self.respond(frame));
        Ok(frame.len())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let response = self.pending.take().unwrap_or_default();
        let length = response.len().min(buffer.len());
        buffer[..length].copy_from_slice(&response[..length]);
        Ok(length)
    }

    fn pause(&mut self, delay: Delay) {
        self.pauses.push(delay);
    }
}
