use alloc::{collections::VecDeque, vec, vec::Vec};
use core::convert::Infallible;

use embassy_futures::block_on;
use embedded_hal::{digital, spi};

use super::helpers::{decode_capacity_bytes, parse_cid};
use super::*;
use crate::block::SECTOR_SIZE;

enum WriteState {
    Idle,
    AwaitToken(u32),
    Data(u32, Vec<u8>),
    Crc(u32, Vec<u8>, u8),
}

/// Byte-level SPI model of an SDHC card that answers the commands the
/// driver issues.
struct FakeCard {
    present: bool,
    image: Vec<u8>,
    csd: [u8; 16],
    cid: [u8; 16],
    frame: Vec<u8>,
    out: VecDeque<u8>,
    write: WriteState,
}

impl FakeCard {
    fn new(present: bool) -> Self {
        let mut csd = [0u8; 16];
        csd[0] = 0x40;
        csd[9] = 7; // C_SIZE = 7 -> 4 MiB
        let mut cid = [0u8; 16];
        cid[3..8].copy_from_slice(b"RUST ");
        cid[9..13].copy_from_slice(&0x0102_0304u32.to_be_bytes());
        Self {
            present,
            image: vec![0; 8192 * SECTOR_SIZE],
            csd,
            cid,
            frame: Vec::new(),
            out: VecDeque::new(),
            write: WriteState::Idle,
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.out.push_back(0xFF);
        self.out.extend(bytes.iter().copied());
    }

    fn respond_block(&mut self, block: &[u8]) {
        self.respond(&[0x00, 0xFF, 0xFE]);
        self.out.extend(block.iter().copied());
        self.out.extend([0x00, 0x00]);
    }

    fn command(&mut self, cmd: u8, arg: u32) {
        match cmd {
            0 => self.respond(&[0x01]),
            8 => self.respond(&[0x01, 0x00, 0x00, 0x01, 0xAA]),
            55 => self.respond(&[0x01]),
            41 => self.respond(&[0x00]),
            58 => self.respond(&[0x00, 0xC0, 0xFF, 0x80, 0x00]),
            9 => {
                let csd = self.csd;
                self.respond_block(&csd);
            }
            10 => {
                let cid = self.cid;
                self.respond_block(&cid);
            }
            17 => {
                let start = arg as usize * SECTOR_SIZE;
                let data = self.image[start..start + SECTOR_SIZE].to_vec();
                self.respond_block(&data);
            }
            24 => {
                self.respond(&[0x00]);
                self.write = WriteState::AwaitToken(arg);
            }
            _ => self.respond(&[0x04]),
        }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        if !self.present {
            return 0xFF;
        }
        let reply = self.out.pop_front().unwrap_or(0xFF);
        self.write = match core::mem::replace(&mut self.write, WriteState::Idle) {
            WriteState::AwaitToken(lba) if byte == 0xFE => WriteState::Data(lba, Vec::new()),
            WriteState::AwaitToken(lba) => WriteState::AwaitToken(lba),
            WriteState::Data(lba, mut buf) => {
                buf.push(byte);
                if buf.len() == SECTOR_SIZE {
                    WriteState::Crc(lba, buf, 2)
                } else {
                    WriteState::Data(lba, buf)
                }
            }
            WriteState::Crc(lba, buf, left) if left > 1 => WriteState::Crc(lba, buf, left - 1),
            WriteState::Crc(lba, buf, _) => {
                let start = lba as usize * SECTOR_SIZE;
                self.image[start..start + SECTOR_SIZE].copy_from_slice(&buf);
                self.out.extend([0x05, 0x00, 0xFF]);
                WriteState::Idle
            }
            WriteState::Idle => {
                if !self.frame.is_empty() || (byte & 0xC0) == 0x40 {
                    self.frame.push(byte);
                }
                if self.frame.len() == 6 {
                    let cmd = self.frame[0] & 0x3F;
                    let arg = u32::from_be_bytes([
                        self.frame[1],
                        self.frame[2],
                        self.frame[3],
                        self.frame[4],
                    ]);
                    self.frame.clear();
                    self.command(cmd, arg);
                }
                core::mem::replace(&mut self.write, WriteState::Idle)
            }
        };
        reply
    }
}

impl spi::ErrorType for FakeCard {
    type Error = Infallible;
}

impl spi::SpiBus for FakeCard {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for word in words {
            *word = self.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        for &word in words {
            self.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        for idx in 0..read.len().max(write.len()) {
            let byte = self.exchange(write.get(idx).copied().unwrap_or(0xFF));
            if let Some(slot) = read.get_mut(idx) {
                *slot = byte;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for word in words {
            *word = self.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

struct NoPin;

impl digital::ErrorType for NoPin {
    type Error = Infallible;
}

impl digital::OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

#[test]
fn empty_slot_maps_to_no_card() {
    let slot = CardSlot::new(true);
    let mut card = SdSpiCard::new(FakeCard::new(false), NoPin, slot.clone());
    assert_eq!(block_on(card.init()).unwrap_err(), BlockError::NoCard);
    assert!(!slot.is_inserted());
    assert!(!card.is_initialized());
    assert_eq!(card.sector_count(), 0);
}

#[test]
fn init_reads_identity_and_capacity() {
    let slot = CardSlot::new(false);
    let mut card = SdSpiCard::new(FakeCard::new(true), NoPin, slot.clone());
    let info = block_on(card.init()).unwrap();
    assert_eq!(info.capacity_bytes, 4 * 1024 * 1024);
    assert_eq!(info.sector_count(), 8192);
    assert_eq!(info.name.as_str(), "RUST");
    assert_eq!(info.serial, 0x0102_0304);
    assert!(info.high_capacity);
    assert_eq!(card.version(), Some(SdCardVersion::V2));
    assert!(slot.is_inserted());
}

#[test]
fn sectors_round_trip_through_spi() {
    let mut card = SdSpiCard::new(FakeCard::new(true), NoPin, CardSlot::default());
    block_on(card.init()).unwrap();

    let mut data = [0u8; SECTOR_SIZE];
    for (idx, byte) in data.iter_mut().enumerate() {
        *byte = (idx % 256) as u8;
    }
    block_on(card.write_sector(5, &data)).unwrap();
    assert_eq!(
        &card.spi_mut().image[5 * SECTOR_SIZE..6 * SECTOR_SIZE],
        &data[..]
    );

    let mut back = [0u8; SECTOR_SIZE];
    block_on(card.read_sector(5, &mut back)).unwrap();
    assert_eq!(back, data);
    assert_eq!(
        block_on(card.read_sector(8192, &mut back)).unwrap_err(),
        BlockError::OutOfRange(8192)
    );
}

#[test]
fn pulled_card_mid_session_is_reported_absent() {
    let slot = CardSlot::default();
    let mut card = SdSpiCard::new(FakeCard::new(true), NoPin, slot.clone());
    block_on(card.init()).unwrap();
    card.spi_mut().present = false;

    let mut out = [0u8; SECTOR_SIZE];
    assert_eq!(
        block_on(card.read_sector(0, &mut out)).unwrap_err(),
        BlockError::NoCard
    );
    assert!(!slot.is_inserted());
}

#[test]
fn register_decoding() {
    let mut csd = [0u8; 16];
    csd[0] = 0x40;
    csd[7] = 0x00;
    csd[8] = 0x1D;
    csd[9] = 0xA3;
    // C_SIZE 0x1DA3 -> (7587 + 1) * 512 KiB, a nominal 4 GB card.
    assert_eq!(decode_capacity_bytes(&csd), Some(7588 * 512 * 1024));
    csd[0] = 0x80;
    assert_eq!(decode_capacity_bytes(&csd), None);

    let mut cid = [0u8; 16];
    cid[3..8].copy_from_slice(b"SD16G");
    cid[9..13].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let (name, serial) = parse_cid(&cid);
    assert_eq!(name.as_str(), "SD16G");
    assert_eq!(serial, 0xDEAD_BEEF);
}

#[test]
fn driver_errors_map_to_block_errors() {
    assert_eq!(BlockError::from(SdSpiError::NoResponse(17)), BlockError::NoCard);
    assert_eq!(BlockError::from(SdSpiError::Cmd0Failed(0x05)), BlockError::Rejected);
    assert_eq!(BlockError::from(SdSpiError::WriteBusyTimeout), BlockError::Timeout);
    assert_eq!(
        BlockError::from(SdSpiError::Spi(spi::ErrorKind::Overrun)),
        BlockError::Bus
    );
}
