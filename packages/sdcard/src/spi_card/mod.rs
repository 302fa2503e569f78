//! SPI-mode SD card driver.
//!
//! Generic over any `embedded-hal` 1.0 [`SpiBus`] plus a chip-select pin.
//! The bus must run at 400 kHz or less until [`BlockDevice::init`] returns;
//! it is up to the board code to raise the clock afterwards.

mod helpers;
mod init;
mod io;

#[cfg(test)]
mod tests;

use embedded_hal::{digital::OutputPin, spi::SpiBus};

use crate::block::{BlockDevice, BlockError, CardInfo, CardSlot, Sector};

const SD_CMD0: u8 = 0;
const SD_CMD8: u8 = 8;
const SD_CMD9: u8 = 9;
const SD_CMD10: u8 = 10;
const SD_CMD16: u8 = 16;
const SD_CMD17: u8 = 17;
const SD_CMD24: u8 = 24;
const SD_CMD55: u8 = 55;
const SD_ACMD41: u8 = 41;
const SD_CMD58: u8 = 58;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdSpiError {
    Spi(embedded_hal::spi::ErrorKind),
    Pin(embedded_hal::digital::ErrorKind),
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd10Unexpected(u8),
    Cmd16Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
}

impl SdSpiError {
    /// Signatures of an empty slot: nothing ever pulls MISO low, or the card
    /// never leaves idle.
    pub fn is_no_card(self) -> bool {
        matches!(
            self,
            Self::NoResponse(_) | Self::Cmd0Failed(0xFF) | Self::Acmd41Timeout(_)
        )
    }
}

impl From<SdSpiError> for BlockError {
    fn from(value: SdSpiError) -> Self {
        match value {
            err if err.is_no_card() => BlockError::NoCard,
            SdSpiError::Spi(_) | SdSpiError::Pin(_) => BlockError::Bus,
            SdSpiError::DataTokenTimeout(_) | SdSpiError::WriteBusyTimeout => {
                BlockError::Timeout
            }
            SdSpiError::NotInitialized => BlockError::NotInitialized,
            _ => BlockError::Rejected,
        }
    }
}

fn spi_err<E: embedded_hal::spi::Error>(err: E) -> SdSpiError {
    SdSpiError::Spi(err.kind())
}

fn pin_err<E: embedded_hal::digital::Error>(err: E) -> SdSpiError {
    SdSpiError::Pin(err.kind())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CardState {
    high_capacity: bool,
    sector_count: u32,
}

pub struct SdSpiCard<SPI, CS> {
    spi: SPI,
    cs: CS,
    slot: CardSlot,
    card: Option<CardState>,
    version: Option<SdCardVersion>,
}

impl<SPI, CS> SdSpiCard<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    pub fn new(spi: SPI, mut cs: CS, slot: CardSlot) -> Self {
        let _ = cs.set_high();
        Self {
            spi,
            cs,
            slot,
            card: None,
            version: None,
        }
    }

    pub fn version(&self) -> Option<SdCardVersion> {
        self.version
    }

    pub fn spi_mut(&mut self) -> &mut SPI {
        &mut self.spi
    }

    pub fn release_bus(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn note_failure(&mut self, err: SdSpiError) -> BlockError {
        if err.is_no_card() {
            self.card = None;
            self.slot.eject();
        }
        err.into()
    }
}

impl<SPI, CS> BlockDevice for SdSpiCard<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    async fn init(&mut self) -> Result<CardInfo, BlockError> {
        self.card = None;
        match self.bring_up().await {
            Ok(info) => {
                self.slot.insert();
                Ok(info)
            }
            Err(err) => Err(self.note_failure(err)),
        }
    }

    async fn read_sector(&mut self, lba: u32, out: &mut Sector) -> Result<(), BlockError> {
        let card = self.card.ok_or(BlockError::NotInitialized)?;
        if lba >= card.sector_count {
            return Err(BlockError::OutOfRange(lba));
        }
        match self.read_data_sector_512_into(lba, card.high_capacity, out).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.note_failure(err)),
        }
    }

    async fn write_sector(&mut self, lba: u32, data: &Sector) -> Result<(), BlockError> {
        let card = self.card.ok_or(BlockError::NotInitialized)?;
        if lba >= card.sector_count {
            return Err(BlockError::OutOfRange(lba));
        }
        match self.write_data_sector_512(lba, card.high_capacity, data).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.note_failure(err)),
        }
    }

    fn sector_count(&self) -> u32 {
        self.card.map(|card| card.sector_count).unwrap_or(0)
    }

    fn is_initialized(&self) -> bool {
        self.card.is_some()
    }

    fn release(&mut self) {
        self.card = None;
        let _ = self.cs.set_high();
    }
}
