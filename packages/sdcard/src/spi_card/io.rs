use embedded_hal::{digital::OutputPin, spi::SpiBus};

use super::{spi_err, SdSpiCard, SdSpiError, SD_CMD17, SD_CMD24};
use crate::block::{Sector, SECTOR_SIZE};

const DATA_TOKEN: u8 = 0xFE;

impl<SPI, CS> SdSpiCard<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    pub(super) async fn write_data_sector_512(
        &mut self,
        lba: u32,
        high_capacity: bool,
        data: &Sector,
    ) -> Result<(), SdSpiError> {
        let arg = if high_capacity {
            lba
        } else {
            lba.saturating_mul(SECTOR_SIZE as u32)
        };

        let cmd24_r1 = self
            .send_command_hold_cs(SD_CMD24, arg, 0xFF, &mut [])
            .await?;
        if cmd24_r1 != 0x00 {
            self.end_transaction().await;
            return Err(SdSpiError::Cmd24Unexpected(cmd24_r1));
        }

        let _ = self.transfer_byte(0xFF).await?;
        let _ = self.transfer_byte(DATA_TOKEN).await?;
        let mut frame = *data;
        self.spi.transfer_in_place(&mut frame).map_err(spi_err)?;
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        let _ = self.transfer_byte(0xFF).await?;
        let _ = self.transfer_byte(0xFF).await?;

        let response = self.transfer_byte(0xFF).await? & 0x1F;
        if response != 0x05 {
            self.end_transaction().await;
            return Err(SdSpiError::WriteDataRejected(response));
        }

        let mut released = false;
        for _ in 0..200_000 {
            if self.transfer_byte(0xFF).await? == 0xFF {
                released = true;
                break;
            }
        }
        self.end_transaction().await;
        if !released {
            return Err(SdSpiError::WriteBusyTimeout);
        }
        Ok(())
    }

    pub(super) async fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdSpiError> {
        self.send_command_inner(cmd, arg, crc, extra_response, true)
            .await
    }

    pub(super) async fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdSpiError> {
        self.send_command_inner(cmd, arg, crc, extra_response, false)
            .await
    }

    async fn send_command_inner(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
        release_cs_after: bool,
    ) -> Result<u8, SdSpiError> {
        let frame = [
            0x40 | cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            crc,
        ];

        self.cs.set_low().map_err(super::pin_err)?;
        for byte in frame {
            let _ = self.transfer_byte(byte).await?;
        }

        let mut r1 = 0xFFu8;
        let mut got_response = false;
        for _ in 0..16 {
            r1 = self.transfer_byte(0xFF).await?;
            if (r1 & 0x80) == 0 {
                got_response = true;
                break;
            }
        }

        if !got_response {
            self.end_transaction().await;
            return Err(SdSpiError::NoResponse(cmd));
        }

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF).await?;
        }

        if release_cs_after {
            self.end_transaction().await;
        }
        Ok(r1)
    }

    pub(super) async fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SdSpiError> {
        for _ in 0..bytes {
            let _ = self.transfer_byte(0xFF).await?;
        }
        Ok(())
    }

    async fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdSpiError> {
        let mut frame = [byte];
        self.spi.transfer_in_place(&mut frame).map_err(spi_err)?;
        Ok(frame[0])
    }

    async fn wait_data_token(&mut self, cmd: u8) -> Result<(), SdSpiError> {
        let mut token = 0xFFu8;
        for _ in 0..50_000 {
            token = self.transfer_byte(0xFF).await?;
            if token != 0xFF {
                break;
            }
        }
        match token {
            DATA_TOKEN => Ok(()),
            0xFF => Err(SdSpiError::DataTokenTimeout(cmd)),
            other => Err(SdSpiError::DataTokenUnexpected(cmd, other)),
        }
    }

    pub(super) async fn read_data_block(
        &mut self,
        cmd: u8,
        out: &mut [u8],
    ) -> Result<(), SdSpiError> {
        self.wait_data_token(cmd).await?;
        out.fill(0xFF);
        self.spi.transfer_in_place(out).map_err(spi_err)?;
        // Read and discard CRC16.
        let _ = self.transfer_byte(0xFF).await?;
        let _ = self.transfer_byte(0xFF).await?;
        Ok(())
    }

    pub(super) async fn read_data_sector_512_into(
        &mut self,
        lba: u32,
        high_capacity: bool,
        out: &mut Sector,
    ) -> Result<(), SdSpiError> {
        let arg = if high_capacity {
            lba
        } else {
            lba.saturating_mul(SECTOR_SIZE as u32)
        };
        let cmd17_r1 = self
            .send_command_hold_cs(SD_CMD17, arg, 0xFF, &mut [])
            .await?;
        if cmd17_r1 != 0x00 {
            self.end_transaction().await;
            return Err(SdSpiError::Cmd17Unexpected(cmd17_r1));
        }

        let result = self.read_data_block(SD_CMD17, out).await;
        self.end_transaction().await;
        result
    }

    pub(super) async fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF).await;
    }
}
