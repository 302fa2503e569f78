use embassy_time::Timer;
use embedded_hal::{digital::OutputPin, spi::SpiBus};

use super::helpers::{decode_capacity_bytes, parse_cid};
use super::{
    CardState, SdSpiCard, SdCardVersion, SdSpiError, SD_ACMD41, SD_CMD0, SD_CMD10, SD_CMD16,
    SD_CMD55, SD_CMD58, SD_CMD8, SD_CMD9,
};
use crate::block::{CardInfo, SECTOR_SIZE};

impl<SPI, CS> SdSpiCard<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    pub(super) async fn bring_up(&mut self) -> Result<CardInfo, SdSpiError> {
        self.cs.set_high().map_err(super::pin_err)?;
        self.send_dummy_clocks(10).await?;

        let mut cmd0_r1 = 0xFFu8;
        for _ in 0..16 {
            cmd0_r1 = match self.send_command(SD_CMD0, 0, 0x95, &mut []).await {
                Ok(r1) => r1,
                Err(SdSpiError::NoResponse(_)) => 0xFF,
                Err(err) => return Err(err),
            };
            if cmd0_r1 == 0x01 {
                break;
            }
        }
        if cmd0_r1 != 0x01 {
            return Err(SdSpiError::Cmd0Failed(cmd0_r1));
        }

        let mut r7 = [0u8; 4];
        let cmd8_r1 = self
            .send_command(SD_CMD8, 0x0000_01AA, 0x87, &mut r7)
            .await?;
        let card_version = if cmd8_r1 == 0x01 {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                return Err(SdSpiError::Cmd8EchoMismatch(r7));
            }
            SdCardVersion::V2
        } else if (cmd8_r1 & 0x04) != 0 {
            SdCardVersion::V1
        } else {
            return Err(SdSpiError::Cmd8Unexpected(cmd8_r1));
        };

        let acmd41_arg = if card_version == SdCardVersion::V2 {
            0x4000_0000
        } else {
            0
        };
        let mut acmd41_r1 = 0xFFu8;
        let mut acmd41_ok = false;
        for _ in 0..200 {
            let _ = self.send_command(SD_CMD55, 0, 0x65, &mut []).await?;
            acmd41_r1 = self
                .send_command(SD_ACMD41, acmd41_arg, 0x77, &mut [])
                .await?;
            if acmd41_r1 == 0x00 {
                acmd41_ok = true;
                break;
            }
            self.retry_delay().await;
        }
        if !acmd41_ok {
            return Err(SdSpiError::Acmd41Timeout(acmd41_r1));
        }

        if card_version == SdCardVersion::V1 {
            let cmd16_r1 = self
                .send_command(SD_CMD16, SECTOR_SIZE as u32, 0xFF, &mut [])
                .await?;
            if cmd16_r1 != 0x00 {
                return Err(SdSpiError::Cmd16Unexpected(cmd16_r1));
            }
        }

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.send_command(SD_CMD58, 0, 0xFD, &mut ocr).await?;
        if cmd58_r1 != 0x00 {
            return Err(SdSpiError::Cmd58Unexpected(cmd58_r1));
        }

        let csd = self.read_register(SD_CMD9, 0xAF).await?;
        let cid = self.read_register(SD_CMD10, 0x1B).await?;
        let capacity_bytes =
            decode_capacity_bytes(&csd).ok_or(SdSpiError::CapacityDecodeFailed)?;
        let high_capacity = (ocr[0] & 0x40) != 0;
        let (name, serial) = parse_cid(&cid);

        let sector_count = (capacity_bytes / SECTOR_SIZE as u64).min(u32::MAX as u64) as u32;
        self.card = Some(CardState {
            high_capacity,
            sector_count,
        });
        self.version = Some(card_version);
        log::info!(
            "sdcard: card_ready version={:?} high_capacity={} capacity_bytes={} name={}",
            card_version,
            high_capacity,
            capacity_bytes,
            name.as_str()
        );
        Ok(CardInfo {
            capacity_bytes,
            sector_size: SECTOR_SIZE as u32,
            name,
            serial,
            high_capacity,
        })
    }

    async fn read_register(&mut self, cmd: u8, crc: u8) -> Result<[u8; 16], SdSpiError> {
        let r1 = self.send_command_hold_cs(cmd, 0, crc, &mut []).await?;
        if r1 != 0x00 {
            self.end_transaction().await;
            return Err(match cmd {
                SD_CMD9 => SdSpiError::Cmd9Unexpected(r1),
                _ => SdSpiError::Cmd10Unexpected(r1),
            });
        }
        let mut block = [0u8; 16];
        let result = self.read_data_block(cmd, &mut block).await;
        self.end_transaction().await;
        result.map(|()| block)
    }

    async fn retry_delay(&self) {
        Timer::after_millis(1).await;
    }
}
