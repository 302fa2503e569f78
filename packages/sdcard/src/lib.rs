#![cfg_attr(not(test), no_std)]

//! Removable-card block layer and FAT32 engine.
//!
//! [`spi_card::SdSpiCard`] talks to a real card over SPI, [`ramdisk::RamDisk`]
//! stands in for one on the host. Both sit behind [`BlockDevice`], which is
//! all [`fat`] needs.

extern crate alloc;

pub mod block;
pub mod cache;
pub mod fat;
pub mod spi_card;
pub mod ramdisk;

pub use block::{BlockDevice, BlockError, CardInfo, CardSlot, Sector, SECTOR_SIZE};
pub use cache::CachedDevice;
pub use spi_card::SdSpiCard;
pub use ramdisk::RamDisk;
