use alloc::{vec, vec::Vec};

use embassy_time::{Duration, Timer};

use crate::block::{BlockDevice, BlockError, CardInfo, CardSlot, Sector, SECTOR_SIZE};

/// Heap-backed card used for host runs and tests.
///
/// The card answers only while its [`CardSlot`] reports it inserted, can be
/// slowed down per sector, and can be told to fail its next `init`.
pub struct RamDisk {
    data: Vec<u8>,
    slot: CardSlot,
    initialized: bool,
    latency: Option<Duration>,
    init_fault: Option<BlockError>,
    name: &'static str,
    serial: u32,
    reads: u32,
    writes: u32,
}

impl RamDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            data: vec![0; sectors as usize * SECTOR_SIZE],
            slot: CardSlot::new(true),
            initialized: false,
            latency: None,
            init_fault: None,
            name: "RAMSD",
            serial: 0x5D00_0001,
            reads: 0,
            writes: 0,
        }
    }

    pub fn with_identity(mut self, name: &'static str, serial: u32) -> Self {
        self.name = name;
        self.serial = serial;
        self
    }

    pub fn slot(&self) -> CardSlot {
        self.slot.clone()
    }

    pub fn set_latency(&mut self, latency: Option<Duration>) {
        self.latency = latency;
    }

    pub fn fail_next_init(&mut self, fault: BlockError) {
        self.init_fault = Some(fault);
    }

    pub fn image(&self) -> &[u8] {
        &self.data
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }

    pub fn writes(&self) -> u32 {
        self.writes
    }

    fn check_access(&self, lba: u32) -> Result<usize, BlockError> {
        if !self.slot.is_inserted() {
            return Err(BlockError::NoCard);
        }
        if !self.initialized {
            return Err(BlockError::NotInitialized);
        }
        let start = lba as usize * SECTOR_SIZE;
        if start + SECTOR_SIZE > self.data.len() {
            return Err(BlockError::OutOfRange(lba));
        }
        Ok(start)
    }

    async fn settle(&self) {
        if let Some(latency) = self.latency {
            Timer::after(latency).await;
        }
    }
}

impl BlockDevice for RamDisk {
    async fn init(&mut self) -> Result<CardInfo, BlockError> {
        self.initialized = false;
        if !self.slot.is_inserted() {
            return Err(BlockError::NoCard);
        }
        if let Some(fault) = self.init_fault.take() {
            return Err(fault);
        }
        self.settle().await;
        self.initialized = true;
        let mut name = heapless::String::new();
        for ch in self.name.chars().take(crate::block::CARD_NAME_MAX) {
            let _ = name.push(ch);
        }
        Ok(CardInfo {
            capacity_bytes: self.data.len() as u64,
            sector_size: SECTOR_SIZE as u32,
            name,
            serial: self.serial,
            high_capacity: self.data.len() as u64 > 2 * 1024 * 1024 * 1024,
        })
    }

    async fn read_sector(&mut self, lba: u32, out: &mut Sector) -> Result<(), BlockError> {
        let start = self.check_access(lba)?;
        self.settle().await;
        out.copy_from_slice(&self.data[start..start + SECTOR_SIZE]);
        self.reads = self.reads.wrapping_add(1);
        Ok(())
    }

    async fn write_sector(&mut self, lba: u32, data: &Sector) -> Result<(), BlockError> {
        let start = self.check_access(lba)?;
        self.settle().await;
        self.data[start..start + SECTOR_SIZE].copy_from_slice(data);
        self.writes = self.writes.wrapping_add(1);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        if self.initialized {
            (self.data.len() / SECTOR_SIZE) as u32
        } else {
            0
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn release(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;

    #[test]
    fn ejected_card_reports_no_card() {
        let mut disk = RamDisk::new(16);
        let slot = disk.slot();
        slot.eject();
        assert_eq!(block_on(disk.init()).unwrap_err(), BlockError::NoCard);
        slot.insert();
        let info = block_on(disk.init()).unwrap();
        assert_eq!(info.sector_count(), 16);
        assert_eq!(info.name.as_str(), "RAMSD");
    }

    #[test]
    fn access_requires_init_and_bounds() {
        let mut disk = RamDisk::new(4);
        let mut sector = [0u8; SECTOR_SIZE];
        assert_eq!(
            block_on(disk.read_sector(0, &mut sector)).unwrap_err(),
            BlockError::NotInitialized
        );
        block_on(disk.init()).unwrap();
        assert_eq!(
            block_on(disk.read_sector(4, &mut sector)).unwrap_err(),
            BlockError::OutOfRange(4)
        );
        sector[0] = 0xA5;
        block_on(disk.write_sector(3, &sector)).unwrap();
        let mut back = [0u8; SECTOR_SIZE];
        block_on(disk.read_sector(3, &mut back)).unwrap();
        assert_eq!(back[0], 0xA5);
    }

    #[test]
    fn injected_init_fault_fires_once() {
        let mut disk = RamDisk::new(4);
        disk.fail_next_init(BlockError::Bus);
        assert_eq!(block_on(disk.init()).unwrap_err(), BlockError::Bus);
        assert!(block_on(disk.init()).is_ok());
    }
}
