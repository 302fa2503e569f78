use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

pub const SECTOR_SIZE: usize = 512;
pub const CARD_NAME_MAX: usize = 8;

pub type Sector = [u8; SECTOR_SIZE];

/// Failure classes a block device reports to the filesystem layer.
///
/// Drivers map their transport-specific errors onto these. `NoCard` is the
/// one class callers treat as an expected condition rather than a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockError {
    NoCard,
    NotInitialized,
    OutOfRange(u32),
    Timeout,
    Rejected,
    Bus,
    WriteProtected,
}

impl BlockError {
    pub fn is_card_absent(self) -> bool {
        matches!(self, Self::NoCard)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NoCard => "no_card",
            Self::NotInitialized => "not_initialized",
            Self::OutOfRange(_) => "out_of_range",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::Bus => "bus",
            Self::WriteProtected => "write_protected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardInfo {
    pub capacity_bytes: u64,
    pub sector_size: u32,
    pub name: heapless::String<CARD_NAME_MAX>,
    pub serial: u32,
    pub high_capacity: bool,
}

impl CardInfo {
    pub fn sector_count(&self) -> u32 {
        (self.capacity_bytes / SECTOR_SIZE as u64).min(u32::MAX as u64) as u32
    }
}

/// Sector-addressed storage that a FAT volume can live on.
#[allow(async_fn_in_trait)]
pub trait BlockDevice {
    /// Brings the card up and reports its identity. Must be called again after
    /// [`BlockDevice::release`].
    async fn init(&mut self) -> Result<CardInfo, BlockError>;

    async fn read_sector(&mut self, lba: u32, out: &mut Sector) -> Result<(), BlockError>;

    async fn write_sector(&mut self, lba: u32, data: &Sector) -> Result<(), BlockError>;

    async fn flush(&mut self) -> Result<(), BlockError> {
        Ok(())
    }

    /// Number of addressable sectors, or 0 while the card is not initialized.
    fn sector_count(&self) -> u32;

    fn is_initialized(&self) -> bool;

    /// Drops any per-card state; the next access needs a fresh `init`.
    fn release(&mut self);
}

/// Shared card-detect flag.
///
/// Updated by whoever can observe the slot (a card-detect GPIO interrupt, a
/// driver noticing the card stopped answering, a test) and read without
/// touching the bus.
#[derive(Clone, Debug)]
pub struct CardSlot {
    inserted: Arc<AtomicBool>,
}

impl CardSlot {
    pub fn new(inserted: bool) -> Self {
        Self {
            inserted: Arc::new(AtomicBool::new(inserted)),
        }
    }

    pub fn is_inserted(&self) -> bool {
        self.inserted.load(Ordering::Acquire)
    }

    pub fn insert(&self) {
        self.inserted.store(true, Ordering::Release);
    }

    pub fn eject(&self) {
        self.inserted.store(false, Ordering::Release);
    }

    pub fn set(&self, inserted: bool) {
        self.inserted.store(inserted, Ordering::Release);
    }
}

impl Default for CardSlot {
    fn default() -> Self {
        Self::new(true)
    }
}
