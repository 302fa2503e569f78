use alloc::{boxed::Box, vec::Vec};

use crate::block::{BlockDevice, BlockError, CardInfo, Sector, SECTOR_SIZE};

struct CacheSlot {
    lba: u32,
    stamp: u32,
    data: Box<Sector>,
}

/// Write-through sector cache in front of a [`BlockDevice`].
///
/// Holds up to `capacity` sectors and evicts the least recently used one.
/// A capacity of zero turns it into a pass-through. Contents are dropped on
/// every `init` and `release`, so a swapped card never sees stale sectors.
pub struct CachedDevice<D> {
    inner: D,
    slots: Vec<CacheSlot>,
    capacity: usize,
    tick: u32,
    hits: u32,
    misses: u32,
}

impl<D: BlockDevice> CachedDevice<D> {
    pub fn new(inner: D, capacity: usize) -> Self {
        Self {
            inner,
            slots: Vec::new(),
            capacity,
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.invalidate();
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn invalidate(&mut self) {
        self.slots.clear();
    }

    fn next_stamp(&mut self) -> u32 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    fn lookup(&mut self, lba: u32) -> Option<usize> {
        self.slots.iter().position(|slot| slot.lba == lba)
    }

    fn store(&mut self, lba: u32, data: &Sector) {
        if self.capacity == 0 {
            return;
        }
        let stamp = self.next_stamp();
        if let Some(idx) = self.lookup(lba) {
            let slot = &mut self.slots[idx];
            slot.data.copy_from_slice(data);
            slot.stamp = stamp;
            return;
        }
        if self.slots.len() < self.capacity {
            self.slots.push(CacheSlot {
                lba,
                stamp,
                data: Box::new(*data),
            });
            return;
        }
        if let Some(victim) = self.slots.iter_mut().min_by_key(|slot| slot.stamp) {
            victim.lba = lba;
            victim.stamp = stamp;
            victim.data.copy_from_slice(data);
        }
    }
}

impl<D: BlockDevice> BlockDevice for CachedDevice<D> {
    async fn init(&mut self) -> Result<CardInfo, BlockError> {
        self.invalidate();
        self.inner.init().await
    }

    async fn read_sector(&mut self, lba: u32, out: &mut Sector) -> Result<(), BlockError> {
        if let Some(idx) = self.lookup(lba) {
            let stamp = self.next_stamp();
            let slot = &mut self.slots[idx];
            slot.stamp = stamp;
            out.copy_from_slice(&slot.data[..SECTOR_SIZE]);
            self.hits = self.hits.wrapping_add(1);
            return Ok(());
        }
        self.misses = self.misses.wrapping_add(1);
        self.inner.read_sector(lba, out).await?;
        self.store(lba, out);
        Ok(())
    }

    async fn write_sector(&mut self, lba: u32, data: &Sector) -> Result<(), BlockError> {
        if let Err(err) = self.inner.write_sector(lba, data).await {
            if let Some(idx) = self.lookup(lba) {
                self.slots.swap_remove(idx);
            }
            return Err(err);
        }
        self.store(lba, data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), BlockError> {
        self.inner.flush().await
    }

    fn sector_count(&self) -> u32 {
        self.inner.sector_count()
    }

    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    fn release(&mut self) {
        self.invalidate();
        self.inner.release();
    }
}
