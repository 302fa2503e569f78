use alloc::string::String;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex},
    channel::Channel,
};
use embassy_time::Instant;
use sdcard::CardSlot;

use crate::config::{StorageConfig, QUEUE_DEPTH};
use crate::error::StorageError;
use crate::events::{EventSink, NoEventBus, StorageEvent};
use crate::queue::OperationRequest;
use crate::state::{LifecycleEvent, LifecycleStatus, SharedState};
use crate::types::{CapacitySnapshot, DeviceInfo, DeviceState, OperationCounters};

/// Handle to one storage subsystem.
///
/// Callers submit through the `*_async` methods or [`StorageManager::call`];
/// [`StorageManager::run_worker`] executes the queue and
/// [`StorageManager::run_health_monitor`] watches the card. All three only
/// need `&self`, so the handle can live in a `static` or on a test's stack.
pub struct StorageManager<E = NoEventBus> {
    shared: Mutex<CriticalSectionRawMutex, RefCell<SharedState>>,
    pub(crate) queue: Channel<CriticalSectionRawMutex, OperationRequest, QUEUE_DEPTH>,
    next_id: AtomicU32,
    stopped: AtomicBool,
    slot: CardSlot,
    events: E,
}

impl StorageManager<NoEventBus> {
    pub fn without_events(slot: CardSlot) -> Self {
        Self::new(slot, NoEventBus)
    }
}

impl<E: EventSink> StorageManager<E> {
    pub fn new(slot: CardSlot, events: E) -> Self {
        let seen = slot.is_inserted();
        Self {
            shared: Mutex::new(RefCell::new(SharedState::new(seen))),
            queue: Channel::new(),
            next_id: AtomicU32::new(1),
            stopped: AtomicBool::new(false),
            slot,
            events,
        }
    }

    pub fn init(&self, config: StorageConfig) -> Result<(), StorageError> {
        config.validate()?;
        self.with_state(|state| {
            if state.state() != DeviceState::Uninitialized {
                return Err(StorageError::InvalidState);
            }
            state.lifecycle.apply(LifecycleEvent::Init);
            state.mount_point = config.mount_point.clone();
            state.config = Some(config);
            state.counters = OperationCounters::default();
            Ok(())
        })?;
        log::info!("sdstore: init_ok mount_point={}", self.mount_point());
        Ok(())
    }

    /// Back to Uninitialized. The volume has to be unmounted first.
    pub fn deinit(&self) -> Result<(), StorageError> {
        self.with_state(|state| match state.lifecycle.apply(LifecycleEvent::Deinit) {
            LifecycleStatus::InvalidTransition => Err(StorageError::InvalidState),
            _ => {
                state.config = None;
                state.card = None;
                state.capacity = None;
                Ok(())
            }
        })
    }

    /// Marks the device unusable until [`StorageManager::recover`] or
    /// `deinit`.
    pub fn fault(&self) -> Result<(), StorageError> {
        let status = self.with_state(|state| state.drop_volume(LifecycleEvent::Fault));
        if status == LifecycleStatus::InvalidTransition {
            return Err(StorageError::InvalidState);
        }
        log::error!("sdstore: device_fault");
        Ok(())
    }

    pub fn recover(&self) -> Result<(), StorageError> {
        match self.with_state(|state| state.lifecycle.apply(LifecycleEvent::Recover)) {
            LifecycleStatus::InvalidTransition => Err(StorageError::InvalidState),
            _ => Ok(()),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.with_state(|state| state.state())
    }

    pub fn is_initialized(&self) -> bool {
        self.state() != DeviceState::Uninitialized
    }

    /// Mounted with the slot reporting a card. The bus of an unmounted
    /// slot is never touched.
    pub fn is_card_present(&self) -> bool {
        self.state() == DeviceState::Mounted && self.slot.is_inserted()
    }

    pub fn get_info(&self) -> DeviceInfo {
        let present = self.is_card_present();
        self.with_state(|state| {
            let mut info = DeviceInfo {
                card_present: present,
                mounted: state.state() == DeviceState::Mounted,
                mount_point: state.mount_point.clone(),
                max_files: state.config.as_ref().map_or(0, |config| config.max_files),
                ..DeviceInfo::default()
            };
            if let Some(card) = state.card.as_ref() {
                info.capacity_bytes = card.capacity_bytes;
                info.sector_size = card.sector_size;
                info.card_name = card.name.clone();
                info.serial_number = card.serial;
            }
            info
        })
    }

    pub fn get_capacity(&self) -> Result<CapacitySnapshot, StorageError> {
        self.with_state(|state| match (state.state(), state.capacity) {
            (DeviceState::Mounted, Some(capacity)) => Ok(capacity),
            _ => Err(StorageError::InvalidState),
        })
    }

    pub fn counters(&self) -> OperationCounters {
        self.with_state(|state| state.counters)
    }

    pub fn config(&self) -> Option<StorageConfig> {
        self.with_state(|state| state.config.clone())
    }

    /// Active mount point: the configured one until a mount names another.
    pub fn mount_point(&self) -> String {
        self.with_state(|state| state.mount_point.clone())
    }

    /// Sets the wall clock used for file timestamps.
    pub fn set_time(&self, unix_secs: u32) {
        self.with_state(|state| state.clock = Some((unix_secs, Instant::now())));
    }

    pub fn now_unix(&self) -> Option<u32> {
        self.with_state(|state| state.clock).map(|(base, set_at)| {
            let elapsed = Instant::now().saturating_duration_since(set_at).as_secs();
            base.saturating_add(elapsed.min(u32::MAX as u64) as u32)
        })
    }

    pub fn slot(&self) -> &CardSlot {
        &self.slot
    }

    /// Requests waiting for the worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Ends the worker and monitor loops. Later submissions fail with
    /// InvalidState.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        self.shared.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub(crate) fn post(&self, event: StorageEvent) {
        log::debug!("sdstore: event {}", event.label());
        self.events.post(event);
    }
}
