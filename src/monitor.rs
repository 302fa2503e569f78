//! Periodic card and free-space check.
//!
//! Reads the card-detect flag and the capacity snapshot the worker keeps
//! current; it never touches the bus, so it cannot race the worker.

use embassy_time::{Duration, Timer};

use crate::config::{HEALTH_PERIOD_MS, LOW_SPACE_PERCENT};
use crate::events::{EventSink, StorageEvent};
use crate::manager::StorageManager;
use crate::state::LifecycleEvent;
use crate::types::DeviceState;

impl<E: EventSink> StorageManager<E> {
    /// Runs [`StorageManager::health_tick`] every 5 s until stopped.
    pub async fn run_health_monitor(&self) {
        while !self.is_stopped() {
            Timer::after(Duration::from_millis(HEALTH_PERIOD_MS)).await;
            if self.is_stopped() {
                break;
            }
            self.health_tick();
        }
    }

    /// One monitor pass. Returns the event it posted, if any.
    pub fn health_tick(&self) -> Option<StorageEvent> {
        let inserted = self.slot().is_inserted();
        let event = self.with_state(|state| {
            let was_inserted = core::mem::replace(&mut state.slot_seen, inserted);
            match state.state() {
                DeviceState::Mounted if !inserted => {
                    state.drop_volume(LifecycleEvent::CardRemoved);
                    Some(StorageEvent::CardRemoved)
                }
                DeviceState::Mounted => state
                    .capacity
                    .filter(|capacity| capacity.is_below(LOW_SPACE_PERCENT))
                    .map(|capacity| StorageEvent::LowSpaceWarning {
                        free_bytes: capacity.free_bytes,
                        total_bytes: capacity.total_bytes,
                    }),
                DeviceState::Initialized | DeviceState::Unmounted
                    if inserted && !was_inserted =>
                {
                    let hot_swap = state
                        .config
                        .as_ref()
                        .is_some_and(|config| config.enable_hot_swap);
                    hot_swap.then_some(StorageEvent::CardInserted)
                }
                _ => None,
            }
        })?;

        match event {
            StorageEvent::CardRemoved => log::info!("sdstore: card_removed during=health_check"),
            StorageEvent::LowSpaceWarning {
                free_bytes,
                total_bytes,
            } => log::warn!(
                "sdstore: low_space free_bytes={} total_bytes={}",
                free_bytes,
                total_bytes
            ),
            _ => log::info!("sdstore: card_inserted"),
        }
        self.post(event);
        Some(event)
    }
}
