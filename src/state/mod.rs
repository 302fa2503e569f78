//! State shared between submitters, the worker and the health monitor.
//!
//! Everything here sits behind one blocking mutex and is only touched in
//! short critical sections; filesystem calls never run under it.

mod lifecycle;

use alloc::string::String;

use embassy_time::Instant;
use sdcard::CardInfo;
use statig::blocking::IntoStateMachineExt as _;

pub use lifecycle::{LifecycleEvent, LifecycleStatus};

use crate::config::StorageConfig;
use crate::types::{CapacitySnapshot, DeviceState, OperationCounters};
use lifecycle::{DispatchContext, LifecycleMachine};

/// Device lifecycle as a statig machine.
pub struct Lifecycle {
    machine: statig::blocking::StateMachine<LifecycleMachine>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            machine: LifecycleMachine::new().state_machine(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.machine.inner().state
    }

    pub fn apply(&mut self, event: LifecycleEvent) -> LifecycleStatus {
        let before = self.state();
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&event, &mut context);
        if context.status == LifecycleStatus::Applied {
            log::debug!(
                "sdstore: state {} -> {} on={:?}",
                before.label(),
                self.state().label(),
                event
            );
        }
        context.status
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SharedState {
    pub lifecycle: Lifecycle,
    pub config: Option<StorageConfig>,
    pub mount_point: String,
    pub card: Option<CardInfo>,
    pub capacity: Option<CapacitySnapshot>,
    pub counters: OperationCounters,
    /// Card-detect level seen on the previous health tick.
    pub slot_seen: bool,
    /// Wall clock as (unix seconds, instant it was set).
    pub clock: Option<(u32, Instant)>,
}

impl SharedState {
    pub fn new(slot_seen: bool) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            config: None,
            mount_point: String::new(),
            card: None,
            capacity: None,
            counters: OperationCounters::default(),
            slot_seen,
            clock: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.lifecycle.state()
    }

    /// Leaves Mounted and forgets everything that described the volume.
    pub fn drop_volume(&mut self, event: LifecycleEvent) -> LifecycleStatus {
        self.capacity = None;
        self.card = None;
        self.lifecycle.apply(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_mount_leaves_room_for_retry() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), DeviceState::Uninitialized);
        assert_eq!(
            lifecycle.apply(LifecycleEvent::MountOk),
            LifecycleStatus::InvalidTransition
        );
        assert_eq!(lifecycle.apply(LifecycleEvent::Init), LifecycleStatus::Applied);
        assert_eq!(lifecycle.apply(LifecycleEvent::MountFailed), LifecycleStatus::Applied);
        assert_eq!(lifecycle.state(), DeviceState::Unmounted);
        assert_eq!(
            lifecycle.apply(LifecycleEvent::MountFailed),
            LifecycleStatus::Unchanged
        );
        assert_eq!(lifecycle.apply(LifecycleEvent::MountOk), LifecycleStatus::Applied);
        assert_eq!(lifecycle.state(), DeviceState::Mounted);
    }

    #[test]
    fn mounted_rejects_mount_and_deinit() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.apply(LifecycleEvent::Init);
        lifecycle.apply(LifecycleEvent::MountOk);
        assert_eq!(
            lifecycle.apply(LifecycleEvent::MountOk),
            LifecycleStatus::InvalidTransition
        );
        assert_eq!(
            lifecycle.apply(LifecycleEvent::Deinit),
            LifecycleStatus::InvalidTransition
        );
        assert_eq!(
            lifecycle.apply(LifecycleEvent::CardRemoved),
            LifecycleStatus::Applied
        );
        assert_eq!(lifecycle.state(), DeviceState::Unmounted);
    }

    #[test]
    fn fault_is_left_by_recover_or_deinit() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.apply(LifecycleEvent::Init);
        assert_eq!(lifecycle.apply(LifecycleEvent::Fault), LifecycleStatus::Applied);
        assert_eq!(lifecycle.state(), DeviceState::Error);
        assert_eq!(
            lifecycle.apply(LifecycleEvent::MountOk),
            LifecycleStatus::InvalidTransition
        );
        assert_eq!(lifecycle.apply(LifecycleEvent::Recover), LifecycleStatus::Applied);
        assert_eq!(lifecycle.state(), DeviceState::Unmounted);
        lifecycle.apply(LifecycleEvent::Fault);
        assert_eq!(lifecycle.apply(LifecycleEvent::Deinit), LifecycleStatus::Applied);
        assert_eq!(lifecycle.state(), DeviceState::Uninitialized);
    }
}
