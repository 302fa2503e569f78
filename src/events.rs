use embassy_sync::{blocking_mutex::raw::RawMutex, channel::Channel};

use crate::error::StorageError;
use crate::queue::OperationKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageEvent {
    Mounted,
    Unmounted,
    CardInserted,
    CardRemoved,
    OperationComplete {
        id: u32,
        kind: OperationKind,
    },
    OperationFailed {
        id: u32,
        kind: OperationKind,
        error: StorageError,
    },
    LowSpaceWarning {
        free_bytes: u64,
        total_bytes: u64,
    },
    FilesystemError {
        cause: &'static str,
    },
    IoError {
        cause: &'static str,
    },
}

impl StorageEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
            Self::CardInserted => "card_inserted",
            Self::CardRemoved => "card_removed",
            Self::OperationComplete { .. } => "operation_complete",
            Self::OperationFailed { .. } => "operation_failed",
            Self::LowSpaceWarning { .. } => "low_space_warning",
            Self::FilesystemError { .. } => "filesystem_error",
            Self::IoError { .. } => "io_error",
        }
    }
}

/// Where lifecycle and health notifications go. Posting never blocks and
/// never fails the operation that triggered it.
pub trait EventSink {
    fn post(&self, event: StorageEvent);
}

/// Sink for builds without an event bus.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEventBus;

impl EventSink for NoEventBus {
    fn post(&self, _event: StorageEvent) {}
}

impl<M: RawMutex, const N: usize> EventSink for Channel<M, StorageEvent, N> {
    fn post(&self, event: StorageEvent) {
        if self.try_send(event).is_err() {
            log::warn!("sdstore: event_drop event={}", event.label());
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn post(&self, event: StorageEvent) {
        (**self).post(event)
    }
}

#[cfg(test)]
mod tests {
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    use super::*;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let bus: Channel<CriticalSectionRawMutex, StorageEvent, 1> = Channel::new();
        bus.post(StorageEvent::Mounted);
        bus.post(StorageEvent::CardRemoved);
        assert_eq!(bus.try_receive().ok(), Some(StorageEvent::Mounted));
        assert!(bus.try_receive().is_err());
        NoEventBus.post(StorageEvent::Unmounted);
    }
}
