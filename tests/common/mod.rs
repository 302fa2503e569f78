#![allow(dead_code)]

use core::future::Future;

use embassy_futures::{
    block_on,
    select::{select, Either},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use sdcard::RamDisk;
use sdstore::{
    EventSink, Operation, OperationOutput, StorageConfig, StorageError, StorageEvent,
    StorageManager,
};

pub const SECTORS: u32 = 8192;

pub type EventLog = Channel<CriticalSectionRawMutex, StorageEvent, 64>;

/// Small clusters so a few-MiB card still formats.
pub fn config() -> StorageConfig {
    StorageConfig {
        allocation_unit_size: 1024,
        ..StorageConfig::default()
    }
}

pub fn disk() -> RamDisk {
    RamDisk::new(SECTORS)
}

/// Drives the worker alongside `body` until `body` finishes.
pub fn run<E, F>(manager: &StorageManager<E>, disk: RamDisk, body: F) -> F::Output
where
    E: EventSink,
    F: Future,
{
    block_on(async {
        match select(manager.run_worker(disk), body).await {
            Either::First(()) => panic!("worker stopped before the test body finished"),
            Either::Second(output) => output,
        }
    })
}

pub async fn mount<E: EventSink>(manager: &StorageManager<E>) -> Result<(), StorageError> {
    manager
        .call(Operation::Mount {
            path: "/sdcard".into(),
            format_if_mount_failed: true,
        })
        .await
        .map(|_| ())
}

pub async fn mkdir<E: EventSink>(manager: &StorageManager<E>, path: &str) {
    let done = manager
        .call(Operation::Mkdir {
            path: path.into(),
            create_parents: true,
        })
        .await;
    assert_eq!(done, Ok(OperationOutput::Done), "mkdir {path}");
}

pub async fn write<E: EventSink>(
    manager: &StorageManager<E>,
    path: &str,
    data: &[u8],
) -> Result<OperationOutput, StorageError> {
    manager
        .call(Operation::Write {
            path: path.into(),
            data: sdstore::Payload::copy_from(data)?,
            options: sdstore::WriteOptions::default(),
        })
        .await
}

pub async fn read<E: EventSink>(
    manager: &StorageManager<E>,
    path: &str,
) -> Result<Vec<u8>, StorageError> {
    match manager.call(Operation::Read { path: path.into() }).await? {
        OperationOutput::Data(data) => Ok(data),
        other => panic!("read returned {other:?}"),
    }
}

pub fn drain(events: &EventLog) -> Vec<StorageEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_receive() {
        seen.push(event);
    }
    seen
}
