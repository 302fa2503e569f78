mod common;

use std::sync::{Arc, Mutex};

use common::{config, disk, drain, mount, read, run, write, EventLog};
use embassy_time::Duration;
use sdcard::RamDisk;
use sdstore::{
    DeviceState, Operation, OperationKind, OperationOutput, OperationResult, StorageError,
    StorageEvent, StorageManager,
};

type Outcome = Arc<Mutex<Option<OperationResult>>>;

fn slow_disk() -> RamDisk {
    let mut disk = disk();
    disk.set_latency(Some(Duration::from_millis(1)));
    disk
}

fn recorder(outcome: &Outcome) -> impl FnOnce(OperationKind, OperationResult) + Send + 'static {
    let outcome = outcome.clone();
    move |_, result| *outcome.lock().unwrap() = Some(result)
}

/// Anything queued before this call has completed once it returns.
async fn settle<E: sdstore::EventSink>(manager: &StorageManager<E>) {
    assert!(manager.call(Operation::Stat { path: "/".into() }).await.is_ok());
}

fn free_bytes<E: sdstore::EventSink>(manager: &StorageManager<E>) -> u64 {
    manager.get_capacity().unwrap().free_bytes
}

#[test]
fn slow_new_file_times_out_without_a_trace() {
    let disk = slow_disk();
    let events = EventLog::new();
    let manager = StorageManager::new(disk.slot(), &events);
    manager.init(config()).unwrap();
    let outcome = Outcome::default();

    run(&manager, disk, async {
        mount(&manager).await.unwrap();
        let before = free_bytes(&manager);
        manager
            .write_file_async("/sdcard/big.bin", &[0x5A; 64 * 1024], 10, recorder(&outcome))
            .await
            .unwrap();
        settle(&manager).await;
        assert_eq!(
            read(&manager, "/sdcard/big.bin").await,
            Err(StorageError::NotFound)
        );
        assert_eq!(free_bytes(&manager), before);
    });

    assert_eq!(*outcome.lock().unwrap(), Some(Err(StorageError::Timeout)));
    assert_eq!(manager.counters().timed_out, 1);
    let seen = drain(&events);
    assert!(seen.iter().any(|event| matches!(
        event,
        StorageEvent::OperationFailed {
            kind: OperationKind::Write,
            error: StorageError::Timeout,
            ..
        }
    )));
    assert!(!seen
        .iter()
        .any(|event| matches!(event, StorageEvent::IoError { .. })));
}

#[test]
fn timed_out_overwrite_keeps_the_previous_contents() {
    let disk = slow_disk();
    let manager = StorageManager::without_events(disk.slot());
    manager.init(config()).unwrap();
    let outcome = Outcome::default();
    let original: Vec<u8> = (0..8 * 1024).map(|i| (i % 251) as u8).collect();

    run(&manager, disk, async {
        mount(&manager).await.unwrap();
        write(&manager, "/sdcard/a.bin", &original).await.unwrap();
        let before = free_bytes(&manager);

        manager
            .write_file_async("/sdcard/a.bin", &[0xEE; 64 * 1024], 40, recorder(&outcome))
            .await
            .unwrap();
        settle(&manager).await;

        assert_eq!(read(&manager, "/sdcard/a.bin").await.unwrap(), original);
        assert_eq!(free_bytes(&manager), before);
        assert_eq!(manager.state(), DeviceState::Mounted);
        match manager.call(Operation::Usage).await {
            Ok(OperationOutput::Stats(stats)) => {
                assert_eq!(stats.file_count, 1);
                assert_eq!(stats.free_bytes, before);
            }
            other => panic!("unexpected usage result {other:?}"),
        }

        // A deadline that is long enough still replaces the file.
        write(&manager, "/sdcard/a.bin", b"short").await.unwrap();
        assert_eq!(read(&manager, "/sdcard/a.bin").await.unwrap(), b"short");
    });

    assert_eq!(*outcome.lock().unwrap(), Some(Err(StorageError::Timeout)));
    assert_eq!(manager.counters().timed_out, 1);
}

#[test]
fn timed_out_append_keeps_the_original_prefix() {
    let disk = slow_disk();
    let manager = StorageManager::without_events(disk.slot());
    manager.init(config()).unwrap();
    let outcome = Outcome::default();
    let original = vec![0x11; 3000];

    run(&manager, disk, async {
        mount(&manager).await.unwrap();
        write(&manager, "/sdcard/log.txt", &original).await.unwrap();
        let before = free_bytes(&manager);

        manager
            .append_file_async("/sdcard/log.txt", &[0x22; 64 * 1024], 40, recorder(&outcome))
            .await
            .unwrap();
        settle(&manager).await;

        assert_eq!(read(&manager, "/sdcard/log.txt").await.unwrap(), original);
        assert_eq!(free_bytes(&manager), before);

        let extra = manager
            .call(Operation::Append {
                path: "/sdcard/log.txt".into(),
                data: sdstore::Payload::copy_from(b"tail").unwrap(),
            })
            .await;
        assert_eq!(extra, Ok(OperationOutput::Done));
        let grown = read(&manager, "/sdcard/log.txt").await.unwrap();
        assert_eq!(&grown[..3000], &original[..]);
        assert_eq!(&grown[3000..], b"tail");
    });

    assert_eq!(*outcome.lock().unwrap(), Some(Err(StorageError::Timeout)));
}

#[test]
fn lifecycle_operations_ignore_short_timeouts() {
    let disk = slow_disk();
    let manager = StorageManager::without_events(disk.slot());
    manager.init(config()).unwrap();
    let unmounted = Outcome::default();
    let mounted = Outcome::default();
    let formatted = Outcome::default();

    run(&manager, disk, async {
        mount(&manager).await.unwrap();
        write(&manager, "/sdcard/keep.txt", b"kept").await.unwrap();

        manager
            .unmount_async("/sdcard", 1, recorder(&unmounted))
            .await
            .unwrap();
        manager
            .mount_async("/sdcard", false, 1, recorder(&mounted))
            .await
            .unwrap();
        settle(&manager).await;
        assert_eq!(manager.state(), DeviceState::Mounted);
        assert_eq!(read(&manager, "/sdcard/keep.txt").await.unwrap(), b"kept");

        manager.format_async(1, recorder(&formatted)).await.unwrap();
        settle(&manager).await;
        assert_eq!(manager.state(), DeviceState::Mounted);
        assert_eq!(
            read(&manager, "/sdcard/keep.txt").await,
            Err(StorageError::NotFound)
        );
        write(&manager, "/sdcard/new.txt", b"fresh").await.unwrap();
        assert_eq!(read(&manager, "/sdcard/new.txt").await.unwrap(), b"fresh");
    });

    for outcome in [&unmounted, &mounted, &formatted] {
        assert_eq!(*outcome.lock().unwrap(), Some(Ok(OperationOutput::Done)));
    }
    assert_eq!(manager.counters().timed_out, 0);
}
