mod common;

use common::{config, drain, mount, read, run, write, EventLog};
use sdcard::RamDisk;
use sdstore::{DeviceState, StorageConfig, StorageError, StorageEvent, StorageManager};

#[test]
fn low_space_warning_fires_on_each_qualifying_tick() {
    let disk = RamDisk::new(2048);
    let events = EventLog::new();
    let manager = StorageManager::new(disk.slot(), &events);
    manager
        .init(StorageConfig {
            allocation_unit_size: 512,
            ..StorageConfig::default()
        })
        .unwrap();

    run(&manager, disk, async {
        mount(&manager).await.unwrap();
        assert_eq!(manager.health_tick(), None);

        let chunk = vec![0xEE; 64 * 1024];
        let mut index = 0;
        while !manager.get_capacity().unwrap().is_below(10) {
            write(&manager, &format!("/sdcard/fill{index}.bin"), &chunk)
                .await
                .unwrap();
            index += 1;
        }
    });

    drain(&events);
    let capacity = manager.get_capacity().unwrap();
    let warning = StorageEvent::LowSpaceWarning {
        free_bytes: capacity.free_bytes,
        total_bytes: capacity.total_bytes,
    };
    assert_eq!(manager.health_tick(), Some(warning));
    assert_eq!(manager.health_tick(), Some(warning));
    assert_eq!(drain(&events), [warning, warning]);
}

#[test]
fn removed_card_is_noticed_between_operations() {
    let disk = common::disk();
    let slot = disk.slot();
    let events = EventLog::new();
    let manager = StorageManager::new(slot.clone(), &events);
    manager.init(config()).unwrap();

    run(&manager, disk, async {
        mount(&manager).await.unwrap();
        write(&manager, "/sdcard/a.txt", b"a").await.unwrap();
        slot.eject();
        assert_eq!(manager.health_tick(), Some(StorageEvent::CardRemoved));
        assert_eq!(manager.state(), DeviceState::Unmounted);
        assert!(!manager.is_card_present());
        assert_eq!(
            read(&manager, "/sdcard/a.txt").await,
            Err(StorageError::InvalidState)
        );

        slot.insert();
        mount(&manager).await.unwrap();
        assert_eq!(read(&manager, "/sdcard/a.txt").await.unwrap(), b"a");
    });

    let seen = drain(&events);
    let removed = seen
        .iter()
        .filter(|event| **event == StorageEvent::CardRemoved)
        .count();
    assert_eq!(removed, 1);
}

#[test]
fn inserted_card_is_announced_while_unmounted() {
    let disk = common::disk();
    let slot = disk.slot();
    slot.eject();
    let events = EventLog::new();
    let manager = StorageManager::new(slot.clone(), &events);
    manager.init(config()).unwrap();

    run(&manager, disk, async {
        assert_eq!(mount(&manager).await, Err(StorageError::Timeout));
        assert_eq!(manager.health_tick(), None);
        slot.insert();
        assert_eq!(manager.health_tick(), Some(StorageEvent::CardInserted));
        assert_eq!(manager.health_tick(), None);
        assert!(!manager.is_card_present());
        mount(&manager).await.unwrap();
        assert!(manager.is_card_present());
    });

    assert!(drain(&events).contains(&StorageEvent::CardInserted));
}

#[test]
fn info_reflects_the_mounted_card() {
    let disk = common::disk().with_identity("SDTEST", 0xCAFE_F00D);
    let manager = StorageManager::without_events(disk.slot());
    manager.init(config()).unwrap();
    assert!(!manager.get_info().mounted);

    run(&manager, disk, async {
        mount(&manager).await.unwrap();
    });

    let info = manager.get_info();
    assert!(info.mounted);
    assert!(info.card_present);
    assert_eq!(info.card_name.as_str(), "SDTEST");
    assert_eq!(info.serial_number, 0xCAFE_F00D);
    assert_eq!(info.capacity_bytes, common::SECTORS as u64 * 512);
    assert_eq!(info.sector_size, 512);
    assert_eq!(info.max_files, 5);
    assert_eq!(manager.deinit(), Err(StorageError::InvalidState));
}

#[test]
fn combined_task_winds_down_after_stop() {
    let disk = common::disk();
    let manager = StorageManager::without_events(disk.slot());
    manager.init(config()).unwrap();

    embassy_futures::block_on(embassy_futures::join::join(manager.run(disk), async {
        mount(&manager).await.unwrap();
        write(&manager, "/sdcard/last.txt", b"bye").await.unwrap();
        manager.stop();
    }));

    assert!(manager.is_stopped());
    assert_eq!(manager.counters().succeeded, 2);
    assert_eq!(manager.state(), DeviceState::Mounted);
}
