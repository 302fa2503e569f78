use embassy_time::Instant;
use sdcard::{
    fat::{self, FatTimestamp, FatVolume, FormatOptions, SdFatError},
    BlockDevice, CachedDevice, CardInfo,
};

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::events::{EventSink, StorageEvent};
use crate::fs::Filesystem;
use crate::manager::StorageManager;
use crate::state::LifecycleEvent;
use crate::types::{CapacitySnapshot, DeviceState};

/// The card and its mounted volume, owned by the worker.
///
/// Lifecycle changes go through the manager's shared state so that
/// submitters and the health monitor see them; the volume itself never
/// leaves the worker.
pub struct DeviceManager<D: BlockDevice> {
    device: CachedDevice<D>,
    volume: Option<FatVolume>,
}

impl<D: BlockDevice> DeviceManager<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: CachedDevice::new(device, 0),
            volume: None,
        }
    }

    pub fn device(&self) -> &CachedDevice<D> {
        &self.device
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    /// Borrows the mounted volume for one filesystem operation that has to
    /// wrap up by `deadline`.
    pub fn filesystem(
        &mut self,
        deadline: Option<Instant>,
    ) -> Option<Filesystem<'_, CachedDevice<D>>> {
        let volume = self.volume.as_mut()?;
        volume.set_deadline(deadline);
        Some(Filesystem::new(&mut self.device, volume))
    }

    /// Drops a volume the shared state no longer considers mounted (the
    /// health monitor saw the card go, or the device was faulted).
    pub fn reconcile<E: EventSink>(&mut self, manager: &StorageManager<E>) {
        if self.volume.is_some() && manager.state() != DeviceState::Mounted {
            log::info!("sdstore: volume_dropped state={}", manager.state().label());
            self.volume = None;
            self.device.release();
        }
    }

    pub fn stamp(&mut self, unix_secs: u32) {
        if let Some(volume) = self.volume.as_mut() {
            volume.set_time(FatTimestamp::from_unix(unix_secs));
        }
    }

    /// Card stopped answering mid-operation: forget the volume and tell
    /// everyone the card is gone.
    pub fn card_lost<E: EventSink>(&mut self, manager: &StorageManager<E>) {
        self.volume = None;
        self.device.release();
        manager.with_state(|state| state.drop_volume(LifecycleEvent::CardRemoved));
        log::info!("sdstore: card_removed during=operation");
        manager.post(StorageEvent::CardRemoved);
    }

    pub async fn mount<E: EventSink>(
        &mut self,
        manager: &StorageManager<E>,
        path: &str,
        format_if_mount_failed: bool,
    ) -> Result<(), StorageError> {
        if !matches!(
            manager.state(),
            DeviceState::Initialized | DeviceState::Unmounted
        ) {
            return Err(StorageError::InvalidState);
        }
        if !path.starts_with('/') {
            return Err(StorageError::InvalidArg);
        }
        let config = manager.config().ok_or(StorageError::InvalidState)?;
        let allow_format = format_if_mount_failed || config.format_if_mount_failed;

        self.volume = None;
        self.device.set_capacity(config.cache_sectors());
        match self.bring_up(&config, allow_format).await {
            Ok((card, volume, capacity)) => {
                log::info!(
                    "sdstore: mount_ok path={} name={} total_bytes={} free_bytes={}",
                    path,
                    card.name.as_str(),
                    capacity.total_bytes,
                    capacity.free_bytes
                );
                self.volume = Some(volume);
                manager.with_state(|state| {
                    state.lifecycle.apply(LifecycleEvent::MountOk);
                    state.mount_point = path.into();
                    state.card = Some(card);
                    state.capacity = Some(capacity);
                });
                manager.post(StorageEvent::Mounted);
                Ok(())
            }
            Err(err) => {
                self.device.release();
                manager.with_state(|state| state.drop_volume(LifecycleEvent::MountFailed));
                if err.is_card_absent() {
                    log::info!("sdstore: mount_no_card path={}", path);
                    manager.post(StorageEvent::Unmounted);
                    Err(StorageError::Timeout)
                } else {
                    log::error!("sdstore: mount_failed path={} err={}", path, err.label());
                    manager.post(StorageEvent::FilesystemError { cause: err.label() });
                    Err(StorageError::Fail)
                }
            }
        }
    }

    async fn bring_up(
        &mut self,
        config: &StorageConfig,
        allow_format: bool,
    ) -> Result<(CardInfo, FatVolume, CapacitySnapshot), SdFatError> {
        let card = self.device.init().await?;
        let mut volume = match fat::mount(&mut self.device).await {
            Ok(volume) => volume,
            Err(err) if err.is_card_absent() || !allow_format => return Err(err),
            Err(err) => {
                log::warn!("sdstore: mount_format_fallback err={}", err.label());
                fat::format_volume(&mut self.device, &format_options(config)).await?;
                fat::mount(&mut self.device).await?
            }
        };
        let free_bytes = fat::free_bytes(&mut self.device, &mut volume).await?;
        let capacity = CapacitySnapshot {
            total_bytes: volume.total_bytes(),
            free_bytes,
        };
        Ok((card, volume, capacity))
    }

    pub async fn unmount<E: EventSink>(
        &mut self,
        manager: &StorageManager<E>,
        path: &str,
    ) -> Result<(), StorageError> {
        if manager.state() != DeviceState::Mounted {
            return Err(StorageError::InvalidState);
        }
        if path != manager.mount_point() {
            return Err(StorageError::InvalidArg);
        }

        if let Some(volume) = self.volume.take() {
            if let Err(err) = fat::sync(&mut self.device, &volume).await {
                log::warn!("sdstore: unmount_sync_failed err={}", err.label());
            }
        }
        self.device.release();
        manager.with_state(|state| state.drop_volume(LifecycleEvent::Unmount));
        log::info!("sdstore: unmount_ok path={}", path);
        manager.post(StorageEvent::Unmounted);
        Ok(())
    }

    /// Writes a fresh volume with the configured allocation unit. A mounted
    /// volume is unmounted first and mounted again afterwards.
    pub async fn format<E: EventSink>(
        &mut self,
        manager: &StorageManager<E>,
    ) -> Result<(), StorageError> {
        let state = manager.state();
        if matches!(state, DeviceState::Uninitialized | DeviceState::Error) {
            return Err(StorageError::InvalidState);
        }
        let config = manager.config().ok_or(StorageError::InvalidState)?;
        let remount = if state == DeviceState::Mounted {
            let mount_point = manager.mount_point();
            self.unmount(manager, &mount_point).await?;
            Some(mount_point)
        } else {
            None
        };

        let result = self.write_fresh_volume(&config).await;
        self.device.release();
        result?;

        if let Some(mount_point) = remount {
            self.mount(manager, &mount_point, false).await?;
        }
        Ok(())
    }

    async fn write_fresh_volume(&mut self, config: &StorageConfig) -> Result<(), StorageError> {
        if let Err(err) = self.device.init().await {
            log::info!("sdstore: format_no_device err={}", err.label());
            return Err(err.into());
        }
        if self.device.sector_count() == 0 {
            return Err(StorageError::NotSupported);
        }
        match fat::format_volume(&mut self.device, &format_options(config)).await {
            Ok(layout) => {
                log::info!(
                    "sdstore: format_ok clusters={} cluster_size={}",
                    layout.total_clusters,
                    config.allocation_unit_size
                );
                Ok(())
            }
            Err(err) => {
                log::error!("sdstore: format_failed err={}", err.label());
                Err(err.into())
            }
        }
    }

    /// Re-reads free space after a mutating operation.
    pub async fn refresh_capacity<E: EventSink>(&mut self, manager: &StorageManager<E>) {
        let Some(volume) = self.volume.as_mut() else {
            return;
        };
        match fat::free_bytes(&mut self.device, volume).await {
            Ok(free_bytes) => {
                let capacity = CapacitySnapshot {
                    total_bytes: volume.total_bytes(),
                    free_bytes,
                };
                manager.with_state(|state| {
                    if state.state() == DeviceState::Mounted {
                        state.capacity = Some(capacity);
                    }
                });
            }
            Err(err) => log::warn!("sdstore: capacity_refresh_failed err={}", err.label()),
        }
    }
}

fn format_options(config: &StorageConfig) -> FormatOptions {
    FormatOptions {
        cluster_size: config.allocation_unit_size,
        ..FormatOptions::default()
    }
}
