use alloc::string::String;

use embassy_time::Instant;
use sdcard::BlockDevice;

use crate::device::DeviceManager;
use crate::error::{FsError, StorageError};
use crate::events::EventSink;
use crate::fs::{path::to_volume_path, CopyOptions, MkdirOptions, RmdirOptions};
use crate::manager::StorageManager;
use crate::queue::{Operation, OperationOutput};

/// Runs one operation against the device and drops its payload on return.
///
/// Mount, unmount and format always run to completion. Everything else
/// stops with a deadline error at the first safe point past `deadline`.
pub(super) async fn dispatch<D: BlockDevice, E: EventSink>(
    manager: &StorageManager<E>,
    devices: &mut DeviceManager<D>,
    operation: Operation,
    deadline: Instant,
) -> Result<OperationOutput, FsError> {
    let operation = match operation {
        Operation::Mount {
            path,
            format_if_mount_failed,
        } => {
            devices.mount(manager, &path, format_if_mount_failed).await?;
            return Ok(OperationOutput::Done);
        }
        Operation::Unmount { path } => {
            devices.unmount(manager, &path).await?;
            return Ok(OperationOutput::Done);
        }
        Operation::Format => {
            devices.format(manager).await?;
            return Ok(OperationOutput::Done);
        }
        other => other,
    };

    let mount_point: String = manager.mount_point();
    let volume_path = |path: &str| String::from(to_volume_path(&mount_point, path));
    let mut fs = devices
        .filesystem(Some(deadline))
        .ok_or(FsError::Rejected(StorageError::InvalidState))?;

    match operation {
        Operation::Read { path } => fs
            .read_file(&volume_path(&path))
            .await
            .map(OperationOutput::Data),
        Operation::Write {
            path,
            data,
            options,
        } => {
            fs.write_file(&volume_path(&path), data.as_slice(), &options)
                .await?;
            Ok(OperationOutput::Done)
        }
        Operation::Append { path, data } => {
            fs.append_file(&volume_path(&path), data.as_slice()).await?;
            Ok(OperationOutput::Done)
        }
        Operation::Delete { path } => {
            fs.delete_file(&volume_path(&path)).await?;
            Ok(OperationOutput::Done)
        }
        Operation::Copy { src, dst, recursive } => {
            let (src, dst) = (volume_path(&src), volume_path(&dst));
            let options = CopyOptions {
                recursive,
                ..CopyOptions::default()
            };
            if fs.is_directory(&src).await? {
                fs.copy_directory(&src, &dst, &options).await?;
            } else {
                fs.copy_file(&src, &dst, &options).await?;
            }
            Ok(OperationOutput::Done)
        }
        Operation::Move { src, dst } => {
            fs.move_file(&volume_path(&src), &volume_path(&dst)).await?;
            Ok(OperationOutput::Done)
        }
        Operation::Mkdir {
            path,
            create_parents,
        } => {
            let options = MkdirOptions {
                create_parents,
                ..MkdirOptions::default()
            };
            fs.create_directory(&volume_path(&path), &options).await?;
            Ok(OperationOutput::Done)
        }
        Operation::Rmdir { path, recursive } => {
            fs.remove_directory(&volume_path(&path), &RmdirOptions { recursive })
                .await?;
            Ok(OperationOutput::Done)
        }
        Operation::ListDir { path } => fs
            .list_directory(&volume_path(&path))
            .await
            .map(OperationOutput::Listing),
        Operation::Stat { path } => fs
            .stat(&volume_path(&path))
            .await
            .map(OperationOutput::Info),
        Operation::Usage => fs.usage().await.map(OperationOutput::Stats),
        Operation::Search { path, options } => fs
            .search_files(&volume_path(&path), &options)
            .await
            .map(OperationOutput::Listing),
        Operation::DirSize { path } => fs
            .calculate_directory_size(&volume_path(&path))
            .await
            .map(OperationOutput::Size),
        Operation::Mount { .. } | Operation::Unmount { .. } | Operation::Format => {
            Err(FsError::Rejected(StorageError::InvalidState))
        }
    }
}
