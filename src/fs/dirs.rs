use alloc::{string::String, vec, vec::Vec};

use sdcard::{
    fat::{self, SdFatError},
    BlockDevice,
};

use super::path::{basename, is_within, join};
use super::{CopyOptions, Filesystem, MkdirOptions, RmdirOptions};
use crate::error::{FsError, StorageError};
use crate::types::{DirectoryListing, DirectorySize, FileInfo, StorageStats, PERM_WRITE};

impl<D: BlockDevice> Filesystem<'_, D> {
    /// Entries of `path`, without `.` and `..`.
    pub async fn list_directory(&mut self, path: &str) -> Result<DirectoryListing, FsError> {
        let entries = fat::list_dir(self.sd, self.volume, path).await?;
        let mut listing = DirectoryListing::new();
        for entry in &entries {
            listing.push(FileInfo::from_entry(String::from(entry.name()), entry));
        }
        Ok(listing)
    }

    pub async fn create_directory(
        &mut self,
        path: &str,
        options: &MkdirOptions,
    ) -> Result<(), FsError> {
        if !options.create_parents {
            fat::mkdir(self.sd, self.volume, path).await?;
        } else {
            let mut prefix = String::with_capacity(path.len());
            for segment in path.split('/').filter(|segment| !segment.is_empty()) {
                prefix.push('/');
                prefix.push_str(segment);
                match fat::mkdir(self.sd, self.volume, &prefix).await {
                    Ok(()) => {}
                    Err(SdFatError::AlreadyExists) => {
                        if !self.is_directory(&prefix).await? {
                            return Err(StorageError::Fail.into());
                        }
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            if prefix.is_empty() {
                return Err(StorageError::InvalidArg.into());
            }
        }
        if options.permissions & PERM_WRITE == 0 {
            fat::set_read_only(self.sd, self.volume, path, true).await?;
        }
        Ok(())
    }

    /// Removes a directory; with `recursive` its contents go first, deepest
    /// entries before their parents.
    pub async fn remove_directory(
        &mut self,
        path: &str,
        options: &RmdirOptions,
    ) -> Result<(), FsError> {
        self.require_directory(path).await?;
        if basename(path) == "/" {
            return Err(StorageError::InvalidArg.into());
        }
        if !options.recursive {
            return Ok(fat::remove(self.sd, self.volume, path).await?);
        }

        let mut stack = vec![(String::from(path), false)];
        while let Some((dir, expanded)) = stack.pop() {
            self.volume.check_deadline()?;
            if expanded {
                fat::remove(self.sd, self.volume, &dir).await?;
                continue;
            }
            let entries = fat::list_dir(self.sd, self.volume, &dir).await?;
            stack.push((dir.clone(), true));
            for entry in &entries {
                let child = join(&dir, entry.name());
                if entry.is_dir() {
                    stack.push((child, false));
                } else {
                    fat::remove(self.sd, self.volume, &child).await?;
                }
            }
        }
        Ok(())
    }

    /// Creates `dst` and, when `recursive`, mirrors the tree below `src`
    /// into it.
    pub async fn copy_directory(
        &mut self,
        src: &str,
        dst: &str,
        options: &CopyOptions,
    ) -> Result<(), FsError> {
        self.require_directory(src).await?;
        if is_within(dst, src) {
            return Err(StorageError::InvalidArg.into());
        }
        self.make_copy_target(dst, options).await?;
        if !options.recursive {
            return Ok(());
        }

        let mut pending = vec![(String::from(src), String::from(dst))];
        while let Some((from, to)) = pending.pop() {
            self.volume.check_deadline()?;
            let entries = fat::list_dir(self.sd, self.volume, &from).await?;
            for entry in &entries {
                let child_from = join(&from, entry.name());
                let child_to = join(&to, entry.name());
                if entry.is_dir() {
                    self.make_copy_target(&child_to, options).await?;
                    pending.push((child_from, child_to));
                } else {
                    self.copy_file(&child_from, &child_to, options).await?;
                }
            }
        }
        Ok(())
    }

    /// Bytes, files and directories under `path`, the directory itself
    /// included in the count.
    pub async fn calculate_directory_size(
        &mut self,
        path: &str,
    ) -> Result<DirectorySize, FsError> {
        self.require_directory(path).await?;
        let mut size = DirectorySize {
            dir_count: 1,
            ..DirectorySize::default()
        };
        let mut pending: Vec<String> = vec![String::from(path)];
        while let Some(dir) = pending.pop() {
            self.volume.check_deadline()?;
            let entries = fat::list_dir(self.sd, self.volume, &dir).await?;
            for entry in &entries {
                if entry.is_dir() {
                    size.dir_count += 1;
                    pending.push(join(&dir, entry.name()));
                } else {
                    size.file_count += 1;
                    size.total_bytes += entry.size as u64;
                }
            }
        }
        Ok(size)
    }

    /// Whole-volume statistics. The root directory is not counted.
    pub async fn usage(&mut self) -> Result<StorageStats, FsError> {
        let total_bytes = self.volume.total_bytes();
        let free_bytes = fat::free_bytes(self.sd, self.volume).await?;
        let tree = self.calculate_directory_size("/").await?;
        Ok(StorageStats {
            total_bytes,
            used_bytes: total_bytes.saturating_sub(free_bytes),
            free_bytes,
            file_count: tree.file_count,
            dir_count: tree.dir_count - 1,
        })
    }

    async fn require_directory(&mut self, path: &str) -> Result<(), FsError> {
        match self.lookup(path).await? {
            None => Err(StorageError::NotFound.into()),
            Some(entry) if !entry.is_dir() => Err(StorageError::InvalidArg.into()),
            Some(_) => Ok(()),
        }
    }

    async fn make_copy_target(&mut self, dst: &str, options: &CopyOptions) -> Result<(), FsError> {
        match self.lookup(dst).await? {
            None => Ok(fat::mkdir(self.sd, self.volume, dst).await?),
            Some(entry) if entry.is_dir() && options.overwrite_existing => Ok(()),
            Some(_) => Err(StorageError::InvalidArg.into()),
        }
    }
}
