//! Path-based file and directory primitives over a mounted volume.
//!
//! [`Filesystem`] borrows the device and the mounted [`FatVolume`] from the
//! worker for the length of one operation. Nothing here locks; the single
//! worker is what keeps calls from overlapping.
//!
//! Walks over many entries check the volume's deadline between engine
//! calls, never inside one.

mod dirs;
pub mod path;
mod search;

#[cfg(test)]
mod tests;

use alloc::{string::String, vec::Vec};

use sdcard::{
    fat::{self, FatDirEntry, FatVolume, SdFatError},
    BlockDevice,
};

pub use search::SearchOptions;

use crate::error::{FsError, StorageError};
use crate::types::{FileInfo, PERM_DEFAULT, PERM_WRITE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub create_if_missing: bool,
    pub truncate_if_exists: bool,
    pub append_mode: bool,
    /// Without any write bit the file is marked read-only after writing.
    pub permissions: u16,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            truncate_if_exists: true,
            append_mode: false,
            permissions: PERM_DEFAULT,
        }
    }
}

impl WriteOptions {
    pub fn append() -> Self {
        Self {
            create_if_missing: true,
            truncate_if_exists: false,
            append_mode: true,
            permissions: PERM_DEFAULT,
        }
    }

    /// Overwrite from offset 0 and keep whatever lies past the new data.
    pub fn overwrite() -> Self {
        Self {
            create_if_missing: false,
            truncate_if_exists: false,
            append_mode: false,
            permissions: PERM_DEFAULT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyOptions {
    pub overwrite_existing: bool,
    pub preserve_timestamps: bool,
    pub recursive: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            overwrite_existing: false,
            preserve_timestamps: true,
            recursive: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MkdirOptions {
    pub create_parents: bool,
    pub permissions: u16,
}

impl Default for MkdirOptions {
    fn default() -> Self {
        Self {
            create_parents: true,
            permissions: PERM_DEFAULT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RmdirOptions {
    pub recursive: bool,
}

pub struct Filesystem<'a, D> {
    sd: &'a mut D,
    volume: &'a mut FatVolume,
}

impl<'a, D: BlockDevice> Filesystem<'a, D> {
    pub fn new(sd: &'a mut D, volume: &'a mut FatVolume) -> Self {
        Self { sd, volume }
    }

    pub fn volume(&self) -> &FatVolume {
        self.volume
    }

    async fn lookup(&mut self, path: &str) -> Result<Option<FatDirEntry>, FsError> {
        match fat::stat(self.sd, self.volume, path).await {
            Ok(entry) => Ok(Some(entry)),
            Err(SdFatError::NotFound) | Err(SdFatError::NotDirectory) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn stat(&mut self, path: &str) -> Result<FileInfo, FsError> {
        let entry = fat::stat(self.sd, self.volume, path).await?;
        Ok(FileInfo::from_entry(
            String::from(path::basename(path)),
            &entry,
        ))
    }

    pub async fn exists(&mut self, path: &str) -> Result<bool, FsError> {
        Ok(self.lookup(path).await?.is_some())
    }

    pub async fn is_file(&mut self, path: &str) -> Result<bool, FsError> {
        Ok(matches!(self.lookup(path).await?, Some(entry) if !entry.is_dir()))
    }

    pub async fn is_directory(&mut self, path: &str) -> Result<bool, FsError> {
        Ok(matches!(self.lookup(path).await?, Some(entry) if entry.is_dir()))
    }

    pub async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, FsError> {
        Ok(fat::read_file(self.sd, self.volume, path).await?)
    }

    pub async fn write_file(
        &mut self,
        path: &str,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<(), FsError> {
        match self.lookup(path).await? {
            None if !options.create_if_missing => return Err(StorageError::NotFound.into()),
            None => fat::write_file(self.sd, self.volume, path, data).await?,
            Some(entry) if entry.is_dir() => return Err(StorageError::InvalidArg.into()),
            Some(entry) if entry.is_read_only() => return Err(StorageError::Fail.into()),
            Some(_) if options.append_mode => {
                fat::append_file(self.sd, self.volume, path, data).await?
            }
            Some(_) if options.truncate_if_exists => {
                fat::write_file(self.sd, self.volume, path, data).await?
            }
            Some(entry) => {
                let mut contents = data.to_vec();
                if entry.size as usize > data.len() {
                    let old = fat::read_file(self.sd, self.volume, path).await?;
                    contents.extend_from_slice(&old[data.len()..]);
                }
                fat::write_file(self.sd, self.volume, path, &contents).await?
            }
        }
        if options.permissions & PERM_WRITE == 0 {
            fat::set_read_only(self.sd, self.volume, path, true).await?;
        }
        Ok(())
    }

    pub async fn append_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        self.write_file(path, data, &WriteOptions::append()).await
    }

    pub async fn delete_file(&mut self, path: &str) -> Result<(), FsError> {
        match self.lookup(path).await? {
            None => Err(StorageError::NotFound.into()),
            Some(entry) if entry.is_dir() => Err(StorageError::InvalidArg.into()),
            Some(_) => Ok(fat::remove(self.sd, self.volume, path).await?),
        }
    }

    /// Read-then-write copy of one file.
    pub async fn copy_file(
        &mut self,
        src: &str,
        dst: &str,
        options: &CopyOptions,
    ) -> Result<(), FsError> {
        let source = match self.lookup(src).await? {
            None => return Err(StorageError::NotFound.into()),
            Some(entry) if entry.is_dir() => return Err(StorageError::InvalidArg.into()),
            Some(entry) => entry,
        };
        match self.lookup(dst).await? {
            Some(entry) if entry.is_dir() || !options.overwrite_existing => {
                return Err(StorageError::InvalidArg.into())
            }
            Some(entry) if entry.is_read_only() => return Err(StorageError::Fail.into()),
            _ => {}
        }

        let data = fat::read_file(self.sd, self.volume, src).await?;
        fat::write_file(self.sd, self.volume, dst, &data).await?;
        if options.preserve_timestamps {
            fat::set_modified(self.sd, self.volume, dst, source.modified).await?;
        }
        Ok(())
    }

    pub async fn move_file(&mut self, src: &str, dst: &str) -> Result<(), FsError> {
        if self.lookup(src).await?.is_none() {
            return Err(StorageError::NotFound.into());
        }
        Ok(fat::rename(self.sd, self.volume, src, dst).await?)
    }
}
