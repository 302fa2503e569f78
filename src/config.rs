use alloc::string::String;
use core::fmt::Write as _;

use sdcard::SECTOR_SIZE;

use crate::error::StorageError;

pub const QUEUE_DEPTH: usize = 16;
pub const SUBMIT_WAIT_MS: u64 = 100;
pub const WORKER_IDLE_MS: u64 = 1_000;
pub const HEALTH_PERIOD_MS: u64 = 5_000;
pub const LOW_SPACE_PERCENT: u64 = 10;
pub const DEFAULT_OP_TIMEOUT_MS: u32 = 5_000;
pub const PATH_MAX: usize = 255;
pub const PAYLOAD_MAX: usize = 256 * 1024;

pub const MAX_FILES_LIMIT: u32 = 10_000;
pub const ALLOCATION_UNIT_MIN: u32 = 512;
pub const ALLOCATION_UNIT_MAX: u32 = 65_536;

/// Storage subsystem settings. Validated once by `init` and left untouched
/// afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub mount_point: String,
    pub format_if_mount_failed: bool,
    pub enable_hot_swap: bool,
    pub max_files: u32,
    /// Cluster size used when formatting.
    pub allocation_unit_size: u32,
    pub enable_cache: bool,
    /// Sector cache size in bytes.
    pub cache_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mount_point: String::from("/sdcard"),
            format_if_mount_failed: false,
            enable_hot_swap: true,
            max_files: 5,
            allocation_unit_size: 16 * 1024,
            enable_cache: true,
            cache_size: 16 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigErrorKind {
    MissingSeparator,
    UnknownKey,
    InvalidBool,
    InvalidNumber,
}

/// Parse failure, with the 1-based line it happened on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub line: usize,
    pub kind: ConfigErrorKind,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.mount_point.is_empty() || !self.mount_point.starts_with('/') {
            return Err(StorageError::InvalidArg);
        }
        if self.mount_point.len() > PATH_MAX {
            return Err(StorageError::InvalidSize);
        }
        if self.max_files == 0 || self.max_files > MAX_FILES_LIMIT {
            return Err(StorageError::InvalidArg);
        }
        if !self.allocation_unit_size.is_power_of_two()
            || !(ALLOCATION_UNIT_MIN..=ALLOCATION_UNIT_MAX).contains(&self.allocation_unit_size)
        {
            return Err(StorageError::InvalidArg);
        }
        if self.enable_cache && (self.cache_size as usize) < SECTOR_SIZE {
            return Err(StorageError::InvalidArg);
        }
        Ok(())
    }

    /// Sector slots the device cache gets; zero turns caching off.
    pub fn cache_sectors(&self) -> usize {
        if self.enable_cache {
            self.cache_size as usize / SECTOR_SIZE
        } else {
            0
        }
    }

    /// Reads `key=value` lines over the defaults. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fail = |kind| ConfigError {
                line: idx + 1,
                kind,
            };
            let (key, value) = line
                .split_once('=')
                .ok_or(fail(ConfigErrorKind::MissingSeparator))?;
            let value = value.trim();
            match key.trim() {
                "mount_point" => config.mount_point = String::from(value),
                "format_if_mount_failed" => {
                    config.format_if_mount_failed =
                        parse_bool(value).ok_or(fail(ConfigErrorKind::InvalidBool))?
                }
                "enable_hot_swap" => {
                    config.enable_hot_swap =
                        parse_bool(value).ok_or(fail(ConfigErrorKind::InvalidBool))?
                }
                "max_files" => {
                    config.max_files = value
                        .parse()
                        .map_err(|_| fail(ConfigErrorKind::InvalidNumber))?
                }
                "allocation_unit_size" => {
                    config.allocation_unit_size = value
                        .parse()
                        .map_err(|_| fail(ConfigErrorKind::InvalidNumber))?
                }
                "enable_cache" => {
                    config.enable_cache =
                        parse_bool(value).ok_or(fail(ConfigErrorKind::InvalidBool))?
                }
                "cache_size" => {
                    config.cache_size = value
                        .parse()
                        .map_err(|_| fail(ConfigErrorKind::InvalidNumber))?
                }
                _ => return Err(fail(ConfigErrorKind::UnknownKey)),
            }
        }
        Ok(config)
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "mount_point={}\nformat_if_mount_failed={}\nenable_hot_swap={}\nmax_files={}\n\
             allocation_unit_size={}\nenable_cache={}\ncache_size={}\n",
            self.mount_point,
            self.format_if_mount_failed,
            self.enable_hot_swap,
            self.max_files,
            self.allocation_unit_size,
            self.enable_cache,
            self.cache_size
        );
        out
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
