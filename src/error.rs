use core::fmt;

use sdcard::{fat::SdFatError, BlockError};

/// Result codes reported by the storage subsystem.
///
/// Submission-time validation returns these synchronously. Everything that
/// happens after a request is accepted reaches the caller through its
/// completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageError {
    InvalidArg,
    InvalidState,
    NoMem,
    NotFound,
    Fail,
    /// Also the outcome of a mount that found no card answering.
    Timeout,
    InvalidSize,
    NotSupported,
}

impl StorageError {
    pub fn label(self) -> &'static str {
        match self {
            Self::InvalidArg => "invalid_arg",
            Self::InvalidState => "invalid_state",
            Self::NoMem => "no_mem",
            Self::NotFound => "not_found",
            Self::Fail => "fail",
            Self::Timeout => "timeout",
            Self::InvalidSize => "invalid_size",
            Self::NotSupported => "not_supported",
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<BlockError> for StorageError {
    fn from(value: BlockError) -> Self {
        match value {
            BlockError::NoCard => Self::NotFound,
            BlockError::NotInitialized => Self::InvalidState,
            BlockError::OutOfRange(_) => Self::InvalidArg,
            BlockError::Timeout => Self::Timeout,
            BlockError::Rejected | BlockError::Bus | BlockError::WriteProtected => Self::Fail,
        }
    }
}

impl From<SdFatError> for StorageError {
    fn from(value: SdFatError) -> Self {
        match value {
            SdFatError::Device(err) => err.into(),
            SdFatError::NotFound => Self::NotFound,
            SdFatError::DeadlineExceeded => Self::Timeout,
            SdFatError::InvalidPath
            | SdFatError::InvalidShortName
            | SdFatError::InvalidLongName
            | SdFatError::NotDirectory
            | SdFatError::IsDirectory
            | SdFatError::NotEmpty => Self::InvalidArg,
            SdFatError::NameTooLong | SdFatError::PathTooDeep | SdFatError::FileTooLarge => {
                Self::InvalidSize
            }
            SdFatError::UnsupportedSectorSize(_)
            | SdFatError::UnsupportedSectorsPerCluster(_)
            | SdFatError::VolumeTooSmall => Self::NotSupported,
            SdFatError::UnsupportedFatType
            | SdFatError::InvalidBootSector
            | SdFatError::AlreadyExists
            | SdFatError::ReadOnly
            | SdFatError::DirFull
            | SdFatError::NoFreeCluster
            | SdFatError::BadCluster(_)
            | SdFatError::ClusterChainTooLong => Self::Fail,
        }
    }
}

/// Failure of a filesystem operation.
///
/// Keeps the engine error when there is one so the worker can tell a pulled
/// card from a damaged volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    Rejected(StorageError),
    Fat(SdFatError),
}

impl FsError {
    pub fn code(self) -> StorageError {
        match self {
            Self::Rejected(code) => code,
            Self::Fat(err) => err.into(),
        }
    }

    pub fn is_card_absent(self) -> bool {
        matches!(self, Self::Fat(err) if err.is_card_absent())
    }

    pub fn is_structural(self) -> bool {
        matches!(self, Self::Fat(err) if err.is_structural())
    }

    /// The request ran out of time at a point where stopping was safe.
    pub fn is_deadline(self) -> bool {
        matches!(self, Self::Fat(SdFatError::DeadlineExceeded))
    }

    pub fn is_device(self) -> bool {
        matches!(self, Self::Fat(SdFatError::Device(_)))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Rejected(code) => code.label(),
            Self::Fat(err) => err.label(),
        }
    }
}

impl From<SdFatError> for FsError {
    fn from(value: SdFatError) -> Self {
        Self::Fat(value)
    }
}

impl From<StorageError> for FsError {
    fn from(value: StorageError) -> Self {
        Self::Rejected(value)
    }
}

impl From<FsError> for StorageError {
    fn from(value: FsError) -> Self {
        value.code()
    }
}
