//! Operation requests and the submission side of the queue.


use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{with_timeout, Duration, Instant};

use crate::config::{DEFAULT_OP_TIMEOUT_MS, PATH_MAX, PAYLOAD_MAX, SUBMIT_WAIT_MS};
use crate::error::StorageError;
use crate::events::EventSink;
use crate::fs::{path::validate_path, SearchOptions, WriteOptions};
use crate::manager::StorageManager;
use crate::types::{DirectoryListing, DirectorySize, FileInfo, StorageStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    Append,
    Delete,
    Copy,
    Move,
    Mkdir,
    Rmdir,
    ListDir,
    Stat,
    Mount,
    Unmount,
    Format,
    Usage,
    Search,
    DirSize,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Append => "append",
            Self::Delete => "delete",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Mkdir => "mkdir",
            Self::Rmdir => "rmdir",
            Self::ListDir => "ls",
            Self::Stat => "stat",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Format => "format",
            Self::Usage => "usage",
            Self::Search => "search",
            Self::DirSize => "du",
        }
    }

    /// Operations after which free space has to be re-read.
    pub fn changes_volume(self) -> bool {
        matches!(
            self,
            Self::Write
                | Self::Append
                | Self::Delete
                | Self::Copy
                | Self::Move
                | Self::Mkdir
                | Self::Rmdir
        )
    }
}

/// Write payload owned by its request. Built by copying the caller's bytes,
/// so nothing the caller holds is ever aliased; freed when the request is.
#[derive(Debug, PartialEq, Eq)]
pub struct Payload(Box<[u8]>);

impl Payload {
    pub fn copy_from(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() > PAYLOAD_MAX {
            return Err(StorageError::InvalidSize);
        }
        Ok(Self(Box::from(data)))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
pub enum Operation {
    Read {
        path: String,
    },
    Write {
        path: String,
        data: Payload,
        options: WriteOptions,
    },
    Append {
        path: String,
        data: Payload,
    },
    Delete {
        path: String,
    },
    Copy {
        src: String,
        dst: String,
        recursive: bool,
    },
    Move {
        src: String,
        dst: String,
    },
    Mkdir {
        path: String,
        create_parents: bool,
    },
    Rmdir {
        path: String,
        recursive: bool,
    },
    ListDir {
        path: String,
    },
    Stat {
        path: String,
    },
    Mount {
        path: String,
        format_if_mount_failed: bool,
    },
    Unmount {
        path: String,
    },
    Format,
    Usage,
    Search {
        path: String,
        options: SearchOptions,
    },
    DirSize {
        path: String,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Read { .. } => OperationKind::Read,
            Self::Write { .. } => OperationKind::Write,
            Self::Append { .. } => OperationKind::Append,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Copy { .. } => OperationKind::Copy,
            Self::Move { .. } => OperationKind::Move,
            Self::Mkdir { .. } => OperationKind::Mkdir,
            Self::Rmdir { .. } => OperationKind::Rmdir,
            Self::ListDir { .. } => OperationKind::ListDir,
            Self::Stat { .. } => OperationKind::Stat,
            Self::Mount { .. } => OperationKind::Mount,
            Self::Unmount { .. } => OperationKind::Unmount,
            Self::Format => OperationKind::Format,
            Self::Usage => OperationKind::Usage,
            Self::Search { .. } => OperationKind::Search,
            Self::DirSize { .. } => OperationKind::DirSize,
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        match self {
            Self::Read { path }
            | Self::Delete { path }
            | Self::Mkdir { path, .. }
            | Self::Rmdir { path, .. }
            | Self::ListDir { path }
            | Self::Stat { path }
            | Self::Mount { path, .. }
            | Self::Unmount { path }
            | Self::DirSize { path } => validate_path(path),
            Self::Search { path, options } => {
                validate_path(path)?;
                if options.name_pattern.len() > PATH_MAX {
                    return Err(StorageError::InvalidSize);
                }
                Ok(())
            }
            Self::Write { path, data, .. } | Self::Append { path, data } => {
                validate_path(path)?;
                if data.len() > PAYLOAD_MAX {
                    return Err(StorageError::InvalidSize);
                }
                Ok(())
            }
            Self::Copy { src, dst, .. } | Self::Move { src, dst } => {
                validate_path(src)?;
                validate_path(dst)
            }
            Self::Format | Self::Usage => Ok(()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum OperationOutput {
    Done,
    Data(Vec<u8>),
    Listing(DirectoryListing),
    Info(FileInfo),
    Stats(StorageStats),
    Size(DirectorySize),
}

pub type OperationResult = Result<OperationOutput, StorageError>;

/// Called exactly once per accepted request, on the worker.
pub type Completion = Box<dyn FnOnce(OperationKind, OperationResult) + Send>;

pub struct OperationRequest {
    pub id: u32,
    pub operation: Operation,
    pub completion: Completion,
    pub timeout_ms: u32,
    pub submitted_at: Instant,
}

impl<E: EventSink> StorageManager<E> {
    /// Validates `operation` and queues it. Returns the request id once the
    /// request is accepted, which says nothing about its outcome.
    ///
    /// Waits at most 100 ms for a free slot; a queue that stays full yields
    /// NoMem and drops the request without calling `completion`.
    pub async fn submit(
        &self,
        operation: Operation,
        timeout_ms: u32,
        completion: Completion,
    ) -> Result<u32, StorageError> {
        operation.validate()?;
        if !self.is_initialized() || self.is_stopped() {
            return Err(StorageError::InvalidState);
        }
        if timeout_ms == 0 {
            return Err(StorageError::InvalidArg);
        }

        let id = self.next_id();
        let kind = operation.kind();
        let request = OperationRequest {
            id,
            operation,
            completion,
            timeout_ms,
            submitted_at: Instant::now(),
        };
        match with_timeout(
            Duration::from_millis(SUBMIT_WAIT_MS),
            self.queue.send(request),
        )
        .await
        {
            Ok(()) => {
                log::debug!("sdstore: queued id={} kind={}", id, kind.label());
                Ok(id)
            }
            Err(_) => {
                log::warn!("sdstore: queue_full id={} kind={}", id, kind.label());
                Err(StorageError::NoMem)
            }
        }
    }

    /// Submits and waits for the outcome.
    pub async fn call(&self, operation: Operation) -> OperationResult {
        let done: Arc<Signal<CriticalSectionRawMutex, OperationResult>> = Arc::new(Signal::new());
        let notify = done.clone();
        self.submit(
            operation,
            DEFAULT_OP_TIMEOUT_MS,
            Box::new(move |_, result| notify.signal(result)),
        )
        .await?;
        done.wait().await
    }

    async fn submit_with<F>(
        &self,
        operation: Operation,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        self.submit(operation, timeout_ms, Box::new(completion))
            .await
    }

    /// Mount, unmount and format ignore `timeout_ms` once started; they are
    /// not safe to stop half way.
    pub async fn mount_async<F>(
        &self,
        path: &str,
        format_if_mount_failed: bool,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Mount {
            path: path.into(),
            format_if_mount_failed,
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn unmount_async<F>(
        &self,
        path: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Unmount { path: path.into() };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn format_async<F>(&self, timeout_ms: u32, completion: F) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        self.submit_with(Operation::Format, timeout_ms, completion)
            .await
    }

    pub async fn read_file_async<F>(
        &self,
        path: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Read { path: path.into() };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn write_file_async<F>(
        &self,
        path: &str,
        data: &[u8],
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        validate_path(path)?;
        let operation = Operation::Write {
            path: path.into(),
            data: Payload::copy_from(data)?,
            options: WriteOptions::default(),
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn append_file_async<F>(
        &self,
        path: &str,
        data: &[u8],
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        validate_path(path)?;
        let operation = Operation::Append {
            path: path.into(),
            data: Payload::copy_from(data)?,
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn delete_file_async<F>(
        &self,
        path: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Delete { path: path.into() };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn list_dir_async<F>(
        &self,
        path: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::ListDir { path: path.into() };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn mkdir_async<F>(
        &self,
        path: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Mkdir {
            path: path.into(),
            create_parents: true,
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn rmdir_async<F>(
        &self,
        path: &str,
        recursive: bool,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Rmdir {
            path: path.into(),
            recursive,
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn copy_async<F>(
        &self,
        src: &str,
        dst: &str,
        recursive: bool,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Copy {
            src: src.into(),
            dst: dst.into(),
            recursive,
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn move_async<F>(
        &self,
        src: &str,
        dst: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Move {
            src: src.into(),
            dst: dst.into(),
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn stat_async<F>(
        &self,
        path: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Stat { path: path.into() };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn usage_async<F>(&self, timeout_ms: u32, completion: F) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        self.submit_with(Operation::Usage, timeout_ms, completion)
            .await
    }

    /// Matches below `root`, named by their path relative to it.
    pub async fn search_async<F>(
        &self,
        root: &str,
        options: SearchOptions,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::Search {
            path: root.into(),
            options,
        };
        self.submit_with(operation, timeout_ms, completion).await
    }

    pub async fn dir_size_async<F>(
        &self,
        path: &str,
        timeout_ms: u32,
        completion: F,
    ) -> Result<u32, StorageError>
    where
        F: FnOnce(OperationKind, OperationResult) + Send + 'static,
    {
        let operation = Operation::DirSize { path: path.into() };
        self.submit_with(operation, timeout_ms, completion).await
    }
}
