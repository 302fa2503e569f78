//! The single consumer of the operation queue.
//!
//! One request at a time, in submission order: that ordering is the only
//! thing keeping filesystem calls from overlapping. A request's timeout is
//! a deadline handed to the volume, which checks it between steps; the
//! operation future itself is never dropped part way.

mod dispatch;
mod logging;

use embassy_futures::join::join;
use embassy_time::{with_timeout, Duration, Instant};
use sdcard::BlockDevice;

use crate::config::WORKER_IDLE_MS;
use crate::device::DeviceManager;
use crate::error::{FsError, StorageError};
use crate::events::{EventSink, StorageEvent};
use crate::manager::StorageManager;
use crate::queue::{Completion, OperationKind, OperationRequest, OperationResult};
use dispatch::dispatch;
use logging::{duration_ms_since, log_outcome};

impl<E: EventSink> StorageManager<E> {
    /// Worker and health monitor together, for applications that give the
    /// storage subsystem a single task.
    pub async fn run<D: BlockDevice>(&self, device: D) {
        join(self.run_worker(device), self.run_health_monitor()).await;
    }

    /// Runs the worker until [`StorageManager::stop`]. Requests still queued
    /// at that point complete with InvalidState.
    pub async fn run_worker<D: BlockDevice>(&self, device: D) {
        let mut devices = DeviceManager::new(device);
        log::info!("sdstore: worker_start");
        while !self.is_stopped() {
            match with_timeout(
                Duration::from_millis(WORKER_IDLE_MS),
                self.queue.receive(),
            )
            .await
            {
                Ok(request) => self.process(&mut devices, request).await,
                Err(_) => continue,
            }
        }
        while let Ok(request) = self.queue.try_receive() {
            let kind = request.operation.kind();
            drop(request.operation);
            self.complete(
                request.id,
                kind,
                request.completion,
                Err(StorageError::InvalidState),
                false,
            );
        }
        log::info!("sdstore: worker_stop");
    }

    async fn process<D: BlockDevice>(
        &self,
        devices: &mut DeviceManager<D>,
        request: OperationRequest,
    ) {
        let OperationRequest {
            id,
            operation,
            completion,
            timeout_ms,
            submitted_at,
        } = request;
        let kind = operation.kind();

        devices.reconcile(self);
        if let Some(now) = self.now_unix() {
            devices.stamp(now);
        }

        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms as u64);
        let (result, timed_out) = match dispatch(self, devices, operation, deadline).await {
            Ok(output) => (Ok(output), false),
            Err(err) if err.is_deadline() => (Err(StorageError::Timeout), true),
            Err(err) => {
                self.classify_failure(devices, err);
                (Err(err.code()), false)
            }
        };
        if kind.changes_volume() {
            devices.refresh_capacity(self).await;
        }

        log_outcome(
            id,
            kind,
            &result,
            duration_ms_since(submitted_at),
            duration_ms_since(started),
        );
        self.complete(id, kind, completion, result, timed_out);
    }

    /// Events for failures whose cause matters beyond the caller.
    fn classify_failure<D: BlockDevice>(&self, devices: &mut DeviceManager<D>, err: FsError) {
        if err.is_card_absent() {
            devices.card_lost(self);
        } else if err.is_structural() {
            self.post(StorageEvent::FilesystemError { cause: err.label() });
        } else if err.is_device() {
            log::error!("sdstore: io_error err={}", err.label());
            self.post(StorageEvent::IoError { cause: err.label() });
        }
    }

    fn complete(
        &self,
        id: u32,
        kind: OperationKind,
        completion: Completion,
        result: OperationResult,
        timed_out: bool,
    ) {
        let error = result.as_ref().err().copied();
        self.with_state(|state| {
            let counters = &mut state.counters;
            counters.total = counters.total.wrapping_add(1);
            match error {
                None => counters.succeeded = counters.succeeded.wrapping_add(1),
                Some(_) => counters.failed = counters.failed.wrapping_add(1),
            }
            if timed_out {
                counters.timed_out = counters.timed_out.wrapping_add(1);
            }
        });

        completion(kind, result);

        match error {
            None => self.post(StorageEvent::OperationComplete { id, kind }),
            Some(error) => self.post(StorageEvent::OperationFailed { id, kind, error }),
        }
    }
}
