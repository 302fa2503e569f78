use embassy_time::Instant;

use crate::queue::{OperationKind, OperationResult};

pub(super) fn log_outcome(
    id: u32,
    kind: OperationKind,
    result: &OperationResult,
    total_ms: u32,
    run_ms: u32,
) {
    match result {
        Ok(_) => log::debug!(
            "sdstore: op_done id={} kind={} wait_ms={} dur_ms={}",
            id,
            kind.label(),
            total_ms.saturating_sub(run_ms),
            run_ms
        ),
        Err(err) => log::warn!(
            "sdstore: op_failed id={} kind={} err={} wait_ms={} dur_ms={}",
            id,
            kind.label(),
            err.label(),
            total_ms.saturating_sub(run_ms),
            run_ms
        ),
    }
}

pub(super) fn duration_ms_since(start: Instant) -> u32 {
    Instant::now()
        .saturating_duration_since(start)
        .as_millis()
        .min(u32::MAX as u64) as u32
}
