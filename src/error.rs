// src/error.rs

use thiserror::Error;

use crate::scan::progress::ProgressSnapshot;

/// Engine failure taxonomy. Lock contention is informational: the caller
/// reports it to the operator and retries later. Anything touching
/// storage is fatal to the run and rolls back with the caller's
/// transaction. Nothing is retried inside the engine.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{}", .0.busy_message())]
    LockBusy(ProgressSnapshot),
    #[error("storage failure while trying to {op}")]
    Storage {
        op: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },
}

impl ScanError {
    pub(crate) fn storage(op: &'static str, source: tokio_postgres::Error) -> Self {
        Self::Storage { op, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::progress::ScanPhase;

    #[test]
    fn lock_busy_renders_plain_message_without_snapshot() {
        let err = ScanError::LockBusy(ProgressSnapshot::default());
        assert_eq!(err.to_string(), "Duplicate scan in progress");
    }

    #[test]
    fn lock_busy_renders_phase_and_eta() {
        let err = ScanError::LockBusy(ProgressSnapshot {
            phase: Some(ScanPhase::Scan),
            percent: 40,
            eta_seconds: 120,
        });
        assert_eq!(
            err.to_string(),
            "Duplicate scan in progress, scan phase 40% complete, estimated completion in 2 minutes"
        );
    }
}
