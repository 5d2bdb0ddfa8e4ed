//! Kernel error type.
//!
//! `SimError` covers two groups of failures:
//! - `ResourceBlocked`, the one expected, recoverable outcome of `acquire`
//! - internal consistency failures, which abort `Scheduler::run`

use thiserror::Error;

use crate::types::{ProcessId, ResourceId, SimTime};

/// Errors raised by the clock, the scheduler and resources.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// The wait queue of the resource was full when the request arrived.
    #[error("resource {resource} blocked: wait queue at capacity {capacity}")]
    ResourceBlocked { resource: ResourceId, capacity: usize },

    #[error("cannot schedule with delay {0}: delay must be a non-negative number")]
    NegativeDelay(SimTime),

    #[error("process {process} released resource {resource} it does not hold (holder: {holder:?})")]
    NotHolder {
        resource: ResourceId,
        process: ProcessId,
        holder: Option<ProcessId>,
    },

    #[error("process {process} already holds or waits for resource {resource}")]
    AlreadyRequested {
        resource: ResourceId,
        process: ProcessId,
    },

    #[error("process {process} awaits a grant on resource {resource} without being queued")]
    NotQueued {
        resource: ResourceId,
        process: ProcessId,
    },

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    #[error("process {process} woken by {wakeup} while {expected}")]
    UnexpectedWakeup {
        process: ProcessId,
        wakeup: String,
        expected: String,
    },
}

impl SimError {
    /// Returns true if this is the recoverable admission-control rejection.
    pub fn is_blocked(&self) -> bool {
        matches!(self, SimError::ResourceBlocked { .. })
    }
}

/// Result type for kernel operations.
pub type SimResult<T> = Result<T, SimError>;
