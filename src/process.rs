//! The `Process` trait and process lifecycle states.
//!
//! A process is an explicit continuation: the scheduler resumes it with a
//! [`Wakeup`] and the process runs until it reaches its next suspension
//! point, which it reports by returning a [`Yield`]. Only two things
//! suspend a process: a timed wait and waiting for a resource grant.
//! Everything else (releasing, emitting trace records, mutating its own
//! state) happens synchronously inside `resume`.

use std::fmt;

use crate::error::SimResult;
use crate::event::Wakeup;
use crate::scheduler::SimContext;
use crate::types::{ProcessId, ResourceId, SimTime};

/// How a process suspends at the end of a resumption.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Yield {
    /// Resume with [`Wakeup::Timeout`] after `delay` units of virtual time.
    Timeout(SimTime),
    /// Resume with [`Wakeup::Granted`] once the resource is handed over.
    /// The process must already be queued on it.
    AwaitGrant(ResourceId),
    /// The process is finished and is never resumed again.
    Exit,
}

/// Result of driving a sub-operation that may span several resumptions.
///
/// Domain processes compose multi-step operations (a controller request,
/// a handshake) as nested state machines. Each step either needs the
/// enclosing process to suspend, or finishes with a typed outcome.
#[derive(Debug, PartialEq)]
pub enum Progress<T> {
    /// Suspend the enclosing process and resume the operation later.
    Pending(Yield),
    /// The operation finished.
    Ready(T),
}

/// Why a process is suspended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Suspension {
    /// Spawned, waiting for its first resumption
    Start,
    /// Waiting for a timer
    Timer,
    /// Queued on a resource
    Grant(ResourceId),
}

/// Lifecycle state of a process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProcessState {
    Runnable,
    Suspended(Suspension),
    Terminated,
}

impl ProcessState {
    pub fn is_suspended(&self) -> bool {
        matches!(self, ProcessState::Suspended(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, ProcessState::Terminated)
    }

    /// Returns true if `wakeup` is the one this state is waiting for.
    pub fn accepts(&self, wakeup: &Wakeup) -> bool {
        match (self, wakeup) {
            (ProcessState::Suspended(Suspension::Start), Wakeup::Start) => true,
            (ProcessState::Suspended(Suspension::Timer), Wakeup::Timeout) => true,
            (ProcessState::Suspended(Suspension::Grant(resource)), Wakeup::Granted(hold)) => {
                hold.resource() == *resource
            }
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Runnable => write!(f, "runnable"),
            ProcessState::Suspended(Suspension::Start) => write!(f, "waiting to start"),
            ProcessState::Suspended(Suspension::Timer) => write!(f, "waiting on a timer"),
            ProcessState::Suspended(Suspension::Grant(resource)) => {
                write!(f, "queued on resource {}", resource)
            }
            ProcessState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A simulated process driven by the scheduler.
///
/// # Example
///
/// ```rust
/// use rncsim::error::SimResult;
/// use rncsim::event::Wakeup;
/// use rncsim::process::{Process, Yield};
/// use rncsim::scheduler::SimContext;
/// use rncsim::types::ProcessId;
///
/// /// Ticks three times, one time unit apart.
/// struct Ticker {
///     ticks: u32,
/// }
///
/// impl Process for Ticker {
///     fn resume(&mut self, _ctx: &mut SimContext, _me: ProcessId, _wakeup: Wakeup) -> SimResult<Yield> {
///         if self.ticks == 3 {
///             return Ok(Yield::Exit);
///         }
///         self.ticks += 1;
///         Ok(Yield::Timeout(1.0))
///     }
/// }
/// ```
pub trait Process {
    /// Human readable name used in diagnostics.
    fn name(&self) -> String {
        "process".to_string()
    }

    /// Runs the process from its last suspension point to the next one.
    ///
    /// An `Err` is an internal consistency failure and aborts the run.
    fn resume(&mut self, ctx: &mut SimContext, me: ProcessId, wakeup: Wakeup) -> SimResult<Yield>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_accepts_matching_wakeup() {
        assert!(ProcessState::Suspended(Suspension::Start).accepts(&Wakeup::Start));
        assert!(ProcessState::Suspended(Suspension::Timer).accepts(&Wakeup::Timeout));
        assert!(!ProcessState::Suspended(Suspension::Timer).accepts(&Wakeup::Start));
        assert!(!ProcessState::Runnable.accepts(&Wakeup::Timeout));
        assert!(!ProcessState::Terminated.accepts(&Wakeup::Timeout));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            ProcessState::Suspended(Suspension::Grant(3)).to_string(),
            "queued on resource 3"
        );
        assert!(ProcessState::Terminated.is_terminated());
        assert!(ProcessState::Suspended(Suspension::Timer).is_suspended());
    }
}
