//! Core type definitions for the simulation kernel.
//!
//! This module defines the fundamental identifiers and the time type used
//! throughout the scheduler, resources and domain processes.

/// Virtual simulation time.
///
/// Always non-negative and never decreasing over a run. Events are ordered
/// with [`f64::total_cmp`], so the clock never has to deal with a `NaN`
/// (scheduling rejects it up front).
pub type SimTime = f64;

/// Identifier of a process owned by the scheduler.
///
/// Process ids are dense indices handed out by `Scheduler::spawn` in
/// spawn order.
pub type ProcessId = usize;

/// Identifier of a resource registered with the simulation context.
pub type ResourceId = usize;

/// Identifier of a simulated user equipment.
pub type UeId = usize;
