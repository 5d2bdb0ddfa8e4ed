//! Simulation context and the cooperative scheduler.
//!
//! The [`SimContext`] is the single object every process talks to: it owns
//! the clock and event queue, the resources and the trace sink. The
//! [`Scheduler`] owns the processes and the context, pops one event at a
//! time and resumes exactly one process per event.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::event::{Event, EventKey, EventQueue, Wakeup};
use crate::process::{Process, ProcessState, Suspension, Yield};
use crate::resource::{Admission, Hold, Resource, ResourceStats};
use crate::trace::{NullSink, TraceDetail, TraceKind, TraceRecord, TraceSink};
use crate::types::{ProcessId, ResourceId, SimTime, UeId};

/// Everything a running process may touch.
pub struct SimContext {
    queue: EventQueue,
    resources: Vec<Resource>,
    sink: Box<dyn TraceSink>,
    records_emitted: u64,
}

impl SimContext {
    /// Creates a context that hands trace records to `sink`.
    pub fn new(sink: Box<dyn TraceSink>) -> Self {
        Self {
            queue: EventQueue::new(),
            resources: Vec::new(),
            sink,
            records_emitted: 0,
        }
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Schedules `wakeup` for `target` after `delay`.
    pub fn schedule(
        &mut self,
        delay: SimTime,
        target: ProcessId,
        wakeup: Wakeup,
    ) -> SimResult<EventKey> {
        self.queue.schedule(delay, target, wakeup)
    }

    /// Registers a new resource and returns its id.
    pub fn add_resource(&mut self, name: impl Into<String>, max_queue_length: usize) -> ResourceId {
        let id = self.resources.len();
        self.resources.push(Resource::new(id, name, max_queue_length));
        id
    }

    pub fn resource(&self, id: ResourceId) -> SimResult<&Resource> {
        self.resources.get(id).ok_or(SimError::UnknownResource(id))
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Requests `resource` for `process`.
    ///
    /// On [`Admission::Queued`] the caller must suspend with
    /// [`Yield::AwaitGrant`]; it will be resumed with [`Wakeup::Granted`].
    /// A full wait queue yields [`SimError::ResourceBlocked`].
    pub fn acquire(&mut self, resource: ResourceId, process: ProcessId) -> SimResult<Admission> {
        let now = self.now();
        self.resources
            .get_mut(resource)
            .ok_or(SimError::UnknownResource(resource))?
            .acquire(process, now)
    }

    /// Releases a held resource.
    ///
    /// If a request was waiting, its process becomes the holder and is
    /// woken by a zero-delay event, keeping grant order equal to arrival
    /// order.
    pub fn release(&mut self, hold: Hold) -> SimResult<()> {
        let now = self.now();
        let next = self
            .resources
            .get_mut(hold.resource())
            .ok_or(SimError::UnknownResource(hold.resource()))?
            .release(hold.holder(), now)?;

        if let Some(next) = next {
            let target = next.holder();
            self.queue.schedule(0.0, target, Wakeup::Granted(next))?;
        }
        Ok(())
    }

    /// Hands a trace record stamped with the current time to the sink.
    pub fn emit(&mut self, ue: UeId, kind: TraceKind, detail: TraceDetail) {
        let record = TraceRecord {
            time: self.now(),
            ue,
            kind,
            detail,
        };
        self.records_emitted += 1;
        self.sink.record(record);
    }

    /// Number of trace records emitted so far.
    pub fn records_emitted(&self) -> u64 {
        self.records_emitted
    }

    fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new(Box::new(NullSink))
    }
}

/// Why `Scheduler::run` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No events were left.
    Exhausted,
    /// The next event lies beyond the horizon.
    HorizonReached,
}

/// A resource still held when the run stopped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeakedHold {
    pub resource: ResourceId,
    pub resource_name: String,
    pub holder: ProcessId,
    pub holder_name: String,
}

/// End-of-run view of one resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub id: ResourceId,
    pub name: String,
    pub max_queue_length: usize,
    pub queue_length: usize,
    pub holder: Option<ProcessId>,
    pub stats: ResourceStats,
    /// Busy time including a hold still in progress
    pub busy_time: SimTime,
    /// `busy_time / final_time`, zero for an empty run
    pub utilization: f64,
}

/// Summary of a scheduler run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub horizon: SimTime,
    pub final_time: SimTime,
    pub stop_reason: StopReason,
    pub events_processed: u64,
    pub pending_events: usize,
    pub peak_pending_events: usize,
    pub process_count: usize,
    pub terminated: usize,
    /// Processes left suspended at the end of the run
    pub abandoned: Vec<ProcessId>,
    /// Resources left held at the end of the run; never force-released
    pub leaked: Vec<LeakedHold>,
    pub resources: Vec<ResourceReport>,
    pub records_emitted: u64,
}

struct ProcessSlot {
    name: String,
    process: Box<dyn Process>,
    state: ProcessState,
}

/// Owns the processes and drives the run loop.
///
/// # Example
///
/// ```rust
/// use rncsim::error::SimResult;
/// use rncsim::event::Wakeup;
/// use rncsim::process::{Process, Yield};
/// use rncsim::scheduler::{Scheduler, SimContext, StopReason};
/// use rncsim::types::ProcessId;
///
/// struct Sleeper;
///
/// impl Process for Sleeper {
///     fn resume(&mut self, _ctx: &mut SimContext, _me: ProcessId, wakeup: Wakeup) -> SimResult<Yield> {
///         match wakeup {
///             Wakeup::Start => Ok(Yield::Timeout(4.0)),
///             _ => Ok(Yield::Exit),
///         }
///     }
/// }
///
/// let mut scheduler = Scheduler::new(SimContext::default());
/// scheduler.spawn(Sleeper).unwrap();
/// let report = scheduler.run(10.0).unwrap();
///
/// assert_eq!(report.stop_reason, StopReason::Exhausted);
/// assert_eq!(report.final_time, 4.0);
/// ```
pub struct Scheduler {
    ctx: SimContext,
    slots: Vec<ProcessSlot>,
    events_processed: u64,
}

impl Scheduler {
    pub fn new(ctx: SimContext) -> Self {
        Self {
            ctx,
            slots: Vec::new(),
            events_processed: 0,
        }
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    /// Mutable access to the context, e.g. to register resources before
    /// spawning processes.
    pub fn context_mut(&mut self) -> &mut SimContext {
        &mut self.ctx
    }

    pub fn now(&self) -> SimTime {
        self.ctx.now()
    }

    /// Adds a process and schedules its start at the current time.
    pub fn spawn<P: Process + 'static>(&mut self, process: P) -> SimResult<ProcessId> {
        self.spawn_boxed(Box::new(process))
    }

    pub fn spawn_boxed(&mut self, process: Box<dyn Process>) -> SimResult<ProcessId> {
        let id = self.slots.len();
        let name = process.name();
        self.ctx.schedule(0.0, id, Wakeup::Start)?;
        tracing::debug!(process = id, name = %name, "spawned process");
        self.slots.push(ProcessSlot {
            name,
            process,
            state: ProcessState::Suspended(Suspension::Start),
        });
        Ok(id)
    }

    pub fn process_count(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self, id: ProcessId) -> Option<ProcessState> {
        self.slots.get(id).map(|slot| slot.state)
    }

    pub fn process_name(&self, id: ProcessId) -> Option<&str> {
        self.slots.get(id).map(|slot| slot.name.as_str())
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Processes the next event, if any. Returns false when the queue is empty.
    pub fn step(&mut self) -> SimResult<bool> {
        match self.ctx.queue_mut().pop_next() {
            Some(event) => {
                self.dispatch(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs until the queue is empty or the next event lies beyond `horizon`.
    ///
    /// Events at exactly `horizon` are processed. When the horizon stops the
    /// run the clock is moved to `horizon`; suspended processes are abandoned
    /// as they are and held resources stay held.
    pub fn run(&mut self, horizon: SimTime) -> SimResult<RunReport> {
        tracing::debug!(horizon, processes = self.slots.len(), "run started");

        let stop_reason = loop {
            match self.ctx.queue.peek_time() {
                None => break StopReason::Exhausted,
                Some(time) if time > horizon => {
                    self.ctx.queue_mut().advance_to(horizon);
                    break StopReason::HorizonReached;
                }
                Some(_) => {
                    self.step()?;
                }
            }
        };

        let report = self.report(horizon, stop_reason);
        for leak in &report.leaked {
            tracing::warn!(
                resource = %leak.resource_name,
                holder = %leak.holder_name,
                "resource still held at end of run"
            );
        }
        tracing::debug!(
            final_time = report.final_time,
            events = report.events_processed,
            reason = ?report.stop_reason,
            "run stopped"
        );
        Ok(report)
    }

    /// Drops all pending events, returning them in firing order.
    ///
    /// Used after a run to inspect what would have happened next.
    pub fn take_pending(&mut self) -> Vec<Event> {
        self.ctx.queue_mut().drain_pending()
    }

    fn dispatch(&mut self, event: Event) -> SimResult<()> {
        let Event { target, wakeup, .. } = event;
        let slot = self
            .slots
            .get_mut(target)
            .ok_or(SimError::UnknownProcess(target))?;

        if !slot.state.accepts(&wakeup) {
            return Err(SimError::UnexpectedWakeup {
                process: target,
                wakeup: wakeup.label(),
                expected: slot.state.to_string(),
            });
        }

        self.events_processed += 1;
        slot.state = ProcessState::Runnable;
        let yielded = slot.process.resume(&mut self.ctx, target, wakeup)?;

        slot.state = match yielded {
            Yield::Timeout(delay) => {
                self.ctx.schedule(delay, target, Wakeup::Timeout)?;
                ProcessState::Suspended(Suspension::Timer)
            }
            Yield::AwaitGrant(resource) => {
                if !self.ctx.resource(resource)?.is_queued(target) {
                    return Err(SimError::NotQueued {
                        resource,
                        process: target,
                    });
                }
                ProcessState::Suspended(Suspension::Grant(resource))
            }
            Yield::Exit => {
                tracing::debug!(process = target, time = self.ctx.now(), "process exited");
                ProcessState::Terminated
            }
        };
        Ok(())
    }

    fn report(&self, horizon: SimTime, stop_reason: StopReason) -> RunReport {
        let final_time = self.ctx.now();

        let leaked = self
            .ctx
            .resources
            .iter()
            .filter_map(|resource| {
                resource.holder().map(|holder| LeakedHold {
                    resource: resource.id(),
                    resource_name: resource.name().to_string(),
                    holder,
                    holder_name: self
                        .process_name(holder)
                        .unwrap_or("unknown")
                        .to_string(),
                })
            })
            .collect();

        let resources = self
            .ctx
            .resources
            .iter()
            .map(|resource| {
                let busy_time = resource.busy_time_at(final_time);
                ResourceReport {
                    id: resource.id(),
                    name: resource.name().to_string(),
                    max_queue_length: resource.max_queue_length(),
                    queue_length: resource.queue_len(),
                    holder: resource.holder(),
                    stats: resource.stats().clone(),
                    busy_time,
                    utilization: if final_time > 0.0 {
                        busy_time / final_time
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        RunReport {
            horizon,
            final_time,
            stop_reason,
            events_processed: self.events_processed,
            pending_events: self.ctx.queue.len(),
            peak_pending_events: self.ctx.queue.peak_len(),
            process_count: self.slots.len(),
            terminated: self
                .slots
                .iter()
                .filter(|slot| slot.state.is_terminated())
                .count(),
            abandoned: self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.state.is_suspended())
                .map(|(id, _)| id)
                .collect(),
            leaked,
            resources,
            records_emitted: self.ctx.records_emitted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the times it was resumed, sleeping a fixed delay each time.
    struct Periodic {
        delay: SimTime,
        rounds: usize,
        log: std::rc::Rc<std::cell::RefCell<Vec<(ProcessId, SimTime)>>>,
    }

    impl Process for Periodic {
        fn resume(&mut self, ctx: &mut SimContext, me: ProcessId, _wakeup: Wakeup) -> SimResult<Yield> {
            self.log.borrow_mut().push((me, ctx.now()));
            if self.rounds == 0 {
                return Ok(Yield::Exit);
            }
            self.rounds -= 1;
            Ok(Yield::Timeout(self.delay))
        }
    }

    struct Misbehaving;

    impl Process for Misbehaving {
        fn resume(&mut self, _ctx: &mut SimContext, _me: ProcessId, _wakeup: Wakeup) -> SimResult<Yield> {
            Ok(Yield::AwaitGrant(0))
        }
    }

    #[test]
    fn test_processes_interleave_in_time_order() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut scheduler = Scheduler::new(SimContext::default());
        scheduler
            .spawn(Periodic { delay: 2.0, rounds: 2, log: log.clone() })
            .unwrap();
        scheduler
            .spawn(Periodic { delay: 3.0, rounds: 1, log: log.clone() })
            .unwrap();

        let report = scheduler.run(100.0).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![(0, 0.0), (1, 0.0), (0, 2.0), (1, 3.0), (0, 4.0)]
        );
        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(report.terminated, 2);
        assert!(report.abandoned.is_empty());
        assert_eq!(report.events_processed, 5);
    }

    #[test]
    fn test_horizon_abandons_suspended_processes() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut scheduler = Scheduler::new(SimContext::default());
        let id = scheduler
            .spawn(Periodic { delay: 5.0, rounds: 10, log: log.clone() })
            .unwrap();

        let report = scheduler.run(12.0).unwrap();

        assert_eq!(report.stop_reason, StopReason::HorizonReached);
        assert_eq!(report.final_time, 12.0);
        assert_eq!(report.abandoned, vec![id]);
        assert_eq!(report.pending_events, 1);
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(
            scheduler.state(id),
            Some(ProcessState::Suspended(Suspension::Timer))
        );
    }

    #[test]
    fn test_event_at_horizon_is_processed() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut scheduler = Scheduler::new(SimContext::default());
        scheduler
            .spawn(Periodic { delay: 5.0, rounds: 1, log: log.clone() })
            .unwrap();

        let report = scheduler.run(5.0).unwrap();
        assert_eq!(log.borrow().last(), Some(&(0, 5.0)));
        assert_eq!(report.stop_reason, StopReason::Exhausted);
    }

    #[test]
    fn test_negative_timeout_aborts_run() {
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut scheduler = Scheduler::new(SimContext::default());
        scheduler
            .spawn(Periodic { delay: -1.0, rounds: 1, log })
            .unwrap();

        assert_eq!(scheduler.run(10.0), Err(SimError::NegativeDelay(-1.0)));
    }

    #[test]
    fn test_await_grant_without_queueing_fails() {
        let mut scheduler = Scheduler::new(SimContext::default());
        scheduler.context_mut().add_resource("r", 1);
        scheduler.spawn(Misbehaving).unwrap();

        assert_eq!(
            scheduler.run(1.0),
            Err(SimError::NotQueued {
                resource: 0,
                process: 0
            })
        );
    }

    #[test]
    fn test_release_wakes_next_waiter_with_zero_delay() {
        let mut ctx = SimContext::default();
        let r = ctx.add_resource("r", 1);

        let hold = match ctx.acquire(r, 0).unwrap() {
            Admission::Granted(hold) => hold,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(ctx.acquire(r, 1).unwrap(), Admission::Queued { position: 0 });

        ctx.release(hold).unwrap();
        assert_eq!(ctx.resource(r).unwrap().holder(), Some(1));

        let event = ctx.queue_mut().pop_next().unwrap();
        assert_eq!(event.time, 0.0);
        assert_eq!(event.target, 1);
        assert_eq!(event.wakeup.granted_resource(), Some(r));
    }

    #[test]
    fn test_unknown_resource() {
        let mut ctx = SimContext::default();
        assert_eq!(ctx.acquire(3, 0), Err(SimError::UnknownResource(3)));
        assert!(ctx.resource(0).is_err());
    }
}
