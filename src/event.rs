//! Events, wakeups and the time-ordered event queue.
//!
//! The event queue doubles as the simulation clock: popping an event
//! advances `now` to the event's time. Events are totally ordered by
//! `(time, seq)`, where `seq` is assigned at schedule time, so events
//! scheduled for the same instant fire in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{SimError, SimResult};
use crate::resource::Hold;
use crate::types::{ProcessId, ResourceId, SimTime};

/// The payload delivered to a process when it is resumed.
#[derive(Debug, PartialEq)]
pub enum Wakeup {
    /// First resumption of a freshly spawned process.
    Start,
    /// A timed wait elapsed.
    Timeout,
    /// The process became the holder of a resource it was queued on.
    Granted(Hold),
}

impl Wakeup {
    /// Short name used in diagnostics.
    pub fn label(&self) -> String {
        match self {
            Wakeup::Start => "start".to_string(),
            Wakeup::Timeout => "timeout".to_string(),
            Wakeup::Granted(hold) => format!("grant of resource {}", hold.resource()),
        }
    }

    /// Returns the granted resource, if this is a grant.
    pub fn granted_resource(&self) -> Option<ResourceId> {
        match self {
            Wakeup::Granted(hold) => Some(hold.resource()),
            _ => None,
        }
    }
}

/// A pending wakeup of one process at one point in virtual time.
#[derive(Debug)]
pub struct Event {
    /// The simulation time at which this event fires
    pub time: SimTime,
    /// Schedule-order tie-breaker
    pub seq: u64,
    /// The process to resume
    pub target: ProcessId,
    /// What the process is resumed with
    pub wakeup: Wakeup,
}

impl Event {
    /// Returns the ordering key of this event.
    pub fn key(&self) -> EventKey {
        EventKey {
            time: self.time,
            seq: self.seq,
        }
    }
}

/// The `(time, seq)` ordering key of a scheduled event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventKey {
    pub time: SimTime,
    pub seq: u64,
}

impl EventKey {
    fn cmp_order(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

// BinaryHeap is a max-heap; reverse so the earliest key is on top.
struct Queued(Event);

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.key().cmp_order(&other.0.key()).reverse()
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

/// Virtual clock plus the queue of pending events.
///
/// # Example
///
/// ```rust
/// use rncsim::event::{EventQueue, Wakeup};
///
/// let mut queue = EventQueue::new();
/// queue.schedule(5.0, 1, Wakeup::Timeout).unwrap();
/// queue.schedule(5.0, 2, Wakeup::Timeout).unwrap();
///
/// let first = queue.pop_next().unwrap();
/// assert_eq!((first.time, first.target), (5.0, 1));
/// assert_eq!(queue.now(), 5.0);
/// ```
pub struct EventQueue {
    heap: BinaryHeap<Queued>,
    now: SimTime,
    next_seq: u64,
    peak_len: usize,
}

impl EventQueue {
    /// Creates an empty queue with the clock at zero.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            now: 0.0,
            next_seq: 0,
            peak_len: 0,
        }
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedules `wakeup` for `target` at `now + delay`.
    ///
    /// Fails with [`SimError::NegativeDelay`] when `delay` is negative or
    /// not a number.
    pub fn schedule(
        &mut self,
        delay: SimTime,
        target: ProcessId,
        wakeup: Wakeup,
    ) -> SimResult<EventKey> {
        if delay.is_nan() || delay < 0.0 {
            return Err(SimError::NegativeDelay(delay));
        }

        let event = Event {
            time: self.now + delay,
            seq: self.next_seq,
            target,
            wakeup,
        };
        self.next_seq += 1;

        let key = event.key();
        self.heap.push(Queued(event));
        self.peak_len = self.peak_len.max(self.heap.len());
        Ok(key)
    }

    /// Removes the earliest event and advances the clock to its time.
    ///
    /// Returns `None` when no events remain.
    pub fn pop_next(&mut self) -> Option<Event> {
        let Queued(event) = self.heap.pop()?;
        self.now = event.time;
        Some(event)
    }

    /// Returns the time of the next event without removing it.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|queued| queued.0.time)
    }

    /// Moves the clock forward to `time`. Never moves it backwards.
    pub fn advance_to(&mut self, time: SimTime) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Returns the number of pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no events are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns the largest number of simultaneously pending events seen.
    pub fn peak_len(&self) -> usize {
        self.peak_len
    }

    /// Drains the remaining events in firing order without touching the clock.
    pub(crate) fn drain_pending(&mut self) -> Vec<Event> {
        let mut events: Vec<Event> = self.heap.drain().map(|queued| queued.0).collect();
        events.sort_by(|a, b| a.key().cmp_order(&b.key()));
        events
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(10.0, 1, Wakeup::Timeout).unwrap();
        queue.schedule(2.5, 2, Wakeup::Timeout).unwrap();
        queue.schedule(7.0, 3, Wakeup::Timeout).unwrap();

        let order: Vec<ProcessId> = std::iter::from_fn(|| queue.pop_next())
            .map(|e| e.target)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(queue.now(), 10.0);
    }

    #[test]
    fn test_same_time_ties_break_by_schedule_order() {
        let mut queue = EventQueue::new();
        for target in [4, 1, 3, 2] {
            queue.schedule(1.0, target, Wakeup::Timeout).unwrap();
        }

        let order: Vec<ProcessId> = std::iter::from_fn(|| queue.pop_next())
            .map(|e| e.target)
            .collect();
        assert_eq!(order, vec![4, 1, 3, 2]);
    }

    #[test]
    fn test_sequence_strictly_increases() {
        let mut queue = EventQueue::new();
        let a = queue.schedule(3.0, 0, Wakeup::Timeout).unwrap();
        let b = queue.schedule(1.0, 0, Wakeup::Timeout).unwrap();
        let c = queue.schedule(0.0, 0, Wakeup::Start).unwrap();
        assert!(a.seq < b.seq && b.seq < c.seq);
    }

    #[test]
    fn test_delay_is_relative_to_now() {
        let mut queue = EventQueue::new();
        queue.schedule(4.0, 0, Wakeup::Timeout).unwrap();
        queue.pop_next().unwrap();

        let key = queue.schedule(1.5, 0, Wakeup::Timeout).unwrap();
        assert_eq!(key.time, 5.5);
    }

    #[test]
    fn test_negative_and_nan_delays_rejected() {
        let mut queue = EventQueue::new();
        assert_eq!(
            queue.schedule(-1.0, 0, Wakeup::Timeout),
            Err(SimError::NegativeDelay(-1.0))
        );
        assert!(queue.schedule(f64::NAN, 0, Wakeup::Timeout).is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_delay_allowed() {
        let mut queue = EventQueue::new();
        let key = queue.schedule(0.0, 9, Wakeup::Start).unwrap();
        assert_eq!(key.time, 0.0);
        assert_eq!(queue.pop_next().unwrap().target, 9);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = EventQueue::new();
        assert!(queue.pop_next().is_none());
        assert!(queue.peek_time().is_none());
        assert_eq!(queue.now(), 0.0);
    }

    #[test]
    fn test_advance_to_never_goes_back() {
        let mut queue = EventQueue::new();
        queue.advance_to(8.0);
        queue.advance_to(3.0);
        assert_eq!(queue.now(), 8.0);
    }

    #[test]
    fn test_peak_len_and_drain() {
        let mut queue = EventQueue::new();
        queue.schedule(2.0, 1, Wakeup::Timeout).unwrap();
        queue.schedule(1.0, 2, Wakeup::Timeout).unwrap();
        queue.pop_next().unwrap();
        assert_eq!(queue.peak_len(), 2);

        queue.schedule(5.0, 3, Wakeup::Timeout).unwrap();
        let pending = queue.drain_pending();
        assert_eq!(pending.iter().map(|e| e.target).collect::<Vec<_>>(), vec![1, 3]);
        assert!(queue.is_empty());
    }
}
