//! Bounded single-server resource with a FIFO wait queue.
//!
//! A `Resource` has capacity one. A request is granted at once when the
//! resource is free, queued when it is held and the wait queue has room,
//! and rejected with [`SimError::ResourceBlocked`] otherwise. On release the
//! head of the queue becomes the new holder, so grants follow arrival order.
//!
//! Every grant is represented by a [`Hold`] token. The token cannot be
//! cloned and `release` consumes it, which gives each successful acquisition
//! exactly one release site.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::types::{ProcessId, ResourceId, SimTime};

/// Proof that a process holds a resource.
#[derive(Debug, PartialEq)]
#[must_use = "a held resource must be released"]
pub struct Hold {
    resource: ResourceId,
    holder: ProcessId,
    requested_at: SimTime,
    granted_at: SimTime,
}

impl Hold {
    /// The held resource.
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// The holding process.
    pub fn holder(&self) -> ProcessId {
        self.holder
    }

    /// When the request was submitted.
    pub fn requested_at(&self) -> SimTime {
        self.requested_at
    }

    /// When the request was granted.
    pub fn granted_at(&self) -> SimTime {
        self.granted_at
    }

    /// Time spent in the wait queue before the grant.
    pub fn waited(&self) -> SimTime {
        self.granted_at - self.requested_at
    }
}

/// A pending request in a resource's wait queue.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub process: ProcessId,
    pub resource: ResourceId,
    pub enqueue_time: SimTime,
}

/// Outcome of an accepted `acquire`.
#[derive(Debug, PartialEq)]
pub enum Admission {
    /// The resource was free; the caller holds it now.
    Granted(Hold),
    /// The caller was appended to the wait queue at `position` (0 = head).
    Queued { position: usize },
}

/// Counters kept by every resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Requests admitted (granted at once or queued)
    pub accepted: u64,
    /// Requests that became holder
    pub granted: u64,
    /// Requests rejected because the wait queue was full
    pub blocked: u64,
    /// Releases
    pub completed: u64,
    /// Longest wait queue observed
    pub peak_queue_length: usize,
    /// Total time the resource was held, counting completed holds only
    pub busy_time: SimTime,
}

/// A capacity-one resource with bounded FIFO admission.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    name: String,
    holder: Option<(ProcessId, SimTime)>,
    wait_queue: VecDeque<Request>,
    max_queue_length: usize,
    stats: ResourceStats,
}

impl Resource {
    /// Creates a free resource whose wait queue holds at most
    /// `max_queue_length` requests.
    pub fn new(id: ResourceId, name: impl Into<String>, max_queue_length: usize) -> Self {
        Self {
            id,
            name: name.into(),
            holder: None,
            wait_queue: VecDeque::new(),
            max_queue_length,
            stats: ResourceStats::default(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<ProcessId> {
        self.holder.map(|(process, _)| process)
    }

    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }

    pub fn queue_len(&self) -> usize {
        self.wait_queue.len()
    }

    pub fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    /// Processes waiting for the resource, head first.
    pub fn waiting(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.wait_queue.iter().map(|request| request.process)
    }

    /// Returns true if `process` sits in the wait queue.
    pub fn is_queued(&self, process: ProcessId) -> bool {
        self.wait_queue.iter().any(|request| request.process == process)
    }

    pub fn stats(&self) -> &ResourceStats {
        &self.stats
    }

    /// Busy time including the hold still in progress at `now`.
    pub fn busy_time_at(&self, now: SimTime) -> SimTime {
        let ongoing = self
            .holder
            .map(|(_, since)| (now - since).max(0.0))
            .unwrap_or(0.0);
        self.stats.busy_time + ongoing
    }

    /// Requests the resource for `process` at time `now`.
    ///
    /// A rejected request leaves the resource untouched.
    pub fn acquire(&mut self, process: ProcessId, now: SimTime) -> SimResult<Admission> {
        if self.holder() == Some(process) || self.is_queued(process) {
            return Err(SimError::AlreadyRequested {
                resource: self.id,
                process,
            });
        }

        if self.holder.is_none() {
            self.holder = Some((process, now));
            self.stats.accepted += 1;
            self.stats.granted += 1;
            return Ok(Admission::Granted(Hold {
                resource: self.id,
                holder: process,
                requested_at: now,
                granted_at: now,
            }));
        }

        if self.wait_queue.len() >= self.max_queue_length {
            self.stats.blocked += 1;
            return Err(SimError::ResourceBlocked {
                resource: self.id,
                capacity: self.max_queue_length,
            });
        }

        self.wait_queue.push_back(Request {
            process,
            resource: self.id,
            enqueue_time: now,
        });
        self.stats.accepted += 1;
        self.stats.peak_queue_length = self.stats.peak_queue_length.max(self.wait_queue.len());
        Ok(Admission::Queued {
            position: self.wait_queue.len() - 1,
        })
    }

    /// Releases the resource held by `process` at time `now`.
    ///
    /// If a request is waiting, the head of the queue becomes the holder and
    /// its grant token is returned; the caller is responsible for waking it.
    pub fn release(&mut self, process: ProcessId, now: SimTime) -> SimResult<Option<Hold>> {
        let since = match self.holder {
            Some((holder, since)) if holder == process => since,
            _ => {
                return Err(SimError::NotHolder {
                    resource: self.id,
                    process,
                    holder: self.holder(),
                })
            }
        };

        self.stats.busy_time += (now - since).max(0.0);
        self.stats.completed += 1;
        self.holder = None;

        let Some(next) = self.wait_queue.pop_front() else {
            return Ok(None);
        };

        self.holder = Some((next.process, now));
        self.stats.granted += 1;
        Ok(Some(Hold {
            resource: self.id,
            holder: next.process,
            requested_at: next.enqueue_time,
            granted_at: now,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_hold(admission: Admission) -> Hold {
        match admission {
            Admission::Granted(hold) => hold,
            other => panic!("expected grant, got {:?}", other),
        }
    }

    #[test]
    fn test_free_resource_grants_immediately() {
        let mut resource = Resource::new(0, "signaling", 1);
        let hold = expect_hold(resource.acquire(7, 1.0).unwrap());

        assert_eq!(hold.holder(), 7);
        assert_eq!(hold.waited(), 0.0);
        assert_eq!(resource.holder(), Some(7));
        assert_eq!(resource.queue_len(), 0);
    }

    #[test]
    fn test_queue_then_block() {
        let mut resource = Resource::new(0, "data", 1);
        let _hold = expect_hold(resource.acquire(1, 0.0).unwrap());

        assert_eq!(
            resource.acquire(2, 0.0).unwrap(),
            Admission::Queued { position: 0 }
        );
        assert_eq!(
            resource.acquire(3, 0.0),
            Err(SimError::ResourceBlocked {
                resource: 0,
                capacity: 1
            })
        );
        assert_eq!(resource.queue_len(), 1);
        assert_eq!(resource.stats().blocked, 1);
        assert_eq!(resource.stats().accepted, 2);
    }

    #[test]
    fn test_zero_length_queue_is_pure_loss() {
        let mut resource = Resource::new(0, "loss", 0);
        let _hold = expect_hold(resource.acquire(1, 0.0).unwrap());
        assert!(resource.acquire(2, 0.0).unwrap_err().is_blocked());
        assert_eq!(resource.queue_len(), 0);
    }

    #[test]
    fn test_release_hands_over_in_fifo_order() {
        let mut resource = Resource::new(0, "fifo", 3);
        let hold = expect_hold(resource.acquire(10, 0.0).unwrap());
        for process in [11, 12, 13] {
            resource.acquire(process, 1.0).unwrap();
        }

        let mut order = Vec::new();
        let mut current = hold;
        let mut now = 2.0;
        while let Some(next) = resource.release(current.holder(), now).unwrap() {
            assert_eq!(next.requested_at(), 1.0);
            assert_eq!(next.granted_at(), now);
            order.push(next.holder());
            current = next;
            now += 1.0;
        }

        assert_eq!(order, vec![11, 12, 13]);
        assert!(resource.is_free());
        assert_eq!(resource.stats().completed, 4);
        assert_eq!(resource.stats().busy_time, 5.0);
    }

    #[test]
    fn test_release_by_non_holder_fails() {
        let mut resource = Resource::new(4, "r", 1);
        assert_eq!(
            resource.release(1, 0.0),
            Err(SimError::NotHolder {
                resource: 4,
                process: 1,
                holder: None
            })
        );

        let _hold = expect_hold(resource.acquire(1, 0.0).unwrap());
        assert!(resource.release(2, 0.0).is_err());
        assert_eq!(resource.holder(), Some(1));
    }

    #[test]
    fn test_double_request_rejected() {
        let mut resource = Resource::new(0, "r", 2);
        let _hold = expect_hold(resource.acquire(1, 0.0).unwrap());
        resource.acquire(2, 0.0).unwrap();

        assert!(matches!(
            resource.acquire(1, 0.0),
            Err(SimError::AlreadyRequested { .. })
        ));
        assert!(matches!(
            resource.acquire(2, 0.0),
            Err(SimError::AlreadyRequested { .. })
        ));
    }

    #[test]
    fn test_busy_time_counts_ongoing_hold() {
        let mut resource = Resource::new(0, "r", 0);
        let _hold = expect_hold(resource.acquire(1, 2.0).unwrap());
        assert_eq!(resource.busy_time_at(5.0), 3.0);
        assert_eq!(resource.stats().busy_time, 0.0);
    }
}
