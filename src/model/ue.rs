//! User equipment: the Idle/DCH state machine with retry.
//!
//! Each cycle a UE draws an inter-packet interval (the retrial one after a
//! failed cycle), waits, connects if it is idle, and sends one data packet.
//! While in DCH it keeps an inactivity budget of `t_dch`; when the drawn
//! interval would outlast the budget, the UE waits the budget out, tries to
//! drop back to Idle, then waits the rest of the interval.
//!
//! Connecting (Idle -> DCH) and releasing (DCH -> Idle) are both a
//! [`Handshake`] of `N` sequential signaling messages. A blocked message
//! ends the handshake at once. A failed connect costs the cycle its data
//! send and sets `retry`; a failed release is ignored.

use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{SimError, SimResult};
use crate::event::Wakeup;
use crate::process::{Process, Progress, Yield};
use crate::sampling::Sampler;
use crate::scheduler::SimContext;
use crate::trace::{HandshakeMode, RrcState, TraceDetail, TraceKind};
use crate::types::{ProcessId, SimTime, UeId};

use super::controller::{ChannelError, ChannelRequest};
use super::ControlPlane;

/// Failures observed by a UE.
///
/// Only `Sim` ever leaves the UE: it is a kernel consistency failure and
/// aborts the run. Everything else is recovered within the cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UeError {
    #[error("{mode:?} handshake {from} -> {to} failed after {attempted} of {total} messages")]
    HandshakeFailed {
        mode: HandshakeMode,
        from: RrcState,
        to: RrcState,
        attempted: usize,
        total: usize,
        #[source]
        cause: ChannelError,
    },

    #[error("ue {ue} could not send data this cycle")]
    CouldNotSend {
        ue: UeId,
        #[source]
        cause: Box<UeError>,
    },

    #[error(transparent)]
    Channel(ChannelError),

    #[error(transparent)]
    Sim(SimError),
}

impl From<ChannelError> for UeError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Sim(sim) => UeError::Sim(sim),
            blocked => UeError::Channel(blocked),
        }
    }
}

impl From<SimError> for UeError {
    fn from(err: SimError) -> Self {
        UeError::Sim(err)
    }
}

/// A sequence of `total` signaling messages moving a UE from one state to
/// another.
pub struct Handshake {
    ue: UeId,
    from: RrcState,
    to: RrcState,
    mode: HandshakeMode,
    total: usize,
    issued: usize,
    inflight: Option<ChannelRequest>,
}

impl Handshake {
    pub fn new(ue: UeId, from: RrcState, to: RrcState, mode: HandshakeMode, total: usize) -> Self {
        Self {
            ue,
            from,
            to,
            mode,
            total,
            issued: 0,
            inflight: None,
        }
    }

    /// Signaling messages issued so far, including a blocked one.
    pub fn issued(&self) -> usize {
        self.issued
    }

    pub fn target(&self) -> RrcState {
        self.to
    }

    /// Issues the first message. With zero messages the handshake succeeds
    /// right away.
    pub fn start<C: ControlPlane + ?Sized>(
        &mut self,
        ctx: &mut SimContext,
        me: ProcessId,
        plane: &C,
    ) -> Result<Progress<()>, UeError> {
        self.advance(ctx, me, plane)
    }

    /// Continues the message in flight and issues the next one once it is
    /// done.
    pub fn resume<C: ControlPlane + ?Sized>(
        &mut self,
        ctx: &mut SimContext,
        me: ProcessId,
        plane: &C,
        wakeup: Wakeup,
    ) -> Result<Progress<()>, UeError> {
        let Some(request) = self.inflight.as_mut() else {
            return Err(SimError::UnexpectedWakeup {
                process: me,
                wakeup: wakeup.label(),
                expected: "handshake with no message in flight".to_string(),
            }
            .into());
        };

        match request.resume(ctx, me, wakeup) {
            Ok(Progress::Pending(yielded)) => Ok(Progress::Pending(yielded)),
            Ok(Progress::Ready(())) => {
                self.inflight = None;
                self.advance(ctx, me, plane)
            }
            Err(err) => {
                self.inflight = None;
                self.fail(ctx, err)
            }
        }
    }

    fn advance<C: ControlPlane + ?Sized>(
        &mut self,
        ctx: &mut SimContext,
        me: ProcessId,
        plane: &C,
    ) -> Result<Progress<()>, UeError> {
        while self.issued < self.total {
            let mut request = plane.signal(self.ue, self.issued);
            self.issued += 1;

            match request.start(ctx, me) {
                Ok(Progress::Pending(yielded)) => {
                    self.inflight = Some(request);
                    return Ok(Progress::Pending(yielded));
                }
                Ok(Progress::Ready(())) => {}
                Err(err) => return self.fail(ctx, err),
            }
        }

        self.emit(ctx, TraceKind::TransitionSucceeded);
        Ok(Progress::Ready(()))
    }

    fn fail(&mut self, ctx: &mut SimContext, err: ChannelError) -> Result<Progress<()>, UeError> {
        match err {
            ChannelError::Sim(sim) => Err(UeError::Sim(sim)),
            cause => {
                self.emit(ctx, TraceKind::TransitionFailed);
                Err(UeError::HandshakeFailed {
                    mode: self.mode,
                    from: self.from,
                    to: self.to,
                    attempted: self.issued,
                    total: self.total,
                    cause,
                })
            }
        }
    }

    fn emit(&self, ctx: &mut SimContext, kind: TraceKind) {
        ctx.emit(
            self.ue,
            kind,
            TraceDetail::Transition {
                from: self.from,
                to: self.to,
                mode: self.mode,
                messages_sent: self.issued,
            },
        );
    }
}

/// Per-UE configuration.
#[derive(Clone, Debug)]
pub struct UeParams {
    /// DCH inactivity budget
    pub t_dch: SimTime,
    /// Handshake length N
    pub number_of_signalling_messages: usize,
    pub inter_packet_time: Sampler,
    pub retrial_inter_packet_time: Sampler,
}

/// Externally observable state of a UE.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UeStatus {
    pub state: RrcState,
    pub retry: bool,
    pub cycles: u64,
    pub data_sent: u64,
    pub send_failures: u64,
}

impl Default for UeStatus {
    fn default() -> Self {
        Self {
            state: RrcState::Idle,
            retry: false,
            cycles: 0,
            data_sent: 0,
            send_failures: 0,
        }
    }
}

enum Phase {
    /// Not started, or about to draw the next interval
    Cycle,
    /// Waiting out the DCH budget; `remainder` of the interval follows
    Budget { remainder: SimTime },
    /// Soft DCH -> Idle handshake in progress
    Releasing {
        handshake: Handshake,
        remainder: SimTime,
    },
    /// Waiting before the connect/send step
    Waiting,
    /// Hard Idle -> DCH handshake in progress
    Connecting(Handshake),
    Sending(ChannelRequest),
}

impl Phase {
    fn describe(&self) -> &'static str {
        match self {
            Phase::Cycle => "starting a cycle",
            Phase::Budget { .. } => "waiting out the DCH budget",
            Phase::Releasing { .. } => "releasing to IDLE",
            Phase::Waiting => "waiting for the next packet",
            Phase::Connecting(_) => "connecting to DCH",
            Phase::Sending(_) => "sending data",
        }
    }
}

/// A simulated UE process.
pub struct UserEquipment<C: ControlPlane> {
    id: UeId,
    params: UeParams,
    plane: Rc<C>,
    phase: Phase,
    dch_deadline: SimTime,
    status: UeStatus,
    monitor: Rc<Cell<UeStatus>>,
}

impl<C: ControlPlane> UserEquipment<C> {
    /// Creates an idle UE talking to `plane`.
    pub fn new(id: UeId, params: UeParams, plane: Rc<C>) -> Self {
        Self {
            id,
            params,
            plane,
            phase: Phase::Cycle,
            dch_deadline: 0.0,
            status: UeStatus::default(),
            monitor: Rc::new(Cell::new(UeStatus::default())),
        }
    }

    pub fn id(&self) -> UeId {
        self.id
    }

    pub fn status(&self) -> UeStatus {
        self.status
    }

    /// A read-only view of the status, refreshed after every resumption.
    pub fn monitor(&self) -> Rc<Cell<UeStatus>> {
        self.monitor.clone()
    }

    fn step(&mut self, ctx: &mut SimContext, me: ProcessId, wakeup: Wakeup) -> SimResult<Yield> {
        match (std::mem::replace(&mut self.phase, Phase::Cycle), wakeup) {
            (Phase::Cycle, Wakeup::Start) => self.begin_cycle(ctx),
            (Phase::Budget { remainder }, Wakeup::Timeout) => {
                let mut handshake = Handshake::new(
                    self.id,
                    RrcState::Dch,
                    RrcState::Idle,
                    HandshakeMode::Soft,
                    self.params.number_of_signalling_messages,
                );
                let outcome = handshake.start(ctx, me, self.plane.as_ref());
                self.on_release(handshake, remainder, outcome)
            }
            (Phase::Releasing {
                mut handshake,
                remainder,
            }, wakeup) => {
                let outcome = handshake.resume(ctx, me, self.plane.as_ref(), wakeup);
                self.on_release(handshake, remainder, outcome)
            }
            (Phase::Waiting, Wakeup::Timeout) => self.connect_or_send(ctx, me),
            (Phase::Connecting(mut handshake), wakeup) => {
                let outcome = handshake.resume(ctx, me, self.plane.as_ref(), wakeup);
                self.on_connect(ctx, me, handshake, outcome)
            }
            (Phase::Sending(mut request), wakeup) => {
                let outcome = request.resume(ctx, me, wakeup);
                self.on_send(ctx, request, outcome)
            }
            (phase, wakeup) => Err(SimError::UnexpectedWakeup {
                process: me,
                wakeup: wakeup.label(),
                expected: phase.describe().to_string(),
            }),
        }
    }

    fn begin_cycle(&mut self, ctx: &mut SimContext) -> SimResult<Yield> {
        self.status.cycles += 1;
        let interval = if self.status.retry {
            self.params.retrial_inter_packet_time.sample()
        } else {
            self.params.inter_packet_time.sample()
        };

        if self.status.state == RrcState::Dch {
            let remaining = (self.dch_deadline - ctx.now()).max(0.0);
            if interval > remaining {
                self.phase = Phase::Budget {
                    remainder: interval - remaining,
                };
                return Ok(Yield::Timeout(remaining));
            }
        }

        self.phase = Phase::Waiting;
        Ok(Yield::Timeout(interval))
    }

    fn on_release(
        &mut self,
        handshake: Handshake,
        remainder: SimTime,
        outcome: Result<Progress<()>, UeError>,
    ) -> SimResult<Yield> {
        match outcome {
            Ok(Progress::Pending(yielded)) => {
                self.phase = Phase::Releasing {
                    handshake,
                    remainder,
                };
                return Ok(yielded);
            }
            Ok(Progress::Ready(())) => self.status.state = handshake.target(),
            Err(UeError::Sim(err)) => return Err(err),
            Err(err) => {
                tracing::debug!(ue = self.id, error = %err, "release failed, staying in DCH");
            }
        }

        self.phase = Phase::Waiting;
        Ok(Yield::Timeout(remainder))
    }

    fn connect_or_send(&mut self, ctx: &mut SimContext, me: ProcessId) -> SimResult<Yield> {
        if self.status.state == RrcState::Dch {
            return self.send(ctx, me);
        }

        let mut handshake = Handshake::new(
            self.id,
            RrcState::Idle,
            RrcState::Dch,
            HandshakeMode::Hard,
            self.params.number_of_signalling_messages,
        );
        let outcome = handshake.start(ctx, me, self.plane.as_ref());
        self.on_connect(ctx, me, handshake, outcome)
    }

    fn on_connect(
        &mut self,
        ctx: &mut SimContext,
        me: ProcessId,
        handshake: Handshake,
        outcome: Result<Progress<()>, UeError>,
    ) -> SimResult<Yield> {
        match outcome {
            Ok(Progress::Pending(yielded)) => {
                self.phase = Phase::Connecting(handshake);
                Ok(yielded)
            }
            Ok(Progress::Ready(())) => {
                self.status.state = handshake.target();
                self.dch_deadline = ctx.now() + self.params.t_dch;
                self.send(ctx, me)
            }
            Err(UeError::Sim(err)) => Err(err),
            Err(err) => {
                self.could_not_send(err);
                self.begin_cycle(ctx)
            }
        }
    }

    fn send(&mut self, ctx: &mut SimContext, me: ProcessId) -> SimResult<Yield> {
        let mut request = self.plane.data(self.id);
        let outcome = request.start(ctx, me);
        self.on_send(ctx, request, outcome)
    }

    fn on_send(
        &mut self,
        ctx: &mut SimContext,
        request: ChannelRequest,
        outcome: Result<Progress<()>, ChannelError>,
    ) -> SimResult<Yield> {
        match outcome {
            Ok(Progress::Pending(yielded)) => {
                self.phase = Phase::Sending(request);
                Ok(yielded)
            }
            Ok(Progress::Ready(())) => {
                self.status.retry = false;
                self.status.data_sent += 1;
                self.dch_deadline = ctx.now() + self.params.t_dch;
                self.begin_cycle(ctx)
            }
            Err(ChannelError::Sim(err)) => Err(err),
            Err(blocked) => {
                self.could_not_send(UeError::Channel(blocked));
                self.begin_cycle(ctx)
            }
        }
    }

    fn could_not_send(&mut self, cause: UeError) {
        let err = UeError::CouldNotSend {
            ue: self.id,
            cause: Box::new(cause),
        };
        tracing::debug!(ue = self.id, error = %err, "cycle failed, will retry");
        self.status.retry = true;
        self.status.send_failures += 1;
    }
}

impl<C: ControlPlane> Process for UserEquipment<C> {
    fn name(&self) -> String {
        format!("ue-{}", self.id)
    }

    fn resume(&mut self, ctx: &mut SimContext, me: ProcessId, wakeup: Wakeup) -> SimResult<Yield> {
        let yielded = self.step(ctx, me, wakeup);
        self.monitor.set(self.status);
        yielded
    }
}
