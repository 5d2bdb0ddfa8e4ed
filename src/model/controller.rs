//! Radio network controller: the signaling and data channels.
//!
//! Each channel is a [`Resource`](crate::resource::Resource) plus a
//! service-time sampler. A request against a channel is a
//! [`ChannelRequest`], a small state machine the calling process drives:
//!
//! ```text
//! start ──granted──────────────▶ Serving ──timeout──▶ release, done
//!   │                              ▲
//!   ├──queued──▶ Queued ──granted──┘
//!   └──blocked──▶ error (nothing held, no service time)
//! ```

use thiserror::Error;

use crate::error::SimError;
use crate::event::Wakeup;
use crate::process::{Progress, Yield};
use crate::resource::{Admission, Hold};
use crate::sampling::Sampler;
use crate::scheduler::SimContext;
use crate::trace::{ChannelKind, TraceDetail, TraceKind};
use crate::types::{ProcessId, ResourceId, UeId};

use super::ControlPlane;

/// Failure of a controller request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("signaling channel blocked (ue {ue}, message {message})")]
    SignalingBlocked { ue: UeId, message: usize },

    #[error("data channel blocked (ue {ue})")]
    DataBlocked { ue: UeId },

    #[error(transparent)]
    Sim(#[from] SimError),
}

impl ChannelError {
    /// Returns true for the admission-control rejections.
    pub fn is_blocked(&self) -> bool {
        !matches!(self, ChannelError::Sim(_))
    }
}

enum RequestPhase {
    Created,
    Queued,
    Serving(Hold),
    Done,
}

impl RequestPhase {
    fn describe(&self) -> &'static str {
        match self {
            RequestPhase::Created => "not yet started",
            RequestPhase::Queued => "queued on the channel",
            RequestPhase::Serving(_) => "being served",
            RequestPhase::Done => "finished",
        }
    }
}

#[derive(Clone, Copy)]
enum Target {
    Signaling { message: usize },
    Data,
}

/// One use of a controller channel by one UE.
pub struct ChannelRequest {
    target: Target,
    ue: UeId,
    resource: ResourceId,
    service_time: Sampler,
    phase: RequestPhase,
}

impl ChannelRequest {
    /// Signaling message `message` of a handshake.
    pub fn signaling(ue: UeId, message: usize, resource: ResourceId, service_time: Sampler) -> Self {
        Self::with_target(Target::Signaling { message }, ue, resource, service_time)
    }

    /// One data transmission.
    pub fn data(ue: UeId, resource: ResourceId, service_time: Sampler) -> Self {
        Self::with_target(Target::Data, ue, resource, service_time)
    }

    fn with_target(target: Target, ue: UeId, resource: ResourceId, service_time: Sampler) -> Self {
        Self {
            target,
            ue,
            resource,
            service_time,
            phase: RequestPhase::Created,
        }
    }

    pub fn channel(&self) -> ChannelKind {
        match self.target {
            Target::Signaling { .. } => ChannelKind::Signaling,
            Target::Data => ChannelKind::Data,
        }
    }

    /// Index of the signaling message; `None` for data.
    pub fn message(&self) -> Option<usize> {
        match self.target {
            Target::Signaling { message } => Some(message),
            Target::Data => None,
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// Submits the request on behalf of process `me`.
    pub fn start(
        &mut self,
        ctx: &mut SimContext,
        me: ProcessId,
    ) -> Result<Progress<()>, ChannelError> {
        if !matches!(self.phase, RequestPhase::Created) {
            return Err(self.unexpected(me, "start"));
        }

        match ctx.acquire(self.resource, me) {
            Ok(Admission::Granted(hold)) => self.serve(ctx, hold),
            Ok(Admission::Queued { .. }) => {
                self.phase = RequestPhase::Queued;
                self.emit(ctx, TraceKind::RequestEnqueued, 0.0);
                Ok(Progress::Pending(Yield::AwaitGrant(self.resource)))
            }
            Err(err) if err.is_blocked() => {
                self.phase = RequestPhase::Done;
                self.emit(ctx, TraceKind::RequestBlocked, 0.0);
                Err(self.blocked())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Continues the request after the enclosing process was woken.
    pub fn resume(
        &mut self,
        ctx: &mut SimContext,
        me: ProcessId,
        wakeup: Wakeup,
    ) -> Result<Progress<()>, ChannelError> {
        match (std::mem::replace(&mut self.phase, RequestPhase::Done), wakeup) {
            (RequestPhase::Queued, Wakeup::Granted(hold)) if hold.resource() == self.resource => {
                self.serve(ctx, hold)
            }
            (RequestPhase::Serving(hold), Wakeup::Timeout) => {
                let served = ctx.now() - hold.granted_at();
                ctx.release(hold)?;
                self.emit(ctx, TraceKind::RequestCompleted, served);
                Ok(Progress::Ready(()))
            }
            (phase, wakeup) => {
                let label = wakeup.label();
                self.phase = phase;
                Err(self.unexpected(me, &label))
            }
        }
    }

    /// Holds the channel for one sampled service time.
    ///
    /// The hold is released before any error leaves this function.
    fn serve(&mut self, ctx: &mut SimContext, hold: Hold) -> Result<Progress<()>, ChannelError> {
        self.emit(ctx, TraceKind::RequestGranted, hold.waited());

        let service = self.service_time.sample();
        if service.is_nan() || service < 0.0 {
            ctx.release(hold)?;
            return Err(SimError::NegativeDelay(service).into());
        }

        self.phase = RequestPhase::Serving(hold);
        Ok(Progress::Pending(Yield::Timeout(service)))
    }

    fn emit(&self, ctx: &mut SimContext, kind: TraceKind, elapsed: f64) {
        let queue_length = ctx
            .resource(self.resource)
            .map(|resource| resource.queue_len())
            .unwrap_or(0);
        ctx.emit(
            self.ue,
            kind,
            TraceDetail::Channel {
                channel: self.channel(),
                message: self.message(),
                queue_length,
                elapsed,
            },
        );
    }

    fn blocked(&self) -> ChannelError {
        match self.target {
            Target::Signaling { message } => ChannelError::SignalingBlocked { ue: self.ue, message },
            Target::Data => ChannelError::DataBlocked { ue: self.ue },
        }
    }

    fn unexpected(&self, me: ProcessId, wakeup: &str) -> ChannelError {
        SimError::UnexpectedWakeup {
            process: me,
            wakeup: wakeup.to_string(),
            expected: format!("{} request {}", self.channel(), self.phase.describe()),
        }
        .into()
    }
}

/// Queue limit and service time of one channel.
#[derive(Clone, Debug)]
pub struct ChannelParams {
    pub queue_length: usize,
    pub service_time: Sampler,
}

impl ChannelParams {
    pub fn new(queue_length: usize, service_time: Sampler) -> Self {
        Self {
            queue_length,
            service_time,
        }
    }
}

#[derive(Debug)]
struct Channel {
    resource: ResourceId,
    service_time: Sampler,
}

/// The radio network controller.
///
/// Registers its two resources with the context on construction.
#[derive(Debug)]
pub struct Controller {
    signaling: Channel,
    data: Channel,
}

impl Controller {
    pub fn new(ctx: &mut SimContext, signaling: ChannelParams, data: ChannelParams) -> Self {
        let signaling = Channel {
            resource: ctx.add_resource("rnc.signaling", signaling.queue_length),
            service_time: signaling.service_time,
        };
        let data = Channel {
            resource: ctx.add_resource("rnc.data", data.queue_length),
            service_time: data.service_time,
        };
        Self { signaling, data }
    }

    pub fn signaling_resource(&self) -> ResourceId {
        self.signaling.resource
    }

    pub fn data_resource(&self) -> ResourceId {
        self.data.resource
    }
}

impl ControlPlane for Controller {
    fn signal(&self, ue: UeId, message: usize) -> ChannelRequest {
        ChannelRequest::signaling(
            ue,
            message,
            self.signaling.resource,
            self.signaling.service_time.clone(),
        )
    }

    fn data(&self, ue: UeId) -> ChannelRequest {
        ChannelRequest::data(ue, self.data.resource, self.data.service_time.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::MemorySink;

    fn controller(ctx: &mut SimContext, queue_length: usize, service: f64) -> Controller {
        Controller::new(
            ctx,
            ChannelParams::new(queue_length, Sampler::constant(service)),
            ChannelParams::new(queue_length, Sampler::constant(service)),
        )
    }

    #[test]
    fn test_free_channel_is_served_immediately() {
        let sink = MemorySink::new();
        let mut ctx = SimContext::new(Box::new(sink.clone()));
        let rnc = controller(&mut ctx, 1, 2.0);

        let mut request = rnc.signal(0, 0);
        assert_eq!(
            request.start(&mut ctx, 0),
            Ok(Progress::Pending(Yield::Timeout(2.0)))
        );
        assert_eq!(ctx.resource(rnc.signaling_resource()).unwrap().holder(), Some(0));
        assert_eq!(sink.records()[0].kind, TraceKind::RequestGranted);

        assert_eq!(request.resume(&mut ctx, 0, Wakeup::Timeout), Ok(Progress::Ready(())));
        assert!(ctx.resource(rnc.signaling_resource()).unwrap().is_free());
        assert_eq!(sink.records()[1].kind, TraceKind::RequestCompleted);
    }

    #[test]
    fn test_busy_channel_queues_then_blocks() {
        let sink = MemorySink::new();
        let mut ctx = SimContext::new(Box::new(sink.clone()));
        let rnc = controller(&mut ctx, 1, 1.0);

        let mut first = rnc.data(0);
        let mut second = rnc.data(1);
        let mut third = rnc.data(2);

        first.start(&mut ctx, 0).unwrap();
        assert_eq!(
            second.start(&mut ctx, 1),
            Ok(Progress::Pending(Yield::AwaitGrant(rnc.data_resource())))
        );
        assert_eq!(third.start(&mut ctx, 2), Err(ChannelError::DataBlocked { ue: 2 }));

        let kinds: Vec<TraceKind> = sink.records().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TraceKind::RequestGranted,
                TraceKind::RequestEnqueued,
                TraceKind::RequestBlocked
            ]
        );
    }

    #[test]
    fn test_signaling_block_names_message() {
        let mut ctx = SimContext::default();
        let rnc = controller(&mut ctx, 0, 1.0);

        rnc.signal(0, 0).start(&mut ctx, 0).unwrap();
        let err = rnc.signal(1, 3).start(&mut ctx, 1).unwrap_err();
        assert_eq!(err, ChannelError::SignalingBlocked { ue: 1, message: 3 });
        assert!(err.is_blocked());
    }

    #[test]
    fn test_request_kind_follows_constructor() {
        let signaling = ChannelRequest::signaling(4, 2, 0, Sampler::constant(1.0));
        assert_eq!(signaling.channel(), ChannelKind::Signaling);
        assert_eq!(signaling.message(), Some(2));

        let data = ChannelRequest::data(4, 1, Sampler::constant(1.0));
        assert_eq!(data.channel(), ChannelKind::Data);
        assert_eq!(data.message(), None);
        assert_eq!(data.resource(), 1);
    }

    #[test]
    fn test_negative_service_time_releases_before_failing() {
        let mut ctx = SimContext::default();
        let rnc = Controller::new(
            &mut ctx,
            ChannelParams::new(1, Sampler::constant(-1.0)),
            ChannelParams::new(1, Sampler::constant(1.0)),
        );

        let err = rnc.signal(0, 0).start(&mut ctx, 0).unwrap_err();
        assert_eq!(err, ChannelError::Sim(SimError::NegativeDelay(-1.0)));
        assert!(!err.is_blocked());
        assert!(ctx.resource(rnc.signaling_resource()).unwrap().is_free());
    }

    #[test]
    fn test_wrong_wakeup_is_internal_error() {
        let mut ctx = SimContext::default();
        let rnc = controller(&mut ctx, 1, 1.0);

        let mut request = rnc.data(0);
        request.start(&mut ctx, 0).unwrap();
        let err = request.resume(&mut ctx, 0, Wakeup::Start).unwrap_err();
        assert!(matches!(err, ChannelError::Sim(SimError::UnexpectedWakeup { .. })));
    }
}
