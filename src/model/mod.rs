//! Domain processes built on the kernel.
//!
//! - [`Controller`] - the RNC with its signaling and data channels
//! - [`UserEquipment`] - the UE connection state machine with retry
//!
//! UEs talk to the controller only through the [`ControlPlane`] trait.

pub mod controller;
pub mod ue;

pub use controller::{ChannelError, ChannelParams, ChannelRequest, Controller};
pub use ue::{Handshake, UeError, UeParams, UeStatus, UserEquipment};

use crate::types::UeId;

/// The operations a UE can request from a controller.
///
/// Each call returns a fresh [`ChannelRequest`] that the calling process
/// starts and drives to completion.
pub trait ControlPlane {
    /// Signaling message number `message` of a handshake.
    fn signal(&self, ue: UeId, message: usize) -> ChannelRequest;

    /// One data packet.
    fn data(&self, ue: UeId) -> ChannelRequest;
}
