//! Events emitted and handled by the network operating system.

use serde::Serialize;

use crate::transmission::Packet;

/// Re-evaluation of all channels: progress is flushed, finished transmissions are reported.
#[derive(Clone, Serialize)]
pub struct ChannelsUpdate {}

/// Periodic sampling of link and channel state.
#[derive(Clone, Serialize)]
pub struct MonitoringTick {}

/// Packet has been delivered to the destination VM.
#[derive(Clone, Serialize)]
pub struct TransmissionCompleted {
    /// Delivered packet.
    pub packet: Packet,
    /// Time the packet was submitted.
    pub start_time: f64,
    /// Time the last byte left the source channel.
    pub finish_time: f64,
}

/// Packet transmission exceeded its timeout.
#[derive(Clone, Serialize)]
pub struct TransmissionFailed {
    /// Failed packet.
    pub packet: Packet,
    /// Time the packet was submitted.
    pub start_time: f64,
    /// Time the transmission was aborted.
    pub fail_time: f64,
}
