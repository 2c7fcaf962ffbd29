//! Packets and in-flight transmissions.

use serde::Serialize;

use dslab_core::component::Id;

use crate::flow::{FlowId, VmId};

/// Unit of data sent between two VMs.
#[derive(Clone, Debug, Serialize)]
pub struct Packet {
    /// Unique packet id.
    pub id: u64,
    /// Source VM.
    pub src: VmId,
    /// Destination VM.
    pub dst: VmId,
    /// Flow the packet belongs to.
    pub flow: FlowId,
    /// Packet size.
    pub size: f64,
    /// Time after which the transmission of the packet is considered failed.
    pub timeout: Option<f64>,
    /// Simulation component notified about the packet delivery or failure.
    pub notification_dst: Id,
    /// Original packet if this one encapsulates it.
    pub encapsulated: Option<Box<Packet>>,
}

impl Packet {
    /// Creates a packet without timeout.
    pub fn new(id: u64, src: VmId, dst: VmId, flow: FlowId, size: f64, notification_dst: Id) -> Self {
        Self {
            id,
            src,
            dst,
            flow,
            size,
            timeout: None,
            notification_dst,
            encapsulated: None,
        }
    }

    /// Sets transmission timeout.
    pub fn with_timeout(mut self, timeout: f64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wraps the packet into a new one, e.g. to redirect it through a service function.
    pub fn encapsulate(self, id: u64, src: VmId, dst: VmId, flow: FlowId) -> Self {
        Self {
            id,
            src,
            dst,
            flow,
            size: self.size,
            timeout: self.timeout,
            notification_dst: self.notification_dst,
            encapsulated: Some(Box::new(self)),
        }
    }

    /// Returns the innermost packet.
    pub fn original(&self) -> &Packet {
        let mut packet = self;
        while let Some(inner) = &packet.encapsulated {
            packet = inner;
        }
        packet
    }
}

/// Progress of a packet transmission over a channel.
#[derive(Clone, Debug, Serialize)]
pub struct Transmission {
    /// Transmitted packet.
    pub packet: Packet,
    /// Data left to transmit.
    pub remaining: f64,
    /// Time the transmission was enqueued.
    pub start_time: f64,
    /// Time the transmission completed or failed.
    pub finish_time: Option<f64>,
    /// Transmission time limit.
    pub timeout: Option<f64>,
}

impl Transmission {
    /// Creates a transmission of the packet started at `time`.
    pub fn new(packet: Packet, time: f64) -> Self {
        Self {
            remaining: packet.size,
            timeout: packet.timeout,
            packet,
            start_time: time,
            finish_time: None,
        }
    }

    /// Returns the packet size.
    pub fn size(&self) -> f64 {
        self.packet.size
    }

    /// Returns the amount of data already transmitted.
    pub fn completed_length(&self) -> f64 {
        self.packet.size - self.remaining
    }

    /// Returns the time after which the transmission fails.
    pub fn deadline(&self) -> f64 {
        self.timeout.map_or(f64::INFINITY, |t| self.start_time + t)
    }
}
