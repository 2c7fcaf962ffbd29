//! End-to-end channel of a virtual flow over the physical network.

use serde::{Deserialize, Serialize};

use crate::flow::{FlowId, VmId, DEFAULT_FLOW_ID};
use crate::link::LinkId;
use crate::mapper::Path;
use crate::node::NodeId;
use crate::scheduler::PacketScheduler;
use crate::topology::PhysicalTopology;
use crate::transmission::Transmission;

const BANDWIDTH_EPSILON: f64 = 1e-9;

/// Identifies a channel and the forwarding entries of its path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Source VM.
    pub src: VmId,
    /// Destination VM.
    pub dst: VmId,
    /// Flow id, [`DEFAULT_FLOW_ID`] for the shared channel.
    pub flow: FlowId,
}

impl ChannelKey {
    /// Creates channel key.
    pub fn new(src: VmId, dst: VmId, flow: FlowId) -> Self {
        Self { src, dst, flow }
    }

    /// Returns the key of the shared channel between the same VMs.
    pub fn default_flow(&self) -> Self {
        Self::new(self.src, self.dst, DEFAULT_FLOW_ID)
    }

    /// Returns true if the key belongs to a dedicated channel.
    pub fn is_dedicated(&self) -> bool {
        self.flow != DEFAULT_FLOW_ID
    }
}

/// Data flow instance between two VMs along a physical path.
///
/// While initialized, the channel is registered on every link of its path in the direction it traverses the
/// link, so the links can split their capacity among channels. Allocated bandwidth is handed to the packet
/// scheduler, which advances the transmissions of the channel.
pub struct Channel {
    key: ChannelKey,
    path: Path,
    requested: f64,
    allocated: f64,
    total_latency: f64,
    scheduler: Box<dyn PacketScheduler>,
}

impl Channel {
    /// Creates channel over the path. The channel must be initialized before use.
    pub fn new(key: ChannelKey, path: Path, requested: f64, scheduler: Box<dyn PacketScheduler>) -> Self {
        Self {
            key,
            path,
            requested,
            allocated: 0.,
            total_latency: 0.,
            scheduler,
        }
    }

    /// Registers the channel on the links of its path and computes the path latency.
    pub fn initialize(&mut self, topology: &mut PhysicalTopology) {
        self.total_latency = 0.;
        for (link_id, dir) in self.path.hops() {
            let link = topology.link_mut(link_id);
            link.add_channel(dir, self.key, self.requested);
            link.set_allocated(dir, &self.key, self.allocated);
            self.total_latency += link.latency();
        }
    }

    /// Unregisters the channel from the links of its path.
    pub fn terminate(&mut self, topology: &mut PhysicalTopology) {
        for (link_id, dir) in self.path.hops() {
            topology.link_mut(link_id).remove_channel(dir, &self.key);
        }
    }

    /// Moves the channel to another path keeping its in-flight transmissions.
    pub fn update_route(&mut self, topology: &mut PhysicalTopology, path: Path, time: f64) {
        self.scheduler.update_packet_processing(time);
        self.terminate(topology);
        log::debug!(
            "channel {:?} rerouted from {:?} to {:?}",
            self.key,
            self.path.nodes,
            path.nodes
        );
        self.path = path;
        self.initialize(topology);
    }

    /// Recomputes the bandwidth of a dedicated channel from the state of its links.
    ///
    /// The channel gets its request scaled by the smallest adjust factor along the path, but not more than an
    /// equal share of the slowest link among the dedicated channels using it. Returns true if the allocation
    /// changed.
    pub fn adjust_dedicated_bandwidth_along_link(&mut self, topology: &mut PhysicalTopology, time: f64) -> bool {
        let mut factor: f64 = 1.;
        let mut slowest = f64::INFINITY;
        let mut equal_share = f64::INFINITY;
        for (link_id, dir) in self.path.hops() {
            let link = topology.link(link_id);
            factor = factor.min(link.dedicated_adjust_factor(dir));
            let capacity = link.capacity(dir);
            if capacity < slowest {
                slowest = capacity;
                equal_share = capacity / link.dedicated_channel_count(dir).max(1) as f64;
            }
        }
        let bandwidth = (self.requested * factor).min(equal_share);
        self.set_allocated(topology, bandwidth, time)
    }

    /// Sets the bandwidth of a shared channel to the smallest per-channel share along the path.
    ///
    /// Returns true if the allocation changed.
    pub fn adjust_shared_bandwidth_along_link(&mut self, topology: &mut PhysicalTopology, time: f64) -> bool {
        let bandwidth = self
            .path
            .hops()
            .map(|(link_id, dir)| topology.link(link_id).shared_bandwidth_per_channel(dir))
            .fold(f64::INFINITY, f64::min);
        let bandwidth = if bandwidth.is_finite() { bandwidth } else { 0. };
        self.set_allocated(topology, bandwidth, time)
    }

    /// Changes the requested bandwidth, allocation is updated by the next adjustment.
    pub fn update_requested_bandwidth(&mut self, topology: &mut PhysicalTopology, requested: f64) {
        self.requested = requested;
        for (link_id, dir) in self.path.hops() {
            topology.link_mut(link_id).set_requested(dir, &self.key, requested);
        }
    }

    fn set_allocated(&mut self, topology: &mut PhysicalTopology, bandwidth: f64, time: f64) -> bool {
        if (bandwidth - self.allocated).abs() <= BANDWIDTH_EPSILON * bandwidth.max(1.) {
            return false;
        }
        // progress made so far is accounted at the old rate
        self.scheduler.update_packet_processing(time);
        self.scheduler.set_bandwidth(bandwidth);
        self.allocated = bandwidth;
        for (link_id, dir) in self.path.hops() {
            topology.link_mut(link_id).set_allocated(dir, &self.key, bandwidth);
        }
        true
    }

    /// Enqueues transmission of a packet.
    pub fn add_transmission(&mut self, transmission: Transmission, time: f64) {
        self.scheduler.update_packet_processing(time);
        self.scheduler.add_transmission(transmission, time);
    }

    /// Advances transmissions up to `time`. Returns true if any transmission completed.
    pub fn update_packet_processing(&mut self, time: f64) -> bool {
        self.scheduler.update_packet_processing(time)
    }

    /// Returns the time of the next transmission completion.
    pub fn next_finish_time(&self) -> f64 {
        self.scheduler.next_finish_time()
    }

    /// Returns the earliest transmission timeout.
    pub fn next_timeout_time(&self) -> f64 {
        self.scheduler.next_timeout_time()
    }

    /// Returns the estimated completion time of the packet if it is transmitted by the channel.
    pub fn estimate_finish_time(&self, packet_id: u64) -> Option<f64> {
        self.scheduler.estimate_finish_time(packet_id)
    }

    /// Returns and clears completed transmissions.
    pub fn take_completed(&mut self) -> Vec<Transmission> {
        self.scheduler.take_completed()
    }

    /// Returns and clears failed transmissions.
    pub fn take_failed(&mut self) -> Vec<Transmission> {
        self.scheduler.take_failed()
    }

    /// Returns in-flight transmissions.
    pub fn in_flight(&self) -> Vec<&Transmission> {
        self.scheduler.in_flight()
    }

    /// Returns the number of in-flight transmissions.
    pub fn in_flight_count(&self) -> usize {
        self.scheduler.in_flight_count()
    }

    /// Returns channel key.
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Returns true if the channel belongs to a dedicated flow.
    pub fn is_dedicated(&self) -> bool {
        self.key.is_dedicated()
    }

    /// Returns current path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns nodes of the path.
    pub fn nodes(&self) -> &[NodeId] {
        &self.path.nodes
    }

    /// Returns links of the path.
    pub fn links(&self) -> &[LinkId] {
        &self.path.links
    }

    /// Returns the host where the channel starts.
    pub fn src_host(&self) -> NodeId {
        self.path.nodes[0]
    }

    /// Returns the host where the channel ends.
    pub fn dst_host(&self) -> NodeId {
        self.path.nodes[self.path.nodes.len() - 1]
    }

    /// Returns requested bandwidth.
    pub fn requested_bandwidth(&self) -> f64 {
        self.requested
    }

    /// Returns allocated bandwidth.
    pub fn allocated_bandwidth(&self) -> f64 {
        self.allocated
    }

    /// Returns the sum of link latencies along the path.
    pub fn total_latency(&self) -> f64 {
        self.total_latency
    }
}
