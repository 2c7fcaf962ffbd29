//! Registry of live channels and global bandwidth re-adjustment.

use indexmap::IndexMap;

use crate::channel::{Channel, ChannelKey};
use crate::error::Result;
use crate::flow::{FlowId, VmId};
use crate::mapper::{Path, VirtualNetworkMapper};
use crate::node::NodeId;
use crate::scheduler::SchedulerKind;
use crate::topology::PhysicalTopology;
use crate::transmission::Transmission;

/// Outcome of advancing all channels.
#[derive(Default)]
pub struct ProcessingReport {
    /// Completed transmissions with the latency of the channel that carried them.
    pub completed: Vec<(ChannelKey, Transmission, f64)>,
    /// Transmissions that exceeded their timeout.
    pub failed: Vec<(ChannelKey, Transmission)>,
    /// Channels removed because they had no transmissions left.
    pub removed: Vec<ChannelKey>,
}

/// Owns live channels and keeps their bandwidth allocation consistent with link state.
///
/// Every registry change re-adjusts all channels: dedicated channels first, then shared ones, because shared
/// channels split the capacity left after dedicated allocations.
pub struct ChannelManager {
    channels: IndexMap<ChannelKey, Channel>,
    scheduler: SchedulerKind,
    default_timeout: Option<f64>,
}

impl ChannelManager {
    /// Creates manager whose channels use the scheduler variant and the default transmission timeout.
    pub fn new(scheduler: SchedulerKind, default_timeout: Option<f64>) -> Self {
        Self {
            channels: IndexMap::new(),
            scheduler,
            default_timeout,
        }
    }

    /// Returns the channel for the flow, falling back to the shared channel between the same VMs.
    pub fn find_channel(&self, src: VmId, dst: VmId, flow: FlowId) -> Option<&Channel> {
        let key = ChannelKey::new(src, dst, flow);
        self.channels
            .get(&key)
            .or_else(|| self.channels.get(&key.default_flow()))
    }

    /// Returns the channel with exactly this key.
    pub fn channel(&self, key: &ChannelKey) -> Option<&Channel> {
        self.channels.get(key)
    }

    /// Returns all live channels.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Returns the number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if there are no live channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Returns keys of channels starting or ending at the VM.
    pub fn channels_of_vm(&self, vm: VmId) -> Vec<ChannelKey> {
        self.channels
            .keys()
            .filter(|k| k.src == vm || k.dst == vm)
            .copied()
            .collect()
    }

    /// Resolves the path of the flow and creates a channel over it.
    ///
    /// The lowest free bandwidth along the path is only checked for diagnostics, a dedicated channel
    /// requesting more is still created.
    #[allow(clippy::too_many_arguments)]
    pub fn create_channel(
        &self,
        topology: &mut PhysicalTopology,
        mapper: &VirtualNetworkMapper,
        key: ChannelKey,
        src_host: NodeId,
        dst_host: NodeId,
        requested: f64,
        dynamic_routing: bool,
    ) -> Result<Channel> {
        let path = mapper.resolve_path(topology, &key, src_host, dst_host, dynamic_routing)?;
        let lowest_free = path
            .hops()
            .map(|(link_id, dir)| topology.link(link_id).free_bandwidth(dir))
            .fold(f64::INFINITY, f64::min);
        if key.is_dedicated() && lowest_free < requested {
            log::warn!(
                "channel {:?} requests {} but only {} is free along {:?}",
                key,
                requested,
                lowest_free,
                path.nodes
            );
        }
        Ok(Channel::new(
            key,
            path,
            requested,
            self.scheduler.build(self.default_timeout),
        ))
    }

    /// Registers the channel on its links and re-adjusts all channels.
    ///
    /// A live channel with the same key is replaced and unregistered first.
    pub fn add_channel(&mut self, topology: &mut PhysicalTopology, mut channel: Channel, time: f64) {
        if let Some(old) = self.channels.get_mut(&channel.key()) {
            old.terminate(topology);
            log::debug!("channel {:?} replaced", old.key());
        }
        channel.initialize(topology);
        log::debug!(
            "channel {:?} added along {:?}, latency {}",
            channel.key(),
            channel.nodes(),
            channel.total_latency()
        );
        self.channels.insert(channel.key(), channel);
        self.adjust_all_channels(topology, time);
    }

    /// Unregisters the channel from its links and re-adjusts the remaining channels.
    pub fn remove_channel(&mut self, topology: &mut PhysicalTopology, key: &ChannelKey, time: f64) -> Option<Channel> {
        let mut channel = self.channels.shift_remove(key)?;
        channel.terminate(topology);
        log::debug!("channel {:?} removed", key);
        self.adjust_all_channels(topology, time);
        Some(channel)
    }

    /// Recomputes allocations of all channels, returns true if any changed.
    pub fn adjust_all_channels(&mut self, topology: &mut PhysicalTopology, time: f64) -> bool {
        let mut changed = false;
        for channel in self.channels.values_mut().filter(|c| c.is_dedicated()) {
            changed |= channel.adjust_dedicated_bandwidth_along_link(topology, time);
        }
        for channel in self.channels.values_mut().filter(|c| !c.is_dedicated()) {
            changed |= channel.adjust_shared_bandwidth_along_link(topology, time);
        }
        changed
    }

    /// Enqueues transmission into the channel. Returns false if there is no such channel.
    pub fn add_transmission(&mut self, key: &ChannelKey, transmission: Transmission, time: f64) -> bool {
        match self.channels.get_mut(key) {
            Some(channel) => {
                channel.add_transmission(transmission, time);
                true
            }
            None => false,
        }
    }

    /// Advances every channel up to `time`, collects finished transmissions and removes idle channels.
    pub fn update_packet_processing(&mut self, topology: &mut PhysicalTopology, time: f64) -> ProcessingReport {
        let mut report = ProcessingReport::default();
        for (key, channel) in self.channels.iter_mut() {
            channel.update_packet_processing(time);
            let latency = channel.total_latency();
            for transmission in channel.take_completed() {
                report.completed.push((*key, transmission, latency));
            }
            for transmission in channel.take_failed() {
                report.failed.push((*key, transmission));
            }
            if channel.in_flight_count() == 0 {
                report.removed.push(*key);
            }
        }
        if !report.removed.is_empty() {
            for key in report.removed.iter() {
                if let Some(mut channel) = self.channels.shift_remove(key) {
                    channel.terminate(topology);
                    log::debug!("channel {:?} removed, no transmissions left", key);
                }
            }
            self.adjust_all_channels(topology, time);
        }
        report
    }

    /// Returns the earliest transmission completion over all channels.
    ///
    /// Panics if there are no channels.
    pub fn next_finish_time(&self) -> f64 {
        assert!(!self.channels.is_empty(), "Next finish time is requested with no live channels");
        self.channels
            .values()
            .map(|c| c.next_finish_time())
            .fold(f64::INFINITY, f64::min)
    }

    /// Returns the earliest transmission timeout over all channels.
    pub fn next_timeout_time(&self) -> f64 {
        self.channels
            .values()
            .map(|c| c.next_timeout_time())
            .fold(f64::INFINITY, f64::min)
    }

    /// Changes the requested bandwidth of the channel and re-adjusts all channels.
    ///
    /// Returns false if there is no such channel.
    pub fn update_channel_bandwidth(
        &mut self,
        topology: &mut PhysicalTopology,
        key: &ChannelKey,
        requested: f64,
        time: f64,
    ) -> bool {
        match self.channels.get_mut(key) {
            Some(channel) => {
                channel.update_requested_bandwidth(topology, requested);
                self.adjust_all_channels(topology, time);
                true
            }
            None => false,
        }
    }

    /// Moves the channel to a new path keeping its transmissions, then re-adjusts all channels.
    ///
    /// Returns false if there is no such channel.
    pub fn update_channel_route(
        &mut self,
        topology: &mut PhysicalTopology,
        key: &ChannelKey,
        path: Path,
        time: f64,
    ) -> bool {
        match self.channels.get_mut(key) {
            Some(channel) => {
                channel.update_route(topology, path, time);
                self.adjust_all_channels(topology, time);
                true
            }
            None => false,
        }
    }
}
