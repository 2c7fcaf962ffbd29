//! Network operating system: the simulation component driving channels over the physical network.

use std::cell::RefCell;
use std::rc::Rc;

use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::event::{Event, EventId};
use dslab_core::handler::EventHandler;
use dslab_core::{cast, log_debug, log_error, log_info, log_trace, log_warn};

use crate::channel::ChannelKey;
use crate::channel_manager::ChannelManager;
use crate::config::SdnConfig;
use crate::error::{Result, SdnError};
use crate::events::{ChannelsUpdate, MonitoringTick, TransmissionCompleted, TransmissionFailed};
use crate::flow::{FlowConfig, FlowId, SdnRegistry, SfcPolicy, VmId, VmInfo, DEFAULT_FLOW_ID};
use crate::mapper::VirtualNetworkMapper;
use crate::monitor::{NetworkMonitor, NetworkStats};
use crate::node::NodeId;
use crate::topology::PhysicalTopology;
use crate::transmission::{Packet, Transmission};
use crate::vm_allocation::VmAllocationPolicy;

/// Manages virtual flows of VMs over the physical network of a datacenter.
///
/// Packets submitted via [`add_packet_to_channel`](Self::add_packet_to_channel) are transmitted by channels,
/// one per (source VM, destination VM, flow). The component schedules a single pending re-evaluation event at
/// the earliest predicted completion or timeout. On re-evaluation, finished transmissions are reported to the
/// packet's notification component with [`TransmissionCompleted`] or [`TransmissionFailed`] events.
pub struct NetworkOperatingSystem {
    topology: PhysicalTopology,
    mapper: VirtualNetworkMapper,
    channel_manager: ChannelManager,
    registry: Rc<RefCell<SdnRegistry>>,
    vm_allocation: Rc<RefCell<dyn VmAllocationPolicy>>,
    config: Rc<SdnConfig>,
    monitor: NetworkMonitor,
    stats: NetworkStats,
    pending_update: Option<EventId>,
    pending_monitoring: Option<EventId>,
    ctx: SimulationContext,
}

impl NetworkOperatingSystem {
    /// Creates network operating system over the topology, building its routing tables if needed.
    pub fn new(
        mut topology: PhysicalTopology,
        registry: Rc<RefCell<SdnRegistry>>,
        vm_allocation: Rc<RefCell<dyn VmAllocationPolicy>>,
        config: Rc<SdnConfig>,
        ctx: SimulationContext,
    ) -> Self {
        if !topology.routing_built() {
            topology.build_default_routing();
        }
        Self {
            topology,
            mapper: VirtualNetworkMapper::new(config.link_selection.build()),
            channel_manager: ChannelManager::new(config.packet_scheduler, config.transmission_timeout),
            registry,
            vm_allocation,
            config,
            monitor: NetworkMonitor::new(),
            stats: NetworkStats::default(),
            pending_update: None,
            pending_monitoring: None,
            ctx,
        }
    }

    /// Returns component id.
    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Returns physical topology.
    pub fn topology(&self) -> &PhysicalTopology {
        &self.topology
    }

    /// Returns channel manager.
    pub fn channel_manager(&self) -> &ChannelManager {
        &self.channel_manager
    }

    /// Returns collected monitoring samples.
    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    /// Returns transmission counters.
    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Returns config.
    pub fn config(&self) -> &SdnConfig {
        &self.config
    }

    // Virtual topology --------------------------------------------------------------------------------------------

    /// Registers VM placed on the host.
    pub fn add_vm(&mut self, vm: VmInfo, host: NodeId) -> Result<()> {
        if !self.topology.contains_node(host) {
            return Err(SdnError::UnknownNode(host));
        }
        if !self.topology.node(host).is_host() {
            return Err(SdnError::NotAHost(host));
        }
        log_debug!(self.ctx, "vm {} ({}) placed on {}", vm.id, vm.name, self.topology.node(host).name());
        self.vm_allocation.borrow_mut().set_host(vm.id, Some(host));
        self.registry.borrow_mut().add_vm(vm);
        Ok(())
    }

    /// Registers flow and builds forwarding tables for it if both VMs are placed.
    ///
    /// Routing failure is reported as a deployment failure of the flow.
    pub fn add_flow(&mut self, flow: FlowConfig) -> Result<()> {
        {
            let registry = self.registry.borrow();
            for vm in [flow.src, flow.dst] {
                if registry.vm(vm).is_none() {
                    return Err(SdnError::UnknownVm(vm));
                }
            }
        }
        if !flow.bandwidth.is_finite() || flow.bandwidth < 0. {
            return Err(SdnError::InvalidBandwidth(flow.bandwidth));
        }
        let key = ChannelKey::new(flow.src, flow.dst, flow.id);
        let hosts = (self.host_of(flow.src), self.host_of(flow.dst));
        if let (Some(src_host), Some(dst_host)) = hosts {
            let path = self
                .mapper
                .resolve_path(&mut self.topology, &key, src_host, dst_host, false)
                .map_err(|e| {
                    log_error!(self.ctx, "flow {} ({}) cannot be deployed: {}", flow.id, flow.name, e);
                    e
                })?;
            log_debug!(self.ctx, "flow {} ({}) deployed along {:?}", flow.id, flow.name, path.nodes);
        }
        self.registry.borrow_mut().add_flow(flow);
        Ok(())
    }

    /// Registers SFC policy.
    pub fn add_sfc_policy(&mut self, policy: SfcPolicy) -> Result<()> {
        {
            let registry = self.registry.borrow();
            for vm in [policy.src, policy.dst].iter().chain(policy.chain.iter()) {
                if registry.vm(*vm).is_none() {
                    return Err(SdnError::UnknownVm(*vm));
                }
            }
        }
        self.registry.borrow_mut().add_sfc_policy(policy);
        Ok(())
    }

    fn host_of(&self, vm: VmId) -> Option<NodeId> {
        self.vm_allocation.borrow().host_of(vm)
    }

    /// Returns the host the VM is placed on.
    pub fn find_host(&self, vm: VmId) -> Result<NodeId> {
        if self.registry.borrow().vm(vm).is_none() {
            return Err(SdnError::UnknownVm(vm));
        }
        let host = self.host_of(vm).ok_or(SdnError::VmNotPlaced(vm))?;
        if !self.topology.contains_node(host) {
            return Err(SdnError::UnknownNode(host));
        }
        Ok(host)
    }

    /// Returns bandwidth requested for the packet's flow, shared flows request none.
    pub fn get_requested_bandwidth(&self, packet: &Packet) -> f64 {
        if packet.flow == DEFAULT_FLOW_ID {
            return 0.;
        }
        self.registry
            .borrow()
            .flow(packet.flow)
            .map(|f| f.bandwidth)
            .unwrap_or(0.)
    }

    /// Returns the latency of the path taken by the flow.
    pub fn calculate_latency(&mut self, src: VmId, dst: VmId, flow: FlowId) -> Result<f64> {
        if let Some(channel) = self.channel_manager.find_channel(src, dst, flow) {
            return Ok(channel.total_latency());
        }
        let key = ChannelKey::new(src, dst, flow);
        let (src_host, dst_host) = (self.find_host(src)?, self.find_host(dst)?);
        let path = self
            .mapper
            .resolve_path(&mut self.topology, &key, src_host, dst_host, false)?;
        Ok(self.topology.path_latency(&path.links))
    }

    // Packets ------------------------------------------------------------------------------------------------------

    /// Enqueues the packet into the channel of its flow, creating the channel if needed.
    ///
    /// Packets of unregistered flows are sent over the shared channel. Returns the packet with its effective
    /// flow id.
    pub fn add_packet_to_channel(&mut self, mut packet: Packet) -> Result<Packet> {
        if !packet.size.is_finite() || packet.size < 0. {
            return Err(SdnError::InvalidPacketSize(packet.size));
        }
        if packet.flow != DEFAULT_FLOW_ID && self.registry.borrow().flow(packet.flow).is_none() {
            log_warn!(
                self.ctx,
                "packet {} uses unknown flow {}, sending over the default flow",
                packet.id,
                packet.flow
            );
            packet.flow = DEFAULT_FLOW_ID;
        }
        self.process_channels();

        let key = ChannelKey::new(packet.src, packet.dst, packet.flow);
        if self.channel_manager.channel(&key).is_none() {
            let (src_host, dst_host) = (self.find_host(packet.src)?, self.find_host(packet.dst)?);
            let requested = self.get_requested_bandwidth(&packet);
            let channel = self
                .channel_manager
                .create_channel(
                    &mut self.topology,
                    &self.mapper,
                    key,
                    src_host,
                    dst_host,
                    requested,
                    self.config.dynamic_routing,
                )
                .map_err(|e| {
                    log_error!(self.ctx, "cannot create channel {:?}: {}", key, e);
                    e
                })?;
            self.channel_manager
                .add_channel(&mut self.topology, channel, self.ctx.time());
            self.stats.channels_created += 1;
        }
        log_debug!(
            self.ctx,
            "packet {} of size {} enqueued into channel {:?}",
            packet.id,
            packet.size,
            key
        );
        let transmission = Transmission::new(packet.clone(), self.ctx.time());
        self.channel_manager
            .add_transmission(&key, transmission, self.ctx.time());
        self.schedule_channels_update();
        self.schedule_monitoring();
        Ok(packet)
    }

    // Bandwidth ----------------------------------------------------------------------------------------------------

    /// Changes the bandwidth requested by the flow between two VMs.
    ///
    /// With dynamic routing enabled, the path of a live channel is re-evaluated first. Returns true if a live
    /// channel was updated.
    pub fn update_channel_bandwidth(&mut self, src: VmId, dst: VmId, flow: FlowId, bandwidth: f64) -> Result<bool> {
        if !bandwidth.is_finite() || bandwidth < 0. {
            return Err(SdnError::InvalidBandwidth(bandwidth));
        }
        if let Some(config) = self.registry.borrow_mut().flow_mut(flow) {
            if config.src == src && config.dst == dst {
                config.bandwidth = bandwidth;
            }
        }
        let key = ChannelKey::new(src, dst, flow);
        let time = self.ctx.time();
        self.process_channels();
        let (src_host, dst_host) = match self.channel_manager.channel(&key) {
            Some(channel) => (channel.src_host(), channel.dst_host()),
            None => return Ok(false),
        };
        if self.config.dynamic_routing
            && self
                .mapper
                .update_dynamic_forwarding_table(&mut self.topology, &key, src_host, dst_host)?
        {
            let path = self.mapper.walk(&self.topology, &key, src_host, dst_host)?;
            log_debug!(self.ctx, "channel {:?} rerouted along {:?}", key, path.nodes);
            self.channel_manager
                .update_channel_route(&mut self.topology, &key, path, time);
        }
        let updated = self
            .channel_manager
            .update_channel_bandwidth(&mut self.topology, &key, bandwidth, time);
        log_info!(self.ctx, "bandwidth of channel {:?} set to {}", key, bandwidth);
        self.schedule_channels_update();
        Ok(updated)
    }

    /// Changes the bandwidth of a registered flow.
    pub fn update_bandwidth_flow(&mut self, flow: FlowId, bandwidth: f64) -> Result<bool> {
        let (src, dst) = {
            let registry = self.registry.borrow();
            let config = registry.flow(flow).ok_or(SdnError::UnknownFlow(flow))?;
            (config.src, config.dst)
        };
        self.update_channel_bandwidth(src, dst, flow, bandwidth)
    }

    // Migration ----------------------------------------------------------------------------------------------------

    /// Moves forwarding tables and live channels of the VM's flows to its new host.
    ///
    /// Covers registered flows, live channels and flows that only have forwarding entries left. Entries of flows
    /// whose other VM is not placed are removed. A flow that cannot be rerouted does not stop the others, the first
    /// such error is returned after all flows are processed.
    pub fn process_vm_migrate(&mut self, vm: VmId, old_host: NodeId, new_host: NodeId) -> Result<()> {
        if self.registry.borrow().vm(vm).is_none() {
            return Err(SdnError::UnknownVm(vm));
        }
        for host in [old_host, new_host] {
            if !self.topology.contains_node(host) {
                return Err(SdnError::UnknownNode(host));
            }
        }
        if !self.topology.node(new_host).is_host() {
            return Err(SdnError::NotAHost(new_host));
        }
        log_info!(
            self.ctx,
            "vm {} migrates from {} to {}",
            vm,
            self.topology.node(old_host).name(),
            self.topology.node(new_host).name()
        );
        self.process_channels();
        self.vm_allocation.borrow_mut().set_host(vm, Some(new_host));

        let mut keys: Vec<ChannelKey> = self
            .registry
            .borrow()
            .flows_of_vm(vm)
            .iter()
            .map(|f| ChannelKey::new(f.src, f.dst, f.id))
            .collect();
        let live = self.channel_manager.channels_of_vm(vm);
        let installed = self.mapper.installed_flows(&self.topology, vm);
        for key in live.into_iter().chain(installed) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let time = self.ctx.time();
        let mut failures = Vec::new();
        for key in keys {
            let (src_host, dst_host) = match (self.host_of(key.src), self.host_of(key.dst)) {
                (Some(src_host), Some(dst_host)) => (src_host, dst_host),
                _ => {
                    let removed = self.mapper.clear_forwarding_table(&mut self.topology, &key);
                    if removed > 0 {
                        log_debug!(self.ctx, "removed {} forwarding entries of unplaced flow {:?}", removed, key);
                    }
                    continue;
                }
            };
            let old_src_host = if key.src == vm { old_host } else { src_host };
            let path = match self
                .mapper
                .rebuild_forwarding_table(&mut self.topology, &key, old_src_host, src_host, dst_host)
            {
                Ok(path) => path,
                Err(e) => {
                    log_error!(self.ctx, "cannot reroute {:?} after migration of vm {}: {}", key, vm, e);
                    failures.push(e);
                    continue;
                }
            };
            if self
                .channel_manager
                .update_channel_route(&mut self.topology, &key, path, time)
            {
                log_debug!(self.ctx, "channel {:?} moved to the new host", key);
            }
        }
        self.stats.migrations += 1;
        self.schedule_channels_update();
        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // Processing ---------------------------------------------------------------------------------------------------

    fn process_channels(&mut self) {
        if self.channel_manager.is_empty() {
            return;
        }
        let time = self.ctx.time();
        let report = self.channel_manager.update_packet_processing(&mut self.topology, time);
        for (key, transmission, latency) in report.completed {
            let finish_time = transmission.finish_time.unwrap_or(time);
            log_debug!(
                self.ctx,
                "packet {} of channel {:?} transmitted at {:.3}",
                transmission.packet.id,
                key,
                finish_time
            );
            self.stats.completed_transmissions += 1;
            self.stats.transferred_volume += transmission.size();
            let dst = transmission.packet.notification_dst;
            let delay = (finish_time + latency - time).max(0.);
            self.ctx.emit(
                TransmissionCompleted {
                    packet: transmission.packet,
                    start_time: transmission.start_time,
                    finish_time,
                },
                dst,
                delay,
            );
        }
        for (key, transmission) in report.failed {
            let fail_time = transmission.finish_time.unwrap_or(time);
            log_warn!(
                self.ctx,
                "packet {} of channel {:?} failed by timeout at {:.3}",
                transmission.packet.id,
                key,
                fail_time
            );
            self.stats.failed_transmissions += 1;
            let dst = transmission.packet.notification_dst;
            self.ctx.emit_now(
                TransmissionFailed {
                    packet: transmission.packet,
                    start_time: transmission.start_time,
                    fail_time,
                },
                dst,
            );
        }
    }

    fn schedule_channels_update(&mut self) {
        if let Some(event_id) = self.pending_update.take() {
            self.ctx.cancel_event(event_id);
        }
        if self.channel_manager.is_empty() {
            return;
        }
        let next = self
            .channel_manager
            .next_finish_time()
            .min(self.channel_manager.next_timeout_time());
        if !next.is_finite() {
            log_trace!(self.ctx, "no progress is possible, channels update is not scheduled");
            return;
        }
        let delay = (next - self.ctx.time()).max(self.config.min_time_between_events);
        log_trace!(self.ctx, "channels update scheduled in {:.3}", delay);
        self.pending_update = Some(self.ctx.emit_self(ChannelsUpdate {}, delay));
    }

    fn schedule_monitoring(&mut self) {
        if self.config.monitoring_interval <= 0. || self.pending_monitoring.is_some() {
            return;
        }
        self.pending_monitoring = Some(self.ctx.emit_self(MonitoringTick {}, self.config.monitoring_interval));
    }
}

impl EventHandler for NetworkOperatingSystem {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            ChannelsUpdate {} => {
                self.pending_update = None;
                self.stats.channel_updates += 1;
                self.process_channels();
                self.schedule_channels_update();
            }
            MonitoringTick {} => {
                self.pending_monitoring = None;
                self.process_channels();
                self.monitor.record(self.ctx.time(), &self.topology, &self.channel_manager);
                if !self.channel_manager.is_empty() {
                    self.schedule_monitoring();
                }
                self.schedule_channels_update();
            }
        })
    }
}
