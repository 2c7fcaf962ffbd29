//! Sampling of link, channel and host traffic.

use serde::Serialize;

use crate::channel::ChannelKey;
use crate::channel_manager::ChannelManager;
use crate::link::{Direction, LinkId};
use crate::node::NodeId;
use crate::topology::PhysicalTopology;

/// State of one link direction at a monitoring tick.
#[derive(Clone, Debug, Serialize)]
pub struct LinkSample {
    /// Sampling time.
    pub time: f64,
    /// Link id.
    pub link: LinkId,
    /// Link direction.
    pub direction: Direction,
    /// Bandwidth allocated to channels.
    pub allocated: f64,
    /// Fraction of capacity allocated to channels.
    pub utilization: f64,
    /// Number of channels using the direction.
    pub channels: usize,
}

/// State of a channel at a monitoring tick.
#[derive(Clone, Debug, Serialize)]
pub struct ChannelSample {
    /// Sampling time.
    pub time: f64,
    /// Channel key.
    pub key: ChannelKey,
    /// Allocated bandwidth.
    pub allocated: f64,
    /// Number of in-flight transmissions.
    pub in_flight: usize,
}

/// Traffic of a host at a monitoring tick.
#[derive(Clone, Debug, Serialize)]
pub struct HostSample {
    /// Sampling time.
    pub time: f64,
    /// Host id.
    pub host: NodeId,
    /// Bandwidth of channels starting at the host.
    pub outgoing: f64,
    /// Bandwidth of channels ending at the host.
    pub incoming: f64,
}

/// Collects history of link, channel and host samples.
///
/// Only link directions with at least one channel are sampled.
#[derive(Default)]
pub struct NetworkMonitor {
    links: Vec<LinkSample>,
    channels: Vec<ChannelSample>,
    hosts: Vec<HostSample>,
}

impl NetworkMonitor {
    /// Creates empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples the current state of the network.
    pub fn record(&mut self, time: f64, topology: &PhysicalTopology, manager: &ChannelManager) {
        for link in topology.links() {
            for direction in Direction::ALL {
                let channels = link.channel_count(direction);
                if channels == 0 {
                    continue;
                }
                self.links.push(LinkSample {
                    time,
                    link: link.id(),
                    direction,
                    allocated: link.allocated_bandwidth(direction),
                    utilization: link.utilization(direction),
                    channels,
                });
            }
        }
        for channel in manager.channels() {
            self.channels.push(ChannelSample {
                time,
                key: channel.key(),
                allocated: channel.allocated_bandwidth(),
                in_flight: channel.in_flight_count(),
            });
        }
        for host in topology.hosts() {
            let mut sample = HostSample {
                time,
                host: host.id(),
                outgoing: 0.,
                incoming: 0.,
            };
            for channel in manager.channels() {
                if channel.src_host() == host.id() {
                    sample.outgoing += channel.allocated_bandwidth();
                }
                if channel.dst_host() == host.id() {
                    sample.incoming += channel.allocated_bandwidth();
                }
            }
            if sample.outgoing > 0. || sample.incoming > 0. {
                self.hosts.push(sample);
            }
        }
    }

    /// Returns all link samples.
    pub fn link_samples(&self) -> &[LinkSample] {
        &self.links
    }

    /// Returns all channel samples.
    pub fn channel_samples(&self) -> &[ChannelSample] {
        &self.channels
    }

    /// Returns all host samples.
    pub fn host_samples(&self) -> &[HostSample] {
        &self.hosts
    }

    /// Returns samples of one link direction.
    pub fn link_history(&self, link: LinkId, direction: Direction) -> Vec<&LinkSample> {
        self.links
            .iter()
            .filter(|s| s.link == link && s.direction == direction)
            .collect()
    }

    /// Returns samples of one channel.
    pub fn channel_history(&self, key: &ChannelKey) -> Vec<&ChannelSample> {
        self.channels.iter().filter(|s| s.key == *key).collect()
    }

    /// Returns samples of one host.
    pub fn host_history(&self, host: NodeId) -> Vec<&HostSample> {
        self.hosts.iter().filter(|s| s.host == host).collect()
    }

    /// Drops collected samples.
    pub fn clear(&mut self) {
        self.links.clear();
        self.channels.clear();
        self.hosts.clear();
    }
}

/// Transmission counters of a network operating system.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    /// Number of completed transmissions.
    pub completed_transmissions: u64,
    /// Number of transmissions failed by timeout.
    pub failed_transmissions: u64,
    /// Total size of completed transmissions.
    pub transferred_volume: f64,
    /// Number of created channels.
    pub channels_created: u64,
    /// Number of processed VM migrations.
    pub migrations: u64,
    /// Number of channel re-evaluation events handled.
    pub channel_updates: u64,
}
