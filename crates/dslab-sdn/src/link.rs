//! Physical link and its bandwidth accounting.

use indexmap::IndexMap;
use serde::Serialize;

use crate::channel::ChannelKey;
use crate::node::NodeId;

/// Unique link id.
pub type LinkId = usize;

/// Direction of traffic over a link.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// From the lower-order (deeper) endpoint to the higher-order one.
    Up,
    /// From the higher-order endpoint to the lower-order one.
    Down,
}

impl Direction {
    /// Both directions.
    pub const ALL: [Direction; 2] = [Direction::Up, Direction::Down];
}

#[derive(Clone, Debug)]
struct ChannelShare {
    dedicated: bool,
    requested: f64,
    allocated: f64,
}

#[derive(Clone, Debug)]
struct DirectionUsage {
    capacity: f64,
    channels: IndexMap<ChannelKey, ChannelShare>,
}

impl DirectionUsage {
    fn new(capacity: f64) -> Self {
        Self {
            capacity,
            channels: IndexMap::new(),
        }
    }
}

/// A bidirectional link between two nodes.
///
/// Endpoints are ordered by rank: the high-order endpoint is the one closer to the top of hierarchy.
/// Bandwidth is accounted separately for each direction. Each channel traversing the link registers itself
/// in the direction it uses, either as dedicated (has its own flow) or shared (uses the default flow).
#[derive(Clone, Debug)]
pub struct Link {
    id: LinkId,
    high: NodeId,
    low: NodeId,
    latency: f64,
    up: DirectionUsage,
    down: DirectionUsage,
}

impl Link {
    pub(crate) fn new(id: LinkId, high: NodeId, low: NodeId, latency: f64, up_bandwidth: f64, down_bandwidth: f64) -> Self {
        Self {
            id,
            high,
            low,
            latency,
            up: DirectionUsage::new(up_bandwidth),
            down: DirectionUsage::new(down_bandwidth),
        }
    }

    /// Returns link id.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Returns the endpoint closer to the top of hierarchy.
    pub fn high_order(&self) -> NodeId {
        self.high
    }

    /// Returns the endpoint farther from the top of hierarchy.
    pub fn low_order(&self) -> NodeId {
        self.low
    }

    /// Returns link latency.
    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// Returns true for host loop-back links.
    pub fn is_loopback(&self) -> bool {
        self.high == self.low
    }

    /// Returns true if the link connects the two nodes (in any order).
    pub fn connects(&self, a: NodeId, b: NodeId) -> bool {
        (self.high == a && self.low == b) || (self.high == b && self.low == a)
    }

    /// Returns the endpoint opposite to `node`.
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if node == self.high {
            self.low
        } else {
            self.high
        }
    }

    /// Returns the direction of traffic sent from `from`.
    pub fn direction_from(&self, from: NodeId) -> Direction {
        if from == self.low {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    fn usage(&self, dir: Direction) -> &DirectionUsage {
        match dir {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    fn usage_mut(&mut self, dir: Direction) -> &mut DirectionUsage {
        match dir {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
        }
    }

    /// Returns link capacity in the direction.
    pub fn capacity(&self, dir: Direction) -> f64 {
        self.usage(dir).capacity
    }

    /// Returns the number of channels using the direction.
    pub fn channel_count(&self, dir: Direction) -> usize {
        self.usage(dir).channels.len()
    }

    /// Returns the number of dedicated channels using the direction.
    pub fn dedicated_channel_count(&self, dir: Direction) -> usize {
        self.usage(dir).channels.values().filter(|c| c.dedicated).count()
    }

    /// Returns the number of shared (default flow) channels using the direction.
    pub fn shared_channel_count(&self, dir: Direction) -> usize {
        self.channel_count(dir) - self.dedicated_channel_count(dir)
    }

    /// Returns true if the channel is registered in any direction.
    pub fn has_channel(&self, key: &ChannelKey) -> bool {
        self.up.channels.contains_key(key) || self.down.channels.contains_key(key)
    }

    /// Returns keys of channels registered in the direction.
    pub fn channels(&self, dir: Direction) -> impl Iterator<Item = &ChannelKey> {
        self.usage(dir).channels.keys()
    }

    /// Returns the sum of bandwidth requested by dedicated channels in the direction.
    pub fn requested_dedicated_bandwidth(&self, dir: Direction) -> f64 {
        self.usage(dir)
            .channels
            .values()
            .filter(|c| c.dedicated)
            .map(|c| c.requested)
            .sum()
    }

    /// Returns the sum of bandwidth allocated to dedicated channels in the direction.
    pub fn allocated_dedicated_bandwidth(&self, dir: Direction) -> f64 {
        self.usage(dir)
            .channels
            .values()
            .filter(|c| c.dedicated)
            .map(|c| c.allocated)
            .sum()
    }

    /// Returns the sum of bandwidth allocated to all channels in the direction.
    pub fn allocated_bandwidth(&self, dir: Direction) -> f64 {
        self.usage(dir).channels.values().map(|c| c.allocated).sum()
    }

    /// Returns the factor dedicated requests are scaled by so that they fit into the link capacity.
    pub fn dedicated_adjust_factor(&self, dir: Direction) -> f64 {
        let requested = self.requested_dedicated_bandwidth(dir);
        let capacity = self.capacity(dir);
        if requested > capacity {
            capacity / requested
        } else {
            1.
        }
    }

    /// Returns capacity left after dedicated allocations.
    ///
    /// Negative values are clamped to zero.
    pub fn free_bandwidth(&self, dir: Direction) -> f64 {
        let free = self.capacity(dir) - self.allocated_dedicated_bandwidth(dir);
        if free < 0. {
            log::warn!(
                "link {} ({} <-> {}) {:?}: dedicated channels exceed capacity by {}, free bandwidth clamped to 0",
                self.id,
                self.high,
                self.low,
                dir,
                -free
            );
            return 0.;
        }
        free
    }

    /// Returns bandwidth allocated to the channel in the direction.
    pub fn allocated_to(&self, dir: Direction, key: &ChannelKey) -> Option<f64> {
        self.usage(dir).channels.get(key).map(|c| c.allocated)
    }

    /// Returns the bandwidth each shared channel gets in the direction.
    pub fn shared_bandwidth_per_channel(&self, dir: Direction) -> f64 {
        let free = self.free_bandwidth(dir);
        let shared = self.shared_channel_count(dir);
        if shared == 0 {
            free
        } else {
            free / shared as f64
        }
    }

    /// Returns the fraction of capacity allocated to channels in the direction.
    pub fn utilization(&self, dir: Direction) -> f64 {
        let capacity = self.capacity(dir);
        if capacity <= 0. {
            return 0.;
        }
        self.allocated_bandwidth(dir) / capacity
    }

    pub(crate) fn add_channel(&mut self, dir: Direction, key: ChannelKey, requested: f64) {
        let dedicated = key.is_dedicated();
        self.usage_mut(dir).channels.insert(
            key,
            ChannelShare {
                dedicated,
                requested,
                allocated: 0.,
            },
        );
    }

    pub(crate) fn remove_channel(&mut self, dir: Direction, key: &ChannelKey) -> bool {
        self.usage_mut(dir).channels.shift_remove(key).is_some()
    }

    pub(crate) fn set_allocated(&mut self, dir: Direction, key: &ChannelKey, allocated: f64) {
        if let Some(share) = self.usage_mut(dir).channels.get_mut(key) {
            share.allocated = allocated;
        }
    }

    pub(crate) fn set_requested(&mut self, dir: Direction, key: &ChannelKey, requested: f64) {
        if let Some(share) = self.usage_mut(dir).channels.get_mut(key) {
            share.requested = requested;
        }
    }
}
