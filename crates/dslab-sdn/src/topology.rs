//! Physical network topology.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdnError};
use crate::link::{Link, LinkId};
use crate::node::{Node, NodeId, NodeKind, SwitchTier};

/// Topology variant, defines whether routes are propagated between switches of the same tier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyKind {
    /// Strict tree, routes go only up and down.
    Tree,
    /// Fat-tree, destinations are also propagated across redundant core and aggregate links.
    FatTree,
    /// Several datacenters, destinations are additionally propagated across gateways and intercloud switches.
    InterCloud,
}

impl TopologyKind {
    fn propagates_across(&self, kind: NodeKind) -> bool {
        match (self, kind) {
            (TopologyKind::FatTree, NodeKind::Switch(SwitchTier::Core | SwitchTier::Aggregate)) => true,
            (TopologyKind::InterCloud, NodeKind::Switch(tier)) => tier != SwitchTier::Edge,
            _ => false,
        }
    }
}

/// Owns all nodes and links of the physical network.
///
/// Nodes and links are stored in arenas and refer to each other by id.
pub struct PhysicalTopology {
    kind: TopologyKind,
    nodes: Vec<Node>,
    links: Vec<Link>,
    node_names: FxHashMap<String, NodeId>,
    link_index: FxHashMap<(NodeId, NodeId), LinkId>,
    routing_built: bool,
}

impl PhysicalTopology {
    /// Creates an empty topology.
    pub fn new(kind: TopologyKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
            links: Vec::new(),
            node_names: FxHashMap::default(),
            link_index: FxHashMap::default(),
            routing_built: false,
        }
    }

    /// Returns topology variant.
    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    /// Adds a node with the given port bandwidth.
    ///
    /// Hosts get a loop-back link with zero latency used for transfers between VMs on the same host.
    pub fn add_node(&mut self, name: &str, kind: NodeKind, bandwidth: f64) -> Result<NodeId> {
        check_bandwidth(bandwidth)?;
        if self.node_names.contains_key(name) {
            return Err(SdnError::DuplicateNode(name.to_string()));
        }
        let id = self.nodes.len();
        let mut node = Node::new(id, name, kind, bandwidth);
        if kind.is_host() {
            let link_id = self.links.len();
            self.links.push(Link::new(link_id, id, id, 0., bandwidth, bandwidth));
            node.set_loopback(link_id);
        }
        self.nodes.push(node);
        self.node_names.insert(name.to_string(), id);
        self.routing_built = false;
        Ok(id)
    }

    /// Adds a node whose kind is given by type name (`host`, `edge`, `aggregate`, `core`, `gateway`, `intercloud`).
    pub fn add_node_with_type(&mut self, name: &str, type_name: &str, bandwidth: f64) -> Result<NodeId> {
        let kind = NodeKind::from_type_name(type_name)?;
        self.add_node(name, kind, bandwidth)
    }

    /// Adds a link with capacity equal to the smallest port bandwidth of its endpoints.
    pub fn add_link(&mut self, from: NodeId, to: NodeId, latency: f64) -> Result<LinkId> {
        self.check_node(from)?;
        self.check_node(to)?;
        let bandwidth = self.nodes[from].bandwidth().min(self.nodes[to].bandwidth());
        self.add_asymmetric_link(from, to, latency, bandwidth, bandwidth)
    }

    /// Adds a link with the same capacity in both directions.
    pub fn add_link_with_bandwidth(&mut self, from: NodeId, to: NodeId, latency: f64, bandwidth: f64) -> Result<LinkId> {
        self.add_asymmetric_link(from, to, latency, bandwidth, bandwidth)
    }

    /// Adds a link with separate capacities for `from -> to` and `to -> from` traffic.
    pub fn add_asymmetric_link(
        &mut self,
        from: NodeId,
        to: NodeId,
        latency: f64,
        forward_bandwidth: f64,
        backward_bandwidth: f64,
    ) -> Result<LinkId> {
        self.check_node(from)?;
        self.check_node(to)?;
        if from == to {
            return Err(SdnError::SelfLink(from));
        }
        check_bandwidth(forward_bandwidth)?;
        check_bandwidth(backward_bandwidth)?;
        let pair = (from.min(to), from.max(to));
        if self.link_index.contains_key(&pair) {
            return Err(SdnError::DuplicateLink(from, to));
        }

        let (from_rank, to_rank) = (self.nodes[from].rank(), self.nodes[to].rank());
        let (high, low) = if from_rank < to_rank || (from_rank == to_rank && from < to) {
            (from, to)
        } else {
            (to, from)
        };
        let (up_bandwidth, down_bandwidth) = if low == from {
            (forward_bandwidth, backward_bandwidth)
        } else {
            (backward_bandwidth, forward_bandwidth)
        };

        let id = self.links.len();
        self.links.push(Link::new(id, high, low, latency, up_bandwidth, down_bandwidth));
        self.link_index.insert(pair, id);
        self.nodes[from].add_link(id);
        self.nodes[to].add_link(id);
        self.routing_built = false;
        Ok(id)
    }

    fn check_node(&self, id: NodeId) -> Result<()> {
        if id < self.nodes.len() {
            Ok(())
        } else {
            Err(SdnError::UnknownNode(id))
        }
    }

    /// Returns true if the node exists.
    pub fn contains_node(&self, id: NodeId) -> bool {
        id < self.nodes.len()
    }

    /// Returns node by id.
    ///
    /// Panics on unknown id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Returns node by name.
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.node_names.get(name).map(|id| &self.nodes[*id])
    }

    /// Returns all nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns all hosts.
    pub fn hosts(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_host())
    }

    /// Returns link by id.
    ///
    /// Panics on unknown id.
    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id]
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id]
    }

    /// Returns all links, including host loop-back links.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Returns the link connecting two nodes, the loop-back link if both are the same host.
    pub fn link_between(&self, a: NodeId, b: NodeId) -> Option<LinkId> {
        if a == b {
            return self.nodes.get(a).and_then(|n| n.loopback());
        }
        self.link_index.get(&(a.min(b), a.max(b))).copied()
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of links, including host loop-back links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Returns true if routing tables are up to date with the topology.
    pub fn routing_built(&self) -> bool {
        self.routing_built
    }

    /// Returns the sum of latencies of the links.
    pub fn path_latency(&self, links: &[LinkId]) -> f64 {
        links.iter().map(|l| self.links[*l].latency()).sum()
    }

    /// Computes default routing tables of all nodes.
    ///
    /// Nodes are processed tier by tier starting from hosts. Each host routes to itself via its loop-back link
    /// and uses its uplink as the default route. Each switch gets a specific route to every host known by the
    /// nodes below it and a default route via each link to an upper tier. Depending on the topology kind,
    /// destinations are then propagated across links connecting switches of the same tier.
    pub fn build_default_routing(&mut self) {
        for node in self.nodes.iter_mut() {
            node.routing_table_mut().clear();
        }
        let mut ranks: Vec<u32> = self.nodes.iter().map(|n| n.rank()).collect();
        ranks.sort_unstable();
        ranks.dedup();

        for &rank in ranks.iter().rev() {
            let tier: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|n| n.rank() == rank)
                .map(|n| n.id())
                .collect();
            for &id in &tier {
                self.build_tier_routes(id);
            }
            if tier.len() > 1 && self.kind.propagates_across(self.nodes[tier[0]].kind()) {
                self.propagate_across_tier(&tier);
            }
        }
        self.routing_built = true;
    }

    fn build_tier_routes(&mut self, id: NodeId) {
        let rank = self.nodes[id].rank();
        let mut routes = Vec::new();
        if let Some(loopback) = self.nodes[id].loopback() {
            routes.push((Some(id), loopback));
        }
        for &link_id in self.nodes[id].links() {
            let other = self.links[link_id].other_end(id);
            let other_rank = self.nodes[other].rank();
            if other_rank < rank {
                routes.push((None, link_id));
            } else if other_rank > rank {
                for dst in self.nodes[other].routing_table().known_destinations() {
                    routes.push((Some(dst), link_id));
                }
            }
        }
        let table = self.nodes[id].routing_table_mut();
        for (dst, link_id) in routes {
            table.add_route(dst, link_id);
        }
    }

    /// Lets each switch of the tier reach destinations known by its same-tier peers.
    ///
    /// Breadth-first search over same-tier links from every switch, each peer is visited once. A destination
    /// is learned from the nearest peers only, so every hop strictly approaches a peer knowing it from below.
    fn propagate_across_tier(&mut self, tier: &[NodeId]) {
        let rank = self.nodes[tier[0]].rank();
        let known_below: FxHashMap<NodeId, Vec<NodeId>> = tier
            .iter()
            .map(|&id| (id, self.nodes[id].routing_table().known_destinations().collect()))
            .collect();

        let mut learned = Vec::new();
        for &src in tier {
            let mut distance: FxHashMap<NodeId, usize> = FxHashMap::default();
            distance.insert(src, 0);
            let mut claimed: FxHashMap<NodeId, usize> = FxHashMap::default();
            let mut queue = VecDeque::new();
            for &link_id in self.nodes[src].links() {
                let peer = self.links[link_id].other_end(src);
                if self.nodes[peer].rank() == rank && !distance.contains_key(&peer) {
                    distance.insert(peer, 1);
                    queue.push_back((peer, link_id));
                }
            }
            while let Some((node, first_link)) = queue.pop_front() {
                let dist = distance[&node];
                for &dst in &known_below[&node] {
                    if self.nodes[src].routing_table().knows(dst) {
                        continue;
                    }
                    let best = *claimed.entry(dst).or_insert(dist);
                    if best == dist {
                        learned.push((src, dst, first_link));
                    }
                }
                for &link_id in self.nodes[node].links() {
                    let peer = self.links[link_id].other_end(node);
                    if self.nodes[peer].rank() == rank && !distance.contains_key(&peer) {
                        distance.insert(peer, dist + 1);
                        queue.push_back((peer, first_link));
                    }
                }
            }
        }
        for (src, dst, link_id) in learned {
            self.nodes[src].routing_table_mut().add_route(Some(dst), link_id);
        }
    }
}

fn check_bandwidth(bandwidth: f64) -> Result<()> {
    if bandwidth > 0. && bandwidth.is_finite() {
        Ok(())
    } else {
        Err(SdnError::InvalidBandwidth(bandwidth))
    }
}
