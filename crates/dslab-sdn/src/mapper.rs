//! Mapping of virtual flows onto physical paths via forwarding tables.

use rustc_hash::FxHashSet;

use crate::channel::ChannelKey;
use crate::error::{Result, SdnError};
use crate::flow::VmId;
use crate::link::{Direction, LinkId};
use crate::link_selection::LinkSelectionPolicy;
use crate::node::NodeId;
use crate::topology::PhysicalTopology;

/// Physical path of a channel: `nodes[i]` and `nodes[i + 1]` are connected by `links[i]`.
///
/// A path inside a single host consists of the host repeated twice and its loop-back link.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    /// Traversed nodes from the source host to the destination host.
    pub nodes: Vec<NodeId>,
    /// Traversed links.
    pub links: Vec<LinkId>,
    directions: Vec<Direction>,
}

impl Path {
    fn start(host: NodeId) -> Self {
        Self {
            nodes: vec![host],
            links: Vec::new(),
            directions: Vec::new(),
        }
    }

    fn push(&mut self, topology: &PhysicalTopology, link: LinkId, next: NodeId) {
        let from = self.last();
        self.directions.push(topology.link(link).direction_from(from));
        self.links.push(link);
        self.nodes.push(next);
    }

    /// Builds path over consecutive nodes connected by links.
    pub fn from_nodes(topology: &PhysicalTopology, nodes: &[NodeId]) -> Result<Self> {
        assert!(nodes.len() >= 2, "Path must contain at least two nodes");
        let mut path = Path::start(nodes[0]);
        for pair in nodes.windows(2) {
            let link = topology
                .link_between(pair[0], pair[1])
                .ok_or(SdnError::NoRoute {
                    from: pair[0],
                    dst: pair[1],
                })?;
            path.push(topology, link, pair[1]);
        }
        Ok(path)
    }

    /// Returns the first node.
    pub fn first(&self) -> NodeId {
        self.nodes[0]
    }

    /// Returns the last node.
    pub fn last(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Returns traversed links along with the direction of traffic on each.
    pub fn hops(&self) -> impl Iterator<Item = (LinkId, Direction)> + '_ {
        self.links.iter().copied().zip(self.directions.iter().copied())
    }
}

/// Resolves virtual flows into physical paths and maintains the forwarding tables describing them.
pub struct VirtualNetworkMapper {
    policy: Box<dyn LinkSelectionPolicy>,
}

impl VirtualNetworkMapper {
    /// Creates mapper using the link selection policy to choose among routing candidates.
    pub fn new(policy: Box<dyn LinkSelectionPolicy>) -> Self {
        Self { policy }
    }

    /// Resolves a path for the flow and installs forwarding entries along it.
    ///
    /// Starting from the source host, each hop takes the routing candidates towards the destination host,
    /// lets the policy choose one link and installs the entry pointing to its other end. A flow between VMs on
    /// the same host goes through the loop-back link of the host. On failure, entries installed so far are
    /// removed.
    pub fn build_forwarding_table(
        &self,
        topology: &mut PhysicalTopology,
        key: &ChannelKey,
        src_host: NodeId,
        dst_host: NodeId,
    ) -> Result<Path> {
        check_host(topology, src_host)?;
        check_host(topology, dst_host)?;
        let mut path = Path::start(src_host);
        if src_host == dst_host {
            let loopback = topology
                .node(src_host)
                .loopback()
                .ok_or(SdnError::NotAHost(src_host))?;
            topology.node_mut(src_host).forwarding_table_mut().add_entry(*key, src_host);
            path.push(topology, loopback, src_host);
            return Ok(path);
        }
        self.extend_path(topology, key, &mut path, dst_host)?;
        log::trace!("forwarding table for {:?} built along {:?}", key, path.nodes);
        Ok(path)
    }

    /// Continues the path from its last node to the destination, installing forwarding entries.
    fn extend_path(&self, topology: &mut PhysicalTopology, key: &ChannelKey, path: &mut Path, dst: NodeId) -> Result<()> {
        let mut visited: FxHashSet<NodeId> = path.nodes.iter().copied().collect();
        let mut installed = Vec::new();
        let mut current = path.last();
        while current != dst {
            let candidates = topology.node(current).routing_table().route(dst);
            if candidates.is_empty() {
                log::error!("no route from node {} to host {} for {:?}", current, dst, key);
                self.remove_entries(topology, key, &installed);
                return Err(SdnError::NoRoute { from: current, dst });
            }
            let link = self.policy.select_link(topology, current, dst, key, candidates);
            let next = topology.link(link).other_end(current);
            if !visited.insert(next) {
                log::error!("routing loop at node {} for {:?}", next, key);
                self.remove_entries(topology, key, &installed);
                return Err(SdnError::RoutingLoop {
                    node: next,
                    src: key.src,
                    dst: key.dst,
                    flow: key.flow,
                });
            }
            topology.node_mut(current).forwarding_table_mut().add_entry(*key, next);
            installed.push(current);
            path.push(topology, link, next);
            current = next;
        }
        Ok(())
    }

    fn remove_entries(&self, topology: &mut PhysicalTopology, key: &ChannelKey, nodes: &[NodeId]) {
        for node in nodes {
            topology.node_mut(*node).forwarding_table_mut().remove_entry(key);
        }
    }

    /// Removes forwarding entries of the flow following them from `start`.
    ///
    /// Returns the nodes whose entries were removed.
    pub fn remove_forwarding_table(
        &self,
        topology: &mut PhysicalTopology,
        key: &ChannelKey,
        start: NodeId,
    ) -> Vec<NodeId> {
        let mut removed = Vec::new();
        let mut current = start;
        while let Some(next) = topology.node_mut(current).forwarding_table_mut().remove_entry(key) {
            removed.push(current);
            if next == current || removed.contains(&next) {
                break;
            }
            current = next;
        }
        removed
    }

    /// Removes forwarding entries of the flow from every node. Returns the number of removed entries.
    pub fn clear_forwarding_table(&self, topology: &mut PhysicalTopology, key: &ChannelKey) -> usize {
        let mut removed = 0;
        for id in 0..topology.node_count() {
            if topology.node_mut(id).forwarding_table_mut().remove_entry(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Returns flows starting or ending at the VM that have forwarding entries installed anywhere.
    pub fn installed_flows(&self, topology: &PhysicalTopology, vm: VmId) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = topology
            .nodes()
            .iter()
            .flat_map(|node| node.forwarding_table().keys())
            .filter(|key| key.src == vm || key.dst == vm)
            .copied()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Replaces the path of the flow, e.g. after one of its VMs has migrated.
    ///
    /// All entries of the old path are removed before the new path is built, so old and new hops never mix.
    pub fn rebuild_forwarding_table(
        &self,
        topology: &mut PhysicalTopology,
        key: &ChannelKey,
        old_src_host: NodeId,
        src_host: NodeId,
        dst_host: NodeId,
    ) -> Result<Path> {
        let removed = self.remove_forwarding_table(topology, key, old_src_host);
        let leftovers = self.clear_forwarding_table(topology, key);
        log::debug!(
            "removed forwarding entries of {:?} at {:?} ({} outside of the old path)",
            key,
            removed,
            leftovers
        );
        self.build_forwarding_table(topology, key, src_host, dst_host)
    }

    /// Re-resolves the hops of an existing path whose link choice has changed.
    ///
    /// The path is walked from the source host, at each hop the policy is asked again. Hops before the first
    /// changed choice are kept, the rest of the path is rebuilt. Returns true if the path changed.
    pub fn update_dynamic_forwarding_table(
        &self,
        topology: &mut PhysicalTopology,
        key: &ChannelKey,
        src_host: NodeId,
        dst_host: NodeId,
    ) -> Result<bool> {
        check_host(topology, src_host)?;
        check_host(topology, dst_host)?;
        if src_host == dst_host {
            return Ok(false);
        }
        let mut path = Path::start(src_host);
        let mut current = src_host;
        while current != dst_host {
            let existing = topology.node(current).forwarding_table().next_hop(key);
            let candidates = topology.node(current).routing_table().route(dst_host);
            let chosen = if candidates.is_empty() {
                None
            } else {
                let link = self.policy.select_link(topology, current, dst_host, key, candidates);
                Some((link, topology.link(link).other_end(current)))
            };
            match (existing, chosen) {
                (Some(next), Some((link, chosen_next))) if next == chosen_next && !path.nodes.contains(&next) => {
                    path.push(topology, link, next);
                    current = next;
                }
                _ => {
                    self.remove_forwarding_table(topology, key, current);
                    self.extend_path(topology, key, &mut path, dst_host)?;
                    log::debug!("dynamic routing moved {:?} to {:?}", key, path.nodes);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Returns the path described by the forwarding entries of the flow.
    ///
    /// Missing entries are built first. If `dynamic` is set, the existing path is re-evaluated against the
    /// current link state. Entries left from an outdated placement of the VMs are replaced.
    pub fn resolve_path(
        &self,
        topology: &mut PhysicalTopology,
        key: &ChannelKey,
        src_host: NodeId,
        dst_host: NodeId,
        dynamic: bool,
    ) -> Result<Path> {
        check_host(topology, src_host)?;
        check_host(topology, dst_host)?;
        if topology.node(src_host).forwarding_table().next_hop(key).is_none() {
            return self.build_forwarding_table(topology, key, src_host, dst_host);
        }
        if dynamic {
            self.update_dynamic_forwarding_table(topology, key, src_host, dst_host)?;
        }
        match self.walk(topology, key, src_host, dst_host) {
            Ok(path) => Ok(path),
            Err(e) => {
                log::debug!("stale forwarding entries for {:?} ({}), rebuilding", key, e);
                self.rebuild_forwarding_table(topology, key, src_host, src_host, dst_host)
            }
        }
    }

    /// Follows the forwarding entries of the flow from the source host to the destination host.
    pub fn walk(&self, topology: &PhysicalTopology, key: &ChannelKey, src_host: NodeId, dst_host: NodeId) -> Result<Path> {
        let no_path = |node| SdnError::NoPath {
            node,
            src: key.src,
            dst: key.dst,
            flow: key.flow,
        };
        let mut path = Path::start(src_host);
        let mut visited = FxHashSet::default();
        visited.insert(src_host);
        let mut current = src_host;
        loop {
            let next = topology
                .node(current)
                .forwarding_table()
                .next_hop(key)
                .ok_or_else(|| no_path(current))?;
            let link = topology.link_between(current, next).ok_or_else(|| no_path(current))?;
            if next == current {
                if current != dst_host {
                    return Err(no_path(current));
                }
                path.push(topology, link, next);
                return Ok(path);
            }
            if !visited.insert(next) {
                return Err(SdnError::RoutingLoop {
                    node: next,
                    src: key.src,
                    dst: key.dst,
                    flow: key.flow,
                });
            }
            path.push(topology, link, next);
            if next == dst_host {
                return Ok(path);
            }
            current = next;
        }
    }
}

fn check_host(topology: &PhysicalTopology, id: NodeId) -> Result<()> {
    if !topology.contains_node(id) {
        return Err(SdnError::UnknownNode(id));
    }
    if !topology.node(id).is_host() {
        return Err(SdnError::NotAHost(id));
    }
    Ok(())
}
