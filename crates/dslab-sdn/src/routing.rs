//! Physical routing tables and virtual forwarding tables.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::channel::ChannelKey;
use crate::link::LinkId;
use crate::node::NodeId;

/// Maps destination hosts to candidate outgoing links.
///
/// The `None` destination holds the default (uplink) route used for destinations without a specific entry.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    routes: IndexMap<Option<NodeId>, Vec<LinkId>>,
}

impl RoutingTable {
    /// Adds a candidate link for the destination, `None` stands for the default route.
    pub(crate) fn add_route(&mut self, dst: Option<NodeId>, link: LinkId) {
        let links = self.routes.entry(dst).or_default();
        if !links.contains(&link) {
            links.push(link);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.routes.clear();
    }

    /// Returns candidate links towards the destination.
    ///
    /// Falls back to the default route if there is no specific entry. Empty result means the destination
    /// is unreachable from this node.
    pub fn route(&self, dst: NodeId) -> &[LinkId] {
        self.specific_route(dst)
            .or_else(|| self.routes.get(&None).map(|v| v.as_slice()))
            .unwrap_or(&[])
    }

    /// Returns candidate links of the specific entry for the destination.
    pub fn specific_route(&self, dst: NodeId) -> Option<&[LinkId]> {
        self.routes.get(&Some(dst)).map(|v| v.as_slice())
    }

    /// Returns candidate links of the default route.
    pub fn default_route(&self) -> &[LinkId] {
        self.routes.get(&None).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns true if there is a specific entry for the destination.
    pub fn knows(&self, dst: NodeId) -> bool {
        self.routes.contains_key(&Some(dst))
    }

    /// Returns destinations with specific entries.
    pub fn known_destinations(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.routes.keys().filter_map(|k| *k)
    }

    /// Returns the number of entries, including the default one.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Maps virtual flows to the next physical hop.
#[derive(Clone, Debug, Default)]
pub struct ForwardingTable {
    entries: FxHashMap<ChannelKey, NodeId>,
}

impl ForwardingTable {
    pub(crate) fn add_entry(&mut self, key: ChannelKey, next_hop: NodeId) {
        self.entries.insert(key, next_hop);
    }

    pub(crate) fn remove_entry(&mut self, key: &ChannelKey) -> Option<NodeId> {
        self.entries.remove(key)
    }

    /// Returns the next hop of the flow.
    pub fn next_hop(&self, key: &ChannelKey) -> Option<NodeId> {
        self.entries.get(key).copied()
    }

    /// Returns the flows having an entry.
    pub fn keys(&self) -> impl Iterator<Item = &ChannelKey> {
        self.entries.keys()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
