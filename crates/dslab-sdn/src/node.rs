//! Network node.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdnError};
use crate::link::LinkId;
use crate::routing::{ForwardingTable, RoutingTable};

/// Unique node id (address).
pub type NodeId = usize;

/// Switch tier in a data-center hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchTier {
    /// Top-of-rack switch connecting hosts.
    Edge,
    /// Aggregation switch connecting edge switches of a pod.
    Aggregate,
    /// Core switch of a datacenter.
    Core,
    /// Gateway connecting a datacenter to other datacenters.
    Gateway,
    /// Switch interconnecting datacenter gateways.
    Intercloud,
}

/// Kind of the network node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Physical host running VMs.
    Host,
    /// Switch at the given tier.
    Switch(SwitchTier),
}

impl NodeKind {
    /// Returns the tier rank of the node.
    ///
    /// Hosts have the largest rank, the rank decreases towards the top of hierarchy.
    pub fn rank(&self) -> u32 {
        match self {
            NodeKind::Switch(SwitchTier::Intercloud) => 0,
            NodeKind::Switch(SwitchTier::Gateway) => 1,
            NodeKind::Switch(SwitchTier::Core) => 2,
            NodeKind::Switch(SwitchTier::Aggregate) => 3,
            NodeKind::Switch(SwitchTier::Edge) => 4,
            NodeKind::Host => 5,
        }
    }

    /// Parses node type name used in topology descriptions.
    pub fn from_type_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "host" => Ok(NodeKind::Host),
            "edge" => Ok(NodeKind::Switch(SwitchTier::Edge)),
            "aggregate" => Ok(NodeKind::Switch(SwitchTier::Aggregate)),
            "core" => Ok(NodeKind::Switch(SwitchTier::Core)),
            "gateway" => Ok(NodeKind::Switch(SwitchTier::Gateway)),
            "intercloud" => Ok(NodeKind::Switch(SwitchTier::Intercloud)),
            _ => Err(SdnError::UnknownNodeType(name.to_string())),
        }
    }

    /// Returns true for hosts.
    pub fn is_host(&self) -> bool {
        matches!(self, NodeKind::Host)
    }
}

/// A host or a switch in the physical network.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,
    bandwidth: f64,
    links: Vec<LinkId>,
    loopback: Option<LinkId>,
    routing_table: RoutingTable,
    forwarding_table: ForwardingTable,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: &str, kind: NodeKind, bandwidth: f64) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            bandwidth,
            links: Vec::new(),
            loopback: None,
            routing_table: RoutingTable::default(),
            forwarding_table: ForwardingTable::default(),
        }
    }

    /// Returns node address.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns tier rank of the node.
    pub fn rank(&self) -> u32 {
        self.kind.rank()
    }

    /// Returns true for hosts.
    pub fn is_host(&self) -> bool {
        self.kind.is_host()
    }

    /// Returns port bandwidth of the node.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Returns incident links (except the loop-back link) in the order they were added.
    pub fn links(&self) -> &[LinkId] {
        &self.links
    }

    /// Returns loop-back link used for intra-host transfers.
    pub fn loopback(&self) -> Option<LinkId> {
        self.loopback
    }

    /// Returns physical routing table.
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Returns virtual forwarding table.
    pub fn forwarding_table(&self) -> &ForwardingTable {
        &self.forwarding_table
    }

    pub(crate) fn add_link(&mut self, link: LinkId) {
        self.links.push(link);
    }

    pub(crate) fn set_loopback(&mut self, link: LinkId) {
        self.loopback = Some(link);
    }

    pub(crate) fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.routing_table
    }

    pub(crate) fn forwarding_table_mut(&mut self) -> &mut ForwardingTable {
        &mut self.forwarding_table
    }
}
