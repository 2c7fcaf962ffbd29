//! Error types.

use thiserror::Error;

use crate::flow::{FlowId, VmId};
use crate::node::NodeId;

/// Errors produced while building the network or resolving virtual flows on it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SdnError {
    /// Node id does not belong to the topology.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// Node with the same name was already added.
    #[error("node with name {0} already exists")]
    DuplicateNode(String),
    /// Node type name cannot be mapped to a tier rank.
    #[error("unknown node type {0}, cannot resolve its rank")]
    UnknownNodeType(String),
    /// Link between the same pair of nodes was already added.
    #[error("link between nodes {0} and {1} already exists")]
    DuplicateLink(NodeId, NodeId),
    /// Explicit link from a node to itself (loop-back links are created automatically).
    #[error("cannot link node {0} to itself")]
    SelfLink(NodeId),
    /// Link bandwidth or flow bandwidth is not a positive finite number.
    #[error("invalid bandwidth {0}")]
    InvalidBandwidth(f64),
    /// Packet size is negative or not finite.
    #[error("invalid packet size {0}")]
    InvalidPacketSize(f64),
    /// Routing table of a node has no candidate link towards the destination.
    #[error("no route from node {from} to host {dst}")]
    NoRoute {
        /// Node where the lookup failed.
        from: NodeId,
        /// Destination host.
        dst: NodeId,
    },
    /// Path resolution visited the same node twice.
    #[error("routing loop at node {node} for flow ({src} -> {dst}, {flow})")]
    RoutingLoop {
        /// Node visited twice.
        node: NodeId,
        /// Source VM.
        src: VmId,
        /// Destination VM.
        dst: VmId,
        /// Flow id.
        flow: FlowId,
    },
    /// Forwarding tables do not describe a complete path for the flow.
    #[error("no forwarding entry at node {node} for flow ({src} -> {dst}, {flow})")]
    NoPath {
        /// Node missing the forwarding entry.
        node: NodeId,
        /// Source VM.
        src: VmId,
        /// Destination VM.
        dst: VmId,
        /// Flow id.
        flow: FlowId,
    },
    /// VM is not registered.
    #[error("unknown vm {0}")]
    UnknownVm(VmId),
    /// Flow is not registered.
    #[error("unknown flow {0}")]
    UnknownFlow(FlowId),
    /// VM is not placed on any host.
    #[error("vm {0} is not placed on any host")]
    VmNotPlaced(VmId),
    /// Node is expected to be a host.
    #[error("node {0} is not a host")]
    NotAHost(NodeId),
    /// Configuration cannot be read or parsed.
    #[error("invalid config: {0}")]
    Config(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, SdnError>;
