//! Policies choosing one link among equal routing candidates.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelKey;
use crate::link::LinkId;
use crate::node::NodeId;
use crate::topology::PhysicalTopology;

/// Chooses the outgoing link for a flow among the candidates of a routing table entry.
pub trait LinkSelectionPolicy {
    /// Returns one of `candidates`, which is never empty.
    fn select_link(
        &self,
        topology: &PhysicalTopology,
        from: NodeId,
        dst_host: NodeId,
        key: &ChannelKey,
        candidates: &[LinkId],
    ) -> LinkId;
}

/// Available link selection policies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkSelection {
    /// [`FirstLinkSelection`].
    First,
    /// [`DestinationAddressSelection`].
    DestinationAddress,
    /// [`BandwidthAllocationSelection`].
    BandwidthAllocation,
}

impl LinkSelection {
    /// Creates the policy.
    pub fn build(&self) -> Box<dyn LinkSelectionPolicy> {
        match self {
            LinkSelection::First => Box::new(FirstLinkSelection),
            LinkSelection::DestinationAddress => Box::new(DestinationAddressSelection),
            LinkSelection::BandwidthAllocation => Box::new(BandwidthAllocationSelection),
        }
    }
}

/// Always takes the first candidate.
pub struct FirstLinkSelection;

impl LinkSelectionPolicy for FirstLinkSelection {
    fn select_link(&self, _: &PhysicalTopology, _: NodeId, _: NodeId, _: &ChannelKey, candidates: &[LinkId]) -> LinkId {
        candidates[0]
    }
}

/// Spreads destinations over candidates by destination host address.
pub struct DestinationAddressSelection;

impl LinkSelectionPolicy for DestinationAddressSelection {
    fn select_link(
        &self,
        _: &PhysicalTopology,
        _: NodeId,
        dst_host: NodeId,
        _: &ChannelKey,
        candidates: &[LinkId],
    ) -> LinkId {
        candidates[dst_host % candidates.len()]
    }
}

/// Takes the candidate with the least allocated bandwidth in the outgoing direction.
///
/// Bandwidth already allocated to the flow itself is not counted, so an established flow is not pushed
/// away from its own link. Ties are broken by destination address.
pub struct BandwidthAllocationSelection;

impl LinkSelectionPolicy for BandwidthAllocationSelection {
    fn select_link(
        &self,
        topology: &PhysicalTopology,
        from: NodeId,
        dst_host: NodeId,
        key: &ChannelKey,
        candidates: &[LinkId],
    ) -> LinkId {
        let free = |link_id: LinkId| {
            let link = topology.link(link_id);
            let dir = link.direction_from(from);
            link.capacity(dir) - link.allocated_bandwidth(dir) + link.allocated_to(dir, key).unwrap_or(0.)
        };
        let best = candidates.iter().map(|l| free(*l)).fold(f64::NEG_INFINITY, f64::max);
        let ties: Vec<LinkId> = candidates
            .iter()
            .copied()
            .filter(|l| (free(*l) - best).abs() <= 1e-9 * best.abs().max(1.))
            .collect();
        ties[dst_host % ties.len()]
    }
}
