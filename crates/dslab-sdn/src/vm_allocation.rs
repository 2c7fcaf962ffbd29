//! VM placement lookup used by the network operating system.

use rustc_hash::FxHashMap;

use crate::flow::VmId;
use crate::node::NodeId;

/// Tells which host each VM runs on.
pub trait VmAllocationPolicy {
    /// Returns the host of the VM.
    fn host_of(&self, vm: VmId) -> Option<NodeId>;
    /// Places the VM on the host, `None` removes the placement.
    fn set_host(&mut self, vm: VmId, host: Option<NodeId>);
}

/// Placement stored in a map and changed explicitly.
#[derive(Default)]
pub struct StaticVmAllocation {
    hosts: FxHashMap<VmId, NodeId>,
}

impl StaticVmAllocation {
    /// Creates empty placement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns VMs placed on the host.
    pub fn vms_on(&self, host: NodeId) -> Vec<VmId> {
        let mut vms: Vec<VmId> = self
            .hosts
            .iter()
            .filter(|(_, h)| **h == host)
            .map(|(vm, _)| *vm)
            .collect();
        vms.sort_unstable();
        vms
    }
}

impl VmAllocationPolicy for StaticVmAllocation {
    fn host_of(&self, vm: VmId) -> Option<NodeId> {
        self.hosts.get(&vm).copied()
    }

    fn set_host(&mut self, vm: VmId, host: Option<NodeId>) {
        match host {
            Some(host) => {
                self.hosts.insert(vm, host);
            }
            None => {
                self.hosts.remove(&vm);
            }
        }
    }
}
